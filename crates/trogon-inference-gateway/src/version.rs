//! Model version identifiers and backend route targets.

use std::fmt;
use std::num::NonZeroU64;

/// A deployed, immutable model artifact, identified by a positive integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelVersion(NonZeroU64);

/// Errors produced when parsing a [`ModelVersion`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    #[error("version must not be empty")]
    Empty,
    #[error("version must be a positive integer, got {0:?}")]
    NotAnInteger(String),
    #[error("version must be greater than zero")]
    Zero,
}

impl ModelVersion {
    pub fn new(version: u64) -> Option<Self> {
        NonZeroU64::new(version).map(Self)
    }

    /// Parse a decimal version. Only ASCII digits are accepted: no sign,
    /// no surrounding whitespace.
    pub fn parse(raw: &str) -> Result<Self, VersionError> {
        if raw.is_empty() {
            return Err(VersionError::Empty);
        }
        if !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(VersionError::NotAnInteger(raw.to_string()));
        }
        let value: u64 = raw
            .parse()
            .map_err(|_| VersionError::NotAnInteger(raw.to_string()))?;
        Self::new(value).ok_or(VersionError::Zero)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ModelVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Which serving path a backend call goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteTarget {
    /// The backend's default / currently active version.
    Default,
    /// An explicitly named version.
    Specific(ModelVersion),
}

impl RouteTarget {
    /// Predict URL for this target under the TensorFlow-Serving REST layout.
    ///
    /// `base_url` may carry a trailing slash; it is ignored.
    pub fn predict_url(&self, base_url: &str, model: &str) -> String {
        let base = base_url.trim_end_matches('/');
        match self {
            Self::Default => format!("{base}/v1/models/{model}:predict"),
            Self::Specific(version) => {
                format!("{base}/v1/models/{model}/versions/{version}:predict")
            }
        }
    }
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::Specific(v) => write!(f, "v{v}"),
        }
    }
}
