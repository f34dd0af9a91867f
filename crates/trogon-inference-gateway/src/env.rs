//! Environment variable access behind a trait, so configuration can be
//! resolved from the real process environment or from an in-memory map.
//!
//! ```
//! use trogon_inference_gateway::env::{ReadEnv, SystemEnv};
//!
//! fn backend_url<E: ReadEnv>(env: &E) -> String {
//!     env.var("GATEWAY_BACKEND_URL")
//!         .unwrap_or_else(|_| "http://localhost:8501".to_string())
//! }
//!
//! let _url = backend_url(&SystemEnv);
//! ```

use std::env::VarError;

pub trait ReadEnv {
    fn var(&self, key: &str) -> Result<String, VarError>;
}

/// Reads from the real process environment.
pub struct SystemEnv;

impl ReadEnv for SystemEnv {
    #[inline]
    fn var(&self, key: &str) -> Result<String, VarError> {
        std::env::var(key)
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use in_memory::InMemoryEnv;

#[cfg(any(test, feature = "test-support"))]
mod in_memory {
    use std::collections::HashMap;
    use std::env::VarError;
    use std::sync::Mutex;

    use super::ReadEnv;

    /// Never touches the global process environment.
    ///
    /// Backed by a `Mutex` so the same instance can be shared with code under
    /// test running on a multi-threaded runtime.
    #[derive(Default)]
    pub struct InMemoryEnv {
        vars: Mutex<HashMap<String, String>>,
    }

    impl InMemoryEnv {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
            self.vars
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(key.into(), value.into());
        }

        pub fn remove(&self, key: &str) {
            self.vars
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(key);
        }
    }

    impl ReadEnv for InMemoryEnv {
        fn var(&self, key: &str) -> Result<String, VarError> {
            self.vars
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get(key)
                .cloned()
                .ok_or(VarError::NotPresent)
        }
    }
}
