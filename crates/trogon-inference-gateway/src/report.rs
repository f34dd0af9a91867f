//! Agreement summary over a canary comparison.
//!
//! Two predictions agree when their first outputs round to the same class.
//! Rounding is half-to-even, so `0.5` is class 0 and `1.5` is class 2.

use std::fmt;

use serde::Deserialize;
use serde_json::Value;

/// Body of a successful `/canary` reply.
#[derive(Debug, Clone, Deserialize)]
pub struct CanaryReply {
    pub version_a: Vec<Value>,
    pub version_b: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Agreement {
    /// Pairs whose first outputs round to the same class.
    pub matching: usize,
    /// Number of predictions returned for version_a.
    pub total: usize,
}

impl fmt::Display for Agreement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Number of matching predictions: {} out of {}",
            self.matching, self.total
        )
    }
}

impl CanaryReply {
    pub fn agreement(&self) -> Agreement {
        let matching = self
            .version_a
            .iter()
            .zip(&self.version_b)
            .filter(|(a, b)| match (class_of(a), class_of(b)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            })
            .count();

        Agreement {
            matching,
            total: self.version_a.len(),
        }
    }
}

/// Rounded first output of one prediction. A bare number counts as its own
/// first output.
fn class_of(prediction: &Value) -> Option<f64> {
    let first = match prediction {
        Value::Array(outputs) => outputs.first()?,
        other => other,
    };
    first.as_f64().map(f64::round_ties_even)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reply(a: Value, b: Value) -> CanaryReply {
        serde_json::from_value(json!({ "version_a": a, "version_b": b })).unwrap()
    }

    #[test]
    fn counts_rounded_first_output_matches() {
        let r = reply(
            json!([[0.9], [0.2], [0.7], [0.4]]),
            json!([[0.6], [0.1], [0.3], [0.8]]),
        );
        assert_eq!(
            r.agreement(),
            Agreement {
                matching: 2,
                total: 4
            }
        );
    }

    #[test]
    fn only_first_output_is_compared() {
        let r = reply(json!([[0.9, 0.0]]), json!([[0.8, 1.0]]));
        assert_eq!(r.agreement().matching, 1);
    }

    #[test]
    fn halves_round_to_even() {
        let r = reply(json!([[0.5], [1.5]]), json!([[0.0], [2.0]]));
        assert_eq!(r.agreement().matching, 2);
    }

    #[test]
    fn scalar_predictions_are_supported() {
        let r = reply(json!([1.0, 0.0]), json!([0.9, 0.9]));
        assert_eq!(r.agreement().matching, 1);
    }

    #[test]
    fn non_numeric_outputs_never_match() {
        let r = reply(json!([["cat"], []]), json!([["cat"], []]));
        assert_eq!(r.agreement().matching, 0);
    }

    #[test]
    fn total_follows_version_a_when_lengths_differ() {
        let r = reply(json!([[1.0], [1.0], [1.0]]), json!([[1.0]]));
        assert_eq!(
            r.agreement(),
            Agreement {
                matching: 1,
                total: 3
            }
        );
    }

    #[test]
    fn display_matches_operator_output() {
        let a = Agreement {
            matching: 9,
            total: 10,
        };
        assert_eq!(a.to_string(), "Number of matching predictions: 9 out of 10");
    }
}
