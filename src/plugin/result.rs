//! Per-seed probe result

use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde_json::Value;
use std::fmt;

/// Terminal state of one probe task
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Probe returned a value (which may be JSON `null`)
    Completed(Value),

    /// Probe exceeded the pool timeout; holds the timeout description
    TimedOut(String),

    /// Probe raised an error or panicked; holds the error message
    Failed(String),
}

/// Result of probing a single seed.
///
/// Exactly one of [`data`](Self::data) / [`exception`](Self::exception) is
/// populated. A probe that succeeds with JSON `null` still reports
/// `Some(Value::Null)` as its data.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    /// The seed, stripped of surrounding whitespace
    pub seed: String,

    /// How the task ended
    pub outcome: Outcome,
}

impl ProbeResult {
    pub fn completed(seed: impl Into<String>, data: Value) -> Self {
        Self {
            seed: seed.into(),
            outcome: Outcome::Completed(data),
        }
    }

    pub fn timed_out(seed: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            seed: seed.into(),
            outcome: Outcome::TimedOut(message.into()),
        }
    }

    pub fn failed(seed: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            seed: seed.into(),
            outcome: Outcome::Failed(message.into()),
        }
    }

    /// Probe data, present only for completed tasks
    pub fn data(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    /// Exception text, present only for timed out or failed tasks
    pub fn exception(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Completed(_) => None,
            Outcome::TimedOut(msg) | Outcome::Failed(msg) => Some(msg),
        }
    }
}

/// Serialized as `{"seed": .., "data": .., "exception": ..}`
impl Serialize for ProbeResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ProbeResult", 3)?;
        state.serialize_field("seed", &self.seed)?;
        state.serialize_field("data", &self.data())?;
        state.serialize_field("exception", &self.exception())?;
        state.end()
    }
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = match self.data() {
            Some(Value::String(s)) => s.clone(),
            Some(value) => value.to_string(),
            None => "None".to_string(),
        };
        write!(
            f,
            "seed: \"{}\", data: \"{}\", exception: \"{}\"",
            self.seed,
            data,
            self.exception().unwrap_or("None")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_exactly_one_populated() {
        let results = [
            ProbeResult::completed("a", json!({"ok": true})),
            ProbeResult::completed("b", Value::Null),
            ProbeResult::timed_out("c", "probe timed out after 1 second"),
            ProbeResult::failed("d", "connection refused"),
        ];
        for result in &results {
            assert!(result.data().is_some() ^ result.exception().is_some());
        }
        assert_eq!(results[1].data(), Some(&Value::Null));
    }

    #[test]
    fn test_serialized_shape() {
        let ok = serde_json::to_value(ProbeResult::completed("Jone", json!("Hello"))).unwrap();
        assert_eq!(ok, json!({"seed": "Jone", "data": "Hello", "exception": null}));

        let err = serde_json::to_value(ProbeResult::failed("Jone", "bad")).unwrap();
        assert_eq!(err, json!({"seed": "Jone", "data": null, "exception": "bad"}));
    }

    #[test]
    fn test_display_line() {
        let line = ProbeResult::completed("Jone,18", json!("Hello World! Jone,18, 18")).to_string();
        assert_eq!(
            line,
            "seed: \"Jone,18\", data: \"Hello World! Jone,18, 18\", exception: \"None\""
        );
    }
}
