//! Phase outputs emitted on stdout
//!
//! Commands publish outputs by printing lines of the form
//!
//! ```text
//! ###Phase-output###: {"key":"version","value":"8.0.36"}
//! ```

use serde::{Deserialize, Serialize};
use stanza_core::{Error, OutputMap, Result, Value};

/// Line prefix marking a phase output
pub const PHASE_OUTPUT_MARKER: &str = "###Phase-output###:";

#[derive(Debug, Serialize, Deserialize)]
struct KeyValue {
    key: String,
    value: Value,
}

/// Collect every phase output printed in `log`
///
/// Later lines overwrite earlier ones with the same key.
///
/// # Errors
/// [`Error::OperationFailure`] if a marked line is not valid JSON
pub fn parse_log_and_create_output(log: &str) -> Result<OutputMap> {
    let mut outputs = OutputMap::new();
    for line in log.lines() {
        let Some(payload) = line.trim_start().strip_prefix(PHASE_OUTPUT_MARKER) else {
            continue;
        };
        let kv: KeyValue = serde_json::from_str(payload.trim())
            .map_err(|e| Error::operation("Failed to parse phase output", e))?;
        outputs.insert(kv.key, kv.value);
    }
    Ok(outputs)
}

/// Render one output line
#[must_use]
pub fn phase_output_line(key: &str, value: impl Into<Value>) -> String {
    let kv = KeyValue {
        key: key.to_string(),
        value: value.into(),
    };
    // KeyValue always serializes.
    let json = serde_json::to_string(&kv).unwrap_or_default();
    format!("{PHASE_OUTPUT_MARKER} {json}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collects_marked_lines_only() {
        let log = [
            "starting dump".to_string(),
            phase_output_line("version", "8.0.36"),
            format!("  {}", phase_output_line("rows", 42)),
            "done".to_string(),
        ]
        .join("\n");

        let outputs = parse_log_and_create_output(&log).unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs["version"], json!("8.0.36"));
        assert_eq!(outputs["rows"], json!(42));
    }

    #[test]
    fn later_lines_win() {
        let log = format!(
            "{}\n{}",
            phase_output_line("k", "a"),
            phase_output_line("k", "b")
        );
        assert_eq!(parse_log_and_create_output(&log).unwrap()["k"], json!("b"));
    }

    #[test]
    fn malformed_output_is_an_error() {
        let err = parse_log_and_create_output("###Phase-output###: {not json").unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse phase output"));
    }
}
