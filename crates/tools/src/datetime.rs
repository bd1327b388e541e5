//! Current date and time, optionally at a fixed UTC offset.

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use parley_core::error::ToolError;
use parley_core::tool::{Tool, ToolContext};
use serde_json::{Value, json};

pub struct DateTimeTool;

#[async_trait]
impl Tool for DateTimeTool {
    fn name(&self) -> &str {
        "get_current_datetime"
    }

    fn description(&self) -> &str {
        "Get the current date and time, optionally at a specific UTC offset."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "utc_offset": {
                    "type": "string",
                    "description": "UTC offset like \"+05:30\" or \"-08:00\". Defaults to UTC.",
                    "default": "UTC"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let label = params["utc_offset"].as_str().unwrap_or("UTC");
        let offset = parse_offset(label)?;
        let now = Utc::now();
        let local = now.with_timezone(&offset);

        Ok(json!({
            "datetime": local.format("%A, %B %-d, %Y at %H:%M:%S %:z").to_string(),
            "utc_offset": local.format("%:z").to_string(),
            "iso": now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            "timestamp": now.timestamp_millis(),
        }))
    }
}

/// Parse `UTC`, `Z`, `+HH:MM`, `-HHMM` or `+HH`.
fn parse_offset(text: &str) -> Result<FixedOffset, ToolError> {
    let invalid = || ToolError::InvalidArguments(format!("unrecognised UTC offset '{text}'"));
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("utc") || trimmed.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, rest) = match trimmed.as_bytes()[0] {
        b'+' => (1, &trimmed[1..]),
        b'-' => (-1, &trimmed[1..]),
        _ => return Err(invalid()),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let (hours, minutes) = match digits.len() {
        1 | 2 => (digits.parse::<i32>().map_err(|_| invalid())?, 0),
        4 => (
            digits[..2].parse::<i32>().map_err(|_| invalid())?,
            digits[2..].parse::<i32>().map_err(|_| invalid())?,
        ),
        _ => return Err(invalid()),
    };
    if hours > 14 || minutes > 59 {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}
