//! Wire protocol of the command channel.
//!
//! Inbound, one JSON object per message:
//!
//! | Shape | Meaning |
//! |---|---|
//! | `{"items": [ ... ]}` | run a whole pattern |
//! | `{"command": "forward"\|"backward"\|"left"\|"right"\|"spray", "state": "pressed"\|"released"}` | manual button edge |
//!
//! Outbound, plain text tokens with no delimiter: `BATTERY:<pct>` with one
//! decimal and `PROGRESS:<current>/<total>`.

use fieldbot_runtime::ManualAction;
use fieldbot_types::{FieldError, ParserConfig, Pattern, Progress, TelemetrySnapshot};
use serde_json::Value;

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Pattern(Pattern),
    Manual(ManualAction),
}

/// Decide what an inbound value asks for.
///
/// Anything carrying an `items` key is a pattern; everything else must be a
/// manual command.
///
/// # Errors
///
/// [`FieldError::MalformedInput`] when the value is neither.
pub fn classify(message: &Value, parser: &ParserConfig) -> Result<Inbound, FieldError> {
    if message.get("items").is_some() {
        return Pattern::parse(message, parser).map(Inbound::Pattern);
    }
    serde_json::from_value::<ManualAction>(message.clone())
        .map(Inbound::Manual)
        .map_err(|e| FieldError::MalformedInput(format!("not a pattern or manual command: {e}")))
}

pub fn battery_token(percent: f64) -> String {
    format!("BATTERY:{percent:.1}")
}

pub fn progress_token(progress: Progress) -> String {
    format!("PROGRESS:{}/{}", progress.current, progress.total)
}

/// Tokens for one telemetry sample, battery first.
pub fn telemetry_tokens(snapshot: &TelemetrySnapshot) -> [String; 2] {
    [
        battery_token(snapshot.battery_percent),
        progress_token(snapshot.progress),
    ]
}
