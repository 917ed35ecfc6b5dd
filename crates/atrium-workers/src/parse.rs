use serde_json::Value;

/// Result of decoding a model's text output. Malformed JSON is not an error
/// path: it degrades to `RawText` and the specialist salvages what it can.
#[derive(Debug, Clone)]
pub enum ParseOutcome {
    Structured(Value),
    RawText(String),
}

pub fn decode_model_output(raw: &str) -> ParseOutcome {
    let trimmed = raw.trim();
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value @ Value::Object(_)) => ParseOutcome::Structured(value),
        _ => ParseOutcome::RawText(trimmed.to_string()),
    }
}

/// Models report confidence either as a ratio or as percent points; clamp
/// everything onto `[0, 1]`.
pub fn normalize_confidence(value: Option<&Value>, default: f64) -> f64 {
    let raw = value.and_then(Value::as_f64).unwrap_or(default);
    let ratio = if raw > 1.0 { raw / 100.0 } else { raw };
    ratio.clamp(0.0, 1.0)
}
