use serde::Serialize;
use serde_json::Value;

pub mod codes {
    pub const E_SCHEMA: &str = "E_SCHEMA";
    pub const E_MIGRATION: &str = "E_MIGRATION";
    pub const E_BASE_INCOMPATIBLE: &str = "E_BASE_INCOMPATIBLE";
    pub const E_REPLAY_MISMATCH: &str = "E_REPLAY_MISMATCH";
    pub const E_ENV_PIN: &str = "E_ENV_PIN";
    pub const E_ADAPTER_TIMEOUT: &str = "E_ADAPTER_TIMEOUT";
    pub const E_ADAPTER_PROTOCOL: &str = "E_ADAPTER_PROTOCOL";
    pub const E_JUDGE_UNAVAILABLE: &str = "E_JUDGE_UNAVAILABLE";
    pub const E_TOOL_RESOLUTION: &str = "E_TOOL_RESOLUTION";
    pub const E_PATH_NOT_FOUND: &str = "E_PATH_NOT_FOUND";
    pub const E_IO: &str = "E_IO";
}

/// Machine-readable failure carried inside `anyhow::Error`. Every
/// unrecoverable failure surfaces as `{"error":{code,message,details}}`.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl Diagnostic {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: Value::Null,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for Diagnostic {}

/// Downcasts an `anyhow::Error` back to its `Diagnostic`, if it carries one.
pub fn try_map_error(err: &anyhow::Error) -> Option<&Diagnostic> {
    err.downcast_ref::<Diagnostic>()
}

/// The structured error object printed on the error channel.
pub fn structured_error(err: &anyhow::Error) -> Value {
    let diag = match try_map_error(err) {
        Some(d) => d.clone(),
        None => Diagnostic::new(codes::E_IO, err.to_string()),
    };
    serde_json::json!({ "error": diag })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_roundtrips_through_anyhow() {
        let err = anyhow::Error::new(
            Diagnostic::new(codes::E_SCHEMA, "bad suite")
                .with_details(serde_json::json!({ "path": "x.json" })),
        );
        let diag = try_map_error(&err).expect("diagnostic present");
        assert_eq!(diag.code, codes::E_SCHEMA);

        let obj = structured_error(&err);
        assert_eq!(obj["error"]["code"], "E_SCHEMA");
        assert_eq!(obj["error"]["details"]["path"], "x.json");
    }

    #[test]
    fn plain_errors_fall_back_to_io_code() {
        let err = anyhow::anyhow!("disk on fire");
        let obj = structured_error(&err);
        assert_eq!(obj["error"]["code"], "E_IO");
        assert_eq!(obj["error"]["message"], "disk on fire");
    }
}
