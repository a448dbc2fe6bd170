use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound body. `image` is kept untyped so a falsy value is a missing image
/// rather than a malformed body.
#[derive(Debug, Default, Deserialize)]
pub struct ExtractionRequest {
    #[serde(default)]
    pub image: Option<Value>,
}

impl ExtractionRequest {
    /// The image as a non-empty string. Falsy values (`null`, `false`, `0`, `""`)
    /// and non-string values carry no usable image.
    pub fn image(&self) -> Option<&str> {
        self.image
            .as_ref()
            .and_then(Value::as_str)
            .filter(|image| !image.is_empty())
    }
}

/// Normalized answer returned to the shortcut. Absent fields are `""`, never omitted.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionResult {
    pub title: String,
    pub content: String,
    pub location: String,
    pub time: String,
    pub requirements: String,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub data: ExtractionResult,
}

impl SuccessResponse {
    pub fn new(data: ExtractionResult) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FailureResponse {
    pub success: bool,
    pub error: String,
}

impl FailureResponse {
    pub fn new(error: String) -> Self {
        Self {
            success: false,
            error,
        }
    }
}

/// Body of the early guard responses (405, 400, missing key).
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
