use serde::{Deserialize, Serialize};

use super::ApiError;

/// Body wrapper used by every backend endpoint:
/// `{ "isSuccess": bool, "code": ..., "message": ..., "result": ... }`.
///
/// `isSuccess: false` arrives with a 2xx status, so the transport layer
/// treats it as a success; unwrapping it is the caller's business.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEnvelope<T> {
    pub is_success: bool,
    #[serde(default)]
    pub code: Option<serde_json::Value>,
    #[serde(default)]
    pub message: Option<String>,
    pub result: Option<T>,
}

impl<T> ApiEnvelope<T> {
    pub fn into_result(self) -> Result<T, ApiError> {
        if !self.is_success {
            return Err(ApiError::Business {
                code: self.code.map(|c| match c {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                }),
                message: self.message.unwrap_or_else(|| "no message".to_string()),
            });
        }
        self.result
            .ok_or_else(|| ApiError::InvalidResponse("Successful response carried no result".to_string()))
    }
}

/// Token pair as returned by sign-in and refresh
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TokenPayload {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}
