use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope wrapping every JSON payload the Cloudreve API returns. A request
/// succeeded when `code` is zero; `msg` carries the server's explanation
/// otherwise.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    pub data: Option<T>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenData {
    pub token: TokenPair,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateUploadSessionRequest {
    pub uri: String,
    pub size: u64,
    pub policy_id: String,
    pub last_modified: u64,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadSessionData {
    pub session_id: String,
    pub callback_secret: String,
    pub upload_urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectLinkRequest {
    pub uris: Vec<String>,
}
