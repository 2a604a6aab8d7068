use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use reqwest::{
    Method, StatusCode,
    header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, HeaderValue, USER_AGENT},
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use url::Url;

use crate::rest_types::{
    ApiEnvelope, CreateUploadSessionRequest, DirectLinkRequest, TokenData, TokenRequest,
    UploadSessionData,
};
use crate::transport::{HttpRequest, HttpResponse, RequestBody, Transport};

pub const DEFAULT_CHUNK_SIZE: u64 = 3_276_800;

// Cloudreve rejects API clients it does not recognize, so every API call
// identifies as a desktop browser.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36 Edg/142.0.0.0";

const TOKEN_ROUTE: &str = "session/token";
const UPLOAD_SESSION_ROUTE: &str = "file/upload";
const DIRECT_LINK_ROUTE: &str = "file/source";

/// Bearer token for authenticated API calls. Obtained once via
/// [`CloudreveClient::request_token`] and passed explicitly to every request
/// builder that needs it; re-authentication means requesting a fresh value.
#[derive(Debug, Clone)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One file queued for upload, fixed before negotiation.
#[derive(Debug, Clone)]
pub struct UploadTarget {
    pub local_path: PathBuf,
    pub remote_uri: String,
    pub size_bytes: u64,
    pub mime_type: Option<String>,
    pub last_modified_millis: u64,
    pub policy_id: String,
}

/// Server-allocated upload slot for a single file. Consumed by the transfer
/// engine and the finalization callback, then discarded.
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub session_id: String,
    pub callback_secret: String,
    pub upload_url: String,
    pub file_size: u64,
}

/// How the upload edge answered one chunk.
#[derive(Debug)]
enum ChunkOutcome {
    Continue(u64),
    Complete(Value),
    Failed(StatusCode),
}

fn interpret_chunk_status(status: StatusCode, body: Value, next_start: u64) -> ChunkOutcome {
    match status.as_u16() {
        200 | 201 => ChunkOutcome::Complete(body),
        202 => ChunkOutcome::Continue(next_start),
        _ => ChunkOutcome::Failed(status),
    }
}

fn api_headers(token: Option<&AccessToken>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    if let Some(token) = token {
        let value = HeaderValue::from_str(&format!("Bearer {}", token.as_str()))
            .context("Access token is not a valid header value")?;
        headers.insert(AUTHORIZATION, value);
    }
    Ok(headers)
}

pub struct CloudreveClient<T> {
    transport: T,
    base_url: Url,
}

impl<T: Transport> CloudreveClient<T> {
    pub fn new(base_url: Url, transport: T) -> Self {
        Self {
            transport,
            base_url,
        }
    }

    fn endpoint(&self, route: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            route.trim_start_matches('/')
        )
    }

    async fn call_api<D: DeserializeOwned>(
        &self,
        method: Method,
        route: &str,
        token: Option<&AccessToken>,
        body: Option<Value>,
    ) -> Result<ApiEnvelope<D>> {
        let request = HttpRequest {
            method,
            url: self.endpoint(route),
            headers: api_headers(token)?,
            body: body.map(RequestBody::Json).unwrap_or(RequestBody::Empty),
        };

        let response = self.transport.exchange(request).await?;
        if !response.status.is_success() {
            bail!(
                "{} returned {}: {}",
                route,
                response.status,
                response.body
            );
        }

        serde_json::from_value(response.body)
            .with_context(|| format!("Malformed response from {}", route))
    }

    /// Exchange account credentials for a bearer token.
    pub async fn request_token(&self, email: &str, password: &str) -> Result<AccessToken> {
        let body = serde_json::to_value(TokenRequest {
            email: email.to_string(),
            password: password.to_string(),
        })?;

        let envelope: ApiEnvelope<TokenData> = self
            .call_api(Method::POST, TOKEN_ROUTE, None, Some(body))
            .await?;

        if envelope.code != 0 {
            bail!(
                "Token request rejected: code {} {}",
                envelope.code,
                envelope.msg
            );
        }

        let data = envelope.data.context("Token response carried no data")?;
        Ok(AccessToken::new(data.token.access_token))
    }

    /// Ask the service to open an upload slot for one file. A single attempt;
    /// any failure here means the caller skips the file.
    pub async fn create_upload_session(
        &self,
        token: Option<&AccessToken>,
        target: &UploadTarget,
    ) -> Result<UploadSession> {
        let body = serde_json::to_value(CreateUploadSessionRequest {
            uri: target.remote_uri.clone(),
            size: target.size_bytes,
            policy_id: target.policy_id.clone(),
            last_modified: target.last_modified_millis,
            mime_type: target.mime_type.clone(),
        })?;

        let envelope: ApiEnvelope<UploadSessionData> = self
            .call_api(Method::PUT, UPLOAD_SESSION_ROUTE, token, Some(body))
            .await?;

        if envelope.code != 0 {
            bail!(
                "Upload slot refused for {}: code {} {}",
                target.remote_uri,
                envelope.code,
                envelope.msg
            );
        }

        let data = envelope
            .data
            .context("Upload session response carried no data")?;
        let upload_url = data
            .upload_urls
            .into_iter()
            .next()
            .context("Upload session response carried no upload URL")?;

        Ok(UploadSession {
            session_id: data.session_id,
            callback_secret: data.callback_secret,
            upload_url,
            file_size: target.size_bytes,
        })
    }

    /// Upload a file's bytes to the session's upload URL in sequential
    /// byte-range chunks, one outstanding request at a time. The server
    /// answers 202 to ask for the next range and 200/201 to accept the final
    /// one; the response body of that final chunk is returned. Any other
    /// status aborts the transfer and yields `None` — the caller owns retry
    /// policy, and a retry restarts from offset zero.
    pub async fn upload_in_chunks(
        &self,
        session: &UploadSession,
        path: &Path,
        chunk_size: u64,
        progress: Option<&watch::Sender<f32>>,
    ) -> Result<Option<Value>> {
        let file_size = session.file_size;

        // An empty file has no bytes to transfer; the slot is complete as
        // negotiated and finalization can proceed directly.
        if file_size == 0 {
            if let Some(progress) = progress {
                let _ = progress.send(100.0);
            }
            return Ok(Some(Value::Null));
        }

        let mut file = File::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let mut buffer = vec![0u8; chunk_size as usize];
        let mut start = 0u64;

        while start < file_size {
            let end = (start + chunk_size).min(file_size) - 1;
            let len = (end - start + 1) as usize;

            file.seek(SeekFrom::Start(start))
                .context("Failed to seek to chunk start")?;
            file.read_exact(&mut buffer[..len])
                .context("Failed to read chunk")?;

            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_LENGTH, HeaderValue::from(len as u64));
            headers.insert(
                CONTENT_RANGE,
                HeaderValue::from_str(&format!("bytes {}-{}/{}", start, end, file_size))?,
            );

            let request = HttpRequest {
                method: Method::PUT,
                url: session.upload_url.clone(),
                headers,
                // The upload URL is pre-authorized, no bearer token here.
                body: RequestBody::Bytes(buffer[..len].to_vec()),
            };

            let HttpResponse { status, body } = self.transport.exchange(request).await?;

            match interpret_chunk_status(status, body, end + 1) {
                ChunkOutcome::Continue(next_start) => {
                    start = next_start;
                    if let Some(progress) = progress {
                        let _ = progress.send(start as f32 / file_size as f32 * 100.0);
                    }
                }
                ChunkOutcome::Complete(body) => {
                    if let Some(progress) = progress {
                        let _ = progress.send(100.0);
                    }
                    return Ok(Some(body));
                }
                ChunkOutcome::Failed(status) => {
                    eprintln!(
                        "Chunk {}-{} of {} rejected with status {}",
                        start, end, file_size, status
                    );
                    return Ok(None);
                }
            }
        }

        // The server asked for more after the final range; nothing is left
        // to send, so the transfer did not complete.
        Ok(None)
    }

    /// Tell the service the transfer is done so it validates the uploaded
    /// object. Must only run after [`Self::upload_in_chunks`] reported
    /// completion, and at most once per session.
    pub async fn finalize_upload(
        &self,
        token: Option<&AccessToken>,
        session: &UploadSession,
    ) -> Result<()> {
        let route = format!(
            "callback/onedrive/{}/{}",
            session.session_id, session.callback_secret
        );

        let envelope: ApiEnvelope<Value> =
            self.call_api(Method::POST, &route, token, None).await?;

        if envelope.code != 0 {
            bail!(
                "Upload callback rejected: code {} {}",
                envelope.code,
                envelope.msg
            );
        }
        Ok(())
    }

    /// Request public direct links for a batch of remote URIs.
    pub async fn create_direct_links(
        &self,
        token: Option<&AccessToken>,
        uris: Vec<String>,
    ) -> Result<Value> {
        let body = serde_json::to_value(DirectLinkRequest { uris })?;

        let envelope: ApiEnvelope<Value> = self
            .call_api(Method::PUT, DIRECT_LINK_ROUTE, token, Some(body))
            .await?;

        if envelope.code != 0 {
            bail!(
                "Direct link request rejected: code {} {}",
                envelope.code,
                envelope.msg
            );
        }
        envelope.data.context("Direct link response carried no data")
    }
}
