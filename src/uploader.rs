use std::{
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

use anyhow::{Context, Result, bail};
use iocraft::prelude::*;
use serde_json::Value;
use tokio::sync::watch;

use crate::client::{AccessToken, CloudreveClient, UploadSession, UploadTarget};
use crate::transport::Transport;
use crate::ui::ProgressBar;

pub fn remote_uri(app: &str, version: &str, file_name: &str) -> String {
    format!("cloudreve://my/{}/{}/{}", app, version, file_name)
}

/// Stat a local file and fix everything negotiation needs to know about it.
pub fn build_target(path: &Path, app: &str, version: &str, policy_id: &str) -> Result<UploadTarget> {
    let metadata =
        fs::metadata(path).with_context(|| format!("Failed to stat {}", path.display()))?;
    if !metadata.is_file() {
        bail!("{} is not a regular file", path.display());
    }

    let file_name = path
        .file_name()
        .with_context(|| format!("{} has no file name", path.display()))?
        .to_string_lossy();

    // The service keys validation on the declared stamp, not the local
    // mtime, so the current wall clock is what gets sent.
    let last_modified_millis = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("SystemTime before UNIX EPOCH")
        .as_millis() as u64;

    Ok(UploadTarget {
        local_path: path.to_path_buf(),
        remote_uri: remote_uri(app, version, &file_name),
        size_bytes: metadata.len(),
        mime_type: mime_guess::from_path(path).first_raw().map(str::to_string),
        last_modified_millis,
        policy_id: policy_id.to_string(),
    })
}

/// Terminal state of one file in a batch. A finalization failure leaves the
/// file `Done` with the flag cleared; the bytes are on the server either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Done { finalized: bool },
    NegotiationFailed,
    TransferFailed,
}

pub struct BatchResult {
    pub outcomes: Vec<(PathBuf, FileOutcome)>,
    pub links: Option<Value>,
}

/// Sequences negotiation, transfer and finalization across a list of files,
/// one file at a time, then requests direct links for the whole batch.
pub struct Uploader<T> {
    client: CloudreveClient<T>,
    token: Option<AccessToken>,
    app: String,
    version: String,
    policy_id: String,
    chunk_size: u64,
    show_progress: bool,
}

impl<T: Transport> Uploader<T> {
    pub fn new(
        client: CloudreveClient<T>,
        token: Option<AccessToken>,
        app: String,
        version: String,
        policy_id: String,
        chunk_size: u64,
    ) -> Self {
        Self {
            client,
            token,
            app,
            version,
            policy_id,
            chunk_size,
            show_progress: true,
        }
    }

    /// Disable the live progress bar and report with plain status lines.
    pub fn quiet(mut self) -> Self {
        self.show_progress = false;
        self
    }

    pub async fn upload_batch(&self, files: &[PathBuf]) -> BatchResult {
        let mut outcomes = Vec::with_capacity(files.len());
        for path in files {
            println!("Uploading {}", path.display());
            outcomes.push((path.clone(), self.upload_file(path).await));
        }

        // Links are requested for the whole original list, including files
        // that failed above; the service answers for whatever it holds.
        let links = match self
            .client
            .create_direct_links(self.token.as_ref(), self.batch_uris(files))
            .await
        {
            Ok(links) => Some(links),
            Err(error) => {
                eprintln!("Requesting direct links failed: {:#}", error);
                None
            }
        };

        BatchResult { outcomes, links }
    }

    async fn upload_file(&self, path: &Path) -> FileOutcome {
        let target = match build_target(path, &self.app, &self.version, &self.policy_id) {
            Ok(target) => target,
            Err(error) => {
                eprintln!("Skipping {}: {:#}", path.display(), error);
                return FileOutcome::NegotiationFailed;
            }
        };

        let session = match self
            .client
            .create_upload_session(self.token.as_ref(), &target)
            .await
        {
            Ok(session) => session,
            Err(error) => {
                eprintln!(
                    "Opening an upload session for {} failed: {:#}",
                    path.display(),
                    error
                );
                return FileOutcome::NegotiationFailed;
            }
        };

        let mut result = self.run_transfer(&session, &target.local_path).await;
        if result.is_none() {
            println!(
                "Transfer of {} failed, retrying from the start",
                path.display()
            );
            result = self.run_transfer(&session, &target.local_path).await;
        }
        if result.is_none() {
            eprintln!("Transfer of {} failed twice, giving up", path.display());
            return FileOutcome::TransferFailed;
        }

        match self
            .client
            .finalize_upload(self.token.as_ref(), &session)
            .await
        {
            Ok(()) => {
                println!("Uploaded {}", path.display());
                FileOutcome::Done { finalized: true }
            }
            Err(error) => {
                eprintln!(
                    "Upload callback for {} failed: {:#}",
                    path.display(),
                    error
                );
                FileOutcome::Done { finalized: false }
            }
        }
    }

    async fn run_transfer(&self, session: &UploadSession, path: &Path) -> Option<Value> {
        let result = if self.show_progress {
            let (tx, rx) = watch::channel(0.0f32);
            let title = format!("  {}", path.display());
            let mut progress_bar = element!(ProgressBar(title: title, progress: Some(rx)));

            let transfer = self
                .client
                .upload_in_chunks(session, path, self.chunk_size, Some(&tx));
            let result = tokio::select! {
                result = transfer => result,
                _ = progress_bar.render_loop() => {
                    unreachable!("render_loop should not terminate")
                }
            };
            println!();
            result
        } else {
            self.client
                .upload_in_chunks(session, path, self.chunk_size, None)
                .await
        };

        match result {
            Ok(outcome) => outcome,
            Err(error) => {
                eprintln!("Transfer of {} errored: {:#}", path.display(), error);
                None
            }
        }
    }

    fn batch_uris(&self, files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|path| {
                let name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                remote_uri(&self.app, &self.version, &name)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{StubTransport, envelope, response};
    use crate::transport::{HttpRequest, RequestBody};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;
    use url::Url;

    /// Stubbed Cloudreve service: token, negotiation, chunk edge, callback
    /// and direct-link routes. Negotiation is refused for URIs ending in one
    /// of `refuse_uris`; every chunk PUT answers `chunk_status`; the
    /// callback answers `callback_code`.
    fn stub_service(
        refuse_uris: Vec<&'static str>,
        chunk_status: u16,
        callback_code: i64,
    ) -> StubTransport {
        StubTransport::new(move |request, _| {
            if request.url.ends_with("/session/token") {
                return response(200, envelope(0, json!({"token": {"access_token": "tok"}})));
            }
            if request.url.ends_with("/file/upload") {
                let uri = match &request.body {
                    RequestBody::Json(value) => {
                        value["uri"].as_str().unwrap_or_default().to_string()
                    }
                    _ => String::new(),
                };
                if refuse_uris.iter().any(|refused| uri.ends_with(refused)) {
                    return response(200, json!({"code": 40001, "msg": "refused", "data": null}));
                }
                let name = uri.rsplit('/').next().unwrap_or("x").to_string();
                return response(
                    200,
                    envelope(
                        0,
                        json!({
                            "session_id": format!("sess-{}", name),
                            "callback_secret": format!("secret-{}", name),
                            "upload_urls": [format!("https://edge.example/u/{}", name)],
                        }),
                    ),
                );
            }
            if request.url.contains("/callback/onedrive/") {
                return response(200, json!({"code": callback_code, "msg": "", "data": null}));
            }
            if request.url.ends_with("/file/source") {
                return response(200, envelope(0, json!([{"url": "https://pub.example/l1"}])));
            }
            // Everything else is a chunk PUT against the edge URL.
            response(chunk_status, json!({"id": "obj"}))
        })
    }

    fn test_uploader(stub: Arc<StubTransport>) -> Uploader<Arc<StubTransport>> {
        let base_url = Url::parse("https://pan.example.com/api/v4").unwrap();
        let client = CloudreveClient::new(base_url, stub);
        Uploader::new(
            client,
            Some(AccessToken::new("tok".to_string())),
            "demo".to_string(),
            "1.2.3".to_string(),
            "p1".to_string(),
            1024,
        )
        .quiet()
    }

    fn write_files(names: &[&str]) -> (TempDir, Vec<PathBuf>) {
        let dir = tempfile::tempdir().unwrap();
        let paths = names
            .iter()
            .map(|name| {
                let path = dir.path().join(name);
                fs::write(&path, name.as_bytes()).unwrap();
                path
            })
            .collect();
        (dir, paths)
    }

    fn requests_matching(requests: &[HttpRequest], predicate: impl Fn(&str) -> bool) -> usize {
        requests.iter().filter(|r| predicate(&r.url)).count()
    }

    fn direct_link_uris(requests: &[HttpRequest]) -> Vec<String> {
        let request = requests
            .iter()
            .find(|r| r.url.ends_with("/file/source"))
            .expect("no direct-link request was made");
        match &request.body {
            RequestBody::Json(value) => value["uris"]
                .as_array()
                .unwrap()
                .iter()
                .map(|uri| uri.as_str().unwrap().to_string())
                .collect(),
            other => panic!("expected a JSON body, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_batch_uploads_and_finalizes_each_file_once() {
        let (_dir, paths) = write_files(&["a.bin", "b.bin"]);
        let stub = Arc::new(stub_service(vec![], 201, 0));
        let uploader = test_uploader(stub.clone());

        let result = uploader.upload_batch(&paths).await;

        for (_, outcome) in &result.outcomes {
            assert_eq!(*outcome, FileOutcome::Done { finalized: true });
        }
        assert_eq!(result.links, Some(json!([{"url": "https://pub.example/l1"}])));

        let requests = stub.recorded();
        assert_eq!(
            requests_matching(&requests, |url| url.contains("/callback/onedrive/")),
            2
        );
        assert_eq!(
            requests_matching(&requests, |url| url.starts_with("https://edge.example/u/")),
            2
        );
    }

    #[tokio::test]
    async fn test_batch_continues_past_a_failed_negotiation() {
        let (_dir, paths) = write_files(&["a.bin", "b.bin", "c.bin"]);
        let stub = Arc::new(stub_service(vec!["b.bin"], 201, 0));
        let uploader = test_uploader(stub.clone());

        let result = uploader.upload_batch(&paths).await;

        let outcomes: Vec<&FileOutcome> = result.outcomes.iter().map(|(_, o)| o).collect();
        assert_eq!(
            outcomes,
            vec![
                &FileOutcome::Done { finalized: true },
                &FileOutcome::NegotiationFailed,
                &FileOutcome::Done { finalized: true },
            ]
        );

        let requests = stub.recorded();
        assert_eq!(
            requests_matching(&requests, |url| url.contains("/callback/onedrive/")),
            2
        );
        // The direct-link request still names the full original list, the
        // refused file included.
        assert_eq!(
            direct_link_uris(&requests),
            vec![
                "cloudreve://my/demo/1.2.3/a.bin",
                "cloudreve://my/demo/1.2.3/b.bin",
                "cloudreve://my/demo/1.2.3/c.bin",
            ]
        );
    }

    #[tokio::test]
    async fn test_transfer_retries_once_then_skips_finalization() {
        let (_dir, paths) = write_files(&["a.bin"]);
        let stub = Arc::new(stub_service(vec![], 500, 0));
        let uploader = test_uploader(stub.clone());

        let result = uploader.upload_batch(&paths).await;

        assert_eq!(result.outcomes[0].1, FileOutcome::TransferFailed);

        let requests = stub.recorded();
        // Initial attempt plus exactly one restart-from-zero retry, each
        // aborted on its first chunk.
        assert_eq!(
            requests_matching(&requests, |url| url.starts_with("https://edge.example/u/")),
            2
        );
        assert_eq!(
            requests_matching(&requests, |url| url.contains("/callback/onedrive/")),
            0
        );
        // Odd but intentional: links are still requested for the failed file.
        assert_eq!(direct_link_uris(&requests).len(), 1);
    }

    #[tokio::test]
    async fn test_finalization_failure_leaves_the_file_done() {
        let (_dir, paths) = write_files(&["a.bin"]);
        let stub = Arc::new(stub_service(vec![], 201, 50001));
        let uploader = test_uploader(stub.clone());

        let result = uploader.upload_batch(&paths).await;

        assert_eq!(result.outcomes[0].1, FileOutcome::Done { finalized: false });
        assert!(result.links.is_some());

        let requests = stub.recorded();
        assert_eq!(
            requests_matching(&requests, |url| url.contains("/callback/onedrive/")),
            1
        );
    }

    #[tokio::test]
    async fn test_missing_file_fails_negotiation_without_requests() {
        let stub = Arc::new(stub_service(vec![], 201, 0));
        let uploader = test_uploader(stub.clone());

        let paths = vec![PathBuf::from("/definitely/not/here.bin")];
        let result = uploader.upload_batch(&paths).await;

        assert_eq!(result.outcomes[0].1, FileOutcome::NegotiationFailed);
        let requests = stub.recorded();
        assert_eq!(
            requests_matching(&requests, |url| url.ends_with("/file/upload")),
            0
        );
    }

    #[test]
    fn test_remote_uri_shape() {
        assert_eq!(
            remote_uri("demo", "1.2.3", "app.zip"),
            "cloudreve://my/demo/1.2.3/app.zip"
        );
    }

    #[test]
    fn test_build_target_guesses_mime_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, b"hello").unwrap();

        let target = build_target(&path, "demo", "1.2.3", "p1").unwrap();
        assert_eq!(target.size_bytes, 5);
        assert_eq!(target.mime_type.as_deref(), Some("text/plain"));
        assert_eq!(target.remote_uri, "cloudreve://my/demo/1.2.3/notes.txt");

        let path = dir.path().join("blob.no-such-ext");
        fs::write(&path, b"x").unwrap();
        let target = build_target(&path, "demo", "1.2.3", "p1").unwrap();
        assert_eq!(target.mime_type, None);
    }
}
