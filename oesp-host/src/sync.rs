//! HTTP sync client: upload a JSON Lines journal of tokens through `/sync/start`,
//! `/sync/upload` and `/sync/commit`, pipelining chunk uploads with the windowed sender.

use oesp_core::integrity::chunk_hash_b64url;
use oesp_core::{b64, Commit, TransportConfig, WindowedSender};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{endpoint} returned status {status}")]
    Status { endpoint: &'static str, status: u16 },
    #[error("chunk {seq} not accepted after retries")]
    ChunkDropped { seq: u32 },
    #[error("upload task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Outcome of [`SyncClient::sync_tokens`]. Failures are reported here, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub success: bool,
    pub uploaded_count: usize,
    pub total_bytes: usize,
    pub session_id: Option<String>,
    pub error: Option<String>,
}

impl SyncSummary {
    fn failed(session_id: Option<String>, err: &SyncError) -> Self {
        Self {
            success: false,
            uploaded_count: 0,
            total_bytes: 0,
            session_id,
            error: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    session_id: String,
}

#[derive(Debug, Serialize)]
struct CommitRequest<'a> {
    session_id: &'a str,
    final_hash: String,
    total_chunks: u32,
    allow_expired: bool,
}

/// One line per token: `{"token":"OESP1..."}`, joined with `\n`.
pub fn build_journal<S: AsRef<str>>(tokens: &[S]) -> Vec<u8> {
    tokens
        .iter()
        .map(|t| json!({ "token": t.as_ref() }).to_string())
        .collect::<Vec<_>>()
        .join("\n")
        .into_bytes()
}

#[derive(Clone)]
pub struct SyncClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    transport: TransportConfig,
}

impl SyncClient {
    pub fn new(config: &Config) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(config.sync_timeout())
            .build()?;
        Ok(Self {
            http,
            base_url: config.sync_base_url.trim_end_matches('/').to_string(),
            api_key: config.sync_api_key.clone(),
            transport: config.sync_transport(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn set_base_url(&mut self, url: impl Into<String>) {
        self.base_url = url.into().trim_end_matches('/').to_string();
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let req = self.http.post(format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    /// Open a sync session for `did`. Returns the server's session id.
    pub async fn start(
        &self,
        did: &str,
        pub_b64: Option<&str>,
        meta: Option<&Value>,
    ) -> Result<String, SyncError> {
        let res = self
            .post("/sync/start")
            .json(&json!({ "did": did, "pub": pub_b64, "meta": meta }))
            .send()
            .await?;
        check_status("/sync/start", &res)?;
        let body: StartResponse = res.json().await?;
        debug!(session_id = %body.session_id, "sync session started");
        Ok(body.session_id)
    }

    /// Upload one chunk. A 2xx reply acknowledges it.
    pub async fn upload_chunk(
        &self,
        session_id: &str,
        index: u32,
        chunk: Vec<u8>,
    ) -> Result<(), SyncError> {
        let res = self
            .post("/sync/upload")
            .header("X-Session-ID", session_id)
            .header("X-Chunk-Index", index.to_string())
            .header("X-Chunk-SHA256", chunk_hash_b64url(&chunk))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(chunk)
            .send()
            .await?;
        check_status("/sync/upload", &res)
    }

    /// Upload `payload` in windowed chunks. Returns the commit for the acknowledged chunks.
    pub async fn upload(&self, session_id: &str, payload: &[u8]) -> Result<Commit, SyncError> {
        let mut sender = WindowedSender::new(payload, &self.transport);
        let mut tasks: JoinSet<(u32, Result<(), SyncError>)> = JoinSet::new();

        loop {
            let now = Instant::now().into_std();
            let sweep = sender.sweep(now);
            if let Some(&seq) = sweep.dropped.first() {
                tasks.abort_all();
                return Err(SyncError::ChunkDropped { seq });
            }
            for seq in sweep.retry.into_iter().chain(sender.fill_window(now)) {
                let Some(chunk) = sender.chunk(seq).map(<[u8]>::to_vec) else {
                    continue;
                };
                let client = self.clone();
                let session_id = session_id.to_string();
                tasks.spawn(async move {
                    let res = client.upload_chunk(&session_id, seq, chunk).await;
                    (seq, res)
                });
            }
            if sender.is_finished() {
                break;
            }
            let Some(joined) = tasks.join_next().await else {
                // Nothing in progress: wait out the next timeout.
                if let Some(deadline) = sender.next_deadline() {
                    tokio::time::sleep_until(Instant::from_std(deadline)).await;
                }
                continue;
            };
            let (seq, res) = joined?;
            match res {
                Ok(()) => {
                    sender.acknowledge(seq);
                }
                Err(e) => {
                    warn!(seq, error = %e, "chunk upload failed");
                    sender.reject(seq);
                }
            }
        }
        let commit = sender.commit();
        debug!(
            chunks = commit.total_chunks,
            bytes = sender.acked_bytes(),
            "upload complete"
        );
        Ok(commit)
    }

    pub async fn commit(
        &self,
        session_id: &str,
        commit: &Commit,
        allow_expired: bool,
    ) -> Result<(), SyncError> {
        let res = self
            .post("/sync/commit")
            .json(&CommitRequest {
                session_id,
                final_hash: b64::std_encode(&commit.final_hash),
                total_chunks: commit.total_chunks,
                allow_expired,
            })
            .send()
            .await?;
        check_status("/sync/commit", &res)
    }

    /// Start a session, upload the tokens as a JSON Lines journal and commit it.
    pub async fn sync_tokens<S: AsRef<str>>(
        &self,
        tokens: &[S],
        did: &str,
        pub_b64: Option<&str>,
        meta: Option<&Value>,
        allow_expired: bool,
    ) -> SyncSummary {
        let session_id = match self.start(did, pub_b64, meta).await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "sync start failed");
                return SyncSummary::failed(None, &e);
            }
        };
        let journal = build_journal(tokens);
        let result = async {
            let commit = self.upload(&session_id, &journal).await?;
            self.commit(&session_id, &commit, allow_expired).await
        }
        .await;
        match result {
            Ok(()) => {
                info!(%session_id, tokens = tokens.len(), bytes = journal.len(), "sync committed");
                SyncSummary {
                    success: true,
                    uploaded_count: tokens.len(),
                    total_bytes: journal.len(),
                    session_id: Some(session_id),
                    error: None,
                }
            }
            Err(e) => {
                warn!(%session_id, error = %e, "sync failed");
                SyncSummary::failed(Some(session_id), &e)
            }
        }
    }
}

fn check_status(endpoint: &'static str, res: &reqwest::Response) -> Result<(), SyncError> {
    let status = res.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(SyncError::Status {
            endpoint,
            status: status.as_u16(),
        })
    }
}
