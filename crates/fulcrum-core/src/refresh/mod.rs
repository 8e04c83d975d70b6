//! Periodic cache refresh.
//!
//! Two independent loops share one fan-out primitive:
//!
//! - the **method refresher** re-issues every configured custom method with
//!   its fixed parameters;
//! - the **cache refresher** re-issues every cached request whose method is
//!   still updatable.
//!
//! Each loop runs its workload once immediately, then on every tick until
//! the shutdown channel fires. Workloads are split into `batch_size`
//! chunks with at most `concurrency` chunks in flight; per-chunk and
//! per-response failures are accumulated into one combined error that the
//! loop logs and forgets — the next tick retries from scratch.
//!
//! Shutdown is a counted handshake: every exiting loop bumps a shared
//! counter and [`Refresher::stop_with_timeout`] polls it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info};
use url::Url;

use crate::auth;
use crate::cache::{CacheError, ResponseCacher};
use crate::config::AppConfig;
use crate::proxy::requests::{encode_requests, parse_response_body};
use crate::types::{find_by_id, RpcRequest, RpcResponse, JSONRPC_VERSION};

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("cannot decode upstream response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("cache write failed: {0}")]
    Cache(#[from] CacheError),

    #[error("worker panicked: {0}")]
    Task(String),

    #[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Multi(Vec<RefreshError>),
}

enum Workload {
    Methods,
    Cache,
}

pub struct Refresher {
    cacher: Arc<ResponseCacher>,
    client: reqwest::Client,
    url: Url,
    token: String,
    batch_size: usize,
    concurrency: usize,
    stopped: AtomicU32,
    debug_http_request: bool,
}

impl Refresher {
    pub fn new(
        cacher: Arc<ResponseCacher>,
        url: Url,
        token: String,
        batch_size: usize,
        concurrency: usize,
        debug_http_request: bool,
    ) -> Self {
        Self {
            cacher,
            client: reqwest::Client::new(),
            url,
            token,
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
            stopped: AtomicU32::new(0),
            debug_http_request,
        }
    }

    /// Builds a refresher from configuration, minting the proxy's own
    /// bearer token for outbound calls.
    pub fn from_config(
        config: &AppConfig,
        cacher: Arc<ResponseCacher>,
    ) -> Result<Self, RefresherInitError> {
        let token = auth::mint_token(
            &config.jwt_secret_bytes(),
            &config.jwt_alg,
            &config.jwt_permissions,
        )?;
        let url = Url::parse(&config.proxy_url)?;
        info!("proxy refresh token minted");
        Ok(Self::new(
            cacher,
            url,
            token,
            config.requests_batch_size,
            config.requests_concurrency,
            config.debug_http_request,
        ))
    }

    pub fn stopped(&self) -> u32 {
        self.stopped.load(Ordering::Acquire)
    }

    /// Runs the custom-method loop until shutdown.
    pub async fn run_method_refresher(
        self: Arc<Self>,
        shutdown: broadcast::Receiver<()>,
        period: Duration,
    ) {
        self.run(shutdown, period, Workload::Methods).await;
        info!("exiting method refresher");
        self.stopped.fetch_add(1, Ordering::AcqRel);
    }

    /// Runs the cached-updatables loop until shutdown.
    pub async fn run_cache_refresher(
        self: Arc<Self>,
        shutdown: broadcast::Receiver<()>,
        period: Duration,
    ) {
        self.run(shutdown, period, Workload::Cache).await;
        info!("exiting cache refresher");
        self.stopped.fetch_add(1, Ordering::AcqRel);
    }

    /// Spins until the stopped counter reaches `wait_for` or the deadline
    /// passes; true on success.
    pub async fn stop_with_timeout(&self, wait_for: u32, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut ticker = tokio::time::interval(Duration::from_millis(100));
        loop {
            ticker.tick().await;
            if self.stopped() >= wait_for {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
        }
    }

    async fn run(
        self: &Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
        period: Duration,
        workload: Workload,
    ) {
        if let Err(err) = self.update_once(&workload).await {
            error!(error = %err, "cannot update requests");
        }
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = ticker.tick() => {
                    if let Err(err) = self.update_once(&workload).await {
                        error!(error = %err, "cannot update requests");
                    }
                }
            }
        }
    }

    async fn update_once(self: &Arc<Self>, workload: &Workload) -> Result<(), RefreshError> {
        let requests = match workload {
            Workload::Methods => self.method_requests(),
            Workload::Cache => self.cache_requests().await,
        };
        if requests.is_empty() {
            return Ok(());
        }
        self.update(requests).await
    }

    /// One synthetic request per configured custom method, with a
    /// monotonic iteration-local ID starting at 1.
    fn method_requests(&self) -> Vec<RpcRequest> {
        self.cacher
            .matcher()
            .custom_methods()
            .into_iter()
            .zip(1u64..)
            .map(|(method, counter)| RpcRequest {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id: json!(counter),
                method: method.name,
                params: method.params,
                remote_addr: None,
            })
            .collect()
    }

    /// Every cached request whose method is still updatable, re-stamped
    /// with an iteration-local ID.
    async fn cache_requests(&self) -> Vec<RpcRequest> {
        let stored = match self.cacher.store().requests().await {
            Ok(stored) => stored,
            Err(err) => {
                error!(error = %err, "cannot enumerate cached requests");
                return Vec::new();
            }
        };
        stored
            .into_iter()
            .filter(|request| self.cacher.matcher().is_updatable(&request.method))
            .zip(1u64..)
            .map(|(mut request, counter)| {
                request.id = json!(counter);
                request
            })
            .collect()
    }

    /// Fans `requests` out in `batch_size` chunks over at most
    /// `concurrency` workers. Per-chunk failures accumulate; the combined
    /// error is non-fatal to the loop.
    async fn update(self: &Arc<Self>, requests: Vec<RpcRequest>) -> Result<(), RefreshError> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<Vec<RefreshError>> = JoinSet::new();

        for chunk in requests.chunks(self.batch_size) {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let worker = Arc::clone(self);
            let chunk = chunk.to_vec();
            tasks.spawn(async move {
                let _permit = permit;
                worker.update_chunk(chunk).await
            });
        }

        let mut errors = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(mut chunk_errors) => errors.append(&mut chunk_errors),
                Err(err) => errors.push(RefreshError::Task(err.to_string())),
            }
        }
        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(RefreshError::Multi(errors))
        }
    }

    async fn update_chunk(&self, chunk: Vec<RpcRequest>) -> Vec<RefreshError> {
        info!(count = chunk.len(), "updating cache records");
        let responses = match self.request(&chunk).await {
            Ok(responses) => responses,
            Err(err) => return vec![err],
        };
        info!(count = responses.len(), "got upstream responses");

        let mut errors = Vec::new();
        for response in responses {
            if let Some(rpc_error) = &response.error {
                errors.push(RefreshError::Rpc {
                    code: rpc_error.code,
                    message: rpc_error.message.clone(),
                });
                continue;
            }
            let Some(request) = find_by_id(&chunk, &response.id) else {
                continue;
            };
            debug!(id = %response.id, method = %request.method, "storing refreshed response");
            if let Err(err) = self.cacher.set(request, &response).await {
                errors.push(err.into());
            }
        }
        errors
    }

    async fn request(&self, chunk: &[RpcRequest]) -> Result<Vec<RpcResponse>, RefreshError> {
        let body = encode_requests(chunk)?;
        if self.debug_http_request {
            debug!(body = %String::from_utf8_lossy(&body), "refresh request");
        }
        let response = self
            .client
            .post(self.url.clone())
            .bearer_auth(&self.token)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        let status = response.status();
        let raw = response.bytes().await?;
        if status.as_u16() >= 300 {
            return Err(RefreshError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&raw).into_owned(),
            });
        }
        Ok(parse_response_body(&raw)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RefresherInitError {
    #[error(transparent)]
    Auth(#[from] auth::AuthError),

    #[error("cannot parse proxy url: {0}")]
    Url(#[from] url::ParseError),
}
