//! Single and bulk sends for one tenant.
//!
//! Every send goes through one worker task fed by a bounded queue, so the channel only
//! ever sees one message at a time. The caller side does the cheap checks (number
//! format, session readiness, quota) before anything is queued.

use crate::config::DispatchConfig;
use crate::errors::CourierError;
use crate::limiter::{Admission, RateLimiter};
use crate::phone::{CanonicalNumber, PhoneNormalizer};
use crate::session::{SessionController, SessionState};
use crate::transport::MediaRef;
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePayload {
    Text(String),
    Media {
        media: MediaRef,
        caption: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    /// Raw phone number as entered by a user.
    pub recipient: String,
    pub payload: MessagePayload,
    /// Correlation id such as `event:<id>:<kind>`. Requests sharing a context and
    /// recipient are delivered at most once.
    pub context: Option<String>,
}

impl SendRequest {
    pub fn text(recipient: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            payload: MessagePayload::Text(text.into()),
            context: None,
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub recipient: CanonicalNumber,
    pub context: Option<String>,
    /// True when the request was suppressed as already delivered.
    pub duplicate: bool,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkError {
    pub recipient: String,
    /// Stable reason code, e.g. `InvalidNumber` or `HourlyLimitReached`.
    pub reason: String,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSendResult {
    pub success_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub errors: Vec<BulkError>,
    /// The batch ended early because of a quota limit or a lost session.
    pub stopped: bool,
    pub cancelled: bool,
}

impl BulkSendResult {
    fn record(&mut self, recipient: &str, error: &CourierError) {
        self.errors.push(BulkError {
            recipient: recipient.to_string(),
            reason: error.code().to_string(),
            detail: error.to_string(),
        });
    }
}

struct Job {
    chat_id: CanonicalNumber,
    payload: MessagePayload,
    reply: oneshot::Sender<Result<(), CourierError>>,
}

type DedupeKey = (String, String);

pub struct Dispatcher {
    session: Arc<SessionController>,
    limiter: Arc<RateLimiter>,
    normalizer: PhoneNormalizer,
    jobs: mpsc::Sender<Job>,
    worker: JoinHandle<()>,
    delivered: Mutex<LruCache<DedupeKey, ()>>,
}

impl Dispatcher {
    pub fn new(
        session: Arc<SessionController>,
        limiter: Arc<RateLimiter>,
        normalizer: PhoneNormalizer,
        config: &DispatchConfig,
    ) -> Self {
        let (jobs, queue) = mpsc::channel(config.queue_capacity.max(1));
        let worker = tokio::spawn(run_worker(
            session.clone(),
            queue,
            config.send_timeout(),
            config.check_reachability,
        ));
        let capacity = NonZeroUsize::new(config.dedupe_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            session,
            limiter,
            normalizer,
            jobs,
            worker,
            delivered: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn session(&self) -> &Arc<SessionController> {
        &self.session
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Send one message: normalize, readiness, quota, then the worker.
    /// A transport failure still consumes the quota slot.
    pub async fn send(&self, request: &SendRequest) -> Result<SendReceipt, CourierError> {
        let chat_id = self.normalizer.normalize(&request.recipient)?;
        let key = request
            .context
            .as_ref()
            .map(|ctx| (ctx.clone(), chat_id.as_str().to_string()));
        let duplicate = key
            .as_ref()
            .is_some_and(|key| self.lock_delivered().contains(key));
        if duplicate {
            debug!("skipping already delivered message for {}", chat_id);
            return Ok(SendReceipt {
                recipient: chat_id,
                context: request.context.clone(),
                duplicate: true,
                sent_at: Utc::now(),
            });
        }

        let state = self.session.state();
        if state != SessionState::Ready {
            return Err(CourierError::SessionNotReady { state });
        }
        if let Admission::Denied(scope) = self.limiter.try_admit() {
            return Err(CourierError::RateLimited { scope });
        }

        let (reply, rx) = oneshot::channel();
        self.jobs
            .send(Job {
                chat_id: chat_id.clone(),
                payload: request.payload.clone(),
                reply,
            })
            .await
            .map_err(|_| anyhow::anyhow!("send worker for {} stopped", self.session.id()))?;
        rx.await
            .map_err(|_| anyhow::anyhow!("send worker dropped the reply"))??;

        if let Some(key) = key {
            self.lock_delivered().put(key, ());
        }
        Ok(SendReceipt {
            recipient: chat_id,
            context: request.context.clone(),
            duplicate: false,
            sent_at: Utc::now(),
        })
    }

    /// Send a batch in order, pausing `delay` (raised to the configured minimum) after
    /// each successful send except the last. Quota denial or session loss stops the
    /// batch; per-recipient failures are recorded and the batch continues.
    pub async fn send_bulk(
        &self,
        requests: Vec<SendRequest>,
        delay: Duration,
        cancel: &CancellationToken,
    ) -> BulkSendResult {
        let delay = delay.max(self.limiter.limits().min_delay());
        let total = requests.len();
        let mut result = BulkSendResult::default();
        info!(
            "bulk send of {} messages on {} (pacing {}s)",
            total,
            self.session.id(),
            delay.as_secs()
        );

        for (index, request) in requests.into_iter().enumerate() {
            if cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }
            match self.send(&request).await {
                Ok(receipt) if receipt.duplicate => result.skipped_count += 1,
                Ok(_) => {
                    result.success_count += 1;
                    if index + 1 < total {
                        tokio::select! {
                            () = cancel.cancelled() => {
                                result.cancelled = true;
                                break;
                            }
                            () = tokio::time::sleep(delay) => {}
                        }
                    }
                }
                Err(
                    e @ (CourierError::RateLimited { .. } | CourierError::SessionNotReady { .. }),
                ) => {
                    warn!(
                        "bulk send on {} stopped at {}/{}: {}",
                        self.session.id(),
                        index + 1,
                        total,
                        e
                    );
                    result.record(&request.recipient, &e);
                    result.stopped = true;
                    break;
                }
                Err(e) => {
                    debug!("bulk send to {} failed: {}", request.recipient, e);
                    result.failed_count += 1;
                    result.record(&request.recipient, &e);
                }
            }
        }

        info!(
            "bulk send on {} finished: {} sent, {} failed, {} skipped{}{}",
            self.session.id(),
            result.success_count,
            result.failed_count,
            result.skipped_count,
            if result.stopped { ", stopped" } else { "" },
            if result.cancelled { ", cancelled" } else { "" }
        );
        result
    }

    fn lock_delivered(&self) -> std::sync::MutexGuard<'_, LruCache<DedupeKey, ()>> {
        self.delivered.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_worker(
    session: Arc<SessionController>,
    mut queue: mpsc::Receiver<Job>,
    send_timeout: Duration,
    check_reachability: bool,
) {
    while let Some(job) = queue.recv().await {
        let outcome = deliver_job(&session, &job, send_timeout, check_reachability).await;
        // The caller may have given up; nothing to report to
        let _ = job.reply.send(outcome);
    }
    debug!("send worker for {} exiting", session.id());
}

async fn deliver_job(
    session: &SessionController,
    job: &Job,
    send_timeout: Duration,
    check_reachability: bool,
) -> Result<(), CourierError> {
    let chat_id = job.chat_id.as_str();
    let attempt = async {
        if check_reachability && !session.is_reachable(chat_id).await? {
            return Err(CourierError::Transport {
                recipient: chat_id.to_string(),
                message: "recipient is not registered on the channel".to_string(),
            });
        }
        session.deliver(chat_id, &job.payload).await
    };
    match tokio::time::timeout(send_timeout, attempt).await {
        // Admitted and queued: the slot is spent even though nothing went out
        Ok(Err(CourierError::SessionNotReady { state })) => Err(CourierError::Transport {
            recipient: chat_id.to_string(),
            message: format!("session lost before send ({})", state),
        }),
        Ok(outcome) => outcome,
        Err(_) => Err(CourierError::Transport {
            recipient: chat_id.to_string(),
            message: format!("send timed out after {}s", send_timeout.as_secs()),
        }),
    }
}
