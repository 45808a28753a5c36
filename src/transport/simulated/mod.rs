//! In-process stand-in for a real channel.
//!
//! Only used when a tenant is explicitly configured with `"kind": "simulated"`.
//! It produces a fake scannable code, authenticates after a delay (or when
//! [`SimulatedTransport::authenticate`] is called) and records every send.

use super::{ChannelTransport, MediaRef, TransportEvent};
use crate::config::SimulatedConfig;
use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const EVENT_BUFFER: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: String,
    pub text: String,
    pub media: Option<MediaRef>,
}

#[derive(Default)]
struct SimState {
    events: Option<mpsc::Sender<TransportEvent>>,
    auto_auth: Option<JoinHandle<()>>,
    sent: Vec<SentMessage>,
    unreachable: HashSet<String>,
    failing: HashSet<String>,
}

pub struct SimulatedTransport {
    config: SimulatedConfig,
    state: Mutex<SimState>,
    connects: AtomicUsize,
    send_attempts: AtomicUsize,
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulatedTransport {
    pub fn new(config: SimulatedConfig) -> Self {
        let state = SimState {
            unreachable: config.unreachable.iter().cloned().collect(),
            failing: config.failing.iter().cloned().collect(),
            ..SimState::default()
        };
        Self {
            config,
            state: Mutex::new(state),
            connects: AtomicUsize::new(0),
            send_attempts: AtomicUsize::new(0),
        }
    }

    /// A simulated channel that waits for an explicit [`Self::authenticate`].
    pub fn manual() -> Self {
        Self::new(SimulatedConfig {
            auth_delay_ms: None,
            ..SimulatedConfig::default()
        })
    }

    fn emit(&self, event: TransportEvent) -> bool {
        let sender = lock(&self.state).events.clone();
        match sender {
            Some(tx) => tx.try_send(event).is_ok(),
            None => false,
        }
    }

    /// Complete the pairing, as if the code was scanned.
    pub fn authenticate(&self) -> bool {
        self.emit(TransportEvent::Ready)
    }

    /// Issue a fresh code, as if the previous one expired.
    pub fn refresh_artifact(&self) -> bool {
        self.emit(TransportEvent::AuthArtifact(new_artifact()))
    }

    pub fn fail_auth(&self, reason: &str) -> bool {
        self.emit(TransportEvent::AuthFailure {
            reason: reason.to_string(),
        })
    }

    /// Signal a disconnect and drop the connection.
    pub fn drop_connection(&self, reason: &str) -> bool {
        let delivered = self.emit(TransportEvent::Disconnected {
            reason: reason.to_string(),
        });
        let mut state = lock(&self.state);
        state.events = None;
        if let Some(handle) = state.auto_auth.take() {
            handle.abort();
        }
        delivered
    }

    pub fn set_failing(&self, chat_id: &str, failing: bool) {
        let mut state = lock(&self.state);
        if failing {
            state.failing.insert(chat_id.to_string());
        } else {
            state.failing.remove(chat_id);
        }
    }

    pub fn set_unreachable(&self, chat_id: &str, unreachable: bool) {
        let mut state = lock(&self.state);
        if unreachable {
            state.unreachable.insert(chat_id.to_string());
        } else {
            state.unreachable.remove(chat_id);
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.state).sent.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Sends that reached the transport, successful or not.
    pub fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    async fn record_send(&self, chat_id: &str, text: &str, media: Option<&MediaRef>) -> Result<()> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        if self.config.send_latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.send_latency_ms)).await;
        }
        let mut state = lock(&self.state);
        if state.events.is_none() {
            bail!("simulated channel is not connected");
        }
        if state.failing.contains(chat_id) {
            bail!("simulated delivery failure for {}", chat_id);
        }
        state.sent.push(SentMessage {
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            media: media.cloned(),
        });
        debug!("simulated send to {} ({} bytes)", chat_id, text.len());
        Ok(())
    }
}

fn new_artifact() -> String {
    format!("courier-sim:{}", uuid::Uuid::new_v4())
}

#[async_trait]
impl ChannelTransport for SimulatedTransport {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn connect(&self) -> Result<mpsc::Receiver<TransportEvent>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.config.fail_connect {
            bail!("simulated connect failure");
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        if !self.config.silent {
            let _ = tx.try_send(TransportEvent::AuthArtifact(new_artifact()));
        }

        let auto_auth = match self.config.auth_delay_ms {
            Some(delay_ms) if !self.config.silent => {
                let tx = tx.clone();
                Some(tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    let _ = tx.send(TransportEvent::Ready).await;
                }))
            }
            _ => None,
        };

        let mut state = lock(&self.state);
        if let Some(old) = state.auto_auth.take() {
            old.abort();
        }
        state.events = Some(tx);
        state.auto_auth = auto_auth;
        info!("simulated channel connected");
        Ok(rx)
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.events = None;
        if let Some(handle) = state.auto_auth.take() {
            handle.abort();
        }
        Ok(())
    }

    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()> {
        self.record_send(chat_id, text, None).await
    }

    async fn send_media(
        &self,
        chat_id: &str,
        media: &MediaRef,
        caption: Option<&str>,
    ) -> Result<()> {
        self.record_send(chat_id, caption.unwrap_or_default(), Some(media))
            .await
    }

    async fn is_reachable(&self, chat_id: &str) -> Result<bool> {
        Ok(!lock(&self.state).unreachable.contains(chat_id))
    }
}
