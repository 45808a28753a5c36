//! Lifecycle of one authenticated channel session.
//!
//! A [`SessionController`] is the only owner of a tenant's transport. State lives in a
//! `watch` channel so callers can snapshot it or wait on it; every transition is also
//! published on a `broadcast` feed as a typed [`SessionEvent`].

pub mod supervisor;

use crate::dispatch::MessagePayload;
use crate::errors::CourierError;
use crate::transport::{ChannelTransport, TransportEvent};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use supervisor::spawn_supervisor;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    Idle,
    Authenticating,
    Ready,
    Disconnected,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    /// Live pairing code. Only present while authenticating.
    pub auth_artifact: Option<String>,
    /// Why the session last left Ready or Authenticating.
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            auth_artifact: None,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEventKind {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// A new artifact replaced the previous one.
    ArtifactProduced(String),
    AuthFailed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub session_id: String,
    pub kind: SessionEventKind,
}

struct Shared {
    id: String,
    snapshot: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
    /// Bumped on every initialize and disconnect; only read or written inside
    /// the snapshot lock, so a stale feed can never move a newer session.
    generation: AtomicU64,
}

impl Shared {
    fn publish(&self, kind: SessionEventKind) {
        // No subscribers is fine
        let _ = self.events.send(SessionEvent {
            session_id: self.id.clone(),
            kind,
        });
    }

    fn set_state(snap: &mut SessionSnapshot, to: SessionState) -> Option<SessionEventKind> {
        let from = snap.state;
        if from == to {
            return None;
        }
        snap.state = to;
        if to != SessionState::Authenticating {
            snap.auth_artifact = None;
        }
        Some(SessionEventKind::StateChanged { from, to })
    }

    /// Apply a transport-driven change if `generation` is still current.
    fn update_from_feed(
        &self,
        generation: u64,
        apply: impl FnOnce(&mut SessionSnapshot) -> Vec<SessionEventKind>,
    ) -> bool {
        let mut current = true;
        self.snapshot.send_if_modified(|snap| {
            if self.generation.load(Ordering::SeqCst) != generation {
                current = false;
                return false;
            }
            let events = apply(snap);
            let changed = !events.is_empty();
            for kind in events {
                self.publish(kind);
            }
            changed
        });
        current
    }

    fn fail(&self, generation: u64, reason: String) {
        warn!("session {} failed: {}", self.id, reason);
        self.update_from_feed(generation, |snap| {
            snap.last_error = Some(reason);
            Self::set_state(snap, SessionState::Failed)
                .into_iter()
                .collect()
        });
    }

    /// Handle one feed event. Returns false when the feed should stop being read.
    fn handle_event(&self, generation: u64, event: TransportEvent) -> bool {
        match event {
            TransportEvent::AuthArtifact(artifact) => {
                self.update_from_feed(generation, |snap| {
                    if snap.state != SessionState::Authenticating {
                        debug!("ignoring auth artifact in state {}", snap.state);
                        return Vec::new();
                    }
                    snap.auth_artifact = Some(artifact.clone());
                    vec![SessionEventKind::ArtifactProduced(artifact)]
                })
            }
            TransportEvent::Ready => {
                let current = self.update_from_feed(generation, |snap| {
                    if snap.state != SessionState::Authenticating {
                        return Vec::new();
                    }
                    snap.last_error = None;
                    Self::set_state(snap, SessionState::Ready)
                        .into_iter()
                        .collect()
                });
                if current {
                    info!("session {} is ready", self.id);
                }
                current
            }
            TransportEvent::Disconnected { reason } => {
                info!("session {} disconnected: {}", self.id, reason);
                self.update_from_feed(generation, |snap| {
                    if !matches!(
                        snap.state,
                        SessionState::Ready | SessionState::Authenticating
                    ) {
                        return Vec::new();
                    }
                    snap.last_error = Some(reason);
                    Self::set_state(snap, SessionState::Disconnected)
                        .into_iter()
                        .collect()
                });
                false
            }
            TransportEvent::AuthFailure { reason } => {
                warn!("session {} authentication failed: {}", self.id, reason);
                self.update_from_feed(generation, |snap| {
                    snap.last_error = Some(reason.clone());
                    let mut events = vec![SessionEventKind::AuthFailed { reason }];
                    events.extend(Self::set_state(snap, SessionState::Failed));
                    events
                });
                false
            }
        }
    }

    fn feed_closed(&self, generation: u64) {
        self.update_from_feed(generation, |snap| {
            let to = match snap.state {
                SessionState::Ready => SessionState::Disconnected,
                SessionState::Authenticating => SessionState::Failed,
                _ => return Vec::new(),
            };
            snap.last_error = Some("channel connection closed".to_string());
            Self::set_state(snap, to).into_iter().collect()
        });
    }
}

pub struct SessionController {
    shared: Arc<Shared>,
    transport: Arc<dyn ChannelTransport>,
    handshake_timeout: Duration,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    pub fn new(
        id: impl Into<String>,
        transport: Arc<dyn ChannelTransport>,
        handshake_timeout: Duration,
    ) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot::idle());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                id: id.into(),
                snapshot,
                events,
                generation: AtomicU64::new(0),
            }),
            transport,
            handshake_timeout,
            pump: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    pub fn state(&self) -> SessionState {
        self.shared.snapshot.borrow().state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Receiver that always observes the latest snapshot.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Start connecting in the background. No-op while authenticating or ready.
    pub fn initialize(&self) -> Result<(), CourierError> {
        let mut outcome = Ok(None);
        self.shared.snapshot.send_if_modified(|snap| match snap.state {
            SessionState::Authenticating | SessionState::Ready => false,
            SessionState::Failed => {
                outcome = Err(CourierError::Unrecoverable(
                    snap.last_error
                        .clone()
                        .unwrap_or_else(|| "session failed".to_string()),
                ));
                false
            }
            SessionState::Idle | SessionState::Disconnected => {
                let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
                snap.last_error = None;
                if let Some(kind) = Shared::set_state(snap, SessionState::Authenticating) {
                    self.shared.publish(kind);
                }
                outcome = Ok(Some(generation));
                true
            }
        });

        let Some(generation) = outcome? else {
            debug!("session {} already initialized", self.shared.id);
            return Ok(());
        };
        info!(
            "session {} connecting via {} transport",
            self.shared.id,
            self.transport.name()
        );
        let handle = tokio::spawn(run_session(
            self.shared.clone(),
            self.transport.clone(),
            generation,
            self.handshake_timeout,
        ));
        self.replace_pump(Some(handle));
        Ok(())
    }

    /// Tear the connection down and return to Idle from any state.
    pub async fn disconnect(&self) {
        self.shared.snapshot.send_if_modified(|snap| {
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
            snap.last_error = None;
            match Shared::set_state(snap, SessionState::Idle) {
                Some(kind) => {
                    self.shared.publish(kind);
                    true
                }
                None => false,
            }
        });
        self.replace_pump(None);
        if let Err(e) = self.transport.disconnect().await {
            warn!("transport disconnect for {} failed: {}", self.shared.id, e);
        }
    }

    /// Current artifact, or wait for the next one.
    pub async fn await_auth_artifact(&self, timeout: Duration) -> Result<String, CourierError> {
        let mut rx = self.watch();
        let wait = async {
            loop {
                {
                    let snap = rx.borrow_and_update();
                    match snap.state {
                        SessionState::Ready => return Err(CourierError::AlreadyAuthenticated),
                        SessionState::Failed => {
                            return Err(CourierError::AuthFailure(
                                snap.last_error
                                    .clone()
                                    .unwrap_or_else(|| "session failed".to_string()),
                            ));
                        }
                        _ => {
                            if let Some(artifact) = &snap.auth_artifact {
                                return Ok(artifact.clone());
                            }
                        }
                    }
                }
                rx.changed()
                    .await
                    .map_err(|_| anyhow::anyhow!("session {} closed", self.shared.id))?;
            }
        };
        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            CourierError::Timeout(format!("no auth artifact within {}s", timeout.as_secs()))
        })?
    }

    /// Wait until the session is Ready.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), CourierError> {
        let mut rx = self.watch();
        let wait = async {
            loop {
                {
                    let snap = rx.borrow_and_update();
                    match snap.state {
                        SessionState::Ready => return Ok(()),
                        SessionState::Failed => {
                            return Err(CourierError::Unrecoverable(
                                snap.last_error
                                    .clone()
                                    .unwrap_or_else(|| "session failed".to_string()),
                            ));
                        }
                        _ => {}
                    }
                }
                rx.changed()
                    .await
                    .map_err(|_| anyhow::anyhow!("session {} closed", self.shared.id))?;
            }
        };
        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            CourierError::Timeout(format!("session not ready within {}s", timeout.as_secs()))
        })?
    }

    /// The single send primitive. Fails if the session is not Ready at call time.
    pub async fn deliver(
        &self,
        chat_id: &str,
        payload: &MessagePayload,
    ) -> Result<(), CourierError> {
        let state = self.state();
        if state != SessionState::Ready {
            return Err(CourierError::SessionNotReady { state });
        }
        let result = match payload {
            MessagePayload::Text(text) => self.transport.send_text(chat_id, text).await,
            MessagePayload::Media { media, caption } => {
                self.transport
                    .send_media(chat_id, media, caption.as_deref())
                    .await
            }
        };
        result.map_err(|e| CourierError::Transport {
            recipient: chat_id.to_string(),
            message: format!("{:#}", e),
        })
    }

    pub async fn is_reachable(&self, chat_id: &str) -> Result<bool, CourierError> {
        self.transport
            .is_reachable(chat_id)
            .await
            .map_err(|e| CourierError::Transport {
                recipient: chat_id.to_string(),
                message: format!("reachability check failed: {:#}", e),
            })
    }

    fn replace_pump(&self, next: Option<JoinHandle<()>>) {
        let mut slot = self.pump.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = slot.take() {
            old.abort();
        }
        *slot = next;
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.replace_pump(None);
    }
}

async fn run_session(
    shared: Arc<Shared>,
    transport: Arc<dyn ChannelTransport>,
    generation: u64,
    handshake_timeout: Duration,
) {
    let handshake = async {
        let mut feed: mpsc::Receiver<TransportEvent> = transport.connect().await?;
        let first = feed.recv().await;
        Ok::<_, anyhow::Error>((feed, first))
    };

    let (mut feed, first) = match tokio::time::timeout(handshake_timeout, handshake).await {
        Ok(Ok((feed, Some(first)))) => (feed, first),
        Ok(Ok((_, None))) => {
            shared.fail(generation, "channel closed during handshake".to_string());
            return;
        }
        Ok(Err(e)) => {
            shared.fail(generation, format!("connect failed: {:#}", e));
            return;
        }
        Err(_) => {
            shared.fail(
                generation,
                format!(
                    "no handshake from transport within {}s",
                    handshake_timeout.as_secs()
                ),
            );
            if let Err(e) = transport.disconnect().await {
                debug!("transport disconnect after handshake timeout failed: {}", e);
            }
            return;
        }
    };

    if !shared.handle_event(generation, first) {
        return;
    }
    while let Some(event) = feed.recv().await {
        if !shared.handle_event(generation, event) {
            return;
        }
    }
    shared.feed_closed(generation);
}
