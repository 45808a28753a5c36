//! HTTP client for a channel bridge sidecar.
//!
//! The sidecar owns the real channel connection (pairing, encryption, device
//! state). This client starts a named session on it, polls its status and
//! turns status changes into [`TransportEvent`]s.

use super::{ChannelTransport, MediaRef, TransportEvent};
use crate::config::BridgeConfig;
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

const EVENT_BUFFER: usize = 32;
const MAX_POLL_FAILURES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum BridgeState {
    Starting,
    Qr,
    Ready,
    Disconnected,
    AuthFailure,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    state: BridgeState,
    #[serde(default)]
    qr: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReachableResponse {
    reachable: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutgoingMessage<'a> {
    chat_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    media: Option<&'a MediaRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    caption: Option<&'a str>,
}

#[derive(Clone)]
struct Endpoints {
    base: Url,
    session: String,
    api_key: String,
}

impl Endpoints {
    fn url(&self, tail: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("bridge base URL cannot carry a path: {}", self.base))?
            .pop_if_empty()
            .push("sessions")
            .push(&self.session)
            .extend(tail);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            request
        } else {
            request.bearer_auth(&self.api_key)
        }
    }
}

pub struct BridgeTransport {
    endpoints: Endpoints,
    chat_suffix: String,
    poll_interval: Duration,
    client: reqwest::Client,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeTransport {
    pub fn new(tenant_id: &str, config: BridgeConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .with_context(|| format!("invalid bridge URL {:?}", config.base_url))?;
        if !matches!(base.scheme(), "http" | "https") {
            bail!("bridge URL must use http or https: {}", base);
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.request_timeout())
            .build()
            .context("failed to build bridge HTTP client")?;
        let poll_interval = config.poll_interval();
        Ok(Self {
            endpoints: Endpoints {
                base,
                session: config
                    .session_name
                    .unwrap_or_else(|| tenant_id.to_string()),
                api_key: config.api_key,
            },
            chat_suffix: config.chat_suffix,
            poll_interval,
            client,
            poller: Mutex::new(None),
        })
    }

    fn replace_poller(&self, next: Option<JoinHandle<()>>) {
        let mut slot = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = slot.take() {
            old.abort();
        }
        *slot = next;
    }

    async fn post_message(&self, body: &OutgoingMessage<'_>) -> Result<()> {
        let url = self.endpoints.url(&["messages"])?;
        let response = self
            .endpoints
            .authorize(self.client.post(url))
            .json(body)
            .send()
            .await
            .context("bridge send request failed")?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("bridge rejected message ({}): {}", status, text);
        }
        debug!("bridge accepted message for {}", body.chat_id);
        Ok(())
    }
}

/// Strip any device id and make sure the chat id carries a server suffix.
/// `5511999990000:20@s.whatsapp.net` -> `5511999990000@s.whatsapp.net`.
pub fn format_chat_id(chat_id: &str, suffix: &str) -> String {
    match chat_id.split_once('@') {
        Some((user, domain)) => {
            let user = user.split(':').next().unwrap_or(user);
            format!("{}@{}", user, domain)
        }
        None => format!("{}{}", chat_id, suffix),
    }
}

async fn fetch_status(client: &reqwest::Client, endpoints: &Endpoints) -> Result<StatusResponse> {
    let url = endpoints.url(&["status"])?;
    let response = endpoints
        .authorize(client.get(url))
        .send()
        .await?
        .error_for_status()?;
    Ok(response.json().await?)
}

async fn poll_status(
    client: reqwest::Client,
    endpoints: Endpoints,
    interval: Duration,
    tx: mpsc::Sender<TransportEvent>,
) {
    let mut last_qr: Option<String> = None;
    let mut ready = false;
    let mut failures = 0u32;

    loop {
        match fetch_status(&client, &endpoints).await {
            Ok(status) => {
                failures = 0;
                let event = match status.state {
                    BridgeState::Starting => None,
                    BridgeState::Qr if ready => {
                        let _ = tx
                            .send(TransportEvent::Disconnected {
                                reason: "logged out".into(),
                            })
                            .await;
                        return;
                    }
                    BridgeState::Qr => {
                        match status.qr {
                            Some(qr) if last_qr.as_ref() != Some(&qr) => {
                                last_qr = Some(qr.clone());
                                Some(TransportEvent::AuthArtifact(qr))
                            }
                            _ => None,
                        }
                    }
                    BridgeState::Ready if !ready => {
                        ready = true;
                        Some(TransportEvent::Ready)
                    }
                    BridgeState::Ready => None,
                    BridgeState::Disconnected => {
                        let reason = status.reason.unwrap_or_else(|| "disconnected".into());
                        let _ = tx.send(TransportEvent::Disconnected { reason }).await;
                        return;
                    }
                    BridgeState::AuthFailure => {
                        let reason = status.reason.unwrap_or_else(|| "auth failure".into());
                        let _ = tx.send(TransportEvent::AuthFailure { reason }).await;
                        return;
                    }
                };
                if let Some(event) = event
                    && tx.send(event).await.is_err()
                {
                    return;
                }
            }
            Err(e) => {
                failures += 1;
                warn!(
                    "bridge status poll failed ({}/{}): {}",
                    failures, MAX_POLL_FAILURES, e
                );
                if failures >= MAX_POLL_FAILURES {
                    let _ = tx
                        .send(TransportEvent::Disconnected {
                            reason: format!("bridge unreachable: {}", e),
                        })
                        .await;
                    return;
                }
            }
        }
        tokio::time::sleep(interval).await;
    }
}

#[async_trait]
impl ChannelTransport for BridgeTransport {
    fn name(&self) -> &str {
        "bridge"
    }

    async fn connect(&self) -> Result<mpsc::Receiver<TransportEvent>> {
        let url = self.endpoints.url(&["start"])?;
        self.endpoints
            .authorize(self.client.post(url))
            .send()
            .await
            .context("bridge start request failed")?
            .error_for_status()
            .context("bridge refused to start session")?;
        info!("bridge session '{}' started", self.endpoints.session);

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let handle = tokio::spawn(poll_status(
            self.client.clone(),
            self.endpoints.clone(),
            self.poll_interval,
            tx,
        ));
        self.replace_poller(Some(handle));
        Ok(rx)
    }

    async fn disconnect(&self) -> Result<()> {
        self.replace_poller(None);
        let url = self.endpoints.url(&["stop"])?;
        let result = self
            .endpoints
            .authorize(self.client.post(url))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);
        if let Err(e) = result {
            warn!(
                "bridge stop for session '{}' failed: {}",
                self.endpoints.session, e
            );
        }
        Ok(())
    }

    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()> {
        let chat_id = format_chat_id(chat_id, &self.chat_suffix);
        self.post_message(&OutgoingMessage {
            chat_id: &chat_id,
            text: Some(text),
            media: None,
            caption: None,
        })
        .await
    }

    async fn send_media(
        &self,
        chat_id: &str,
        media: &MediaRef,
        caption: Option<&str>,
    ) -> Result<()> {
        let chat_id = format_chat_id(chat_id, &self.chat_suffix);
        self.post_message(&OutgoingMessage {
            chat_id: &chat_id,
            text: None,
            media: Some(media),
            caption,
        })
        .await
    }

    async fn is_reachable(&self, chat_id: &str) -> Result<bool> {
        let chat_id = format_chat_id(chat_id, &self.chat_suffix);
        let url = self.endpoints.url(&["contacts", &chat_id, "reachable"])?;
        let response: ReachableResponse = self
            .endpoints
            .authorize(self.client.get(url))
            .send()
            .await
            .context("bridge reachability request failed")?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.reachable)
    }
}

impl Drop for BridgeTransport {
    fn drop(&mut self) {
        self.replace_poller(None);
    }
}

#[cfg(test)]
mod tests;
