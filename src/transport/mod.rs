//! The pluggable binding that actually talks to the messaging channel.
//!
//! The session controller is the only caller; it never knows which binding is in use.

pub mod bridge;
pub mod simulated;

use crate::config::TransportConfig;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

pub use bridge::BridgeTransport;
pub use simulated::{SentMessage, SimulatedTransport};

/// Handshake and connection signals produced by a transport after `connect()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A fresh scannable code; replaces any previous one.
    AuthArtifact(String),
    Ready,
    Disconnected { reason: String },
    AuthFailure { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    #[serde(default, rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[async_trait]
pub trait ChannelTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Open the channel connection. Handshake progress arrives on the returned feed;
    /// the feed closing means the connection is gone.
    async fn connect(&self) -> Result<mpsc::Receiver<TransportEvent>>;

    async fn disconnect(&self) -> Result<()>;

    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()>;

    async fn send_media(&self, chat_id: &str, media: &MediaRef, caption: Option<&str>)
    -> Result<()>;

    /// Whether `chat_id` can receive messages on this channel.
    /// Default: assume reachable for channels without a lookup primitive.
    async fn is_reachable(&self, _chat_id: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Build the transport a tenant is configured for.
pub fn create_transport(
    tenant_id: &str,
    config: &TransportConfig,
) -> Result<Arc<dyn ChannelTransport>> {
    match config {
        TransportConfig::Simulated(sim) => {
            tracing::warn!(
                "tenant {} uses the simulated transport: no messages leave this process",
                tenant_id
            );
            Ok(Arc::new(SimulatedTransport::new(sim.clone())))
        }
        TransportConfig::Bridge(bridge) => {
            Ok(Arc::new(BridgeTransport::new(tenant_id, bridge.clone())?))
        }
    }
}

#[cfg(test)]
mod tests;
