//! Per-tenant channel registry.
//!
//! Each tenant gets one [`TenantChannel`]: a session, its limiter, the dispatcher
//! worker, the reminder scheduler and (optionally) a reconnect supervisor. The
//! registry builds and tears these down explicitly; nothing is process-global.

use crate::config::{Config, TenantConfig};
use crate::dispatch::{BulkSendResult, Dispatcher, SendRequest};
use crate::errors::CourierError;
use crate::limiter::{MessageStats, RateLimiter, RateLimits};
use crate::phone::PhoneNormalizer;
use crate::scheduler::{NotificationScheduler, ReminderKind, ReminderPlan};
use crate::session::{SessionController, SessionSnapshot, SessionState, spawn_supervisor};
use crate::transport::{ChannelTransport, create_transport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantStatus {
    pub tenant: String,
    pub transport: String,
    pub session: SessionSnapshot,
    pub stats: MessageStats,
    pub pending_reminders: usize,
}

pub struct TenantChannel {
    id: String,
    session: Arc<SessionController>,
    limiter: Arc<RateLimiter>,
    dispatcher: Arc<Dispatcher>,
    scheduler: NotificationScheduler,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    bulk_cancel: Mutex<CancellationToken>,
}

impl TenantChannel {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn session(&self) -> &Arc<SessionController> {
        &self.session
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &NotificationScheduler {
        &self.scheduler
    }

    /// Notify participants now, with the kind's template or a custom message.
    pub async fn send_notification(
        &self,
        event_id: &str,
        title: &str,
        event_time: DateTime<Utc>,
        participants: &[String],
        kind: ReminderKind,
        message: Option<String>,
    ) -> BulkSendResult {
        self.scheduler
            .fire_now(event_id, title, event_time, participants, kind, message)
            .await
    }

    /// Plan the standard reminders for an event.
    pub async fn schedule_event(
        &self,
        event_id: &str,
        title: &str,
        event_time: DateTime<Utc>,
        participants: &[String],
    ) -> Vec<ReminderPlan> {
        self.scheduler
            .schedule_for_event(event_id, title, event_time, participants)
            .await
    }

    pub async fn cancel_event(&self, event_id: &str) -> usize {
        self.scheduler.cancel_event(event_id).await
    }

    /// Send the same text to every number, paced by `delay`.
    /// [`Self::cancel_bulk`] stops it before the next recipient.
    pub async fn send_bulk_messages(
        &self,
        numbers: &[String],
        message: &str,
        delay: Duration,
    ) -> BulkSendResult {
        let cancel = self
            .bulk_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .child_token();
        let requests = numbers
            .iter()
            .map(|n| SendRequest::text(n.clone(), message))
            .collect();
        self.dispatcher.send_bulk(requests, delay, &cancel).await
    }

    /// Cancel every bulk send currently running on this tenant.
    pub fn cancel_bulk(&self) {
        let mut token = self
            .bulk_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        token.cancel();
        *token = CancellationToken::new();
    }

    pub fn message_stats(&self) -> MessageStats {
        self.limiter.stats()
    }

    pub fn connection_status(&self) -> bool {
        self.session.is_ready()
    }

    /// Start (or restart) pairing and return the current scannable code.
    pub async fn generate_auth_artifact(&self, timeout: Duration) -> Result<String, CourierError> {
        if self.session.state() == SessionState::Failed {
            self.session.disconnect().await;
        }
        self.session.initialize()?;
        self.session.await_auth_artifact(timeout).await
    }

    pub fn update_limits(&self, max_per_day: u32, max_per_hour: u32, min_delay: Duration) -> RateLimits {
        self.limiter.update_limits(max_per_day, max_per_hour, min_delay)
    }

    pub fn status(&self) -> TenantStatus {
        TenantStatus {
            tenant: self.id.clone(),
            transport: self.session.transport_name().to_string(),
            session: self.session.snapshot(),
            stats: self.limiter.stats(),
            pending_reminders: self.scheduler.pending_plans().len(),
        }
    }

    async fn shutdown(&self) {
        if let Some(handle) = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        self.cancel_bulk();
        self.scheduler.shutdown().await;
        self.session.disconnect().await;
    }
}

pub struct SessionRegistry {
    config: Config,
    tenants: RwLock<HashMap<String, Arc<TenantChannel>>>,
}

impl SessionRegistry {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            tenants: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn tenant_config(&self, tenant_id: &str) -> Result<&TenantConfig, CourierError> {
        self.config
            .tenant(tenant_id)
            .ok_or_else(|| CourierError::UnknownTenant(tenant_id.to_string()))
    }

    /// Open the tenant's channel with its configured transport and start connecting.
    pub fn open(&self, tenant_id: &str) -> Result<Arc<TenantChannel>, CourierError> {
        if let Some(existing) = self.lookup(tenant_id) {
            return Ok(existing);
        }
        let tenant = self.tenant_config(tenant_id)?;
        let transport = create_transport(&tenant.id, &tenant.transport)
            .map_err(|e| CourierError::Config(format!("{:#}", e)))?;
        self.open_with_transport(tenant_id, transport)
    }

    /// Open a tenant's channel on an explicit transport.
    pub fn open_with_transport(
        &self,
        tenant_id: &str,
        transport: Arc<dyn ChannelTransport>,
    ) -> Result<Arc<TenantChannel>, CourierError> {
        let tenant = self.tenant_config(tenant_id)?;
        let normalizer = PhoneNormalizer::new(&tenant.country_code)?;

        let mut tenants = self.tenants.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = tenants.get(tenant_id) {
            return Ok(existing.clone());
        }

        let session = Arc::new(SessionController::new(
            tenant.id.clone(),
            transport,
            self.config.session.handshake_timeout(),
        ));
        let limiter = Arc::new(RateLimiter::new(tenant.id.clone(), tenant.limits.to_limits()));
        let dispatcher = Arc::new(Dispatcher::new(
            session.clone(),
            limiter.clone(),
            normalizer,
            &self.config.dispatch,
        ));
        let scheduler = NotificationScheduler::new(dispatcher.clone(), self.config.scheduler.clone());
        let supervisor = self
            .config
            .supervisor
            .enabled
            .then(|| spawn_supervisor(session.clone(), self.config.supervisor.clone()));

        session.initialize()?;
        let channel = Arc::new(TenantChannel {
            id: tenant.id.clone(),
            session,
            limiter,
            dispatcher,
            scheduler,
            supervisor: Mutex::new(supervisor),
            bulk_cancel: Mutex::new(CancellationToken::new()),
        });
        tenants.insert(tenant.id.clone(), channel.clone());
        info!(
            "opened tenant {} on {} transport",
            tenant.id,
            channel.session.transport_name()
        );
        Ok(channel)
    }

    /// Open every configured tenant. A tenant that cannot be opened is logged and skipped.
    pub fn open_all(&self) -> Vec<Arc<TenantChannel>> {
        let mut opened = Vec::new();
        for tenant in &self.config.tenants {
            match self.open(&tenant.id) {
                Ok(channel) => opened.push(channel),
                Err(e) => warn!("could not open tenant {}: {}", tenant.id, e),
            }
        }
        opened
    }

    fn lookup(&self, tenant_id: &str) -> Option<Arc<TenantChannel>> {
        self.tenants
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tenant_id)
            .cloned()
    }

    pub fn get(&self, tenant_id: &str) -> Result<Arc<TenantChannel>, CourierError> {
        self.lookup(tenant_id)
            .ok_or_else(|| CourierError::UnknownTenant(tenant_id.to_string()))
    }

    pub fn tenant_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .tenants
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Tear one tenant down. Returns whether it was open.
    pub async fn close(&self, tenant_id: &str) -> bool {
        let removed = self
            .tenants
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tenant_id);
        match removed {
            Some(channel) => {
                channel.shutdown().await;
                info!("closed tenant {}", tenant_id);
                true
            }
            None => false,
        }
    }

    pub async fn close_all(&self) {
        let channels: Vec<Arc<TenantChannel>> = self
            .tenants
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, channel)| channel)
            .collect();
        for channel in channels {
            channel.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests;
