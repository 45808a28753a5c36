//! Event reminders: one week, one day and one hour before an event.
//!
//! Each plan is a tracked background task that sleeps until its firing time and then
//! hands a templated bulk send to the [`Dispatcher`]. Plans are keyed by
//! `(event_id, kind)`; a key that is scheduled or already fired is never planned again
//! before the event starts.

use crate::config::{ReminderTemplates, SchedulerConfig};
use crate::dispatch::{BulkSendResult, Dispatcher, SendRequest};
use crate::utils::render_template;
use crate::utils::task_tracker::TaskTracker;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ReminderKind {
    OneWeek,
    OneDay,
    OneHour,
    Immediate,
}

impl ReminderKind {
    /// Kinds planned ahead of an event, earliest first.
    pub const SCHEDULED: [ReminderKind; 3] = [Self::OneWeek, Self::OneDay, Self::OneHour];

    pub fn lead_time(self) -> TimeDelta {
        match self {
            Self::OneWeek => TimeDelta::weeks(1),
            Self::OneDay => TimeDelta::days(1),
            Self::OneHour => TimeDelta::hours(1),
            Self::Immediate => TimeDelta::zero(),
        }
    }

    fn template(self, templates: &ReminderTemplates) -> &str {
        match self {
            Self::OneWeek => &templates.one_week,
            Self::OneDay => &templates.one_day,
            Self::OneHour => &templates.one_hour,
            Self::Immediate => &templates.immediate,
        }
    }
}

impl fmt::Display for ReminderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl std::str::FromStr for ReminderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "oneweek" | "week" => Ok(Self::OneWeek),
            "oneday" | "day" => Ok(Self::OneDay),
            "onehour" | "hour" => Ok(Self::OneHour),
            "immediate" | "now" => Ok(Self::Immediate),
            other => Err(format!("unknown reminder kind: {}", other)),
        }
    }
}

type PlanKey = (String, ReminderKind);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderPlan {
    pub event_id: String,
    pub title: String,
    pub event_time: DateTime<Utc>,
    pub firing_at: DateTime<Utc>,
    pub kind: ReminderKind,
    pub recipients: Vec<String>,
    /// Replaces the kind's template when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ReminderPlan {
    fn key(&self) -> PlanKey {
        (self.event_id.clone(), self.kind)
    }

    /// Plan identity used in logs and as the dedupe id of planned kinds.
    pub fn context(&self) -> String {
        format!("event:{}:{}", self.event_id, self.kind)
    }

    /// Dedupe id carried by every send. Immediate notices include their text, so a
    /// new announcement for the same event is not suppressed.
    fn correlation_id(&self, text: &str) -> String {
        match self.kind {
            ReminderKind::Immediate => format!("{}:{}", self.context(), text),
            _ => self.context(),
        }
    }

    fn task_name(&self) -> String {
        format!("reminder:{}:{}", self.event_id, self.kind)
    }

    pub fn render(&self, templates: &ReminderTemplates) -> String {
        if let Some(message) = &self.message {
            return message.clone();
        }
        let mut values = HashMap::new();
        values.insert("title", self.title.clone());
        values.insert(
            "when",
            self.event_time.format("%Y-%m-%d %H:%M UTC").to_string(),
        );
        values.insert("kind", self.kind.to_string());
        render_template(self.kind.template(templates), &values)
    }

    fn requests(&self, templates: &ReminderTemplates) -> Vec<SendRequest> {
        let text = self.render(templates);
        let context = self.correlation_id(&text);
        self.recipients
            .iter()
            .map(|r| SendRequest::text(r.clone(), text.clone()).with_context(context.clone()))
            .collect()
    }
}

struct InFlight {
    cancel: CancellationToken,
    sends: usize,
}

#[derive(Default)]
struct PlanBook {
    scheduled: HashMap<PlanKey, ReminderPlan>,
    /// Keys already sent, kept until their event starts.
    fired: HashMap<PlanKey, DateTime<Utc>>,
    /// Sends running per event; `cancel_event` stops them through the token.
    in_flight: HashMap<String, InFlight>,
}

impl PlanBook {
    fn is_planned(&self, key: &PlanKey) -> bool {
        self.scheduled.contains_key(key) || self.fired.contains_key(key)
    }

    fn mark_fired(&mut self, plan: &ReminderPlan) {
        self.fired.insert(plan.key(), plan.event_time);
    }

    fn prune_fired(&mut self, now: DateTime<Utc>) {
        self.fired.retain(|_, event_time| *event_time > now);
    }

    fn begin_send(&mut self, event_id: &str) -> CancellationToken {
        let entry = self
            .in_flight
            .entry(event_id.to_string())
            .or_insert_with(|| InFlight {
                cancel: CancellationToken::new(),
                sends: 0,
            });
        entry.sends += 1;
        entry.cancel.clone()
    }

    fn end_send(&mut self, event_id: &str, cancel: &CancellationToken) {
        // A cancelled token's entry was already removed by cancel_event or shutdown
        if cancel.is_cancelled() {
            return;
        }
        if let Some(entry) = self.in_flight.get_mut(event_id) {
            entry.sends = entry.sends.saturating_sub(1);
            if entry.sends == 0 {
                self.in_flight.remove(event_id);
            }
        }
    }
}

struct Inner {
    dispatcher: Arc<Dispatcher>,
    config: SchedulerConfig,
    plans: Mutex<PlanBook>,
}

impl Inner {
    fn book(&self) -> MutexGuard<'_, PlanBook> {
        let mut book = self.plans.lock().unwrap_or_else(PoisonError::into_inner);
        book.prune_fired(Utc::now());
        book
    }

    async fn fire_due(&self, plan: ReminderPlan) {
        let cancel = {
            let mut book = self.book();
            if book.scheduled.remove(&plan.key()).is_none() {
                debug!("reminder {} was cancelled before firing", plan.context());
                return;
            }
            book.mark_fired(&plan);
            book.begin_send(&plan.event_id)
        };
        self.deliver_due(&plan, &cancel).await;
        self.book().end_send(&plan.event_id, &cancel);
    }

    async fn deliver_due(&self, plan: &ReminderPlan, cancel: &CancellationToken) {
        let grace = self.config.ready_grace();
        let session = self.dispatcher.session();
        let ready = tokio::select! {
            () = cancel.cancelled() => return,
            ready = session.wait_ready(grace) => ready,
        };
        if let Err(e) = ready {
            warn!(
                "dropping reminder {}: session {} not ready ({})",
                plan.context(),
                session.id(),
                e
            );
            return;
        }

        let result = self.send(plan, cancel).await;
        info!(
            "reminder {} sent to {}/{} recipients",
            plan.context(),
            result.success_count,
            plan.recipients.len()
        );
    }

    async fn send(&self, plan: &ReminderPlan, cancel: &CancellationToken) -> BulkSendResult {
        let requests = plan.requests(&self.config.templates);
        self.dispatcher
            .send_bulk(requests, self.config.bulk_delay(), cancel)
            .await
    }
}

pub struct NotificationScheduler {
    inner: Arc<Inner>,
    tracker: TaskTracker,
}

impl NotificationScheduler {
    pub fn new(dispatcher: Arc<Dispatcher>, config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                dispatcher,
                config,
                plans: Mutex::new(PlanBook::default()),
            }),
            tracker: TaskTracker::new(),
        }
    }

    /// Plan the one-week, one-day and one-hour reminders for an event.
    ///
    /// Returns only the plans created by this call. Reminders whose firing time has
    /// passed are skipped, as are keys already scheduled or fired.
    pub async fn schedule_for_event(
        &self,
        event_id: &str,
        title: &str,
        event_time: DateTime<Utc>,
        recipients: &[String],
    ) -> Vec<ReminderPlan> {
        let now = Utc::now();
        let mut created = Vec::new();
        {
            let mut book = self.inner.book();
            for kind in ReminderKind::SCHEDULED {
                let firing_at = event_time - kind.lead_time();
                if firing_at <= now {
                    debug!("skipping {} reminder for {}: already past", kind, event_id);
                    continue;
                }
                let key = (event_id.to_string(), kind);
                if book.is_planned(&key) {
                    debug!("reminder {:?} already planned", key);
                    continue;
                }
                let plan = ReminderPlan {
                    event_id: event_id.to_string(),
                    title: title.to_string(),
                    event_time,
                    firing_at,
                    kind,
                    recipients: recipients.to_vec(),
                    message: None,
                };
                book.scheduled.insert(key, plan.clone());
                created.push(plan);
            }
        }

        for plan in &created {
            let delay = (plan.firing_at - now).to_std().unwrap_or(Duration::ZERO);
            let inner = self.inner.clone();
            let due = plan.clone();
            self.tracker
                .spawn(plan.task_name(), async move {
                    tokio::time::sleep(delay).await;
                    inner.fire_due(due).await;
                })
                .await;
        }
        if !created.is_empty() {
            info!(
                "scheduled {} reminders for event {} ({} recipients)",
                created.len(),
                event_id,
                recipients.len()
            );
        }
        created
    }

    /// Send a notification right away, outside the planned schedule.
    ///
    /// A planned kind (one week, day or hour) shares its key with the scheduled reminder:
    /// recipients already reached under it are skipped, and once the send completes
    /// without stopping the scheduled plan is superseded. If the batch stops early the
    /// plan stays scheduled. Immediate notices are keyed by their text.
    pub async fn fire_now(
        &self,
        event_id: &str,
        title: &str,
        event_time: DateTime<Utc>,
        recipients: &[String],
        kind: ReminderKind,
        message: Option<String>,
    ) -> BulkSendResult {
        let plan = ReminderPlan {
            event_id: event_id.to_string(),
            title: title.to_string(),
            event_time,
            firing_at: Utc::now(),
            kind,
            recipients: recipients.to_vec(),
            message,
        };
        let cancel = self.inner.book().begin_send(event_id);
        let result = self.inner.send(&plan, &cancel).await;

        let superseded = {
            let mut book = self.inner.book();
            book.end_send(event_id, &cancel);
            if kind == ReminderKind::Immediate || result.stopped || result.cancelled {
                false
            } else {
                book.mark_fired(&plan);
                book.scheduled.remove(&plan.key()).is_some()
            }
        };
        if superseded {
            self.tracker.abort(&plan.task_name()).await;
            debug!("reminder {} superseded by an immediate send", plan.context());
        }
        result
    }

    /// Drop every pending reminder of an event and stop any of its sends in flight.
    /// Returns how many plans were removed.
    pub async fn cancel_event(&self, event_id: &str) -> usize {
        let removed: Vec<ReminderPlan> = {
            let mut book = self.inner.book();
            if let Some(in_flight) = book.in_flight.remove(event_id) {
                in_flight.cancel.cancel();
            }
            let keys: Vec<PlanKey> = book
                .scheduled
                .keys()
                .filter(|(id, _)| id == event_id)
                .cloned()
                .collect();
            keys.iter()
                .filter_map(|key| book.scheduled.remove(key))
                .collect()
        };
        for plan in &removed {
            self.tracker.abort(&plan.task_name()).await;
        }
        if !removed.is_empty() {
            info!(
                "cancelled {} reminders for event {}",
                removed.len(),
                event_id
            );
        }
        removed.len()
    }

    /// Plans waiting to fire, soonest first.
    pub fn pending_plans(&self) -> Vec<ReminderPlan> {
        let mut plans: Vec<ReminderPlan> =
            self.inner.book().scheduled.values().cloned().collect();
        plans.sort_by(|a, b| {
            a.firing_at
                .cmp(&b.firing_at)
                .then_with(|| a.event_id.cmp(&b.event_id))
        });
        plans
    }

    /// Reminder tasks still waiting or sending.
    pub async fn active_tasks(&self) -> usize {
        self.tracker.len().await
    }

    /// Abort every pending reminder task.
    pub async fn shutdown(&self) {
        {
            let mut book = self.inner.book();
            for (_, in_flight) in book.in_flight.drain() {
                in_flight.cancel.cancel();
            }
        }
        self.tracker.abort_all().await;
    }
}
