use super::{SessionController, SessionState};
use crate::config::SupervisorConfig;
use crate::utils::exponential_backoff_delay;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Re-initialize a session after it drops or fails, with exponential backoff.
///
/// An explicit `disconnect()` (Idle) is left alone. The attempt counter resets once the
/// session reaches Ready again.
pub fn spawn_supervisor(
    session: Arc<SessionController>,
    config: SupervisorConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut rx = session.watch();
        let mut attempt: u32 = 0;
        loop {
            let state = rx.borrow_and_update().state;
            match state {
                SessionState::Ready => attempt = 0,
                SessionState::Disconnected | SessionState::Failed => {
                    let delay = Duration::from_secs(exponential_backoff_delay(
                        attempt,
                        config.base_delay_secs,
                        config.max_delay_secs,
                    ));
                    attempt = attempt.saturating_add(1);
                    warn!(
                        "session {} is {}, reconnecting in {}s (attempt {})",
                        session.id(),
                        state,
                        delay.as_secs(),
                        attempt
                    );
                    tokio::time::sleep(delay).await;

                    let current = session.state();
                    if current == SessionState::Failed {
                        session.disconnect().await;
                    }
                    if matches!(current, SessionState::Disconnected | SessionState::Failed) {
                        if let Err(e) = session.initialize() {
                            warn!("supervisor could not restart {}: {}", session.id(), e);
                        }
                    } else {
                        info!(
                            "session {} is {} again, skipping reconnect",
                            session.id(),
                            current
                        );
                    }
                    continue;
                }
                SessionState::Idle | SessionState::Authenticating => {}
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    })
}

#[cfg(test)]
mod tests;
