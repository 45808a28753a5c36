use super::*;
use crate::config::SimulatedConfig;
use crate::transport::SimulatedTransport;

fn fast_backoff() -> SupervisorConfig {
    SupervisorConfig {
        enabled: true,
        base_delay_secs: 1,
        max_delay_secs: 4,
    }
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn reconnects_after_channel_drop() {
    let transport = Arc::new(SimulatedTransport::new(SimulatedConfig {
        auth_delay_ms: Some(100),
        ..SimulatedConfig::default()
    }));
    let session = Arc::new(SessionController::new(
        "acme",
        transport.clone(),
        Duration::from_secs(10),
    ));
    let supervisor = spawn_supervisor(session.clone(), fast_backoff());

    session.initialize().unwrap();
    session.wait_ready(Duration::from_secs(5)).await.unwrap();

    transport.drop_connection("network");
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(transport.connect_count(), 2);
    assert!(session.is_ready());
    supervisor.abort();
}

#[tokio::test(start_paused = true)]
async fn retries_failed_connects_with_backoff() {
    let transport = Arc::new(SimulatedTransport::new(SimulatedConfig {
        fail_connect: true,
        ..SimulatedConfig::default()
    }));
    let session = Arc::new(SessionController::new(
        "acme",
        transport.clone(),
        Duration::from_secs(10),
    ));
    let supervisor = spawn_supervisor(session.clone(), fast_backoff());

    session.initialize().unwrap();
    settle().await;
    assert_eq!(transport.connect_count(), 1);

    // Delays of 1, 2 and 4s (plus jitter) fit well inside 20s
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(transport.connect_count() >= 4, "{}", transport.connect_count());
    supervisor.abort();
}

#[tokio::test(start_paused = true)]
async fn leaves_explicit_disconnect_alone() {
    let transport = Arc::new(SimulatedTransport::new(SimulatedConfig {
        auth_delay_ms: Some(100),
        ..SimulatedConfig::default()
    }));
    let session = Arc::new(SessionController::new(
        "acme",
        transport.clone(),
        Duration::from_secs(10),
    ));
    let supervisor = spawn_supervisor(session.clone(), fast_backoff());

    session.initialize().unwrap();
    session.wait_ready(Duration::from_secs(5)).await.unwrap();
    session.disconnect().await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(transport.connect_count(), 1);
    supervisor.abort();
}
