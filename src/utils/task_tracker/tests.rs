use super::*;
use std::time::Duration;

async fn park(tracker: &TaskTracker, name: &str) {
    tracker
        .spawn(name.to_string(), async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        })
        .await;
}

#[tokio::test]
async fn finished_task_leaves_tracker() {
    let tracker = TaskTracker::new();
    tracker.spawn("quick".to_string(), async {}).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!tracker.contains("quick").await);
    assert_eq!(tracker.len().await, 0);
}

#[tokio::test]
async fn same_name_replaces_running_task() {
    let tracker = TaskTracker::new();
    park(&tracker, "reminder:1").await;
    park(&tracker, "reminder:1").await;
    assert_eq!(tracker.len().await, 1);
    tracker.abort_all().await;
}

#[tokio::test(start_paused = true)]
async fn replaced_task_does_not_evict_its_successor() {
    let tracker = TaskTracker::new();
    tracker
        .spawn("job".to_string(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
        })
        .await;
    park(&tracker, "job").await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(tracker.contains("job").await);
    tracker.abort_all().await;
}

#[tokio::test]
async fn abort_single_task() {
    let tracker = TaskTracker::new();
    park(&tracker, "a").await;
    park(&tracker, "b").await;

    assert!(tracker.abort("a").await);
    assert!(!tracker.abort("a").await);
    assert!(!tracker.contains("a").await);
    assert!(tracker.contains("b").await);

    tracker.abort_all().await;
    assert_eq!(tracker.len().await, 0);
}
