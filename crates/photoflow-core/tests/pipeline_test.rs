//! End-to-end runs of the worker: real image processing, in-memory and SQLite
//! stores, fake WordPress.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::Mutex;
use ulid::Ulid;

use photoflow_core::agents::{ColorCorrectAgent, PublishAgent, color_correct, publish};
use photoflow_core::app::{AppBuilder, SupervisorConfig, WorkerHandle};
use photoflow_core::domain::{
    ChangeEvent, ChangeFilter, CorrectionStatus, PublishStatus, Stage, Task, TaskId, TaskStatus,
};
use photoflow_core::impls::{ImageCrateEnhancer, InMemoryTaskStore, SqliteTaskStore};
use photoflow_core::ports::{
    MediaPublisher, PublishError, SystemClock, TaskStore, UploadedMedia,
};

#[derive(Default)]
struct FakeWordPress {
    next_id: AtomicU64,
    uploads: Mutex<Vec<PathBuf>>,
}

impl FakeWordPress {
    async fn uploads(&self) -> Vec<PathBuf> {
        self.uploads.lock().await.clone()
    }
}

#[async_trait]
impl MediaPublisher for FakeWordPress {
    async fn upload(
        &self,
        file_path: &Path,
        filename: &str,
    ) -> Result<UploadedMedia, PublishError> {
        let media_id = 500 + self.next_id.fetch_add(1, Ordering::SeqCst);
        self.uploads.lock().await.push(file_path.to_path_buf());
        Ok(UploadedMedia {
            media_id,
            media_url: format!("https://shop.example/wp-content/uploads/{filename}"),
        })
    }
}

fn write_jpeg(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    let img = image::RgbImage::from_fn(16, 16, |x, y| {
        image::Rgb([(x * 12) as u8, (y * 12) as u8, 90])
    });
    img.save(&path).unwrap();
    path
}

fn uploaded_task(sku: &str, photos: &[&Path]) -> Task {
    let mut task = Task::new(
        TaskId::from(Ulid::new()),
        sku,
        "Trail Runner",
        "US",
        Utc::now(),
    )
    .with_photos(photos.iter().map(|p| p.to_string_lossy().into_owned()));
    task.status = TaskStatus::PhotosUploaded;
    task.workflow_step = TaskStatus::PhotosUploaded.workflow_step();
    task
}

fn start_worker(
    store: Arc<dyn TaskStore>,
    publisher: Option<Arc<dyn MediaPublisher>>,
) -> WorkerHandle {
    let color = ColorCorrectAgent::new(
        store.clone(),
        Arc::new(ImageCrateEnhancer::new()),
        Arc::new(SystemClock),
    );
    let publish = PublishAgent::new(store.clone(), publisher, Arc::new(SystemClock));

    let app = AppBuilder::new(store)
        .register(Arc::new(color))
        .unwrap()
        .register(Arc::new(publish))
        .unwrap()
        .expect_stages(&Stage::all())
        .supervisor_config(SupervisorConfig::default())
        .build()
        .unwrap();
    Arc::new(app.supervisor()).spawn()
}

async fn wait_for_subscriber(store: &InMemoryTaskStore) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while store.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("worker never subscribed");
}

async fn wait_for_terminal(store: &dyn TaskStore, id: TaskId) -> Task {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some(task) = store.find_by_id(id).await.unwrap() {
                if task.status.is_terminal() {
                    return task;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("task never reached a terminal status")
}

fn actions(task: &Task) -> Vec<&str> {
    task.agent_log.iter().map(|e| e.action.as_str()).collect()
}

#[tokio::test]
async fn photos_flow_through_correction_and_publish() {
    let dir = tempfile::tempdir().unwrap();
    let present = write_jpeg(dir.path(), "front.jpg");
    let missing = dir.path().join("gone.jpg");

    let store = Arc::new(InMemoryTaskStore::new());
    let wordpress = Arc::new(FakeWordPress::default());
    let handle = start_worker(store.clone(), Some(wordpress.clone() as Arc<dyn MediaPublisher>));
    wait_for_subscriber(&store).await;

    let task = uploaded_task("NIKE-USA-101", &[&present, &missing]);
    let id = store.insert(task).await.unwrap();
    let done = wait_for_terminal(store.as_ref(), id).await;

    assert_eq!(done.status, TaskStatus::WordpressPublished);
    assert_eq!(done.workflow_step, TaskStatus::WordpressPublished.workflow_step());

    let corrections = &done.color_analysis;
    assert_eq!(corrections.len(), 2);
    assert_eq!(corrections[0].photo_index, 1);
    assert_eq!(corrections[0].status, CorrectionStatus::Completed);
    let corrected = corrections[0].corrected_path().unwrap();
    assert!(corrected.exists());
    assert!(corrected.ends_with("front_color_corrected.jpg"));
    assert_eq!(corrections[1].photo_index, 2);
    assert_eq!(corrections[1].status, CorrectionStatus::Failed);

    let published = &done.wordpress_publish_results;
    assert_eq!(published.len(), 2);
    assert_eq!(
        published.iter().map(|r| r.photo_index).collect::<Vec<_>>(),
        vec![1, 2]
    );
    assert_eq!(published[0].status, PublishStatus::Published);
    assert_eq!(published[0].media_id, Some(500));
    assert_eq!(
        published[0].media_url.as_deref(),
        Some("https://shop.example/wp-content/uploads/front_color_corrected.jpg")
    );
    assert_eq!(published[1].status, PublishStatus::Failed);
    assert_eq!(wordpress.uploads().await, vec![corrected.to_path_buf()]);

    assert_eq!(
        actions(&done),
        vec!["task_created", color_correct::ACTION, publish::ACTION]
    );
    assert_eq!(done.agent_log[1].note, "Processed 2 photos for color correction");
    assert_eq!(done.agent_log[2].note, "Published 1 photos to WordPress");
    assert_eq!(done.retry_metadata.count, 0);

    handle.shutdown_and_join().await.unwrap();
}

#[tokio::test]
async fn observed_statuses_follow_the_pipeline_order() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_jpeg(dir.path(), "left.jpg");
    let second = write_jpeg(dir.path(), "right.jpg");

    let store = Arc::new(InMemoryTaskStore::new());
    let mut feed = store.subscribe(ChangeFilter::default()).await.unwrap();
    let wordpress = Arc::new(FakeWordPress::default());
    let handle = start_worker(store.clone(), Some(wordpress as Arc<dyn MediaPublisher>));
    // our own feed counts as one subscriber
    tokio::time::timeout(Duration::from_secs(5), async {
        while store.subscriber_count() < 2 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    let id = store.insert(uploaded_task("PUMA-JP-3", &[&first, &second])).await.unwrap();

    let mut seen: Vec<TaskStatus> = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(event) = feed.next().await {
            let event = event.unwrap();
            if event.task_id != Some(id) {
                continue;
            }
            let status = store.find_by_id(id).await.unwrap().unwrap().status;
            if seen.last() != Some(&status) {
                seen.push(status);
            }
            if status.is_terminal() {
                break;
            }
        }
    })
    .await
    .expect("task never reached a terminal status");

    assert_eq!(seen.last(), Some(&TaskStatus::WordpressPublished));
    for pair in seen.windows(2) {
        assert!(
            pair[0].rank() < pair[1].rank(),
            "status went from {} to {}: {seen:?}",
            pair[0],
            pair[1]
        );
    }
    assert!(seen.iter().all(|s| s.rank() >= TaskStatus::PhotosUploaded.rank()));

    handle.shutdown_and_join().await.unwrap();
}

#[tokio::test]
async fn missing_credentials_end_in_publish_failed() {
    let dir = tempfile::tempdir().unwrap();
    let photo = write_jpeg(dir.path(), "side.jpg");

    let store = Arc::new(InMemoryTaskStore::new());
    let handle = start_worker(store.clone(), None);
    wait_for_subscriber(&store).await;

    let id = store.insert(uploaded_task("ADIDAS-DE-7", &[&photo])).await.unwrap();
    let done = wait_for_terminal(store.as_ref(), id).await;

    assert_eq!(done.status, TaskStatus::PublishFailed);
    assert_eq!(done.wordpress_publish_results.len(), 1);
    assert_eq!(done.wordpress_publish_results[0].status, PublishStatus::Skipped);
    assert_eq!(
        done.wordpress_publish_results[0].reason.as_deref(),
        Some(publish::NOT_CONFIGURED)
    );

    handle.shutdown_and_join().await.unwrap();
}

#[tokio::test]
async fn redelivered_events_do_not_rerun_agents() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_jpeg(dir.path(), "a.jpg");
    let second = write_jpeg(dir.path(), "b.jpg");

    let store = Arc::new(InMemoryTaskStore::new());
    let wordpress = Arc::new(FakeWordPress::default());
    let handle = start_worker(store.clone(), Some(wordpress.clone() as Arc<dyn MediaPublisher>));
    wait_for_subscriber(&store).await;

    let id = store.insert(uploaded_task("SKU-A", &[&first])).await.unwrap();
    let done = wait_for_terminal(store.as_ref(), id).await;

    store.emit_raw(ChangeEvent::insert(id));
    store.emit_raw(ChangeEvent::update(id, vec!["status".to_string()]));
    store.emit_raw(ChangeEvent::retry(id));

    // events are handled in order, so once this one is done the replays were seen
    let marker = store.insert(uploaded_task("SKU-B", &[&second])).await.unwrap();
    wait_for_terminal(store.as_ref(), marker).await;

    let after = store.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(after, done);
    assert_eq!(wordpress.uploads().await.len(), 2);

    handle.shutdown_and_join().await.unwrap();
}

#[tokio::test]
async fn worker_recovers_after_the_feed_drops() {
    let dir = tempfile::tempdir().unwrap();
    let photo = write_jpeg(dir.path(), "c.jpg");

    let store = Arc::new(InMemoryTaskStore::new());
    let handle = start_worker(store.clone(), None);
    wait_for_subscriber(&store).await;

    store.disconnect_subscribers("replica set election");
    // first reconnect waits 2s of real time
    tokio::time::timeout(Duration::from_secs(5), async {
        while store.subscriber_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        while store.subscriber_count() == 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("worker did not resubscribe");

    let id = store.insert(uploaded_task("SKU-C", &[&photo])).await.unwrap();
    let done = wait_for_terminal(store.as_ref(), id).await;
    assert_eq!(done.status, TaskStatus::PublishFailed);
    assert!(!handle.is_finished());

    handle.shutdown_and_join().await.unwrap();
}

#[tokio::test]
async fn sqlite_outbox_drives_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let photo = write_jpeg(dir.path(), "d.jpg");
    let url = format!("sqlite://{}", dir.path().join("tasks.db").display());
    let store: Arc<dyn TaskStore> = Arc::new(
        SqliteTaskStore::connect(&url, Duration::from_millis(10))
            .await
            .unwrap(),
    );

    let wordpress = Arc::new(FakeWordPress::default());
    let handle = start_worker(store.clone(), Some(wordpress.clone() as Arc<dyn MediaPublisher>));
    // the poller starts from the newest change row at subscribe time
    tokio::time::sleep(Duration::from_millis(300)).await;

    let id = store.insert(uploaded_task("SKU-D", &[&photo])).await.unwrap();
    let done = wait_for_terminal(store.as_ref(), id).await;

    assert_eq!(done.status, TaskStatus::WordpressPublished);
    assert_eq!(done.color_analysis.len(), 1);
    assert_eq!(done.wordpress_publish_results.len(), 1);
    assert_eq!(wordpress.uploads().await.len(), 1);

    handle.shutdown_and_join().await.unwrap();
}
