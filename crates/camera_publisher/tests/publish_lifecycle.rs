//! Camera lifecycle and delivery policy over the in-memory transport.

use camera_publisher::capture::CaptureSettings;
use camera_publisher::encode::decode_jpeg;
use camera_publisher::transport::memory::{self, MemoryPublisher};
use camera_publisher::{
    CameraCapture, CaptureDescriptor, EndpointOption, EndpointOptions, Skip, WorkerError,
    WorkerState,
};
use std::time::{Duration, Instant};

fn pattern_camera(name: &str, publisher: MemoryPublisher, fps: f64) -> CameraCapture<MemoryPublisher> {
    CameraCapture::with_publisher(
        name,
        publisher,
        CaptureDescriptor::TestPattern { fps },
        CaptureSettings::new(80, 60),
        75,
    )
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let until = Instant::now() + deadline;
    while Instant::now() < until {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn test_conflating_link_keeps_only_latest_frame() {
    let (publisher, subscriber) = memory::channel(EndpointOptions::default());
    let mut camera = pattern_camera("conflate", publisher, 0.0);
    camera.start().unwrap();

    let stats = camera.stats();
    assert!(wait_until(Duration::from_secs(5), || stats.published() >= 20));
    camera.stop();

    // Never more than one frame queued, and older ones were evicted
    assert_eq!(subscriber.queued(), 1);
    let link = subscriber.stats();
    assert!(link.dropped() > 0);

    let last = subscriber.try_recv().unwrap();
    assert_eq!(last.flags.sequence, Some(stats.published() - 1));
    assert!(decode_jpeg(&last.payload).is_ok());
    assert!(subscriber.is_closed());
}

#[test]
fn test_queueing_link_honours_high_water_mark() {
    let options = EndpointOptions::default()
        .with(EndpointOption::Conflate(false))
        .with(EndpointOption::SendHighWaterMark(4));
    let (publisher, subscriber) = memory::channel(options);
    let mut camera = pattern_camera("queue", publisher, 0.0);
    camera.start().unwrap();

    let stats = camera.stats();
    assert!(wait_until(Duration::from_secs(5), || stats.published() >= 20));
    camera.stop();

    assert_eq!(subscriber.queued(), 4);
    // Without conflation the oldest frames are kept
    let first = subscriber.try_recv().unwrap();
    assert_eq!(first.flags.sequence, Some(0));
}

#[test]
fn test_immediate_link_drops_without_subscriber() {
    let (publisher, subscriber) = memory::channel(EndpointOptions::default());
    let link = subscriber.stats();
    drop(subscriber);

    let mut camera = pattern_camera("nobody", publisher, 0.0);
    camera.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || link.dropped() >= 5));
    camera.stop();

    assert_eq!(link.sent(), 0);
    // Dropped by policy still counts as published
    assert!(camera.stats().published() >= 5);
    assert_eq!(camera.stats().skipped(Skip::SendFailed), 0);
}

#[test]
fn test_stopped_camera_cannot_restart() {
    let (publisher, subscriber) = memory::channel(EndpointOptions::default());
    let mut camera = pattern_camera("once", publisher, 30.0);

    camera.start().unwrap();
    // Starting twice is a no-op
    camera.start().unwrap();
    assert_eq!(camera.state(), WorkerState::Running);

    camera.stop();
    camera.stop();
    assert_eq!(camera.state(), WorkerState::Stopped);
    assert!(!camera.is_capturing());
    assert!(subscriber.stats().is_closed());
    assert!(matches!(camera.start(), Err(WorkerError::Stopped(_))));
}

#[test]
fn test_stop_before_start_releases_endpoint() {
    let (publisher, subscriber) = memory::channel(EndpointOptions::default());
    let mut camera = pattern_camera("idle", publisher, 30.0);
    assert_eq!(camera.state(), WorkerState::Idle);

    camera.stop();
    assert_eq!(camera.state(), WorkerState::Stopped);
    assert!(subscriber.stats().is_closed());
    assert_eq!(camera.stats().published(), 0);
}

#[test]
fn test_drop_stops_camera() {
    let (publisher, subscriber) = memory::channel(EndpointOptions::default());
    let mut camera = pattern_camera("dropped", publisher, 30.0);
    camera.start().unwrap();
    drop(camera);

    assert!(subscriber.stats().is_closed());
}

#[test]
fn test_cameras_run_independently() {
    let (left_pub, left_sub) = memory::channel(EndpointOptions::default());
    let (right_pub, right_sub) = memory::channel(EndpointOptions::default());
    let mut left = pattern_camera("left", left_pub, 60.0);
    let mut right = pattern_camera("right", right_pub, 60.0);
    left.start().unwrap();
    right.start().unwrap();

    assert!(left_sub.recv_timeout(Duration::from_secs(5)).is_some());
    left.stop();

    // Stopping one camera leaves the other publishing
    assert!(right.is_running());
    let before = right.stats().published();
    assert!(wait_until(Duration::from_secs(5), || right.stats().published() > before));
    assert!(right_sub.recv_timeout(Duration::from_secs(5)).is_some());
    right.stop();
}
