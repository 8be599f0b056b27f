//! Camera publishing: capture → JPEG → publish.

use crate::capture::{self, CaptureBackend, CaptureDescriptor, CaptureSettings, DeviceAllocator};
use crate::config::CameraConfig;
use crate::encode::{JpegEncoder, DEFAULT_JPEG_QUALITY, JPEG_CONTENT_TYPE};
use crate::source::{Frame, FrameSource, Skip};
use crate::transport::{
    EndpointOption, EndpointOptions, FramePublisher, TransportError, ZenohEndpoint,
};
use crate::worker::{PublishWorker, WorkerError, WorkerState, WorkerStats};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// How long an inert camera parks per iteration instead of spinning
const INERT_IDLE: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum CameraError {
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Key expression used when none is configured
pub fn default_topic(name: &str) -> String {
    format!("camera/{}/compressed", name)
}

/// Loop body of a camera: one read, one encode per iteration
pub struct CameraFrames {
    name: String,
    capture: Option<Box<dyn CaptureBackend>>,
    encoder: JpegEncoder,
}

impl FrameSource for CameraFrames {
    fn produce(&mut self) -> Result<Frame, Skip> {
        let Some(capture) = self.capture.as_mut() else {
            std::thread::sleep(INERT_IDLE);
            return Err(Skip::NoSource);
        };

        let raw = capture.read().map_err(|e| {
            log::trace!("[{}] Read failed: {}", self.name, e);
            Skip::ReadFailed
        })?;
        let jpeg = self.encoder.encode(&raw).map_err(|e| {
            log::trace!("[{}] Encode failed: {}", self.name, e);
            Skip::EncodeFailed
        })?;

        Ok(Frame::new(jpeg).with_content_type(JPEG_CONTENT_TYPE))
    }

    fn release(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.release();
            log::info!("[{}] Capture source released", self.name);
        }
    }
}

/// A camera bound to its own publishing endpoint.
///
/// Dropping a `CameraCapture` stops it.
pub struct CameraCapture<P: FramePublisher = ZenohEndpoint> {
    worker: PublishWorker<CameraFrames, P>,
    descriptor: CaptureDescriptor,
    settings: CaptureSettings,
    capturing: bool,
}

impl CameraCapture<ZenohEndpoint> {
    /// Open the next physical device handed out by `allocator`
    pub fn open(
        port: u16,
        width: u32,
        height: u32,
        allocator: &DeviceAllocator,
    ) -> Result<Self, CameraError> {
        let descriptor = CaptureDescriptor::Device {
            index: allocator.next_index(),
        };
        Self::with_source(port, descriptor, width, height)
    }

    /// Open an explicit capture source
    pub fn with_source(
        port: u16,
        descriptor: CaptureDescriptor,
        width: u32,
        height: u32,
    ) -> Result<Self, CameraError> {
        let name = port.to_string();
        let topic = default_topic(&name);
        Self::bind(
            &name,
            port,
            &topic,
            descriptor,
            CaptureSettings::new(width, height),
            DEFAULT_JPEG_QUALITY,
        )
    }

    pub fn from_config(
        config: &CameraConfig,
        allocator: &DeviceAllocator,
    ) -> Result<Self, CameraError> {
        let descriptor = config
            .source
            .clone()
            .unwrap_or_else(|| CaptureDescriptor::Device {
                index: allocator.next_index(),
            });
        Self::bind(
            &config.name,
            config.port,
            &config.topic(),
            descriptor,
            config.settings(),
            config.quality,
        )
    }

    fn bind(
        name: &str,
        port: u16,
        topic: &str,
        descriptor: CaptureDescriptor,
        settings: CaptureSettings,
        quality: u8,
    ) -> Result<Self, CameraError> {
        let capture = open_capture(name, &descriptor, &settings);

        let mut options = EndpointOptions::default();
        if capture.is_some() {
            options.apply(EndpointOption::SendBuffer(settings.raw_frame_bytes()));
        }
        let endpoint = ZenohEndpoint::bind(port, topic, &options)?;

        Ok(Self::assemble(
            name, endpoint, capture, descriptor, settings, quality,
        ))
    }
}

impl<P: FramePublisher> CameraCapture<P> {
    /// Build a camera on top of an already bound publisher
    pub fn with_publisher(
        name: &str,
        mut publisher: P,
        descriptor: CaptureDescriptor,
        settings: CaptureSettings,
        quality: u8,
    ) -> Self {
        let capture = open_capture(name, &descriptor, &settings);
        if capture.is_some() {
            let option = EndpointOption::SendBuffer(settings.raw_frame_bytes());
            if let Err(e) = publisher.configure(option) {
                log::warn!("[{}] Could not size send buffer: {}", name, e);
            }
        }
        Self::assemble(name, publisher, capture, descriptor, settings, quality)
    }

    fn assemble(
        name: &str,
        publisher: P,
        capture: Option<Box<dyn CaptureBackend>>,
        descriptor: CaptureDescriptor,
        settings: CaptureSettings,
        quality: u8,
    ) -> Self {
        let capturing = capture.is_some();
        let frames = CameraFrames {
            name: name.to_string(),
            capture,
            encoder: JpegEncoder::new(quality),
        };
        Self {
            worker: PublishWorker::new(name, frames, publisher),
            descriptor,
            settings,
            capturing,
        }
    }

    pub fn start(&mut self) -> Result<(), WorkerError> {
        self.worker.start()
    }

    /// Stop the loop, close the endpoint and release the capture source
    pub fn stop(&mut self) {
        self.worker.stop();
        self.capturing = false;
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    /// False when the capture source failed to open (or after stop)
    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    pub fn name(&self) -> &str {
        self.worker.name()
    }

    pub fn state(&self) -> WorkerState {
        self.worker.state()
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.worker.stats()
    }

    /// The bound endpoint, available until the camera is started
    pub fn publisher(&self) -> Option<&P> {
        self.worker.publisher()
    }

    pub fn descriptor(&self) -> &CaptureDescriptor {
        &self.descriptor
    }

    pub fn settings(&self) -> CaptureSettings {
        self.settings
    }
}

/// Open a capture source, reporting failure once. An unopened source leaves
/// the camera inert rather than failing construction.
fn open_capture(
    name: &str,
    descriptor: &CaptureDescriptor,
    settings: &CaptureSettings,
) -> Option<Box<dyn CaptureBackend>> {
    match capture::open(descriptor, settings) {
        Ok(capture) => {
            log::info!(
                "[{}] Capturing from {} at {}x{}",
                name,
                descriptor,
                settings.width,
                settings.height
            );
            Some(capture)
        }
        Err(e) => {
            log::error!("[{}] Could not open {}: {}", name, descriptor, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::decode_jpeg;
    use crate::transport::memory;

    fn pattern() -> CaptureDescriptor {
        CaptureDescriptor::TestPattern { fps: 200.0 }
    }

    #[test]
    fn test_camera_publishes_jpeg_frames() {
        let (publisher, subscriber) = memory::channel(EndpointOptions::default());
        let mut camera = CameraCapture::with_publisher(
            "pattern",
            publisher,
            pattern(),
            CaptureSettings::new(64, 32),
            90,
        );
        assert!(camera.is_capturing());
        assert_eq!(subscriber.stats().send_buffer(), Some(64 * 32 * 3));
        assert_eq!(camera.settings(), CaptureSettings::new(64, 32));

        camera.start().unwrap();
        let message = subscriber.recv_timeout(Duration::from_secs(5)).unwrap();
        camera.stop();

        assert_eq!(message.flags.content_type, Some(JPEG_CONTENT_TYPE));
        let frame = decode_jpeg(&message.payload).unwrap();
        assert_eq!((frame.width, frame.height), (64, 32));
        assert!(!camera.is_running());
        assert_eq!(camera.state(), WorkerState::Stopped);
    }

    #[test]
    fn test_unopened_source_leaves_camera_inert() {
        let (publisher, subscriber) = memory::channel(EndpointOptions::default());
        let dir = tempfile::tempdir().unwrap();
        let mut camera = CameraCapture::with_publisher(
            "missing",
            publisher,
            CaptureDescriptor::Directory {
                path: dir.path().to_path_buf(),
                fps: 1.0,
            },
            CaptureSettings::new(64, 32),
            90,
        );
        assert!(!camera.is_capturing());
        // Send buffer is only sized for an opened source
        assert_eq!(subscriber.stats().send_buffer(), None);

        camera.start().unwrap();
        assert!(camera.is_running());
        let stats = camera.stats();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while stats.skipped(Skip::NoSource) == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        camera.stop();

        assert!(stats.skipped(Skip::NoSource) > 0);
        assert_eq!(stats.published(), 0);
        assert!(subscriber.try_recv().is_none());
        assert!(subscriber.stats().is_closed());
    }

    #[test]
    fn test_frames_source_releases_capture_once() {
        let mut frames = CameraFrames {
            name: "t".to_string(),
            capture: capture::open(&pattern(), &CaptureSettings::new(8, 8)).ok(),
            encoder: JpegEncoder::default(),
        };
        assert!(frames.produce().is_ok());
        frames.release();
        frames.release();
        assert!(frames.capture.is_none());
        assert_eq!(frames.produce(), Err(Skip::NoSource));
    }

    /// Backend whose frames never match their declared geometry
    struct ShortFrames;

    impl CaptureBackend for ShortFrames {
        fn read(&mut self) -> Result<capture::RawFrame, capture::CaptureError> {
            std::thread::sleep(Duration::from_millis(1));
            Ok(capture::RawFrame {
                data: vec![0; 10],
                width: 16,
                height: 16,
            })
        }
    }

    #[test]
    fn test_encode_failures_are_counted_not_emitted() {
        let (publisher, subscriber) = memory::channel(EndpointOptions::default());
        let frames = CameraFrames {
            name: "short".to_string(),
            capture: Some(Box::new(ShortFrames)),
            encoder: JpegEncoder::default(),
        };
        let mut worker = PublishWorker::new("short", frames, publisher);
        let stats = worker.stats();

        worker.start().unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while stats.skipped(Skip::EncodeFailed) < 5 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(worker.is_running());
        worker.stop();

        assert!(stats.skipped(Skip::EncodeFailed) >= 5);
        assert_eq!(stats.published(), 0);
        assert_eq!(subscriber.stats().sent(), 0);
        assert!(subscriber.try_recv().is_none());
    }

    #[test]
    fn test_default_topic() {
        assert_eq!(default_topic("5555"), "camera/5555/compressed");
    }
}
