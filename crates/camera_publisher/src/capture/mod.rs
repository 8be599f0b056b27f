//! Frame capture backends.
//!
//! A capture source is opened from a [`CaptureDescriptor`] and yields raw
//! RGB24 frames. Device indices and pipeline strings go through GStreamer
//! (feature `gstreamer`); the test pattern and image-directory replay are
//! always available.

#[cfg(feature = "gstreamer")]
mod gst;
mod image_dir;
mod test_pattern;

pub use image_dir::ImageDirectory;
pub use test_pattern::TestPattern;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Uncompressed RGB
pub const BYTES_PER_PIXEL: usize = 3;

/// Errors that can occur while opening or reading a capture source
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Capture backend '{0}' is not compiled in")]
    BackendUnavailable(&'static str),
    #[error("Failed to open {descriptor}: {reason}")]
    OpenFailed { descriptor: String, reason: String },
    #[error("Failed to read frame: {0}")]
    ReadFailed(String),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where frames come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaptureDescriptor {
    /// V4L2 device `/dev/video<index>`
    Device { index: u32 },
    /// Free-form GStreamer pipeline description
    Pipeline { description: String },
    /// Synthetic moving bars
    TestPattern {
        #[serde(default = "default_pattern_fps")]
        fps: f64,
    },
    /// Replay the images of a directory in name order, looping
    Directory {
        path: PathBuf,
        #[serde(default = "default_directory_fps")]
        fps: f64,
    },
}

fn default_pattern_fps() -> f64 {
    30.0
}

fn default_directory_fps() -> f64 {
    1.0
}

impl fmt::Display for CaptureDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureDescriptor::Device { index } => write!(f, "/dev/video{}", index),
            CaptureDescriptor::Pipeline { description } => write!(f, "pipeline '{}'", description),
            CaptureDescriptor::TestPattern { fps } => write!(f, "test pattern @ {} fps", fps),
            CaptureDescriptor::Directory { path, .. } => write!(f, "directory {}", path.display()),
        }
    }
}

/// Requested frame geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
}

impl CaptureSettings {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Size of one uncompressed frame, an upper bound for any encoded frame
    pub fn raw_frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }
}

/// A captured RGB24 frame, rows tightly packed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RawFrame {
    /// Row stride in bytes
    pub fn step(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }
}

/// An opened capture source
pub trait CaptureBackend: Send {
    /// Block until the next frame is available, or fail
    fn read(&mut self) -> Result<RawFrame, CaptureError>;

    fn release(&mut self) {}
}

/// Hands out device indices in construction order.
///
/// The increment is atomic, so cameras may be constructed from several
/// threads; each call still yields a distinct index.
#[derive(Debug, Default)]
pub struct DeviceAllocator {
    next: AtomicU32,
}

impl DeviceAllocator {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }

    pub fn next_index(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Index the next call to `next_index` will return
    pub fn peek(&self) -> u32 {
        self.next.load(Ordering::Relaxed)
    }
}

/// Open a capture source for the given descriptor
pub fn open(
    descriptor: &CaptureDescriptor,
    settings: &CaptureSettings,
) -> Result<Box<dyn CaptureBackend>, CaptureError> {
    match descriptor {
        CaptureDescriptor::TestPattern { fps } => {
            Ok(Box::new(TestPattern::new(*settings, FramePacer::from_fps(*fps))))
        }
        CaptureDescriptor::Directory { path, fps } => Ok(Box::new(ImageDirectory::open(
            path,
            *settings,
            FramePacer::from_fps(*fps),
        )?)),
        #[cfg(feature = "gstreamer")]
        CaptureDescriptor::Device { index } => {
            Ok(Box::new(gst::GstCapture::open_device(*index, settings)?))
        }
        #[cfg(feature = "gstreamer")]
        CaptureDescriptor::Pipeline { description } => {
            Ok(Box::new(gst::GstCapture::open_pipeline(description, settings)?))
        }
        #[cfg(not(feature = "gstreamer"))]
        CaptureDescriptor::Device { .. } | CaptureDescriptor::Pipeline { .. } => {
            Err(CaptureError::BackendUnavailable("gstreamer"))
        }
    }
}

/// Sleeps so that successive frames are at least `1 / fps` apart
#[derive(Debug)]
pub(crate) struct FramePacer {
    interval: Option<Duration>,
    next: Option<Instant>,
}

impl FramePacer {
    pub(crate) fn from_fps(fps: f64) -> Self {
        let interval = (fps.is_finite() && fps > 0.0).then(|| Duration::from_secs_f64(1.0 / fps));
        Self {
            interval,
            next: None,
        }
    }

    pub(crate) fn wait(&mut self) {
        let Some(interval) = self.interval else {
            return;
        };
        let now = Instant::now();
        let due = self.next.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        // Never try to catch up on frames we were too slow for
        self.next = Some(due.max(now) + interval);
    }
}
