//! Latest-frame camera publishing.
//!
//! Each [`CameraCapture`] owns a capture source and a zenoh endpoint bound to
//! its own TCP port. Frames are JPEG-compressed and published with a
//! conflating, non-queueing policy so subscribers only ever see the newest
//! frame.

pub mod camera;
pub mod capture;
pub mod config;
pub mod encode;
pub mod source;
pub mod subscriber;
pub mod transport;
pub mod worker;

pub use camera::{CameraCapture, CameraError};
pub use capture::{CaptureDescriptor, CaptureSettings, DeviceAllocator};
pub use config::Config;
pub use source::{Frame, FrameSource, Skip};
pub use subscriber::{FrameSubscriber, ReceivedFrame};
pub use transport::{EndpointOption, EndpointOptions, FramePublisher, ZenohEndpoint};
pub use worker::{PublishWorker, WorkerError, WorkerState};
