//! Publishing endpoints.
//!
//! A [`FramePublisher`] is the only way a worker emits data. Two
//! implementations are provided:
//!
//! - [`ZenohEndpoint`]: a zenoh peer session listening on `tcp/0.0.0.0:<port>`
//! - [`memory`]: an in-process latest-value channel with the same delivery policy
//!
//! Both honour the same [`EndpointOptions`]: conflate, immediate and a send
//! high-water-mark. Together these make the endpoint a best-effort
//! latest-frame broadcaster.

pub mod memory;
mod zenoh_endpoint;

pub use zenoh_endpoint::ZenohEndpoint;

use thiserror::Error;

/// Errors raised by a publishing endpoint
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to bind endpoint on port {port}: {reason}")]
    Bind { port: u16, reason: String },
    #[error("Zenoh error: {0}")]
    Zenoh(String),
    #[error("Endpoint is closed")]
    Closed,
    #[error("Option {0:?} requires rebinding the endpoint")]
    RequiresRebind(EndpointOption),
}

/// A single low-level endpoint option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointOption {
    /// Keep only the most recently enqueued message
    Conflate(bool),
    /// Drop instead of queueing for peers that are not connected yet
    Immediate(bool),
    /// Maximum number of messages queued beyond the one in flight
    SendHighWaterMark(usize),
    /// Kernel send buffer size in bytes
    SendBuffer(usize),
}

/// Delivery policy of an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointOptions {
    pub conflate: bool,
    pub immediate: bool,
    pub send_hwm: usize,
    pub send_buffer: Option<usize>,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            conflate: true,
            immediate: true,
            send_hwm: 1,
            send_buffer: None,
        }
    }
}

impl EndpointOptions {
    /// Apply one option on top of the current policy
    pub fn apply(&mut self, option: EndpointOption) {
        match option {
            EndpointOption::Conflate(on) => self.conflate = on,
            EndpointOption::Immediate(on) => self.immediate = on,
            EndpointOption::SendHighWaterMark(hwm) => self.send_hwm = hwm.max(1),
            EndpointOption::SendBuffer(bytes) => self.send_buffer = Some(bytes),
        }
    }

    pub fn with(mut self, option: EndpointOption) -> Self {
        self.apply(option);
        self
    }
}

/// Per-message metadata handed to [`FramePublisher::emit`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitFlags {
    /// MIME type advertised next to the payload (e.g. `image/jpeg`)
    pub content_type: Option<&'static str>,
    /// Capture-order sequence number, carried outside the payload
    pub sequence: Option<u64>,
}

/// Something that can emit opaque buffers with lossy, latest-value semantics.
///
/// `emit` must never block waiting for a slow consumer. Dropping a message
/// because of the delivery policy is not an error.
pub trait FramePublisher: Send + 'static {
    /// Tune the endpoint before traffic begins
    fn configure(&mut self, option: EndpointOption) -> Result<(), TransportError>;

    /// Best-effort, non-blocking send
    fn emit(&mut self, payload: Vec<u8>, flags: EmitFlags) -> Result<(), TransportError>;

    /// Release the endpoint. Calling it twice is a no-op.
    fn close(&mut self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let options = EndpointOptions::default();
        assert!(options.conflate);
        assert!(options.immediate);
        assert_eq!(options.send_hwm, 1);
        assert_eq!(options.send_buffer, None);
    }

    #[test]
    fn test_apply_options() {
        let options = EndpointOptions::default()
            .with(EndpointOption::SendBuffer(640 * 480 * 3))
            .with(EndpointOption::Conflate(false))
            .with(EndpointOption::SendHighWaterMark(0));
        assert_eq!(options.send_buffer, Some(921_600));
        assert!(!options.conflate);
        // hwm is clamped to at least one queued message
        assert_eq!(options.send_hwm, 1);
    }

    #[test]
    fn test_rebind_error_message() {
        let error = TransportError::RequiresRebind(EndpointOption::SendHighWaterMark(4));
        assert_eq!(
            error.to_string(),
            "Option SendHighWaterMark(4) requires rebinding the endpoint"
        );
    }
}
