use thiserror::Error;

/// Why a loop iteration produced nothing.
///
/// Every variant is an accepted outcome of best-effort streaming: the worker
/// counts it and moves on to the next iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Skip {
    #[error("no capture source")]
    NoSource,
    #[error("frame read failed")]
    ReadFailed,
    #[error("frame encoding failed")]
    EncodeFailed,
    #[error("send failed")]
    SendFailed,
    #[error("iteration panicked")]
    Panicked,
}

impl Skip {
    pub const COUNT: usize = 5;

    pub const ALL: [Skip; Skip::COUNT] = [
        Skip::NoSource,
        Skip::ReadFailed,
        Skip::EncodeFailed,
        Skip::SendFailed,
        Skip::Panicked,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            Skip::NoSource => 0,
            Skip::ReadFailed => 1,
            Skip::EncodeFailed => 2,
            Skip::SendFailed => 3,
            Skip::Panicked => 4,
        }
    }
}

/// One encoded frame ready to be published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Vec<u8>,
    pub content_type: Option<&'static str>,
}

impl Frame {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: &'static str) -> Self {
        self.content_type = Some(content_type);
        self
    }
}

/// Loop body of a publish worker.
///
/// `produce` runs on the worker thread once per iteration. It may block until
/// a frame is ready, but should return promptly on failure so the worker can
/// observe a stop request.
pub trait FrameSource: Send + 'static {
    fn produce(&mut self) -> Result<Frame, Skip>;

    /// Called once after the loop thread has exited
    fn release(&mut self) {}
}
