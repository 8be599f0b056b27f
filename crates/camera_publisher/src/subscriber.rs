//! Receive side of a camera endpoint.
//!
//! A [`FrameSubscriber`] dials a publisher directly and keeps only the most
//! recent frame: anything older than the latest sample is discarded by the
//! ring buffer before it is read.

use crate::capture::RawFrame;
use crate::encode::{decode_jpeg, EncodeError, JPEG_CONTENT_TYPE};
use std::time::Duration;
use thiserror::Error;
use zenoh::handlers::{RingChannel, RingChannelHandler};
use zenoh::pubsub::Subscriber;
use zenoh::sample::Sample;
use zenoh::Wait;

/// Matches every camera published under the default topic layout
pub const DEFAULT_KEY_EXPR: &str = "camera/**";

#[derive(Debug, Error)]
pub enum SubscriberError {
    #[error("Failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },
    #[error("Zenoh error: {0}")]
    Zenoh(String),
    #[error("Frame is '{0}', not JPEG")]
    NotJpeg(String),
    #[error(transparent)]
    Decode(#[from] EncodeError),
}

/// One frame as delivered to a subscriber
#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    /// Key expression the frame was published on
    pub key_expr: String,
    /// Publisher-side counter, absent if the publisher attached none
    pub sequence: Option<u64>,
    pub content_type: String,
    pub payload: Vec<u8>,
}

impl ReceivedFrame {
    fn from_sample(sample: &Sample) -> Self {
        let sequence = sample.attachment().and_then(|attachment| {
            let bytes = attachment.to_bytes();
            let sequence: [u8; 8] = bytes[..].try_into().ok()?;
            Some(u64::from_le_bytes(sequence))
        });

        Self {
            key_expr: sample.key_expr().to_string(),
            sequence,
            content_type: sample.encoding().to_string(),
            payload: sample.payload().to_bytes().into_owned(),
        }
    }

    pub fn is_jpeg(&self) -> bool {
        self.content_type == JPEG_CONTENT_TYPE
    }

    /// Decompress the payload to RGB24
    pub fn decode_rgb(&self) -> Result<RawFrame, SubscriberError> {
        if !self.is_jpeg() {
            return Err(SubscriberError::NotJpeg(self.content_type.clone()));
        }
        Ok(decode_jpeg(&self.payload)?)
    }
}

/// Latest-frame subscriber connected to a single publisher
pub struct FrameSubscriber {
    endpoint: String,
    session: zenoh::Session,
    subscriber: Subscriber<RingChannelHandler<Sample>>,
}

impl FrameSubscriber {
    /// Connect to the endpoint at `tcp/<host>:<port>` and subscribe to `key_expr`
    pub fn connect(host: &str, port: u16, key_expr: &str) -> Result<Self, SubscriberError> {
        let endpoint = format!("tcp/{}:{}", host, port);
        let connect_err = |reason: String| SubscriberError::Connect {
            endpoint: endpoint.clone(),
            reason,
        };

        let mut config = zenoh::Config::default();
        config
            .insert_json5("mode", r#""peer""#)
            .map_err(|e| connect_err(format!("Failed to set Zenoh mode: {}", e)))?;
        config
            .insert_json5("connect/endpoints", &format!(r#"["{}"]"#, endpoint))
            .map_err(|e| connect_err(format!("Failed to set connect endpoint: {}", e)))?;
        config
            .insert_json5("scouting/multicast/enabled", "false")
            .map_err(|e| connect_err(format!("Failed to disable multicast: {}", e)))?;
        config
            .insert_json5("scouting/gossip/enabled", "false")
            .map_err(|e| connect_err(format!("Failed to disable gossip: {}", e)))?;

        let session = zenoh::open(config)
            .wait()
            .map_err(|e| connect_err(format!("Failed to open Zenoh session: {}", e)))?;

        let subscriber = session
            .declare_subscriber(key_expr.to_string())
            .with(RingChannel::new(1))
            .wait()
            .map_err(|e| connect_err(format!("Failed to declare subscriber: {}", e)))?;

        log::info!("Subscribed to '{}' at {}", key_expr, endpoint);

        Ok(Self {
            endpoint,
            session,
            subscriber,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Wait up to `timeout` for a frame; `Ok(None)` when none arrived
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<ReceivedFrame>, SubscriberError> {
        let sample = self
            .subscriber
            .recv_timeout(timeout)
            .map_err(|e| SubscriberError::Zenoh(e.to_string()))?;
        Ok(sample.as_ref().map(ReceivedFrame::from_sample))
    }

    /// Take the buffered frame, if any, without blocking
    pub fn try_latest(&self) -> Result<Option<ReceivedFrame>, SubscriberError> {
        let sample = self
            .subscriber
            .try_recv()
            .map_err(|e| SubscriberError::Zenoh(e.to_string()))?;
        Ok(sample.as_ref().map(ReceivedFrame::from_sample))
    }

    pub async fn recv(&self) -> Result<ReceivedFrame, SubscriberError> {
        let sample = self
            .subscriber
            .recv_async()
            .await
            .map_err(|e| SubscriberError::Zenoh(e.to_string()))?;
        Ok(ReceivedFrame::from_sample(&sample))
    }

    pub fn close(self) -> Result<(), SubscriberError> {
        if let Err(e) = self.subscriber.undeclare().wait() {
            log::warn!("[{}] Failed to undeclare subscriber: {}", self.endpoint, e);
        }
        self.session
            .close()
            .wait()
            .map_err(|e| SubscriberError::Zenoh(format!("Failed to close session: {}", e)))
    }
}
