//! In-process latest-value transport.
//!
//! Mirrors the network endpoint's delivery policy on top of a bounded
//! `flume` channel:
//!
//! - conflate: when the queue is full the oldest message is evicted
//! - immediate: messages are dropped while no subscriber is attached
//! - high-water-mark: channel capacity (1 when conflating)
//!
//! Subscribers cloned from the same publisher compete for messages; there is
//! no fan-out.

use super::{EmitFlags, EndpointOption, EndpointOptions, FramePublisher, TransportError};
use flume::TrySendError;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A message delivered through the in-memory transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMessage {
    pub payload: Vec<u8>,
    pub flags: EmitFlags,
}

/// Counters shared between both ends of the channel
#[derive(Debug, Default)]
pub struct LinkStats {
    sent: AtomicU64,
    dropped: AtomicU64,
    send_buffer: AtomicUsize,
    closed: AtomicBool,
}

impl LinkStats {
    /// Messages accepted into the queue
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Messages discarded by the delivery policy
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn send_buffer(&self) -> Option<usize> {
        match self.send_buffer.load(Ordering::Relaxed) {
            0 => None,
            bytes => Some(bytes),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Create a connected publisher/subscriber pair
pub fn channel(options: EndpointOptions) -> (MemoryPublisher, MemorySubscriber) {
    let capacity = if options.conflate { 1 } else { options.send_hwm.max(1) };
    let (tx, rx) = flume::bounded(capacity);
    let stats = Arc::new(LinkStats::default());
    if let Some(bytes) = options.send_buffer {
        stats.send_buffer.store(bytes, Ordering::Relaxed);
    }

    let publisher = MemoryPublisher {
        tx: Some(tx),
        evict: rx.clone(),
        options,
        stats: stats.clone(),
    };
    let subscriber = MemorySubscriber { rx, stats };
    (publisher, subscriber)
}

/// Sending half of the in-memory transport
pub struct MemoryPublisher {
    tx: Option<flume::Sender<MemoryMessage>>,
    // Held so the publisher can evict the oldest queued message
    evict: flume::Receiver<MemoryMessage>,
    options: EndpointOptions,
    stats: Arc<LinkStats>,
}

impl MemoryPublisher {
    /// Attach another subscriber (e.g. a late joiner)
    pub fn subscribe(&self) -> MemorySubscriber {
        MemorySubscriber {
            rx: self.evict.clone(),
            stats: self.stats.clone(),
        }
    }

    pub fn stats(&self) -> Arc<LinkStats> {
        self.stats.clone()
    }

    pub fn options(&self) -> &EndpointOptions {
        &self.options
    }

    fn record_drop(&self) {
        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

impl FramePublisher for MemoryPublisher {
    fn configure(&mut self, option: EndpointOption) -> Result<(), TransportError> {
        match option {
            EndpointOption::SendHighWaterMark(_) => Err(TransportError::RequiresRebind(option)),
            EndpointOption::SendBuffer(bytes) => {
                self.stats.send_buffer.store(bytes, Ordering::Relaxed);
                self.options.apply(option);
                Ok(())
            }
            _ => {
                self.options.apply(option);
                Ok(())
            }
        }
    }

    fn emit(&mut self, payload: Vec<u8>, flags: EmitFlags) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;

        // The publisher's own eviction handle does not count as a subscriber
        if self.options.immediate && tx.receiver_count() <= 1 {
            self.record_drop();
            return Ok(());
        }

        // Conflation may have been switched on after the queue was sized
        if self.options.conflate {
            while self.evict.try_recv().is_ok() {
                self.record_drop();
            }
        }

        let mut message = MemoryMessage { payload, flags };
        loop {
            match tx.try_send(message) {
                Ok(()) => {
                    self.stats.sent.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(TrySendError::Full(rejected)) => {
                    if !self.options.conflate {
                        self.record_drop();
                        return Ok(());
                    }
                    if self.evict.try_recv().is_ok() {
                        self.record_drop();
                    }
                    message = rejected;
                }
                Err(TrySendError::Disconnected(_)) => return Err(TransportError::Closed),
            }
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.tx.take().is_some() {
            self.stats.closed.store(true, Ordering::Release);
            log::debug!("In-memory endpoint closed");
        }
        Ok(())
    }
}

/// Receiving half of the in-memory transport
pub struct MemorySubscriber {
    rx: flume::Receiver<MemoryMessage>,
    stats: Arc<LinkStats>,
}

impl MemorySubscriber {
    pub fn recv_timeout(&self, timeout: Duration) -> Option<MemoryMessage> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn try_recv(&self) -> Option<MemoryMessage> {
        self.rx.try_recv().ok()
    }

    pub async fn recv_async(&self) -> Option<MemoryMessage> {
        self.rx.recv_async().await.ok()
    }

    /// Number of messages waiting in the queue
    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    pub fn stats(&self) -> Arc<LinkStats> {
        self.stats.clone()
    }

    /// True once the publisher closed and the queue is drained
    pub fn is_closed(&self) -> bool {
        self.rx.is_disconnected() && self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(sequence: u64) -> EmitFlags {
        EmitFlags {
            content_type: None,
            sequence: Some(sequence),
        }
    }

    #[test]
    fn test_conflate_keeps_newest() {
        let (mut publisher, subscriber) = channel(EndpointOptions::default());
        for seq in 0..10 {
            publisher.emit(vec![seq as u8], flags(seq)).unwrap();
        }

        assert_eq!(subscriber.queued(), 1);
        let message = subscriber.try_recv().unwrap();
        assert_eq!(message.flags.sequence, Some(9));
        assert_eq!(subscriber.stats().sent(), 10);
        assert_eq!(subscriber.stats().dropped(), 9);
    }

    #[test]
    fn test_without_conflate_drops_newest() {
        let options = EndpointOptions::default()
            .with(EndpointOption::Conflate(false))
            .with(EndpointOption::SendHighWaterMark(2));
        let (mut publisher, subscriber) = channel(options);
        for seq in 0..5 {
            publisher.emit(vec![0], flags(seq)).unwrap();
        }

        assert_eq!(subscriber.queued(), 2);
        assert_eq!(subscriber.try_recv().unwrap().flags.sequence, Some(0));
        assert_eq!(subscriber.try_recv().unwrap().flags.sequence, Some(1));
        assert_eq!(subscriber.stats().dropped(), 3);
    }

    #[test]
    fn test_immediate_drops_without_subscriber() {
        let (mut publisher, subscriber) = channel(EndpointOptions::default());
        drop(subscriber);

        publisher.emit(vec![1, 2, 3], flags(0)).unwrap();
        assert_eq!(publisher.stats().sent(), 0);
        assert_eq!(publisher.stats().dropped(), 1);

        // A late joiner only ever sees what is sent after it attached
        let late = publisher.subscribe();
        publisher.emit(vec![4], flags(1)).unwrap();
        assert_eq!(late.try_recv().unwrap().flags.sequence, Some(1));
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut publisher, subscriber) = channel(EndpointOptions::default());
        publisher.emit(vec![7], flags(0)).unwrap();
        publisher.close().unwrap();
        publisher.close().unwrap();

        assert!(subscriber.stats().is_closed());
        assert!(matches!(
            publisher.emit(vec![8], flags(1)),
            Err(TransportError::Closed)
        ));
        // Queued message is still readable after close
        assert!(!subscriber.is_closed());
        assert_eq!(subscriber.try_recv().unwrap().payload, vec![7]);
    }

    #[test]
    fn test_conflate_enabled_after_bind_keeps_newest() {
        let options = EndpointOptions::default()
            .with(EndpointOption::Conflate(false))
            .with(EndpointOption::SendHighWaterMark(4));
        let (mut publisher, subscriber) = channel(options);
        publisher.configure(EndpointOption::Conflate(true)).unwrap();
        for seq in 0..5 {
            publisher.emit(vec![seq as u8], flags(seq)).unwrap();
        }

        assert_eq!(subscriber.queued(), 1);
        assert_eq!(subscriber.try_recv().unwrap().flags.sequence, Some(4));
        assert_eq!(subscriber.stats().dropped(), 4);
    }

    #[test]
    fn test_configure_requires_rebind_for_hwm() {
        let (mut publisher, _subscriber) = channel(EndpointOptions::default());
        assert!(matches!(
            publisher.configure(EndpointOption::SendHighWaterMark(4)),
            Err(TransportError::RequiresRebind(_))
        ));
        publisher
            .configure(EndpointOption::SendBuffer(1024))
            .unwrap();
        assert_eq!(publisher.stats().send_buffer(), Some(1024));
    }
}
