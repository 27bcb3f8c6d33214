//! Frame queueing and congestion control for the camera → client direction.
//!
//! The controller is a plain state machine: the camera session feeds it
//! frames, acks and timer expiries, and writes whatever wire messages it hands
//! back. Frames are never retransmitted; a stalled window only shrinks the
//! rate at which the queue drains.
//!
//! - [`SendQueue`]: bounded FIFO of encrypted frames, halved when full.
//! - In-flight FIFO of `{id, sent_at}` records, popped only at the head.
//! - [`RttEstimator`]: Jacobson RTT / deviation estimate pacing the window.
//! - Window: additive increase once a window is fully acked, halving on
//!   every pacing timer expiry.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, trace};

use super::message::{CameraKind, MessageEncoder};
use super::timing::RttEstimator;
use crate::config::ProtocolConfig;
use crate::core::MIN_WINDOW;

/// Bounded FIFO of encrypted, not-yet-sent frame payloads.
#[derive(Debug, Clone)]
pub struct SendQueue {
    items: VecDeque<Vec<u8>>,
    capacity: usize,
}

impl SendQueue {
    /// Create an empty queue. A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a frame, halving the backlog first if the queue is full.
    ///
    /// Returns `true` if a halving took place.
    pub fn push(&mut self, item: Vec<u8>) -> bool {
        let halved = self.items.len() >= self.capacity;
        if halved {
            self.halve();
        }
        self.items.push_back(item);
        halved
    }

    /// Keep every even-indexed entry, drop every odd-indexed one.
    pub fn halve(&mut self) {
        let before = self.items.len();
        let kept: VecDeque<Vec<u8>> = self
            .items
            .drain(..)
            .enumerate()
            .filter_map(|(i, item)| (i % 2 == 0).then_some(item))
            .collect();
        self.items = kept;
        debug!(before, after = self.items.len(), "send queue full, dropped frames");
    }

    /// Remove the oldest frame.
    pub fn pop(&mut self) -> Option<Vec<u8>> {
        self.items.pop_front()
    }

    /// Drop every queued frame.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Number of queued frames.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate over queued frames, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Vec<u8>> {
        self.items.iter()
    }
}

/// A frame that was handed to the transport and awaits its ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlightRecord {
    /// Message id of the frame.
    pub id: u32,
    /// Send time in milliseconds since the Unix epoch.
    pub sent_at: u64,
}

/// Snapshot of the congestion estimates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CongestionState {
    /// Smoothed RTT in milliseconds.
    pub rtt_avg: f64,
    /// Mean RTT deviation in milliseconds.
    pub mean_deviation: f64,
    /// Pacing interval in milliseconds.
    pub rto_interval: f64,
    /// Size of the last send window.
    pub window_size: u32,
}

/// Result of processing an ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The id was not the in-flight head; nothing changed.
    Ignored,
    /// The head was acknowledged and an RTT sample taken.
    Measured {
        /// RTT sample in milliseconds.
        rtt_ms: u64,
        /// The in-flight FIFO is now empty; the next window may be sent.
        drained: bool,
    },
}

/// Camera-side queue, in-flight tracking and send-window pacing.
#[derive(Debug, Clone)]
pub struct CongestionController {
    queue: SendQueue,
    inflight: VecDeque<InFlightRecord>,
    rtt: RttEstimator,
    last_window: u32,
}

impl CongestionController {
    /// Create a controller with empty queue and zeroed estimates.
    pub fn new(config: &ProtocolConfig) -> Self {
        Self {
            queue: SendQueue::new(config.max_queue_length),
            inflight: VecDeque::new(),
            rtt: RttEstimator::new(config.rtt_gain, config.dev_gain),
            last_window: MIN_WINDOW,
        }
    }

    /// Reset to initial values: empty queue and in-flight FIFO, zeroed
    /// estimates, window of one.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.inflight.clear();
        self.rtt.reset();
        self.last_window = MIN_WINDOW;
    }

    /// Queue an encrypted frame payload.
    pub fn queue_frame(&mut self, encrypted: Vec<u8>) -> bool {
        self.queue.push(encrypted)
    }

    /// Pop up to `count` frames (at least one) and wrap each as a `frame`
    /// message, recording it as in flight.
    ///
    /// Returns the serialized messages to hand to the transport, in order.
    /// The caller re-arms the pacing timer with [`Self::rto`].
    pub fn send_window(
        &mut self,
        count: u32,
        encoder: &mut MessageEncoder<CameraKind>,
        now: u64,
    ) -> Vec<Vec<u8>> {
        let count = count.max(MIN_WINDOW);
        self.last_window = count;

        let mut batch = Vec::new();
        for _ in 0..count {
            let Some(payload) = self.queue.pop() else {
                break;
            };
            let message = encoder.encode_at(CameraKind::Frame, payload, now);
            self.inflight.push_back(InFlightRecord {
                id: message.id,
                sent_at: message.timestamp,
            });
            batch.push(message.to_bytes());
        }

        if !batch.is_empty() {
            trace!(window = count, sent = batch.len(), queued = self.queue.len(), "sent window");
        }
        batch
    }

    /// Window to send when the pacing timer expires: half the last window,
    /// rounded half up, never below one.
    pub fn backoff_window(&self) -> u32 {
        self.last_window.div_ceil(2).max(MIN_WINDOW)
    }

    /// Window to send once the previous one is fully acknowledged.
    pub fn next_window(&self) -> u32 {
        self.last_window.saturating_add(1)
    }

    /// Process an ack for `id` received at `now`.
    pub fn on_ack(&mut self, id: u32, now: u64) -> AckOutcome {
        match self.inflight.front() {
            Some(head) if head.id == id => {}
            _ => return AckOutcome::Ignored,
        }

        let Some(sent) = self.inflight.pop_front() else {
            return AckOutcome::Ignored;
        };
        let rtt_ms = now.saturating_sub(sent.sent_at);
        self.rtt.update(rtt_ms as f64);

        trace!(
            id,
            rtt_ms,
            rtt_avg = self.rtt.rtt_avg(),
            rto = self.rtt.rto_interval(),
            "ack"
        );

        AckOutcome::Measured {
            rtt_ms,
            drained: self.inflight.is_empty(),
        }
    }

    /// Pacing timer duration.
    pub fn rto(&self) -> Duration {
        self.rtt.rto()
    }

    /// Current estimates.
    pub fn state(&self) -> CongestionState {
        CongestionState {
            rtt_avg: self.rtt.rtt_avg(),
            mean_deviation: self.rtt.mean_dev(),
            rto_interval: self.rtt.rto_interval(),
            window_size: self.last_window,
        }
    }

    /// The send queue.
    pub fn queue(&self) -> &SendQueue {
        &self.queue
    }

    /// Frames awaiting acknowledgement, oldest first.
    pub fn inflight(&self) -> impl Iterator<Item = &InFlightRecord> {
        self.inflight.iter()
    }

    /// Number of frames awaiting acknowledgement.
    pub fn inflight_len(&self) -> usize {
        self.inflight.len()
    }
}
