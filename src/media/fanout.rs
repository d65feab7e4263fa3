//! One-to-many media fan-out
//!
//! A [`FanOutProcessor`] relays everything its single publisher produces to
//! every registered subscriber sink, and routes feedback coming back from
//! any subscriber to the publisher.
//!
//! ```text
//!                     FanOutProcessor
//!  [publisher] ──► ┌──────────────────────┐ ──► sink "c2_s1"
//!                  │ subscribers: RwLock< │ ──► sink "c3_s1"
//!  feedback ◄───── │   HashMap<id, Sink>> │ ──► sink "bridge_s1"
//!                  └──────────────────────┘
//! ```
//!
//! Delivery holds the subscriber map's read lock for the duration of the
//! fan-out, so once [`FanOutProcessor::remove_subscriber`] returns the removed
//! sink is guaranteed to see no further calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use super::packet::DataPacket;
use super::sink::{FeedbackSink, MediaSink, MediaSource};
use crate::error::{Error, Result};

/// Subscriber id for a client (or bridge) relying on a target stream
pub fn subscriber_id(relying_id: &str, target_stream_id: &str) -> String {
    format!("{}_{}", relying_id, target_stream_id)
}

enum PublisherSlot {
    Unbound,
    Bound(Weak<dyn MediaSource>),
    Detached,
}

/// Single-publisher, multi-subscriber relay
pub struct FanOutProcessor {
    subscribers: RwLock<HashMap<String, Arc<dyn MediaSink>>>,
    publisher: Mutex<PublisherSlot>,
    self_ref: Weak<FanOutProcessor>,
    closed: AtomicBool,
}

impl FanOutProcessor {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            subscribers: RwLock::new(HashMap::new()),
            publisher: Mutex::new(PublisherSlot::Unbound),
            self_ref: self_ref.clone(),
            closed: AtomicBool::new(false),
        })
    }

    /// Bind the upstream source
    ///
    /// A processor accepts exactly one publisher for its lifetime.
    pub fn set_publisher(&self, source: &Arc<dyn MediaSource>) -> Result<()> {
        let mut slot = self.publisher.lock();
        match *slot {
            PublisherSlot::Unbound => {
                *slot = PublisherSlot::Bound(Arc::downgrade(source));
                Ok(())
            }
            PublisherSlot::Bound(_) => Err(Error::PublisherAlreadyBound),
            PublisherSlot::Detached => Err(Error::Closed("fan-out processor")),
        }
    }

    /// Whether a still-alive publisher is bound
    pub fn has_publisher(&self) -> bool {
        self.publisher().is_some()
    }

    fn publisher(&self) -> Option<Arc<dyn MediaSource>> {
        match &*self.publisher.lock() {
            PublisherSlot::Bound(weak) => weak.upgrade(),
            _ => None,
        }
    }

    /// Register `sink` under `id`, replacing any sink already there
    pub fn add_subscriber(&self, sink: Arc<dyn MediaSink>, id: impl Into<String>) {
        let id = id.into();
        if self.closed.load(Ordering::Acquire) {
            tracing::warn!(subscriber = %id, "Subscriber added to closed fan-out, ignoring");
            return;
        }

        let route: Weak<dyn FeedbackSink> = self.self_ref.clone();
        sink.set_feedback_sink(Some(route));

        let replaced = self.subscribers.write().insert(id.clone(), sink);
        tracing::debug!(
            subscriber = %id,
            replaced = replaced.is_some(),
            "Fan-out subscriber added"
        );
    }

    /// Unregister the sink under `id`; no-op if absent
    pub fn remove_subscriber(&self, id: &str) -> Option<Arc<dyn MediaSink>> {
        let removed = self.subscribers.write().remove(id);
        if let Some(sink) = &removed {
            sink.set_feedback_sink(None);
            tracing::debug!(subscriber = %id, "Fan-out subscriber removed");
        }
        removed
    }

    /// Sink registered under `id`
    pub fn subscriber(&self, id: &str) -> Option<Arc<dyn MediaSink>> {
        self.subscribers.read().get(id).cloned()
    }

    pub fn has_subscriber(&self, id: &str) -> bool {
        self.subscribers.read().contains_key(id)
    }

    /// Sinks currently registered; zero once closed
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Registered ids, in no particular order
    pub fn subscriber_ids(&self) -> Vec<String> {
        self.subscribers.read().keys().cloned().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Detach the publisher, close every sink and clear the map
    ///
    /// Safe to call more than once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        *self.publisher.lock() = PublisherSlot::Detached;

        let sinks: Vec<_> = self.subscribers.write().drain().collect();
        let count = sinks.len();
        for (_, sink) in sinks {
            sink.set_feedback_sink(None);
            sink.close();
        }

        tracing::debug!(subscribers = count, "Fan-out closed");
    }

    fn fan_out<F>(&self, packet: DataPacket, deliver: F) -> Result<()>
    where
        F: Fn(&dyn MediaSink, DataPacket) -> Result<()>,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed("fan-out processor"));
        }

        let subscribers = self.subscribers.read();
        for (id, sink) in subscribers.iter() {
            if let Err(e) = deliver(sink.as_ref(), packet.clone()) {
                tracing::trace!(subscriber = %id, error = %e, "Sink rejected packet");
            }
        }
        Ok(())
    }
}

impl MediaSink for FanOutProcessor {
    fn deliver_audio(&self, packet: DataPacket) -> Result<()> {
        self.fan_out(packet, |sink, p| sink.deliver_audio(p))
    }

    fn deliver_video(&self, packet: DataPacket) -> Result<()> {
        self.fan_out(packet, |sink, p| sink.deliver_video(p))
    }

    fn close(&self) {
        FanOutProcessor::close(self)
    }
}

impl FeedbackSink for FanOutProcessor {
    fn deliver_feedback(&self, packet: DataPacket) -> Result<()> {
        let feedback = self
            .publisher()
            .and_then(|source| source.feedback_sink())
            .ok_or(Error::Closed("fan-out publisher"))?;
        feedback.deliver_feedback(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingFeedback, RecordingSink, TestSource};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    fn as_source(source: &Arc<TestSource>) -> Arc<dyn MediaSource> {
        source.clone()
    }

    #[test]
    fn test_subscriber_id() {
        assert_eq!(subscriber_id("c2", "s1"), "c2_s1");
    }

    #[test]
    fn test_fan_out_reaches_every_sink() {
        let fanout = FanOutProcessor::new();
        let a = RecordingSink::new();
        let b = RecordingSink::new();
        fanout.add_subscriber(a.clone(), "a");
        fanout.add_subscriber(b.clone(), "b");

        fanout.deliver_video(DataPacket::video(vec![1, 2, 3])).unwrap();
        fanout.deliver_audio(DataPacket::audio(vec![4])).unwrap();

        assert_eq!(a.video_count(), 1);
        assert_eq!(a.audio_count(), 1);
        assert_eq!(b.video_count(), 1);
        assert_eq!(b.audio_count(), 1);
    }

    #[test]
    fn test_add_same_id_replaces() {
        let fanout = FanOutProcessor::new();
        let first = RecordingSink::new();
        let second = RecordingSink::new();

        fanout.add_subscriber(first.clone(), "c2_s1");
        fanout.add_subscriber(second.clone(), "c2_s1");

        assert_eq!(fanout.subscriber_count(), 1);
        let current = fanout.subscriber("c2_s1").unwrap();
        let expected: Arc<dyn MediaSink> = second.clone();
        assert!(Arc::ptr_eq(&current, &expected));

        fanout.deliver_video(DataPacket::video(vec![0])).unwrap();
        assert_eq!(first.video_count(), 0);
        assert_eq!(second.video_count(), 1);
    }

    #[test]
    fn test_failing_sink_does_not_abort_fan_out() {
        let fanout = FanOutProcessor::new();
        let failing = RecordingSink::failing();
        let healthy = RecordingSink::new();
        fanout.add_subscriber(failing.clone(), "bad");
        fanout.add_subscriber(healthy.clone(), "good");

        for _ in 0..5 {
            fanout.deliver_video(DataPacket::video(vec![0])).unwrap();
        }

        assert_eq!(healthy.video_count(), 5);
    }

    #[test]
    fn test_remove_subscriber() {
        let fanout = FanOutProcessor::new();
        let sink = RecordingSink::new();
        fanout.add_subscriber(sink.clone(), "x");

        assert!(fanout.remove_subscriber("x").is_some());
        assert!(fanout.remove_subscriber("x").is_none());
        assert!(fanout.subscriber("x").is_none());

        fanout.deliver_video(DataPacket::video(vec![0])).unwrap();
        assert_eq!(sink.video_count(), 0);
        assert!(!sink.has_feedback_route());
    }

    #[test]
    fn test_no_delivery_after_remove_under_load() {
        let fanout = FanOutProcessor::new();
        let sink = RecordingSink::new();
        fanout.add_subscriber(sink.clone(), "victim");
        fanout.add_subscriber(RecordingSink::new(), "other");

        let running = Arc::new(AtomicBool::new(true));
        let producers: Vec<_> = (0..4)
            .map(|_| {
                let fanout = fanout.clone();
                let running = running.clone();
                std::thread::spawn(move || {
                    while running.load(Ordering::Relaxed) {
                        let _ = fanout.deliver_video(DataPacket::video(vec![0; 32]));
                    }
                })
            })
            .collect();

        std::thread::sleep(Duration::from_millis(20));
        fanout.remove_subscriber("victim");
        let seen_at_removal = sink.video_count();

        std::thread::sleep(Duration::from_millis(20));
        running.store(false, Ordering::Relaxed);
        for producer in producers {
            producer.join().unwrap();
        }

        assert_eq!(sink.video_count(), seen_at_removal);
    }

    #[test]
    fn test_feedback_routes_to_publisher() {
        let fanout = FanOutProcessor::new();
        let feedback = RecordingFeedback::new();
        let source = TestSource::new(feedback.clone());
        fanout.set_publisher(&as_source(&source)).unwrap();

        let sink = RecordingSink::new();
        fanout.add_subscriber(sink.clone(), "c2_s1");

        sink.send_feedback(DataPacket::video(vec![0x81, 205]))
            .unwrap();
        assert_eq!(feedback.count(), 1);
    }

    #[test]
    fn test_feedback_without_publisher_fails() {
        let fanout = FanOutProcessor::new();
        let result = fanout.deliver_feedback(DataPacket::video(vec![0]));
        assert!(result.is_err());
    }

    #[test]
    fn test_publisher_is_single_shot() {
        let fanout = FanOutProcessor::new();
        let first = TestSource::new(RecordingFeedback::new());
        let second = TestSource::new(RecordingFeedback::new());

        fanout.set_publisher(&as_source(&first)).unwrap();
        assert!(matches!(
            fanout.set_publisher(&as_source(&second)),
            Err(Error::PublisherAlreadyBound)
        ));
    }

    #[test]
    fn test_close_is_idempotent_and_closes_sinks() {
        let fanout = FanOutProcessor::new();
        let source = TestSource::new(RecordingFeedback::new());
        fanout.set_publisher(&as_source(&source)).unwrap();
        let sink = RecordingSink::new();
        fanout.add_subscriber(sink.clone(), "a");

        fanout.close();
        fanout.close();

        assert!(fanout.is_closed());
        assert!(!fanout.has_publisher());
        assert_eq!(fanout.subscriber_count(), 0);
        assert_eq!(sink.close_count(), 1);
        assert!(fanout.deliver_audio(DataPacket::audio(vec![0])).is_err());
    }

    #[test]
    fn test_add_after_close_is_ignored() {
        let fanout = FanOutProcessor::new();
        fanout.close();
        fanout.add_subscriber(RecordingSink::new(), "late");
        assert_eq!(fanout.subscriber_count(), 0);
    }
}
