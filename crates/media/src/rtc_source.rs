use crate::rtc_agent::PeerRole;
use crate::rtc_attendee::RtcAttendee;
use arc_swap::ArcSwapOption;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Identifies who currently holds the publisher slot: a real negotiated attendee, or a
/// synthesized "dummy" id used when the real publisher is on the RTMP side (spec
/// §4.11) so RTC subscribers still have something to `Subscribe` against.
#[derive(Debug, Clone)]
pub enum Publisher {
    Attendee(String),
    Dummy(String),
}

impl Publisher {
    pub fn id(&self) -> &str {
        match self {
            Publisher::Attendee(id) | Publisher::Dummy(id) => id,
        }
    }
}

/// Owns the attendee registry for one stream's RTC side (spec §4.11, §5). The
/// attendee map is guarded by a `tokio::sync::RwLock`; the hot frame-fan-out path never
/// takes that lock, instead reading `publisher_ptr`, an `ArcSwapOption` updated only on
/// publisher join/leave.
pub struct RtcSource {
    attendees: RwLock<HashMap<String, Arc<RwLock<RtcAttendee>>>>,
    publisher: RwLock<Option<Publisher>>,
    publisher_ptr: ArcSwapOption<RwLock<RtcAttendee>>,
}

impl Default for RtcSource {
    fn default() -> Self {
        Self::new()
    }
}

impl RtcSource {
    pub fn new() -> Self {
        Self {
            attendees: RwLock::new(HashMap::new()),
            publisher: RwLock::new(None),
            publisher_ptr: ArcSwapOption::empty(),
        }
    }

    /// Returns `true` if this was the first subscriber (caller should raise
    /// `first_subscriber`).
    ///
    /// When `role` is `Publisher`, every subscriber already in the map is notified of
    /// the new publisher id (spec I6/P5: existing subscribers must learn of a
    /// publisher joining before any of its frames are delivered) — the only other
    /// call site that binds a subscriber to a publisher, `bind_publisher` in
    /// `rtc_signaling.rs::play`, only covers the reverse ordering (subscriber joins
    /// after the publisher).
    pub async fn add(&self, id: String, attendee: Arc<RwLock<RtcAttendee>>, role: PeerRole) -> bool {
        let publisher_id = self.publisher.read().await.as_ref().map(|p| p.id().to_string());
        let mut map = self.attendees.write().await;
        let had_subscriber_before =
            role == PeerRole::Subscriber && map.keys().any(|existing| Some(existing.as_str()) != publisher_id.as_deref());
        map.insert(id.clone(), attendee.clone());
        let existing_subscribers: Vec<Arc<RwLock<RtcAttendee>>> =
            if role == PeerRole::Publisher { map.iter().filter(|(k, _)| k.as_str() != id.as_str()).map(|(_, v)| v.clone()).collect() } else { Vec::new() };
        drop(map);

        if role == PeerRole::Publisher {
            *self.publisher.write().await = Some(Publisher::Attendee(id.clone()));
            self.publisher_ptr.store(Some(attendee));
            for subscriber in existing_subscribers {
                subscriber.write().await.notify_publisher_joined(id.clone()).await;
            }
        }

        role == PeerRole::Subscriber && !had_subscriber_before
    }

    /// Returns `true` if the registry is now empty (caller should raise `nobody`).
    pub async fn remove(&self, id: &str) -> bool {
        let mut map = self.attendees.write().await;
        map.remove(id);
        let is_publisher = self
            .publisher
            .read()
            .await
            .as_ref()
            .map(|p| p.id() == id)
            .unwrap_or(false);
        let empty = map.is_empty();
        drop(map);

        if is_publisher {
            *self.publisher.write().await = None;
            self.publisher_ptr.store(None);
        }
        empty
    }

    /// Synthesize a dummy publisher slot for an RTMP-side publisher (spec §4.11, §4.12
    /// "RTMP publisher, RTC subscriber").
    pub async fn set_dummy_publisher(&self, id: String) {
        *self.publisher.write().await = Some(Publisher::Dummy(id));
        self.publisher_ptr.store(None);
    }

    pub async fn clear_dummy_publisher(&self) {
        let mut guard = self.publisher.write().await;
        if matches!(*guard, Some(Publisher::Dummy(_))) {
            *guard = None;
        }
    }

    pub async fn publisher_id(&self) -> Option<String> {
        self.publisher.read().await.as_ref().map(|p| p.id().to_string())
    }

    /// Cached publisher attendee pointer, read without taking any lock (hot path).
    pub fn publisher_attendee(&self) -> Option<Arc<RwLock<RtcAttendee>>> {
        self.publisher_ptr.load_full()
    }

    pub async fn subscriber_count(&self) -> usize {
        let map = self.attendees.read().await;
        let publisher_id = self.publisher.read().await.as_ref().map(|p| p.id().to_string());
        map.keys().filter(|id| Some(id.as_str()) != publisher_id.as_deref()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.attendees.read().await.is_empty()
    }

    pub async fn attendee(&self, id: &str) -> Option<Arc<RwLock<RtcAttendee>>> {
        self.attendees.read().await.get(id).cloned()
    }

    pub async fn all_subscriber_ids(&self) -> Vec<String> {
        let map = self.attendees.read().await;
        let publisher_id = self.publisher.read().await.as_ref().map(|p| p.id().to_string());
        map.keys().filter(|id| Some(id.as_str()) != publisher_id.as_deref()).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::rtc_agent::{Frame, PeerEvent, RtcAgent};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct NoopAgent;
    #[async_trait]
    impl RtcAgent for NoopAgent {
        async fn create_peer(&self, _: &str, _: PeerRole, _: &[&str], _: &str, _: mpsc::Sender<PeerEvent>) -> Result<()> {
            Ok(())
        }
        async fn destroy_peer(&self, _: &str) -> Result<()> {
            Ok(())
        }
        async fn subscribe(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn unsubscribe(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn send_frame(&self, _: &str, _: Frame) -> Result<()> {
            Ok(())
        }
    }

    async fn fake_attendee(id: &str, role: PeerRole) -> Arc<RwLock<RtcAttendee>> {
        let (tx, rx) = mpsc::channel(4);
        let attendee = RtcAttendee::create(id.into(), role, &["video"], "v=0", Arc::new(NoopAgent), tx, rx).await.unwrap();
        Arc::new(RwLock::new(attendee))
    }

    #[tokio::test]
    async fn publisher_join_sets_publisher_ptr() {
        let source = RtcSource::new();
        let attendee = fake_attendee("pub1", PeerRole::Publisher).await;
        source.add("pub1".into(), attendee, PeerRole::Publisher).await;
        assert_eq!(source.publisher_id().await, Some("pub1".into()));
        assert!(source.publisher_attendee().is_some());
    }

    #[tokio::test]
    async fn first_subscriber_flag_is_raised_once() {
        let source = RtcSource::new();
        let sub1 = fake_attendee("sub1", PeerRole::Subscriber).await;
        let sub2 = fake_attendee("sub2", PeerRole::Subscriber).await;
        assert!(source.add("sub1".into(), sub1, PeerRole::Subscriber).await);
        assert!(!source.add("sub2".into(), sub2, PeerRole::Subscriber).await);
    }

    #[tokio::test]
    async fn removing_publisher_clears_slot() {
        let source = RtcSource::new();
        let attendee = fake_attendee("pub1", PeerRole::Publisher).await;
        source.add("pub1".into(), attendee, PeerRole::Publisher).await;
        let now_empty = source.remove("pub1").await;
        assert!(now_empty);
        assert_eq!(source.publisher_id().await, None);
        assert!(source.publisher_attendee().is_none());
    }

    #[tokio::test]
    async fn publisher_joining_after_subscribers_notifies_them_all() {
        let source = RtcSource::new();
        let sub1 = fake_attendee("sub1", PeerRole::Subscriber).await;
        let sub2 = fake_attendee("sub2", PeerRole::Subscriber).await;
        source.add("sub1".into(), sub1.clone(), PeerRole::Subscriber).await;
        source.add("sub2".into(), sub2.clone(), PeerRole::Subscriber).await;

        let publisher = fake_attendee("pub1", PeerRole::Publisher).await;
        source.add("pub1".into(), publisher, PeerRole::Publisher).await;

        assert_eq!(sub1.read().await.bound_publisher(), Some("pub1"));
        assert_eq!(sub2.read().await.bound_publisher(), Some("pub1"));
    }

    #[tokio::test]
    async fn dummy_publisher_exposes_an_id_without_an_attendee() {
        let source = RtcSource::new();
        source.set_dummy_publisher("dummy-1".into()).await;
        assert_eq!(source.publisher_id().await, Some("dummy-1".into()));
        assert!(source.publisher_attendee().is_none());
    }
}
