use crate::error::{Error, Result};
use crate::rtc_agent::{Frame, PeerEvent, PeerRole, RtcAgent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Receives frames captured from a publisher attendee, feeding them into the owning
/// `MediaSource`'s `RtcToLive` adapter. Kept as a trait (rather than a bare channel) so
/// the `MediaSource` can swap in a no-op sink while the adapter is being torn down.
pub trait MediaSink: Send + Sync {
    fn on_frame(&self, frame: Frame);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttendeeState {
    Negotiating,
    Joined,
    Failed(String),
    Closed,
}

/// State machine for one WebRTC peer (spec §4.10). `role` is fixed at construction.
pub struct RtcAttendee {
    id: String,
    role: PeerRole,
    state: AttendeeState,
    agent: Arc<dyn RtcAgent>,
    sink: Option<Arc<dyn MediaSink>>,
    bound_publisher: Option<String>,
    first_packet_fired: AtomicBool,
    events_rx: mpsc::Receiver<PeerEvent>,
}

impl RtcAttendee {
    /// Begin negotiation: push `(sdp, role, tracks)` into `RtcAgent::create_peer`. The
    /// agent replies asynchronously by sending into `events_tx`; `events_rx` is the
    /// matching receive half this attendee polls via `poll_event`.
    pub async fn create(
        id: String,
        role: PeerRole,
        tracks: &[&str],
        offer_sdp: &str,
        agent: Arc<dyn RtcAgent>,
        events_tx: mpsc::Sender<PeerEvent>,
        events_rx: mpsc::Receiver<PeerEvent>,
    ) -> Result<Self> {
        agent.create_peer(&id, role, tracks, offer_sdp, events_tx).await?;
        Ok(Self {
            id,
            role,
            state: AttendeeState::Negotiating,
            agent,
            sink: None,
            bound_publisher: None,
            first_packet_fired: AtomicBool::new(false),
            events_rx,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn state(&self) -> &AttendeeState {
        &self.state
    }

    pub fn set_sink(&mut self, sink: Arc<dyn MediaSink>) {
        self.sink = Some(sink);
    }

    /// Drain and apply exactly one pending event, returning the answer SDP if this
    /// event was `onAnswer`. Call repeatedly from the owning `MediaSource` task loop.
    pub async fn poll_event(&mut self) -> Option<AttendeeEvent> {
        let event = self.events_rx.recv().await?;
        Some(self.apply_event(event).await)
    }

    async fn apply_event(&mut self, event: PeerEvent) -> AttendeeEvent {
        match event {
            PeerEvent::Answer(sdp) => AttendeeEvent::Answer(sdp),
            PeerEvent::Ready => {
                self.state = AttendeeState::Joined;
                if self.role == PeerRole::Subscriber {
                    if let Some(publisher_id) = &self.bound_publisher {
                        if let Err(e) = self.agent.subscribe(publisher_id, &self.id).await {
                            warn!(attendee = %self.id, error = %e, "subscribe failed on ready");
                        }
                    }
                }
                AttendeeEvent::Ready
            }
            PeerEvent::Failed(reason) => {
                self.state = AttendeeState::Failed(reason.clone());
                self.teardown().await;
                AttendeeEvent::Failed(reason)
            }
            PeerEvent::Candidate(cand) => AttendeeEvent::Candidate(cand),
            PeerEvent::Frame(frame) => {
                if !self.first_packet_fired.swap(true, Ordering::SeqCst) {
                    info!(attendee = %self.id, "first packet from attendee");
                }
                if let Some(sink) = &self.sink {
                    sink.on_frame(frame.clone());
                }
                AttendeeEvent::Frame(frame)
            }
        }
    }

    /// Bind this subscriber to a publisher id (called once the publisher is known).
    pub fn bind_publisher(&mut self, publisher_id: String) {
        self.bound_publisher = Some(publisher_id);
    }

    /// Bind this subscriber to a publisher that just joined *after* the subscriber
    /// did (spec I6, P5: every existing subscriber must learn of a new publisher
    /// before any of its frames are delivered). `bind_publisher` alone is enough when
    /// negotiation hasn't reached `Ready` yet — the `Ready` handler in `apply_event`
    /// will subscribe once it fires — but a subscriber that is already `Joined` needs
    /// the `subscribe` call issued right now.
    pub async fn notify_publisher_joined(&mut self, publisher_id: String) {
        self.bound_publisher = Some(publisher_id.clone());
        if self.state == AttendeeState::Joined {
            if let Err(e) = self.agent.subscribe(&publisher_id, &self.id).await {
                warn!(attendee = %self.id, error = %e, "subscribe failed on publisher join");
            }
        }
    }

    pub fn bound_publisher(&self) -> Option<&str> {
        self.bound_publisher.as_deref()
    }

    pub async fn send_frame(&self, frame: Frame) -> Result<()> {
        if self.state != AttendeeState::Joined {
            return Err(Error::ResourceClosed(format!("attendee {} not ready", self.id)));
        }
        self.agent.send_frame(&self.id, frame).await
    }

    pub async fn close(&mut self) {
        if self.state == AttendeeState::Closed {
            return;
        }
        self.state = AttendeeState::Closed;
        self.teardown().await;
    }

    async fn teardown(&mut self) {
        if let Err(e) = self.agent.destroy_peer(&self.id).await {
            warn!(attendee = %self.id, error = %e, "destroy_peer failed during teardown");
        }
        if self.role == PeerRole::Subscriber {
            if let Some(publisher_id) = &self.bound_publisher {
                if let Err(e) = self.agent.unsubscribe(publisher_id, &self.id).await {
                    warn!(attendee = %self.id, error = %e, "unsubscribe failed during teardown");
                }
            }
        }
    }
}

/// Attendee-facing projection of `PeerEvent`, returned by `poll_event` for the owning
/// `MediaSource` to act on (e.g. writing the answer SDP into an HTTP response).
#[derive(Debug, Clone)]
pub enum AttendeeEvent {
    Answer(String),
    Ready,
    Failed(String),
    Candidate(String),
    Frame(Frame),
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Mutex;

    struct FakeAgent {
        subscribe_calls: AtomicUsize,
    }

    #[async_trait]
    impl RtcAgent for FakeAgent {
        async fn create_peer(&self, _peer_id: &str, _role: PeerRole, _tracks: &[&str], _offer_sdp: &str, _events_tx: mpsc::Sender<PeerEvent>) -> Result<()> {
            Ok(())
        }
        async fn destroy_peer(&self, _peer_id: &str) -> Result<()> {
            Ok(())
        }
        async fn subscribe(&self, _publisher_id: &str, _subscriber_id: &str) -> Result<()> {
            self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn unsubscribe(&self, _publisher_id: &str, _subscriber_id: &str) -> Result<()> {
            Ok(())
        }
        async fn send_frame(&self, _peer_id: &str, _frame: Frame) -> Result<()> {
            Ok(())
        }
    }

    struct CollectingSink {
        frames: Mutex<Vec<Frame>>,
    }
    impl MediaSink for CollectingSink {
        fn on_frame(&self, frame: Frame) {
            self.frames.try_lock().unwrap().push(frame);
        }
    }

    #[tokio::test]
    async fn ready_triggers_subscribe_when_publisher_bound() {
        let agent = Arc::new(FakeAgent { subscribe_calls: AtomicUsize::new(0) });
        let (tx, rx) = mpsc::channel(4);
        let mut attendee = RtcAttendee::create("sub1".into(), PeerRole::Subscriber, &["audio", "video"], "v=0", agent.clone(), tx.clone(), rx)
            .await
            .unwrap();
        attendee.bind_publisher("pub1".into());

        tx.send(PeerEvent::Ready).await.unwrap();
        let ev = attendee.poll_event().await.unwrap();
        assert!(matches!(ev, AttendeeEvent::Ready));
        assert_eq!(agent.subscribe_calls.load(Ordering::SeqCst), 1);
        assert_eq!(*attendee.state(), AttendeeState::Joined);
    }

    #[tokio::test]
    async fn failed_event_transitions_to_failed_and_tears_down() {
        let agent = Arc::new(FakeAgent { subscribe_calls: AtomicUsize::new(0) });
        let (tx, rx) = mpsc::channel(4);
        let mut attendee = RtcAttendee::create("pub1".into(), PeerRole::Publisher, &["video"], "v=0", agent, tx.clone(), rx)
            .await
            .unwrap();

        tx.send(PeerEvent::Failed("ice timeout".into())).await.unwrap();
        let ev = attendee.poll_event().await.unwrap();
        assert!(matches!(ev, AttendeeEvent::Failed(_)));
        assert_eq!(*attendee.state(), AttendeeState::Failed("ice timeout".into()));
    }

    #[tokio::test]
    async fn frame_event_invokes_sink_and_fires_first_packet_once() {
        let agent = Arc::new(FakeAgent { subscribe_calls: AtomicUsize::new(0) });
        let (tx, rx) = mpsc::channel(4);
        let mut attendee = RtcAttendee::create("pub1".into(), PeerRole::Publisher, &["video"], "v=0", agent, tx.clone(), rx)
            .await
            .unwrap();
        let sink = Arc::new(CollectingSink { frames: Mutex::new(Vec::new()) });
        attendee.set_sink(sink.clone());

        tx.send(PeerEvent::Frame(Frame::video(&b"nal"[..], 0, true))).await.unwrap();
        attendee.poll_event().await.unwrap();
        tx.send(PeerEvent::Frame(Frame::video(&b"nal2"[..], 90, false))).await.unwrap();
        attendee.poll_event().await.unwrap();

        assert_eq!(sink.frames.try_lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn notify_publisher_joined_subscribes_immediately_when_already_joined() {
        let agent = Arc::new(FakeAgent { subscribe_calls: AtomicUsize::new(0) });
        let (tx, rx) = mpsc::channel(4);
        let mut attendee = RtcAttendee::create("sub1".into(), PeerRole::Subscriber, &["audio", "video"], "v=0", agent.clone(), tx.clone(), rx)
            .await
            .unwrap();
        tx.send(PeerEvent::Ready).await.unwrap();
        attendee.poll_event().await.unwrap();
        assert_eq!(agent.subscribe_calls.load(Ordering::SeqCst), 0);

        attendee.notify_publisher_joined("pub1".into()).await;
        assert_eq!(agent.subscribe_calls.load(Ordering::SeqCst), 1);
        assert_eq!(attendee.bound_publisher(), Some("pub1"));
    }

    #[tokio::test]
    async fn notify_publisher_joined_before_ready_defers_to_ready_handler() {
        let agent = Arc::new(FakeAgent { subscribe_calls: AtomicUsize::new(0) });
        let (tx, rx) = mpsc::channel(4);
        let mut attendee = RtcAttendee::create("sub1".into(), PeerRole::Subscriber, &["audio", "video"], "v=0", agent.clone(), tx.clone(), rx)
            .await
            .unwrap();

        attendee.notify_publisher_joined("pub1".into()).await;
        assert_eq!(agent.subscribe_calls.load(Ordering::SeqCst), 0);

        tx.send(PeerEvent::Ready).await.unwrap();
        attendee.poll_event().await.unwrap();
        assert_eq!(agent.subscribe_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_frame_fails_before_ready() {
        let agent = Arc::new(FakeAgent { subscribe_calls: AtomicUsize::new(0) });
        let (tx, rx) = mpsc::channel(4);
        let attendee = RtcAttendee::create("pub1".into(), PeerRole::Publisher, &["video"], "v=0", agent, tx, rx)
            .await
            .unwrap();
        let result = attendee.send_frame(Frame::video(&b"nal"[..], 0, true)).await;
        assert!(result.is_err());
    }
}
