use crate::codec::transcode::AudioTranscoder;
use crate::error::{Error, Result};
use crate::live_source::LiveSource;
use crate::live_to_rtc::LiveToRtc;
use crate::rtc_agent::PublisherType;
use crate::rtc_source::RtcSource;
use crate::rtc_to_live::RtcToLive;
use crate::stats::StreamStats;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Which side of the bridge is currently needed, derived from the publisher/subscriber
/// mix (spec §4.12 activation matrix).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActivationPlan {
    pub live_source: bool,
    pub rtc_source: bool,
    pub live_to_rtc: bool,
    pub rtc_to_live: bool,
}

/// Pure decision function implementing the spec §4.12 table. `publisher` is `None` when
/// nobody is publishing yet; subscriber presence is independent of publisher identity.
pub fn compute_activation(publisher: Option<PublisherType>, has_rtmp_subscriber: bool, has_rtc_subscriber: bool) -> ActivationPlan {
    match publisher {
        None => ActivationPlan {
            live_source: has_rtmp_subscriber,
            rtc_source: has_rtc_subscriber,
            live_to_rtc: false,
            rtc_to_live: false,
        },
        Some(p) if p.is_rtmp() => ActivationPlan {
            live_source: true,
            rtc_source: has_rtc_subscriber,
            live_to_rtc: has_rtc_subscriber,
            rtc_to_live: false,
        },
        Some(_) => ActivationPlan {
            live_source: has_rtmp_subscriber,
            rtc_source: true,
            live_to_rtc: false,
            rtc_to_live: has_rtmp_subscriber,
        },
    }
}

/// Composite owner of one stream's `LiveSource`, `RtcSource`, and the adapter(s)
/// currently needed to bridge them (spec §4.12). Pinned for its lifetime to one
/// command-processing context per §5; the locks here serialize access within that
/// context rather than across independent concurrent callers.
pub struct MediaSource<T: AudioTranscoder> {
    pub live: Mutex<LiveSource>,
    pub rtc: RtcSource,
    live_to_rtc: Mutex<Option<LiveToRtc<T>>>,
    rtc_to_live: Mutex<Option<RtcToLive<T>>>,
    publisher: Mutex<Option<PublisherType>>,
    /// Dedicated `LiveSource` consumer id feeding the `live_to_rtc` adapter, created
    /// lazily on first use (spec §4.8: the bridge reads the stream like any other
    /// subscriber, just in a different direction).
    bridge_consumer_id: Mutex<Option<u64>>,
    pub stats: Arc<StreamStats>,
}

impl<T: AudioTranscoder> MediaSource<T> {
    /// `stats` is handed in rather than constructed here so the registry can keep one
    /// `StreamStats` per stream display name shared with its `StatsRegistry` entry.
    pub fn new(live: LiveSource, stats: Arc<StreamStats>) -> Self {
        Self {
            live: Mutex::new(live),
            rtc: RtcSource::new(),
            live_to_rtc: Mutex::new(None),
            rtc_to_live: Mutex::new(None),
            publisher: Mutex::new(None),
            bridge_consumer_id: Mutex::new(None),
            stats,
        }
    }

    pub fn live_to_rtc(&self) -> &Mutex<Option<LiveToRtc<T>>> {
        &self.live_to_rtc
    }

    pub fn rtc_to_live(&self) -> &Mutex<Option<RtcToLive<T>>> {
        &self.rtc_to_live
    }

    /// Fetch (creating on first call) the `LiveSource` consumer id dedicated to
    /// feeding the `live_to_rtc` adapter.
    pub async fn bridge_consumer_id(&self) -> u64 {
        let mut slot = self.bridge_consumer_id.lock().await;
        if let Some(id) = *slot {
            return id;
        }
        let id = self.live.lock().await.add_consumer();
        *slot = Some(id);
        id
    }

    /// Claim the publisher slot, failing if one is already held (spec §6.1 conflict
    /// scenario S6: concurrent publish attempts on the same stream).
    pub async fn on_publisher_joined(&self, kind: PublisherType) -> Result<()> {
        let mut publisher = self.publisher.lock().await;
        if publisher.is_some() {
            return Err(Error::AlreadyExists("publisher already active on this stream".into()));
        }
        *publisher = Some(kind);
        drop(publisher);

        if kind.is_rtc() {
            self.rtc.clear_dummy_publisher().await;
        } else {
            let id = self.rtc.publisher_id().await.unwrap_or_else(|| "dummy".to_string());
            self.rtc.set_dummy_publisher(id).await;
        }
        info!(?kind, "publisher joined, recomputing activation");
        Ok(())
    }

    pub async fn publisher(&self) -> Option<PublisherType> {
        *self.publisher.lock().await
    }

    pub async fn on_publisher_left(&self) {
        *self.publisher.lock().await = None;
        self.live_to_rtc.lock().await.take();
        self.rtc_to_live.lock().await.take();
        if let Some(id) = self.bridge_consumer_id.lock().await.take() {
            self.live.lock().await.remove_consumer(id);
        }
    }

    pub async fn current_activation(&self, has_rtmp_subscriber: bool) -> ActivationPlan {
        let publisher = *self.publisher.lock().await;
        let has_rtc_subscriber = self.rtc.subscriber_count().await > 0;
        compute_activation(publisher, has_rtmp_subscriber, has_rtc_subscriber)
    }

    /// Install or tear down adapters to match `plan`. Construction is lazy: the caller
    /// supplies a factory because building a transcoder is fallible (gstreamer pipeline
    /// setup) and should not happen on every activation recheck.
    ///
    /// Also reconciles `LiveSource`'s own active/idle state with `plan.live_source`:
    /// an RTMP publisher activates it directly on publish (so `on_publish`'s
    /// already-active error still catches a genuine double publish), but when the
    /// real publisher is RTC-side, nothing else ever flips `LiveSource` into `Active`
    /// — it only needs to be live at all once an RTMP/FLV subscriber shows up.
    pub async fn apply_activation(&self, plan: ActivationPlan, make_live_to_rtc: impl FnOnce() -> LiveToRtc<T>, make_rtc_to_live: impl FnOnce() -> RtcToLive<T>) {
        let mut live = self.live.lock().await;
        if plan.live_source && !live.is_active() {
            let _ = live.on_publish();
        } else if !plan.live_source && live.is_active() {
            live.on_unpublish();
        }
        drop(live);

        let mut l2r = self.live_to_rtc.lock().await;
        if plan.live_to_rtc && l2r.is_none() {
            *l2r = Some(make_live_to_rtc());
        } else if !plan.live_to_rtc && l2r.is_some() {
            *l2r = None;
        }
        drop(l2r);

        let mut r2l = self.rtc_to_live.lock().await;
        if plan.rtc_to_live && r2l.is_none() {
            *r2l = Some(make_rtc_to_live());
        } else if !plan.rtc_to_live && r2l.is_some() {
            *r2l = None;
        }
    }

    /// Shutdown condition per spec §4.12: no subscribers on either side and no
    /// publisher present.
    pub async fn should_shut_down(&self) -> bool {
        let has_publisher = self.publisher.lock().await.is_some();
        let live_consumers = self.live.lock().await.consumer_count();
        let rtc_empty = self.rtc.is_empty().await;
        !has_publisher && live_consumers == 0 && rtc_empty
    }
}

impl MediaSource<Box<dyn AudioTranscoder>> {
    /// Recompute activation for `has_rtmp_subscriber` and install/tear down whichever
    /// adapters the new plan calls for, building real GStreamer-backed transcoders
    /// (falling back to a silent passthrough if pipeline construction fails — see
    /// `codec::transcode`) rather than requiring every caller to supply its own
    /// factories.
    pub async fn recompute_activation(&self, has_rtmp_subscriber: bool) -> ActivationPlan {
        let plan = self.current_activation(has_rtmp_subscriber).await;
        self.apply_activation(
            plan,
            || LiveToRtc::new(crate::codec::transcode::aac_to_opus_or_silent()),
            || RtcToLive::new(crate::codec::transcode::opus_to_aac_or_silent(), 44_100),
        )
        .await;

        let live_consumers = self.live.lock().await.consumer_count();
        let rtc_subscribers = self.rtc.subscriber_count().await;
        self.stats.set_subscriber_count(live_consumers + rtc_subscribers);

        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtmp_publisher_rtmp_subscriber_only_needs_live_source() {
        let plan = compute_activation(Some(PublisherType::LocalRtmp), true, false);
        assert!(plan.live_source);
        assert!(!plan.rtc_source);
        assert!(!plan.live_to_rtc);
        assert!(!plan.rtc_to_live);
    }

    #[test]
    fn rtmp_publisher_rtc_subscriber_needs_dummy_publisher_and_c8() {
        let plan = compute_activation(Some(PublisherType::RemoteRtmp), false, true);
        assert!(plan.live_source);
        assert!(plan.rtc_source);
        assert!(plan.live_to_rtc);
        assert!(!plan.rtc_to_live);
    }

    #[test]
    fn rtc_publisher_rtmp_subscriber_needs_c9_only() {
        let plan = compute_activation(Some(PublisherType::LocalRtc), true, false);
        assert!(plan.live_source);
        assert!(plan.rtc_source);
        assert!(!plan.live_to_rtc);
        assert!(plan.rtc_to_live);
    }

    #[test]
    fn rtc_publisher_rtc_subscriber_needs_neither_adapter() {
        let plan = compute_activation(Some(PublisherType::RemoteRtc), false, true);
        assert!(!plan.live_source);
        assert!(plan.rtc_source);
        assert!(!plan.live_to_rtc);
        assert!(!plan.rtc_to_live);
    }

    #[test]
    fn no_publisher_tracks_whichever_subscribers_are_present() {
        let plan = compute_activation(None, true, true);
        assert!(plan.live_source);
        assert!(plan.rtc_source);
        assert!(!plan.live_to_rtc);
        assert!(!plan.rtc_to_live);
    }

    fn test_source() -> MediaSource<Box<dyn AudioTranscoder>> {
        let live = LiveSource::new(30_000, 115, true, crate::jitter::JitterAlgorithm::Full, 250, 10);
        MediaSource::new(live, Arc::new(StreamStats::new()))
    }

    #[tokio::test]
    async fn recompute_activation_brings_live_source_active_for_rtc_publisher_once_subscribed() {
        let source = test_source();
        source.on_publisher_joined(PublisherType::RemoteRtc).await.unwrap();

        // No RTMP/FLV subscriber yet: live_source should stay idle, nothing to push to.
        source.recompute_activation(false).await;
        assert!(!source.live.lock().await.is_active());

        // An FLV viewer attaches: live_source must flip active so frames bridged in by
        // the rtc_to_live adapter actually reach LiveSource::on_media instead of being
        // silently dropped.
        let plan = source.recompute_activation(true).await;
        assert!(plan.live_source);
        assert!(plan.rtc_to_live);
        assert!(source.live.lock().await.is_active());
    }

    #[tokio::test]
    async fn recompute_activation_publishes_total_subscriber_count_to_stats() {
        let source = test_source();
        assert_eq!(source.stats.snapshot().subscriber_count, 0);

        source.live.lock().await.add_consumer();
        source.recompute_activation(true).await;
        assert_eq!(source.stats.snapshot().subscriber_count, 1);
    }

    #[tokio::test]
    async fn rtmp_publisher_on_publish_is_not_clobbered_by_recompute_activation() {
        let source = test_source();
        source.on_publisher_joined(PublisherType::LocalRtmp).await.unwrap();
        source.live.lock().await.on_publish().unwrap();

        // Recomputing activation for an already-active LiveSource must not try to
        // re-activate it (on_publish errors on a double publish).
        source.recompute_activation(true).await;
        assert!(source.live.lock().await.is_active());
    }
}
