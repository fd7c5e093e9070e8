use std::sync::Arc;

use streambridge_media::codec::aac::{AacProfile, AudioSpecificConfig};
use streambridge_media::error::{Error, Result};
use streambridge_media::message::{Message, MessageType};
use streambridge_media::registry::DynMediaSource;
use streambridge_media::rtc_agent::PublisherType;
use streambridge_protocol::StreamId;
use tracing::warn;

use crate::state::AppState;

/// Implements the `LiveIngest` contract (spec §6.4): the narrow surface a connection
/// handler calls into once it has decoded AMF commands and chunk-reassembled RTMP
/// payloads. Chunk-stream parsing and AMF decoding are assumed external and live
/// outside this crate entirely — nothing here reads a raw TCP byte.
pub struct LiveIngest {
    state: Arc<AppState>,
}

/// Returned by `on_connect`, carried by the caller through every subsequent call for
/// one publish session.
pub struct StreamHandle {
    pub id: StreamId,
    source: Arc<DynMediaSource>,
}

/// Returned by `on_play`, identifies one RTMP-side subscriber.
pub struct ConsumerHandle {
    pub consumer_id: u64,
    source: Arc<DynMediaSource>,
}

/// Minimal request shape a connection handler would decode from an RTMP `connect`/
/// `publish`/`play` command (app name, stream key — anything else belongs to the
/// chunk/AMF layer, not here).
pub struct IngestRequest {
    pub app: String,
    pub stream: String,
}

impl LiveIngest {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn on_connect(&self, req: IngestRequest) -> Result<StreamHandle> {
        if req.app.is_empty() || req.stream.is_empty() {
            return Err(Error::InvalidArgument("app and stream must be non-empty".into()));
        }
        let id = StreamId::new(&self.state.config.server.default_vhost, &req.app, &req.stream);
        let source = self.state.registry.get_or_create(&id).await;
        Ok(StreamHandle { id, source })
    }

    pub async fn on_publish(&self, handle: &StreamHandle, _req: IngestRequest) -> Result<()> {
        handle.source.on_publisher_joined(PublisherType::LocalRtmp).await?;
        handle.source.live.lock().await.on_publish()?;
        Ok(())
    }

    pub async fn on_unpublish(&self, handle: &StreamHandle) {
        handle.source.live.lock().await.on_unpublish();
        handle.source.on_publisher_left().await;
        self.state.registry.reap_if_idle(&handle.id).await;
    }

    pub async fn on_metadata(&self, handle: &StreamHandle, payload: serde_json::Value) {
        handle.source.live.lock().await.set_metadata(payload);
    }

    pub async fn on_audio(&self, handle: &StreamHandle, msg: Message) {
        self.ingest(handle, msg, false).await;
    }

    pub async fn on_video(&self, handle: &StreamHandle, msg: Message) {
        self.ingest(handle, msg, true).await;
    }

    async fn ingest(&self, handle: &StreamHandle, msg: Message, is_h264: bool) {
        let is_video = msg.is_video();
        match handle.source.live.lock().await.on_media(msg, is_h264) {
            Ok(_first) => {
                if is_video {
                    handle.source.stats.record_video();
                } else {
                    handle.source.stats.record_audio();
                }
            }
            Err(e) => {
                // Ingest errors log and drop the offending packet; the stream itself
                // keeps running (spec §7).
                warn!(stream = %handle.id, error = %e, "dropping malformed ingest packet");
                return;
            }
        }

        self.pump_to_rtc(handle).await;
    }

    /// Drain whatever the RTMP-side consumer dedicated to the RTC bridge has
    /// accumulated and forward it to every current RTC subscriber (spec §4.8,
    /// §4.12). A no-op unless the current activation plan actually needs the bridge.
    async fn pump_to_rtc(&self, handle: &StreamHandle) {
        let has_rtmp_subscriber = handle.source.live.lock().await.consumer_count() > 0;
        let plan = handle.source.recompute_activation(has_rtmp_subscriber).await;
        if !plan.live_to_rtc {
            return;
        }

        let subscriber_ids = handle.source.rtc.all_subscriber_ids().await;
        if subscriber_ids.is_empty() {
            return;
        }

        let mut live_to_rtc = handle.source.live_to_rtc().lock().await;
        let Some(adapter) = live_to_rtc.as_mut() else { return };

        let consumer_id = handle.source.bridge_consumer_id().await;
        let messages = handle.source.live.lock().await.fetch(consumer_id, 64);
        let meta_snapshot = handle.source.live.lock().await.meta_cache().clone();

        for msg in &messages {
            let frames: Vec<_> = match msg.kind {
                MessageType::Video => match adapter.process_video(msg, &meta_snapshot) {
                    Ok(Some(frame)) => vec![frame],
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(stream = %handle.id, error = %e, "live_to_rtc video conversion failed");
                        continue;
                    }
                },
                MessageType::Audio => {
                    let config = meta_snapshot
                        .audio_sh()
                        .and_then(|sh| AudioSpecificConfig::parse(&sh.payload.to_contiguous()).ok())
                        .unwrap_or(AudioSpecificConfig {
                            profile: AacProfile::LowComplexity,
                            sampling_frequency_index: 4,
                            channel_configuration: 2,
                        });
                    match adapter.process_audio(msg, config) {
                        Ok(frames) => frames,
                        Err(e) => {
                            warn!(stream = %handle.id, error = %e, "live_to_rtc audio conversion failed");
                            continue;
                        }
                    }
                }
                MessageType::Metadata => continue,
            };

            for frame in frames {
                for subscriber_id in &subscriber_ids {
                    if let Some(attendee) = handle.source.rtc.attendee(subscriber_id).await {
                        if let Err(e) = attendee.read().await.send_frame(frame.clone()).await {
                            warn!(stream = %handle.id, subscriber_id, error = %e, "rtc fan-out send failed");
                        }
                    }
                }
            }
        }
    }

    pub async fn on_play(&self, handle: &StreamHandle) -> ConsumerHandle {
        let consumer_id = handle.source.live.lock().await.add_consumer();
        handle.source.recompute_activation(true).await;
        ConsumerHandle {
            consumer_id,
            source: handle.source.clone(),
        }
    }

    pub async fn on_stop_play(&self, handle: ConsumerHandle) {
        handle.source.live.lock().await.remove_consumer(handle.consumer_id);
    }
}
