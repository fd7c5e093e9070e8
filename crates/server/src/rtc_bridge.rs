use std::sync::Arc;

use streambridge_media::message::MessageType;
use streambridge_media::registry::DynMediaSource;
use streambridge_media::rtc_agent::{Frame, FrameFormat};
use streambridge_media::rtc_attendee::MediaSink;
use tracing::warn;

/// Installed as the `MediaSink` on an RTC publisher's attendee. Each frame captured
/// off the publisher's track fans out two ways (spec §4.12's "RTC publisher" rows):
/// natively to every other RTC subscriber already attached to this stream (no
/// transcoding involved — both ends already speak H.264/Opus over RTP), and, only
/// when an RTMP/FLV subscriber needs it, through the `RtcToLive` adapter into
/// `LiveSource` (scenario S5). `MediaSink::on_frame` is synchronous, so each call
/// spawns a short task rather than blocking the attendee's event-poll loop on the
/// lock acquisitions both paths need.
pub struct PublisherSink {
    source: Arc<DynMediaSource>,
}

impl PublisherSink {
    pub fn new(source: Arc<DynMediaSource>) -> Self {
        Self { source }
    }
}

impl MediaSink for PublisherSink {
    fn on_frame(&self, frame: Frame) {
        let source = self.source.clone();
        tokio::spawn(async move {
            relay_to_rtc_subscribers(&source, &frame).await;
            bridge_to_live_source(&source, &frame).await;
        });
    }
}

/// Native RTC-to-RTC relay: the single media path for the "RTC publisher, RTC
/// subscriber" activation row, which needs no adapter at all (spec §4.12).
async fn relay_to_rtc_subscribers(source: &Arc<DynMediaSource>, frame: &Frame) {
    for subscriber_id in source.rtc.all_subscriber_ids().await {
        let Some(attendee) = source.rtc.attendee(&subscriber_id).await else {
            continue;
        };
        if let Err(e) = attendee.read().await.send_frame(frame.clone()).await {
            warn!(subscriber_id, error = %e, "rtc-to-rtc relay send failed");
        }
    }
}

/// Reverse bridge direction (spec scenario S5: RTC publisher, RTMP/FLV subscriber).
/// A no-op whenever `rtc_to_live` hasn't been installed, i.e. no RTMP/FLV subscriber
/// currently needs it.
async fn bridge_to_live_source(source: &Arc<DynMediaSource>, frame: &Frame) {
    let messages = {
        let mut guard = source.rtc_to_live().lock().await;
        let Some(adapter) = guard.as_mut() else {
            return;
        };
        match frame.format {
            FrameFormat::H264 => adapter.process_video(frame),
            FrameFormat::Opus => adapter.process_audio(frame),
        }
    };

    let messages = match messages {
        Ok(messages) => messages,
        Err(e) => {
            warn!(error = %e, "rtc_to_live conversion failed, dropping frame");
            return;
        }
    };

    let mut live = source.live.lock().await;
    for msg in messages {
        let is_h264 = msg.kind == MessageType::Video;
        if let Err(e) = live.on_media(msg, is_h264) {
            warn!(error = %e, "failed to ingest frame bridged from rtc publisher");
        }
    }
}
