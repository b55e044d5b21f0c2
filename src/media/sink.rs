//! RTP statistics sink
//!
//! Headless stand-in for a video element: reads every bound track and keeps
//! packet/byte counters, logging them periodically.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{MediaKind, RemoteTrack, VideoSink};

/// How often per-track statistics are logged
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Counters for one track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackStats {
    pub kind: MediaKind,
    pub packets: u64,
    pub bytes: u64,
}

/// Sink that drains tracks and records statistics
#[derive(Default)]
pub struct RtpStatsSink {
    tracks: Arc<Mutex<HashMap<String, TrackStats>>>,
}

impl RtpStatsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statistics for the track with `id`
    pub fn stats(&self, id: &str) -> Option<TrackStats> {
        self.tracks.lock().get(id).copied()
    }

    /// Number of bound tracks
    pub fn track_count(&self) -> usize {
        self.tracks.lock().len()
    }
}

impl VideoSink for RtpStatsSink {
    fn bind(&self, track: Arc<dyn RemoteTrack>) {
        let id = track.id();
        let kind = track.kind();
        {
            let mut tracks = self.tracks.lock();
            if tracks.contains_key(&id) {
                debug!("Track {} already bound", id);
                return;
            }
            tracks.insert(
                id.clone(),
                TrackStats {
                    kind,
                    packets: 0,
                    bytes: 0,
                },
            );
        }
        info!("Bound {:?} track {} (stream {})", kind, id, track.stream_id());

        let tracks = self.tracks.clone();
        tokio::spawn(async move {
            let mut last_log = Instant::now();
            while let Some(packet) = track.read_packet().await {
                let snapshot = {
                    let mut tracks = tracks.lock();
                    let Some(stats) = tracks.get_mut(&id) else {
                        break;
                    };
                    stats.packets += 1;
                    stats.bytes += packet.payload.len() as u64;
                    *stats
                };

                if last_log.elapsed() >= STATS_LOG_INTERVAL {
                    last_log = Instant::now();
                    info!(
                        "Track {}: {} packets, {} KiB",
                        id,
                        snapshot.packets,
                        snapshot.bytes / 1024
                    );
                }
            }
            debug!("Track {} ended", id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTrack;

    #[tokio::test]
    async fn test_bind_is_idempotent_and_counts_packets() {
        let sink = RtpStatsSink::new();
        let track = Arc::new(FakeTrack::new("video-1", MediaKind::Video, &[100, 200, 50]));

        sink.bind(track.clone());
        sink.bind(track.clone());
        assert_eq!(sink.track_count(), 1);

        track.finished().await;
        tokio::task::yield_now().await;

        let stats = sink.stats("video-1").unwrap();
        assert_eq!(stats.kind, MediaKind::Video);
        assert_eq!(stats.packets, 3);
        assert_eq!(stats.bytes, 350);
    }
}
