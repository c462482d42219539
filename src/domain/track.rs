//! Track Recorder
//!
//! Owns the recording flag and the ordered trail of accepted readings for
//! the current recording session. Writes come from the connection session's
//! notification pump; readers take [`TrackSnapshot`]s.
//!
//! Points are stored in fixed-size chunks shared copy-on-write. A snapshot
//! copies only the chunk handles, and an append while a snapshot is held
//! clones at most the last chunk, so holding snapshots keeps recording linear.

use crate::domain::models::Reading;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Smallest span a framing region is allowed to have, in degrees
pub const MIN_REGION_DELTA: f64 = 0.01;

/// Padding factor applied around the track's bounding box
pub const REGION_PADDING: f64 = 1.1;

/// Centre used when there is neither a track nor a live position
pub const DEFAULT_REGION_CENTER: (f64, f64) = (37.78825, -122.4324);

const CHUNK_LEN: usize = 256;

type Chunks = Vec<Arc<Vec<Reading>>>;

#[derive(Debug, Default)]
struct TrackState {
    recording: bool,
    started_at: Option<DateTime<Utc>>,
    chunks: Chunks,
    len: usize,
}

#[derive(Debug, Default)]
pub struct TrackRecorder {
    state: RwLock<TrackState>,
}

impl TrackRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Begin a new recording session, discarding any previous trail
    pub fn start(&self) {
        self.start_at(Utc::now());
    }

    pub fn start_at(&self, now: DateTime<Utc>) {
        let mut state = self.state.write();
        if state.recording {
            debug!("Restarting recording, dropping {} points", state.len);
        }
        state.recording = true;
        state.started_at = Some(now);
        state.chunks = Vec::new();
        state.len = 0;
        info!("Recording started");
    }

    /// Stop recording. The trail stays readable until the next start.
    pub fn stop(&self) {
        let mut state = self.state.write();
        state.recording = false;
        state.started_at = None;
        info!("Recording stopped with {} points", state.len);
    }

    /// Append a reading if recording. Returns whether it was kept.
    pub fn add_point(&self, reading: Reading) -> bool {
        let mut state = self.state.write();
        if !state.recording {
            return false;
        }
        match state.chunks.last_mut() {
            Some(chunk) if chunk.len() < CHUNK_LEN => Arc::make_mut(chunk).push(reading),
            _ => {
                let mut chunk = Vec::with_capacity(CHUNK_LEN);
                chunk.push(reading);
                state.chunks.push(Arc::new(chunk));
            }
        }
        state.len += 1;
        true
    }

    pub fn is_recording(&self) -> bool {
        self.state.read().recording
    }

    pub fn len(&self) -> usize {
        self.state.read().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elapsed recording time, zero when not recording
    pub fn duration(&self) -> Duration {
        self.duration_at(Utc::now())
    }

    pub fn duration_at(&self, now: DateTime<Utc>) -> Duration {
        let state = self.state.read();
        match (state.recording, state.started_at) {
            (true, Some(started_at)) => (now - started_at).to_std().unwrap_or(Duration::ZERO),
            _ => Duration::ZERO,
        }
    }

    pub fn snapshot(&self) -> TrackSnapshot {
        let state = self.state.read();
        TrackSnapshot {
            recording: state.recording,
            started_at: state.started_at,
            chunks: state.chunks.clone(),
            len: state.len,
        }
    }
}

/// Render a duration as `H:MM:SS`, or `M:SS` under an hour
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    let minutes = seconds / 60;
    let hours = minutes / 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes % 60, seconds % 60)
    } else {
        format!("{}:{:02}", minutes, seconds % 60)
    }
}

/// Point-in-time view of the track
#[derive(Debug, Clone)]
pub struct TrackSnapshot {
    pub recording: bool,
    pub started_at: Option<DateTime<Utc>>,
    chunks: Chunks,
    len: usize,
}

/// Map area that frames a track
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapRegion {
    pub latitude: f64,
    pub longitude: f64,
    pub latitude_delta: f64,
    pub longitude_delta: f64,
}

impl TrackSnapshot {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Readings in recording order
    pub fn points(&self) -> impl Iterator<Item = &Reading> + '_ {
        self.chunks.iter().flat_map(|chunk| chunk.iter())
    }

    /// `(latitude, longitude)` pairs in recording order
    pub fn polyline(&self) -> Vec<(f64, f64)> {
        self.points()
            .map(|point| (point.latitude, point.longitude))
            .collect()
    }

    /// Region covering every point with some padding.
    ///
    /// An empty track centres on `current`, or on [`DEFAULT_REGION_CENTER`]
    /// when there is no live position either.
    pub fn region(&self, current: Option<(f64, f64)>) -> MapRegion {
        if self.is_empty() {
            let (latitude, longitude) = current.unwrap_or(DEFAULT_REGION_CENTER);
            return MapRegion {
                latitude,
                longitude,
                latitude_delta: MIN_REGION_DELTA,
                longitude_delta: MIN_REGION_DELTA,
            };
        }

        let mut min_lat = f64::INFINITY;
        let mut max_lat = f64::NEG_INFINITY;
        let mut min_lon = f64::INFINITY;
        let mut max_lon = f64::NEG_INFINITY;
        for point in self.points() {
            min_lat = min_lat.min(point.latitude);
            max_lat = max_lat.max(point.latitude);
            min_lon = min_lon.min(point.longitude);
            max_lon = max_lon.max(point.longitude);
        }

        MapRegion {
            latitude: (min_lat + max_lat) / 2.0,
            longitude: (min_lon + max_lon) / 2.0,
            latitude_delta: (max_lat - min_lat).max(MIN_REGION_DELTA) * REGION_PADDING,
            longitude_delta: (max_lon - min_lon).max(MIN_REGION_DELTA) * REGION_PADDING,
        }
    }
}
