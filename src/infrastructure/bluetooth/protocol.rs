//! GPS Beacon Protocol
//!
//! Identifiers, timing constants and the frame decoder for the beacon's
//! binary GPS telemetry characteristic.

use crate::domain::error::FrameError;
use crate::domain::models::{RawFrame, Reading};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::trace;
use uuid::Uuid;

/// Service UUID the beacon advertises while discoverable
pub const ADVERTISED_SERVICE_UUID: Uuid = Uuid::from_u128(0x4fafc201_1fb5_459e_8fcc_c5c9c331914b);

/// GATT service carrying GPS telemetry (16-bit UUID 0x1FF8)
pub const GPS_SERVICE_UUID: Uuid = Uuid::from_u128(0x00001ff8_0000_1000_8000_00805f9b34fb);

/// GPS main characteristic - one frame per notification
pub const GPS_MAIN_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x00000003_0000_1000_8000_00805f9b34fb);

/// Advertised identifiers that mark a device as a candidate
pub const SCAN_FILTER: [Uuid; 2] = [ADVERTISED_SERVICE_UUID, GPS_SERVICE_UUID];

/// How long a filtered scan may go without a match before listing everything
pub const SCAN_WINDOW: Duration = Duration::from_secs(10);

/// Bound on establishing the link
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on service and characteristic discovery
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Transfer-unit size requested when connecting
pub const REQUESTED_MTU: u16 = 512;

/// Frames shorter than this are dropped
pub const MIN_FRAME_LEN: usize = 20;

/// 1/200 s ticks per minute, second and centisecond
const TICKS_PER_MINUTE: u32 = 30_000;
const TICKS_PER_SECOND: u32 = 500;
const TICKS_PER_CENTISECOND: u32 = 5;

const COORDINATE_SCALE: f64 = 1.0 / 10_000_000.0;
const ALTITUDE_OFFSET: f64 = 500.0;
const HIGH_RANGE_FLAG: u16 = 0x8000;
const LOW_15_BITS: u16 = 0x7FFF;

/// Decode one GPS frame.
///
/// # Frame Structure (big-endian, 20+ bytes)
///
/// ```text
/// [0-2]   : Time since hour start, 1/200 s ticks (top 3 bits of byte 0 masked)
/// [3]     : bits 0-5 satellites, bits 6-7 fix quality
/// [4-7]   : Latitude  (i32, 1e-7 degrees)
/// [8-11]  : Longitude (i32, 1e-7 degrees)
/// [12-13] : Altitude  top bit set: low 15 bits - 500 m
///                     top bit clear: value / 10 - 500 m
/// [14-15] : Speed     top bit set: low 15 bits / 10
///                     top bit clear: value / 100 m/s
/// [16-17] : Course (u16, 1/100 degree)
/// [18]    : HDOP (1/10)
/// [19..]  : Reserved
/// ```
///
/// The frame carries no date, so the date and capture timestamp both come
/// from `now`. Range checks belong to the validator.
pub fn decode_frame(frame: &RawFrame, now: DateTime<Utc>) -> Result<Reading, FrameError> {
    let bytes = frame.as_bytes();
    if bytes.len() < MIN_FRAME_LEN {
        return Err(FrameError::FrameTooShort {
            len: bytes.len(),
            min: MIN_FRAME_LEN,
        });
    }

    trace!("Raw frame: {:02X?}", bytes);

    // Time of day
    let ticks = u32::from_be_bytes([0, bytes[0] & 0x1F, bytes[1], bytes[2]]);
    let minutes = ticks / TICKS_PER_MINUTE;
    let seconds = (ticks % TICKS_PER_MINUTE) / TICKS_PER_SECOND;
    let centiseconds = (ticks % TICKS_PER_SECOND) / TICKS_PER_CENTISECOND;

    // Fix
    let satellites = bytes[3] & 0x3F;
    let fix_quality = (bytes[3] >> 6) & 0x03;

    // Position
    let latitude =
        i32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as f64 * COORDINATE_SCALE;
    let longitude =
        i32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as f64 * COORDINATE_SCALE;

    let raw_altitude = u16::from_be_bytes([bytes[12], bytes[13]]);
    let altitude = if raw_altitude & HIGH_RANGE_FLAG != 0 {
        (raw_altitude & LOW_15_BITS) as f64 - ALTITUDE_OFFSET
    } else {
        raw_altitude as f64 / 10.0 - ALTITUDE_OFFSET
    };

    // Motion
    let raw_speed = u16::from_be_bytes([bytes[14], bytes[15]]);
    let speed = if raw_speed & HIGH_RANGE_FLAG != 0 {
        (raw_speed & LOW_15_BITS) as f64 / 10.0
    } else {
        raw_speed as f64 / 100.0
    };

    let course = u16::from_be_bytes([bytes[16], bytes[17]]) as f64 / 100.0;
    let accuracy = bytes[18] as f64 / 10.0;

    Ok(Reading {
        latitude,
        longitude,
        altitude,
        speed,
        course,
        satellites,
        accuracy,
        date: now.date_naive(),
        time: format!("{:02}:{:02}:{:02}", minutes, seconds, centiseconds),
        captured_at: now,
        fix_quality,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 34, 56).unwrap()
    }

    /// Build a frame with the given coordinates and otherwise ordinary fields
    pub(crate) fn frame_with(latitude: f64, longitude: f64) -> RawFrame {
        let mut bytes = vec![0u8; MIN_FRAME_LEN];
        // 12:34.56 since the hour
        let ticks: u32 = 12 * 30_000 + 34 * 500 + 56 * 5;
        bytes[0..3].copy_from_slice(&ticks.to_be_bytes()[1..4]);
        bytes[3] = 0x40 | 9;
        let lat = (latitude * 10_000_000.0).round() as i32;
        let lon = (longitude * 10_000_000.0).round() as i32;
        bytes[4..8].copy_from_slice(&lat.to_be_bytes());
        bytes[8..12].copy_from_slice(&lon.to_be_bytes());
        bytes[12..14].copy_from_slice(&0x2710u16.to_be_bytes());
        bytes[14..16].copy_from_slice(&0x0064u16.to_be_bytes());
        bytes[16..18].copy_from_slice(&18_000u16.to_be_bytes());
        bytes[18] = 12;
        RawFrame::new(bytes)
    }

    fn with_field(frame: &RawFrame, offset: usize, value: u16) -> RawFrame {
        let mut bytes = frame.as_bytes().to_vec();
        bytes[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
        RawFrame::new(bytes)
    }

    #[test]
    fn test_short_frames_are_rejected() {
        for len in 0..MIN_FRAME_LEN {
            let frame = RawFrame::new(vec![0u8; len]);
            assert_eq!(
                decode_frame(&frame, fixed_now()),
                Err(FrameError::FrameTooShort {
                    len,
                    min: MIN_FRAME_LEN
                })
            );
        }
    }

    #[test]
    fn test_decode_fields() {
        let reading = decode_frame(&frame_with(37.7749, -122.4194), fixed_now()).unwrap();

        assert!((reading.latitude - 37.7749).abs() < 1e-7);
        assert!((reading.longitude + 122.4194).abs() < 1e-7);
        assert_eq!(reading.altitude, 500.0);
        assert_eq!(reading.speed, 1.0);
        assert_eq!(reading.course, 180.0);
        assert_eq!(reading.satellites, 9);
        assert_eq!(reading.fix_quality, 1);
        assert!((reading.accuracy - 1.2).abs() < 1e-9);
        assert_eq!(reading.time, "12:34:56");
        assert_eq!(reading.date, fixed_now().date_naive());
        assert_eq!(reading.captured_at, fixed_now());
    }

    #[test]
    fn test_decode_is_deterministic() {
        let frame = frame_with(48.8584, 2.2945);
        assert_eq!(
            decode_frame(&frame, fixed_now()),
            decode_frame(&frame, fixed_now())
        );
    }

    #[test]
    fn test_time_ignores_top_three_bits() {
        let frame = frame_with(0.0, 0.0);
        let mut bytes = frame.as_bytes().to_vec();
        bytes[0] |= 0xE0;
        let reading = decode_frame(&RawFrame::new(bytes), fixed_now()).unwrap();
        assert_eq!(reading.time, "12:34:56");
    }

    #[test]
    fn test_altitude_branches() {
        let frame = frame_with(0.0, 0.0);
        let high = decode_frame(&with_field(&frame, 12, 0x8032), fixed_now()).unwrap();
        assert_eq!(high.altitude, -450.0);

        let low = decode_frame(&with_field(&frame, 12, 0x2710), fixed_now()).unwrap();
        assert_eq!(low.altitude, 500.0);
    }

    #[test]
    fn test_speed_branches() {
        let frame = frame_with(0.0, 0.0);
        let low = decode_frame(&with_field(&frame, 14, 0x0064), fixed_now()).unwrap();
        assert_eq!(low.speed, 1.0);

        let high = decode_frame(&with_field(&frame, 14, 0x8064), fixed_now()).unwrap();
        assert_eq!(high.speed, 10.0);
    }

    #[test]
    fn test_longer_frames_decode() {
        let mut bytes = frame_with(1.0, 2.0).as_bytes().to_vec();
        bytes.extend_from_slice(&[0xFF; 12]);
        assert!(decode_frame(&RawFrame::new(bytes), fixed_now()).is_ok());
    }

    #[test]
    fn test_uuid_constants() {
        assert_eq!(
            GPS_SERVICE_UUID.to_string(),
            "00001ff8-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            GPS_MAIN_CHARACTERISTIC_UUID.to_string(),
            "00000003-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            ADVERTISED_SERVICE_UUID.to_string(),
            "4fafc201-1fb5-459e-8fcc-c5c9c331914b"
        );
    }
}
