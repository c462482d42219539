//! Reading Validator
//!
//! Last-line sanity filter against garbled frames. This is not a GNSS
//! quality filter: a reading with zero satellites still passes.

use crate::domain::error::ValidationError;
use crate::domain::models::Reading;

const LATITUDE_RANGE: (f64, f64) = (-90.0, 90.0);
const LONGITUDE_RANGE: (f64, f64) = (-180.0, 180.0);

/// Normalise a decoded reading and check its coordinates.
///
/// Non-finite numeric fields become zero before the range checks, so an
/// absent value never travels further as something distinct from 0.
pub fn validate(mut reading: Reading) -> Result<Reading, ValidationError> {
    for value in [
        &mut reading.latitude,
        &mut reading.longitude,
        &mut reading.altitude,
        &mut reading.speed,
        &mut reading.course,
        &mut reading.accuracy,
    ] {
        if !value.is_finite() {
            *value = 0.0;
        }
    }

    check_range("latitude", reading.latitude, LATITUDE_RANGE)?;
    check_range("longitude", reading.longitude, LONGITUDE_RANGE)?;

    Ok(reading)
}

fn check_range(field: &'static str, value: f64, (min, max): (f64, f64)) -> Result<(), ValidationError> {
    if value < min || value > max {
        return Err(ValidationError::OutOfRange { field, value });
    }
    Ok(())
}
