//! Feature Builder (C1): pure, stateless derivation of the 8-element feature
//! vector from a prediction request. No I/O, no allocation that can fail.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::core::config::BoundingBox;
use crate::core::errors::{PredictorError, Result, ValidationKind};

/// Earth radius used by the haversine distance, in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;
/// Distances beyond this are treated as a validation failure, not clamped.
const MAX_DISTANCE_KM: f64 = 200.0;

/// Hours (0-23) considered rush hour for the `is_rush_hour` feature.
const RUSH_HOURS: [u32; 6] = [7, 8, 9, 17, 18, 19];

/// Transient input to [`build`]. Mirrors the JSON body of `POST /api/v1/predict`.
#[derive(Debug, Clone, Deserialize)]
pub struct PredictionRequest {
    /// Pickup latitude, degrees.
    pub pickup_latitude: f64,
    /// Pickup longitude, degrees.
    pub pickup_longitude: f64,
    /// Dropoff latitude, degrees.
    pub dropoff_latitude: f64,
    /// Dropoff longitude, degrees.
    pub dropoff_longitude: f64,
    /// Number of passengers, expected in [1,6].
    pub passenger_count: i64,
    /// Vendor identifier from a small enumerated set.
    pub vendor_id: i64,
    /// ISO-8601 pickup timestamp, local time (naive) or carrying its own offset.
    pub pickup_datetime: String,
}

/// The ordered 8-tuple derived from a [`PredictionRequest`]. Ordering is fixed
/// and is part of the external contract with trained models.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureVector {
    /// Great-circle distance between pickup and dropoff, kilometers, in [0,200].
    pub distance_km: f64,
    /// Passenger count, echoed from the request.
    pub passenger_count: i64,
    /// Vendor id, echoed from the request.
    pub vendor_id: i64,
    /// Hour of day in local time, [0,23].
    pub hour_of_day: u32,
    /// Day of week, Monday=0..Sunday=6.
    pub day_of_week: u32,
    /// Month, [1,12].
    pub month: u32,
    /// 1 if `day_of_week >= 5`, else 0.
    pub is_weekend: u8,
    /// 1 if `hour_of_day` is one of the rush-hour buckets, else 0.
    pub is_rush_hour: u8,
}

impl FeatureVector {
    /// The fixed ordering used when invoking a predictor, matching
    /// [`ModelArtifact`](crate::registry::ModelMetadata)'s `feature_order`.
    pub const ORDER: [&'static str; 8] = [
        "distance_km",
        "passenger_count",
        "vendor_id",
        "hour_of_day",
        "day_of_week",
        "month",
        "is_weekend",
        "is_rush_hour",
    ];

    /// Project the vector into the flat `[f64; 8]` shape a [`Predictor`](crate::predictor::Predictor) consumes.
    pub fn as_array(&self) -> [f64; 8] {
        [
            self.distance_km,
            self.passenger_count as f64,
            self.vendor_id as f64,
            f64::from(self.hour_of_day),
            f64::from(self.day_of_week),
            f64::from(self.month),
            f64::from(self.is_weekend),
            f64::from(self.is_rush_hour),
        ]
    }
}

/// Great-circle distance between two coordinates, in kilometers.
///
/// `Δφ = φ₂−φ₁`, `Δλ = λ₂−λ₁`; `a = sin²(Δφ/2) + cos(φ₁)·cos(φ₂)·sin²(Δλ/2)`;
/// distance = `2·R·asin(min(1, √a))` with `R` = 6371.0 km.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_phi = (lat2 - lat1).to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let a = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

fn validation_error(kind: ValidationKind, message: impl Into<String>) -> PredictorError {
    PredictorError::Validation {
        kind,
        message: message.into(),
    }
}

fn validate_coordinate(lat: f64, lon: f64, field: &str) -> Result<()> {
    if !lat.is_finite() || !lon.is_finite() {
        return Err(validation_error(
            ValidationKind::InvalidCoordinate,
            format!("{field}: non-finite coordinate"),
        ));
    }
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(validation_error(
            ValidationKind::InvalidCoordinate,
            format!("{field}: lat/lon out of valid range"),
        ));
    }
    Ok(())
}

/// Parse the pickup timestamp into a fixed-offset instant, honoring a
/// carried offset verbatim and applying `local_offset_minutes` only to naive
/// strings. See §4.1.
fn parse_pickup_datetime(
    raw: &str,
    local_offset_minutes: i32,
) -> Result<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt);
    }

    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .map_err(|e| {
            validation_error(
                ValidationKind::InvalidTimestamp,
                format!("could not parse {raw:?}: {e}"),
            )
        })?;

    let offset = FixedOffset::east_opt(local_offset_minutes * 60).ok_or_else(|| {
        PredictorError::config(format!(
            "local_utc_offset_minutes out of range: {local_offset_minutes}"
        ))
    })?;

    naive
        .and_local_timezone(offset)
        .single()
        .ok_or_else(|| validation_error(ValidationKind::InvalidTimestamp, "ambiguous local time"))
}

/// Derive a [`FeatureVector`] from `request`, or a [`ValidationKind`]-tagged
/// error describing why it was rejected. Pure: no I/O, no fallible allocation.
pub fn build(
    request: &PredictionRequest,
    bounding_box: &BoundingBox,
    local_offset_minutes: i32,
) -> Result<FeatureVector> {
    validate_coordinate(request.pickup_latitude, request.pickup_longitude, "pickup")?;
    validate_coordinate(
        request.dropoff_latitude,
        request.dropoff_longitude,
        "dropoff",
    )?;

    if !bounding_box.contains(request.pickup_latitude, request.pickup_longitude)
        || !bounding_box.contains(request.dropoff_latitude, request.dropoff_longitude)
    {
        return Err(validation_error(
            ValidationKind::OutsideBoundingBox,
            "pickup or dropoff coordinate outside configured bounding box",
        ));
    }

    if !(1..=6).contains(&request.passenger_count) {
        return Err(validation_error(
            ValidationKind::InvalidPassengerCount,
            format!("passenger_count must be in [1,6], got {}", request.passenger_count),
        ));
    }

    let pickup = parse_pickup_datetime(&request.pickup_datetime, local_offset_minutes)?;

    let distance_km = haversine_km(
        request.pickup_latitude,
        request.pickup_longitude,
        request.dropoff_latitude,
        request.dropoff_longitude,
    );
    if distance_km > MAX_DISTANCE_KM {
        return Err(validation_error(
            ValidationKind::DistanceExceedsLimit,
            format!("distance {distance_km:.3}km exceeds {MAX_DISTANCE_KM}km limit"),
        ));
    }
    let distance_km = distance_km.clamp(0.0, MAX_DISTANCE_KM);

    let hour_of_day = pickup.hour();
    // chrono's weekday() is Monday=0 via num_days_from_monday(), matching the spec.
    let day_of_week = pickup.weekday().num_days_from_monday();
    let month = pickup.month();
    let is_weekend = u8::from(day_of_week >= 5);
    let is_rush_hour = u8::from(RUSH_HOURS.contains(&hour_of_day));

    Ok(FeatureVector {
        distance_km,
        passenger_count: request.passenger_count,
        vendor_id: request.vendor_id,
        hour_of_day,
        day_of_week,
        month,
        is_weekend,
        is_rush_hour,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(
        pu_lat: f64,
        pu_lon: f64,
        do_lat: f64,
        do_lon: f64,
        passengers: i64,
        vendor: i64,
        pickup: &str,
    ) -> PredictionRequest {
        PredictionRequest {
            pickup_latitude: pu_lat,
            pickup_longitude: pu_lon,
            dropoff_latitude: do_lat,
            dropoff_longitude: do_lon,
            passenger_count: passengers,
            vendor_id: vendor,
            pickup_datetime: pickup.to_string(),
        }
    }

    #[test]
    fn haversine_is_symmetric() {
        let a = (40.7580, -73.9855);
        let b = (40.6413, -73.7781);
        let d1 = haversine_km(a.0, a.1, b.0, b.1);
        let d2 = haversine_km(b.0, b.1, a.0, a.1);
        assert!((d1 - d2).abs() < 1e-9);
    }

    #[test]
    fn scenario_1_short_manhattan_trip_rush_hour() {
        let req = request(
            40.7580,
            -73.9855,
            40.7614,
            -73.9776,
            1,
            1,
            "2024-03-14T17:30:00",
        );
        let fv = build(&req, &BoundingBox::default(), 0).unwrap();
        assert!((fv.distance_km - 0.77).abs() < 0.05, "{}", fv.distance_km);
        assert_eq!(fv.hour_of_day, 17);
        assert_eq!(fv.is_rush_hour, 1);
        assert_eq!(fv.is_weekend, 0);
    }

    #[test]
    fn scenario_2_airport_run_weekend_midday() {
        let req = request(
            40.7580,
            -73.9855,
            40.6413,
            -73.7781,
            2,
            2,
            "2024-03-16T13:00:00",
        );
        let fv = build(&req, &BoundingBox::default(), 0).unwrap();
        assert!((fv.distance_km - 21.8).abs() < 0.5, "{}", fv.distance_km);
        assert_eq!(fv.is_weekend, 1);
        assert_eq!(fv.is_rush_hour, 0);
    }

    #[test]
    fn scenario_3_out_of_bounds_coordinates() {
        let req = request(
            34.0522,
            -118.2437,
            40.7580,
            -73.9855,
            1,
            1,
            "2024-03-14T12:00:00",
        );
        let err = build(&req, &BoundingBox::default(), 0).unwrap_err();
        match err {
            PredictorError::Validation { kind, .. } => {
                assert_eq!(kind, ValidationKind::OutsideBoundingBox);
            }
            other => panic!("expected Validation error, got {other:?}"),
        }
    }

    #[test]
    fn invalid_passenger_count_rejected() {
        let req = request(
            40.7580,
            -73.9855,
            40.7614,
            -73.9776,
            0,
            1,
            "2024-03-14T12:00:00",
        );
        let err = build(&req, &BoundingBox::default(), 0).unwrap_err();
        assert!(matches!(
            err,
            PredictorError::Validation {
                kind: ValidationKind::InvalidPassengerCount,
                ..
            }
        ));
    }

    #[test]
    fn unparseable_timestamp_rejected() {
        let req = request(
            40.7580,
            -73.9855,
            40.7614,
            -73.9776,
            1,
            1,
            "not-a-timestamp",
        );
        let err = build(&req, &BoundingBox::default(), 0).unwrap_err();
        assert!(matches!(
            err,
            PredictorError::Validation {
                kind: ValidationKind::InvalidTimestamp,
                ..
            }
        ));
    }

    #[test]
    fn feature_vector_bounds_hold_for_all_hours_and_months() {
        for hour in 0..24 {
            let ts = format!("2024-06-10T{hour:02}:00:00");
            let req = request(40.75, -73.98, 40.76, -73.97, 1, 1, &ts);
            let fv = build(&req, &BoundingBox::default(), 0).unwrap();
            assert!(fv.hour_of_day <= 23);
            assert!(fv.day_of_week <= 6);
            assert!((1..=12).contains(&fv.month));
            assert!((0.0..=200.0).contains(&fv.distance_km));
        }
    }

    #[test]
    fn carried_offset_is_honored_verbatim() {
        let req = request(
            40.7580,
            -73.9855,
            40.7614,
            -73.9776,
            1,
            1,
            "2024-03-14T17:30:00-04:00",
        );
        // local_offset_minutes of 0 should be ignored since the string carries its own offset.
        let fv = build(&req, &BoundingBox::default(), 0).unwrap();
        assert_eq!(fv.hour_of_day, 17);
    }
}
