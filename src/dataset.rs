//! Training frame construction.
//!
//! Bike and weather observations are sampled on independent cadences, so they
//! are joined as-of: each bike snapshot takes the latest weather observation
//! at or before it, provided the gap is within the tolerance. Misses are
//! zero-filled.

use crate::error::PipelineError;
use crate::feature_extractor::{
    extract_bike_features, extract_weather_features, BikeFeatures, FeatureVector, FEATURE_NAMES,
    WeatherFeatures,
};
use crate::types::observation::{RawBikeObservation, RawWeatherObservation};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use statrs::distribution::Normal;
use tracing::{debug, warn};

/// Default as-of join tolerance
pub const DEFAULT_JOIN_TOLERANCE_MINS: i64 = 30;

/// Feature rows ready for labelling, in time order when built from observations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingFrame {
    rows: Vec<FeatureVector>,
}

impl TrainingFrame {
    pub fn new(rows: Vec<FeatureVector>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[FeatureVector] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// `free_ratio` column, the signal every label rule thresholds.
    pub fn free_ratios(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.free_ratio).collect()
    }

    /// Row-major matrix in [`FEATURE_NAMES`] order.
    pub fn matrix(&self) -> Vec<Vec<f64>> {
        self.rows.iter().map(|r| r.values().to_vec()).collect()
    }

    pub fn feature_names(&self) -> Vec<String> {
        FEATURE_NAMES.iter().map(|n| n.to_string()).collect()
    }
}

/// A feature partial tagged with its observation time.
#[derive(Debug, Clone, Copy)]
struct Timed<T> {
    at: DateTime<Utc>,
    features: T,
}

/// Join bike and weather observations into a training frame.
///
/// Inputs may arrive in any order. Observations whose payload is not a JSON
/// mapping are skipped with a warning.
pub fn build_training_frame(
    bikes: &[RawBikeObservation],
    weather: &[RawWeatherObservation],
    tolerance: Duration,
) -> TrainingFrame {
    let bikes = sorted_features(
        bikes.iter().map(|o| (o.ingested_at, &o.payload)),
        extract_bike_features,
        "bikes",
    );
    let weather = sorted_features(
        weather.iter().map(|o| (o.ingested_at, &o.payload)),
        extract_weather_features,
        "weather",
    );

    let joined = join_asof(&bikes, &weather, tolerance);
    debug!(
        bikes = bikes.len(),
        weather = weather.len(),
        rows = joined.len(),
        "Built training frame"
    );
    TrainingFrame::new(joined)
}

/// Extract and sort ascending by time.
///
/// Ties on time are broken by the payload text so the result does not depend
/// on input order.
fn sorted_features<'a, T, I, F>(observations: I, extract: F, stream: &str) -> Vec<Timed<T>>
where
    I: Iterator<Item = (DateTime<Utc>, &'a serde_json::Value)>,
    F: Fn(&serde_json::Value) -> Result<T, PipelineError>,
{
    let mut keyed: Vec<(DateTime<Utc>, String, T)> = Vec::new();
    let mut skipped = 0usize;

    for (at, payload) in observations {
        match extract(payload) {
            Ok(features) => keyed.push((at, payload.to_string(), features)),
            Err(e) => {
                skipped += 1;
                debug!(stream, error = %e, "Skipping observation");
            }
        }
    }

    if skipped > 0 {
        warn!(stream, skipped, "Skipped observations with malformed payloads");
    }

    keyed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    keyed
        .into_iter()
        .map(|(at, _, features)| Timed { at, features })
        .collect()
}

/// Backward as-of join over two time-sorted streams.
fn join_asof(
    bikes: &[Timed<BikeFeatures>],
    weather: &[Timed<WeatherFeatures>],
    tolerance: Duration,
) -> Vec<FeatureVector> {
    let mut rows = Vec::with_capacity(bikes.len());
    let mut next = 0usize;
    let mut latest: Option<&Timed<WeatherFeatures>> = None;

    for bike in bikes {
        while next < weather.len() && weather[next].at <= bike.at {
            latest = Some(&weather[next]);
            next += 1;
        }

        let matched = latest
            .filter(|w| bike.at - w.at <= tolerance)
            .map(|w| w.features)
            .unwrap_or_default();

        rows.push(FeatureVector::from_parts(bike.features, matched));
    }

    rows
}

/// Generate a reproducible frame for CI and local runs without a store.
///
/// Half the rows draw `free_ratio` around 0.08 and half around 0.65, so the
/// fixed synthetic label rule yields roughly balanced classes.
pub fn generate_synthetic_frame(n: usize, seed: u64) -> TrainingFrame {
    let mut rng = StdRng::seed_from_u64(seed);
    let low = n / 2;

    let low_mode = normal(0.08, 0.03);
    let high_mode = normal(0.65, 0.10);
    let temperature = normal(15.0, 7.0);
    let rain = normal(0.5, 1.0);
    let wind = normal(10.0, 4.0);

    let rows = (0..n)
        .map(|i| {
            let mode = if i < low { &low_mode } else { &high_mode };
            let target_ratio = rng.sample(mode).clamp(0.0, 1.0);

            let total_slots = f64::from(rng.gen_range(20u32..80));
            let free_bikes = (target_ratio * total_slots).round().clamp(0.0, total_slots);
            let empty_slots = total_slots - free_bikes;
            let stations_count = f64::from(rng.gen_range(10u32..200));

            let weather = WeatherFeatures {
                temp_2m: rng.sample(&temperature),
                precipitation: rng.sample(&rain).max(0.0),
                wind_speed_10m: rng.sample(&wind).max(0.0),
            };

            FeatureVector::from_parts(
                BikeFeatures::from_counts(stations_count, free_bikes, empty_slots),
                weather,
            )
        })
        .collect();

    TrainingFrame::new(rows)
}

fn normal(mean: f64, std_dev: f64) -> Normal {
    Normal::new(mean, std_dev).expect("constant distribution parameters are valid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    fn weather_part(row: &FeatureVector) -> WeatherFeatures {
        WeatherFeatures {
            temp_2m: row.temp_2m,
            precipitation: row.precipitation,
            wind_speed_10m: row.wind_speed_10m,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn bike(mins: i64, free: u32, empty: u32) -> RawBikeObservation {
        RawBikeObservation::new(
            "net",
            t0() + Duration::minutes(mins),
            json!({"network": {"stations": [{"free_bikes": free, "empty_slots": empty}]}}),
        )
    }

    fn weather(mins: i64, temp: f64) -> RawWeatherObservation {
        RawWeatherObservation::new(
            45.0,
            7.0,
            t0() + Duration::minutes(mins),
            json!({"current": {"temperature_2m": temp, "precipitation": 0.1, "wind_speed_10m": 3.0}}),
        )
    }

    fn tolerance() -> Duration {
        Duration::minutes(DEFAULT_JOIN_TOLERANCE_MINS)
    }

    #[test]
    fn test_join_takes_latest_preceding_weather() {
        let bikes = vec![bike(10, 1, 9), bike(40, 5, 5)];
        let weather = vec![weather(0, 10.0), weather(5, 11.0), weather(35, 12.0), weather(41, 99.0)];

        let frame = build_training_frame(&bikes, &weather, tolerance());
        let rows = frame.rows();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].temp_2m, 11.0);
        assert_eq!(rows[1].temp_2m, 12.0);
    }

    #[test]
    fn test_join_never_uses_future_weather() {
        let frame = build_training_frame(&[bike(0, 1, 1)], &[weather(1, 20.0)], tolerance());
        assert_eq!(weather_part(&frame.rows()[0]), WeatherFeatures::default());
    }

    #[test]
    fn test_join_zero_fills_beyond_tolerance() {
        let frame = build_training_frame(
            &[bike(31, 1, 1), bike(60, 1, 1)],
            &[weather(0, 20.0), weather(30, 21.0)],
            tolerance(),
        );
        // 31 - 30 = 1 minute: matched
        assert_eq!(frame.rows()[0].temp_2m, 21.0);
        // 60 - 30 = exactly the tolerance: still matched
        assert_eq!(frame.rows()[1].temp_2m, 21.0);

        let frame = build_training_frame(&[bike(61, 1, 1)], &[weather(30, 21.0)], tolerance());
        assert_eq!(weather_part(&frame.rows()[0]), WeatherFeatures::default());
    }

    #[test]
    fn test_output_is_sorted_by_bike_time() {
        let frame = build_training_frame(&[bike(20, 9, 1), bike(10, 1, 9)], &[], tolerance());
        let ratios = frame.free_ratios();
        assert!((ratios[0] - 0.1).abs() < 1e-12);
        assert!((ratios[1] - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_malformed_payloads_are_skipped() {
        let mut bad = bike(5, 1, 1);
        bad.payload = json!([1, 2, 3]);
        let frame = build_training_frame(&[bike(0, 1, 1), bad], &[], tolerance());
        assert_eq!(frame.len(), 1);
    }

    #[test]
    fn test_synthetic_is_deterministic() {
        let a = generate_synthetic_frame(200, 7);
        let b = generate_synthetic_frame(200, 7);
        assert_eq!(a, b);

        let c = generate_synthetic_frame(200, 8);
        assert_ne!(a, c);
    }

    #[test]
    fn test_synthetic_rows_are_roughly_balanced() {
        let frame = generate_synthetic_frame(400, 42);
        assert_eq!(frame.len(), 400);

        let low = frame.free_ratios().iter().filter(|r| **r < 0.30).count();
        assert!((160..=240).contains(&low), "low-ratio rows: {low}");

        for row in frame.rows() {
            assert_eq!(row.total_slots, row.free_bikes + row.empty_slots);
            assert!((0.0..=1.0).contains(&row.free_ratio));
            assert!(row.precipitation >= 0.0 && row.wind_speed_10m >= 0.0);
        }
    }

    fn arb_bikes() -> impl Strategy<Value = Vec<RawBikeObservation>> {
        proptest::collection::vec((0i64..240, 0u32..30, 0u32..30), 0..25)
            .prop_map(|v| v.into_iter().map(|(m, f, e)| bike(m, f, e)).collect())
    }

    fn arb_weather() -> impl Strategy<Value = Vec<RawWeatherObservation>> {
        proptest::collection::vec((0i64..240, -10i32..35), 0..25)
            .prop_map(|v| v.into_iter().map(|(m, t)| weather(m, f64::from(t))).collect())
    }

    proptest! {
        #[test]
        fn prop_join_is_order_independent(bikes in arb_bikes(), weather in arb_weather()) {
            let expected = build_training_frame(&bikes, &weather, tolerance());

            let mut rev_bikes = bikes.clone();
            rev_bikes.reverse();
            let mut sorted_weather = weather.clone();
            sorted_weather.sort_by_key(|w| w.ingested_at);

            prop_assert_eq!(&build_training_frame(&rev_bikes, &sorted_weather, tolerance()), &expected);
            prop_assert_eq!(&build_training_frame(&bikes, &weather, tolerance()), &expected);
        }

        #[test]
        fn prop_matched_weather_is_within_tolerance(bikes in arb_bikes(), weather in arb_weather()) {
            let frame = build_training_frame(&bikes, &weather, tolerance());
            let mut sorted_bikes = bikes.clone();
            sorted_bikes.sort_by(|a, b| {
                a.ingested_at.cmp(&b.ingested_at)
                    .then_with(|| a.payload.to_string().cmp(&b.payload.to_string()))
            });

            for (row, obs) in frame.rows().iter().zip(&sorted_bikes) {
                if weather_part(row) == WeatherFeatures::default() {
                    continue;
                }
                let any_valid = weather.iter().any(|w| {
                    w.ingested_at <= obs.ingested_at
                        && obs.ingested_at - w.ingested_at <= tolerance()
                        && w.payload["current"]["temperature_2m"] == Value::from(row.temp_2m)
                });
                prop_assert!(any_valid);
            }
        }
    }
}
