//! Type definitions for raw observations and prediction records

pub mod observation;
pub mod prediction;

pub use observation::{RawBikeObservation, RawWeatherObservation};
pub use prediction::{Prediction, PredictionRecord};
