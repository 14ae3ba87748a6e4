//! Model training, persistence and serving

pub mod artifacts;
pub mod evaluation;
pub mod inference;
pub mod loader;
pub mod pipeline;
pub mod trainer;

pub use inference::{ModelHandle, ModelStatus};
pub use loader::{LoadedModel, ModelLoader};
pub use pipeline::FittedPipeline;
pub use trainer::{train, TrainOptions, TrainingOutcome};
