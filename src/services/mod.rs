pub mod exporter;
pub mod recommendations;
pub mod registry;
pub mod scheduler;
pub mod trainer;

pub use exporter::FeatureExporter;
pub use recommendations::{
    Prediction, RecommendationQuery, RecommendationServer, Recommendations, ScoredMovie,
};
pub use registry::ModelRegistry;
pub use scheduler::{
    CycleOutcome, CycleState, RetrainScheduler, SchedulerHandle, SchedulerOptions,
    SchedulerStatus, Trigger,
};
pub use trainer::{ModelTrainer, TrainerOptions};
