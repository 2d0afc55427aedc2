pub mod artifact;
pub mod dataset;
pub mod movie;
pub mod rating;

pub use artifact::{Hyperparameters, ModelArtifact, ModelSummary, TrainingStats};
pub use dataset::{Dataset, Observation};
pub use movie::{Movie, MovieCatalog};
pub use rating::{Rating, RatingRow, RatingSnapshot, RatingValue};

/// User identifier as issued by the external user directory
pub type UserId = i64;

/// Movie identifier as issued by the external movie catalog
pub type MovieId = i64;

/// Genre index (MovieLens genre numbering)
pub type GenreId = i32;
