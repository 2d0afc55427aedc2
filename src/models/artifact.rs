use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Dataset, MovieId, UserId};
use crate::error::TrainingFailure;

/// Shrinkage applied to item biases in the popularity bootstrap
const POPULARITY_DAMPING: f64 = 25.0;

/// Matrix factorization hyperparameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    /// Latent dimension K
    pub factors: usize,
    pub learning_rate: f64,
    pub regularization: f64,
    pub epochs: usize,
}

impl Hyperparameters {
    pub fn validate(&self) -> Result<(), TrainingFailure> {
        let invalid = |msg: &str| Err(TrainingFailure::InvalidHyperparameters(msg.to_string()));

        if self.factors == 0 {
            return invalid("factors must be at least 1");
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return invalid("learning_rate must be a positive finite number");
        }
        if !self.regularization.is_finite() || self.regularization < 0.0 {
            return invalid("regularization must be a non-negative finite number");
        }
        if self.epochs == 0 {
            return invalid("epochs must be at least 1");
        }
        Ok(())
    }
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            factors: 50,
            learning_rate: 0.005,
            regularization: 0.02,
            epochs: 20,
        }
    }
}

/// Diagnostics recorded alongside a fitted model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingStats {
    pub ratings: usize,
    pub users: usize,
    pub movies: usize,
    /// Regularized training objective after each epoch
    pub loss_history: Vec<f64>,
    /// RMSE of the fitted model over its own training data
    pub rmse: Option<f64>,
    pub seed: Option<u64>,
}

impl TrainingStats {
    pub fn final_loss(&self) -> Option<f64> {
        self.loss_history.last().copied()
    }
}

/// An immutable, fully-constructed biased matrix factorization model.
///
/// Predictions follow `r̂(u,i) = μ + b_u + b_i + q_i · p_u`. Users or movies the
/// model has never seen contribute zero bias and a zero factor vector, so a
/// completely unknown pair scores `μ`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: u64,
    pub trained_at: DateTime<Utc>,
    pub global_bias: f64,
    pub user_bias: HashMap<UserId, f64>,
    pub item_bias: HashMap<MovieId, f64>,
    pub user_factors: HashMap<UserId, Vec<f64>>,
    pub item_factors: HashMap<MovieId, Vec<f64>>,
    pub hyperparameters: Hyperparameters,
    #[serde(default)]
    pub stats: TrainingStats,
}

impl ModelArtifact {
    /// The version-0 artifact served before anything was ever published. Every
    /// movie scores 0 so rankings fall back to ascending `movie_id`.
    pub fn empty() -> Self {
        Self {
            version: 0,
            trained_at: DateTime::<Utc>::UNIX_EPOCH,
            global_bias: 0.0,
            user_bias: HashMap::new(),
            item_bias: HashMap::new(),
            user_factors: HashMap::new(),
            item_factors: HashMap::new(),
            hyperparameters: Hyperparameters::default(),
            stats: TrainingStats::default(),
        }
    }

    /// A version-0 popularity model: global mean plus damped per-movie bias,
    /// no user terms and no latent factors.
    pub fn popularity(dataset: &Dataset) -> Self {
        let Some(mean) = dataset.global_mean() else {
            return Self::empty();
        };

        let mut sums: HashMap<MovieId, (f64, usize)> = HashMap::new();
        for obs in &dataset.observations {
            let entry = sums.entry(obs.movie_id).or_insert((0.0, 0));
            entry.0 += obs.value - mean;
            entry.1 += 1;
        }

        let item_bias: HashMap<MovieId, f64> = sums
            .into_iter()
            .map(|(movie_id, (sum, n))| (movie_id, sum / (n as f64 + POPULARITY_DAMPING)))
            .collect();

        Self {
            version: 0,
            trained_at: dataset.taken_at,
            global_bias: mean,
            stats: TrainingStats {
                ratings: dataset.len(),
                movies: item_bias.len(),
                ..TrainingStats::default()
            },
            item_bias,
            ..Self::empty()
        }
    }

    /// Bootstrap artifacts carry no latent factors and are never published
    pub fn is_bootstrap(&self) -> bool {
        self.user_factors.is_empty() && self.item_factors.is_empty()
    }

    pub fn knows_user(&self, user_id: UserId) -> bool {
        self.user_bias.contains_key(&user_id) || self.user_factors.contains_key(&user_id)
    }

    pub fn knows_movie(&self, movie_id: MovieId) -> bool {
        self.item_bias.contains_key(&movie_id) || self.item_factors.contains_key(&movie_id)
    }

    /// Raw `r̂(u,i)`. `user_id = None` yields the population baseline `μ + b_i`.
    pub fn predict(&self, user_id: Option<UserId>, movie_id: MovieId) -> f64 {
        let item_bias = self.item_bias.get(&movie_id).copied().unwrap_or(0.0);
        let Some(user_id) = user_id else {
            return self.global_bias + item_bias;
        };

        let user_bias = self.user_bias.get(&user_id).copied().unwrap_or(0.0);
        let interaction = match (
            self.user_factors.get(&user_id),
            self.item_factors.get(&movie_id),
        ) {
            (Some(p), Some(q)) => dot(p, q),
            _ => 0.0,
        };

        self.global_bias + user_bias + item_bias + interaction
    }

    /// Structural sanity required before an artifact may become active
    pub fn check_structure(&self) -> Result<(), String> {
        if self.user_factors.is_empty() || self.item_factors.is_empty() {
            return Err("factor maps must not be empty".to_string());
        }

        let k = self.hyperparameters.factors;
        let wrong_len = self
            .user_factors
            .values()
            .chain(self.item_factors.values())
            .any(|v| v.len() != k);
        if wrong_len {
            return Err(format!("every factor vector must have length {}", k));
        }

        if !self.is_finite() {
            return Err("artifact contains non-finite parameters".to_string());
        }

        Ok(())
    }

    pub fn is_finite(&self) -> bool {
        self.global_bias.is_finite()
            && self.user_bias.values().all(|b| b.is_finite())
            && self.item_bias.values().all(|b| b.is_finite())
            && self
                .user_factors
                .values()
                .chain(self.item_factors.values())
                .all(|v| v.iter().all(|x| x.is_finite()))
    }

    pub fn summary(&self) -> ModelSummary {
        ModelSummary {
            version: self.version,
            trained_at: self.trained_at,
            bootstrap: self.is_bootstrap(),
            global_bias: self.global_bias,
            hyperparameters: self.hyperparameters,
            ratings: self.stats.ratings,
            users: self.stats.users,
            movies: self.stats.movies,
            final_loss: self.stats.final_loss(),
            rmse: self.stats.rmse,
        }
    }
}

/// Metadata view of an artifact, without the parameter maps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub version: u64,
    pub trained_at: DateTime<Utc>,
    pub bootstrap: bool,
    pub global_bias: f64,
    pub hyperparameters: Hyperparameters,
    pub ratings: usize,
    pub users: usize,
    pub movies: usize,
    pub final_loss: Option<f64>,
    pub rmse: Option<f64>,
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_model() -> ModelArtifact {
        ModelArtifact {
            version: 3,
            global_bias: 3.5,
            user_bias: HashMap::from([(1, 0.5)]),
            item_bias: HashMap::from([(10, -0.25)]),
            user_factors: HashMap::from([(1, vec![1.0, 2.0])]),
            item_factors: HashMap::from([(10, vec![0.5, 0.25])]),
            hyperparameters: Hyperparameters {
                factors: 2,
                ..Hyperparameters::default()
            },
            ..ModelArtifact::empty()
        }
    }

    #[test]
    fn test_predict_known_pair() {
        let model = tiny_model();
        // 3.5 + 0.5 - 0.25 + (0.5 + 0.5)
        assert!((model.predict(Some(1), 10) - 4.75).abs() < 1e-12);
    }

    #[test]
    fn test_predict_unknown_user_reduces_to_item_baseline() {
        let model = tiny_model();
        assert!((model.predict(Some(99), 10) - 3.25).abs() < 1e-12);
        assert_eq!(model.predict(Some(99), 10), model.predict(None, 10));
    }

    #[test]
    fn test_predict_unknown_pair_is_global_mean() {
        let model = tiny_model();
        assert_eq!(model.predict(Some(99), 999), 3.5);
    }

    #[test]
    fn test_check_structure() {
        assert!(tiny_model().check_structure().is_ok());
        assert!(ModelArtifact::empty().check_structure().is_err());

        let mut bad_len = tiny_model();
        bad_len.item_factors.insert(11, vec![1.0]);
        assert!(bad_len.check_structure().is_err());

        let mut nan = tiny_model();
        nan.user_bias.insert(2, f64::NAN);
        assert!(nan.check_structure().is_err());
    }

    #[test]
    fn test_popularity_bootstrap() {
        let dataset = Dataset::from_triples(
            Utc::now(),
            &[(1, 10, 5), (2, 10, 5), (1, 11, 1), (3, 12, 3)],
        );
        let model = ModelArtifact::popularity(&dataset);
        assert_eq!(model.version, 0);
        assert!(model.is_bootstrap());
        assert!((model.global_bias - 3.5).abs() < 1e-12);
        assert!(model.predict(None, 10) > model.predict(None, 12));
        assert!(model.predict(None, 12) > model.predict(None, 11));
    }

    #[test]
    fn test_popularity_of_empty_dataset_is_empty_artifact() {
        let dataset = Dataset::new(Utc::now(), vec![]);
        assert_eq!(ModelArtifact::popularity(&dataset), ModelArtifact::empty());
    }

    #[test]
    fn test_hyperparameter_validation() {
        assert!(Hyperparameters::default().validate().is_ok());
        let bad = Hyperparameters {
            learning_rate: f64::NAN,
            ..Hyperparameters::default()
        };
        assert!(bad.validate().is_err());
        let bad = Hyperparameters {
            factors: 0,
            ..Hyperparameters::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_artifact_json_keys_round_trip() {
        let model = tiny_model();
        let json = serde_json::to_string(&model).unwrap();
        let back: ModelArtifact = serde_json::from_str(&json).unwrap();
        assert_eq!(back, model);
    }
}
