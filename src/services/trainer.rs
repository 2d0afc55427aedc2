//! Biased matrix factorization fitted by stochastic gradient descent.
//!
//! For every observed rating the residual `e = r - r̂(u,i)` drives
//!
//! ```text
//! b_u += η (e - λ b_u)
//! b_i += η (e - λ b_i)
//! p_u += η (e q_i - λ p_u)
//! q_i += η (e p_u - λ q_i)
//! ```
//!
//! over `epochs` freshly shuffled passes. Initialization and shuffling draw
//! from a single seeded ChaCha stream, so a given (dataset, hyperparameters,
//! seed) always produces the same artifact.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use crate::{
    error::TrainingFailure,
    models::{
        artifact::dot, Dataset, Hyperparameters, ModelArtifact, MovieId, TrainingStats, UserId,
    },
};

/// Options that shape a training run but are not model hyperparameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainerOptions {
    /// Standard deviation of the normal distribution latent factors start from
    pub init_std: f64,
    pub seed: u64,
    /// Number of trailing epochs the divergence guard compares across
    pub divergence_window: usize,
    /// Relative loss increase tolerated over that window
    pub divergence_tolerance: f64,
}

impl Default for TrainerOptions {
    fn default() -> Self {
        Self {
            init_std: 0.1,
            seed: 42,
            divergence_window: 3,
            divergence_tolerance: 0.01,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModelTrainer {
    options: TrainerOptions,
}

impl ModelTrainer {
    pub fn new(options: TrainerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &TrainerOptions {
        &self.options
    }

    /// Fits a model and stamps it with `version` and the dataset's snapshot time.
    pub fn train(
        &self,
        dataset: &Dataset,
        hyperparameters: &Hyperparameters,
        version: u64,
    ) -> Result<ModelArtifact, TrainingFailure> {
        hyperparameters.validate()?;
        let global_mean = dataset.global_mean().ok_or(TrainingFailure::EmptyDataset)?;

        let normal = Normal::new(0.0, self.options.init_std).map_err(|e| {
            TrainingFailure::InvalidHyperparameters(format!("init_std: {}", e))
        })?;
        let mut rng = ChaCha8Rng::seed_from_u64(self.options.seed);

        let index = DenseIndex::build(dataset);
        let mut params = Parameters::init(&index, hyperparameters.factors, &normal, &mut rng);

        let lr = hyperparameters.learning_rate;
        let reg = hyperparameters.regularization;
        let mut order: Vec<usize> = (0..index.samples.len()).collect();
        let mut losses = Vec::with_capacity(hyperparameters.epochs);

        for epoch in 1..=hyperparameters.epochs {
            order.shuffle(&mut rng);
            for &s in &order {
                params.step(index.samples[s], global_mean, lr, reg);
            }

            let loss = params.loss(&index.samples, global_mean, reg);
            if !loss.is_finite() {
                tracing::warn!(epoch, "Training produced a non-finite loss");
                return Err(TrainingFailure::NonFiniteParameters { epoch });
            }
            tracing::debug!(epoch, loss, "Epoch complete");
            losses.push(loss);
        }

        check_convergence(
            &losses,
            self.options.divergence_window,
            self.options.divergence_tolerance,
        )?;

        let rmse = params.rmse(&index.samples, global_mean);
        let artifact = params.into_artifact(
            &index,
            ArtifactMeta {
                version,
                global_mean,
                dataset,
                hyperparameters: *hyperparameters,
                seed: self.options.seed,
                losses,
                rmse,
            },
        );

        if !artifact.is_finite() {
            return Err(TrainingFailure::NonFiniteParameters {
                epoch: hyperparameters.epochs,
            });
        }

        tracing::info!(
            version,
            ratings = artifact.stats.ratings,
            users = artifact.stats.users,
            movies = artifact.stats.movies,
            rmse,
            "Model trained"
        );
        Ok(artifact)
    }

    /// Root-mean-square error of `artifact` over `dataset`
    pub fn evaluate(artifact: &ModelArtifact, dataset: &Dataset) -> Option<f64> {
        if dataset.is_empty() {
            return None;
        }
        let sse: f64 = dataset
            .observations
            .iter()
            .map(|o| {
                let e = o.value - artifact.predict(Some(o.user_id), o.movie_id);
                e * e
            })
            .sum();
        Some((sse / dataset.len() as f64).sqrt())
    }
}

/// Rejects a run whose loss rose by more than `tolerance` (relative) across
/// the last `window` epochs.
pub fn check_convergence(
    losses: &[f64],
    window: usize,
    tolerance: f64,
) -> Result<(), TrainingFailure> {
    if window == 0 || losses.len() <= window {
        return Ok(());
    }
    let to = losses[losses.len() - 1];
    let from = losses[losses.len() - 1 - window];
    if to > from * (1.0 + tolerance) {
        tracing::warn!(window, from, to, "Training loss diverged");
        return Err(TrainingFailure::Diverged { window, from, to });
    }
    Ok(())
}

/// Dense positions for the users and movies present in a dataset, assigned
/// in order of first appearance.
struct DenseIndex {
    users: Vec<UserId>,
    movies: Vec<MovieId>,
    samples: Vec<(usize, usize, f64)>,
}

impl DenseIndex {
    fn build(dataset: &Dataset) -> Self {
        let mut user_pos: HashMap<UserId, usize> = HashMap::new();
        let mut movie_pos: HashMap<MovieId, usize> = HashMap::new();
        let mut users = Vec::new();
        let mut movies = Vec::new();

        let samples = dataset
            .observations
            .iter()
            .map(|o| {
                let u = *user_pos.entry(o.user_id).or_insert_with(|| {
                    users.push(o.user_id);
                    users.len() - 1
                });
                let i = *movie_pos.entry(o.movie_id).or_insert_with(|| {
                    movies.push(o.movie_id);
                    movies.len() - 1
                });
                (u, i, o.value)
            })
            .collect();

        Self {
            users,
            movies,
            samples,
        }
    }
}

struct Parameters {
    user_bias: Vec<f64>,
    item_bias: Vec<f64>,
    user_factors: Vec<Vec<f64>>,
    item_factors: Vec<Vec<f64>>,
}

struct ArtifactMeta<'a> {
    version: u64,
    global_mean: f64,
    dataset: &'a Dataset,
    hyperparameters: Hyperparameters,
    seed: u64,
    losses: Vec<f64>,
    rmse: f64,
}

impl Parameters {
    fn init(
        index: &DenseIndex,
        factors: usize,
        normal: &Normal<f64>,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let mut draw = |n: usize| -> Vec<Vec<f64>> {
            (0..n)
                .map(|_| (0..factors).map(|_| normal.sample(rng)).collect())
                .collect()
        };
        let user_factors = draw(index.users.len());
        let item_factors = draw(index.movies.len());

        Self {
            user_bias: vec![0.0; index.users.len()],
            item_bias: vec![0.0; index.movies.len()],
            user_factors,
            item_factors,
        }
    }

    fn predict(&self, u: usize, i: usize, global_mean: f64) -> f64 {
        global_mean
            + self.user_bias[u]
            + self.item_bias[i]
            + dot(&self.user_factors[u], &self.item_factors[i])
    }

    fn step(&mut self, (u, i, r): (usize, usize, f64), global_mean: f64, lr: f64, reg: f64) {
        let e = r - self.predict(u, i, global_mean);

        self.user_bias[u] += lr * (e - reg * self.user_bias[u]);
        self.item_bias[i] += lr * (e - reg * self.item_bias[i]);

        let p = &mut self.user_factors[u];
        let q = &mut self.item_factors[i];
        for f in 0..p.len() {
            let (pf, qf) = (p[f], q[f]);
            p[f] += lr * (e * qf - reg * pf);
            q[f] += lr * (e * pf - reg * qf);
        }
    }

    /// `Σ (r - r̂)² + λ (‖p_u‖² + ‖q_i‖² + b_u² + b_i²)` over observed ratings
    fn loss(&self, samples: &[(usize, usize, f64)], global_mean: f64, reg: f64) -> f64 {
        samples
            .iter()
            .map(|&(u, i, r)| {
                let e = r - self.predict(u, i, global_mean);
                let norms = dot(&self.user_factors[u], &self.user_factors[u])
                    + dot(&self.item_factors[i], &self.item_factors[i])
                    + self.user_bias[u].powi(2)
                    + self.item_bias[i].powi(2);
                e * e + reg * norms
            })
            .sum()
    }

    fn rmse(&self, samples: &[(usize, usize, f64)], global_mean: f64) -> f64 {
        let sse: f64 = samples
            .iter()
            .map(|&(u, i, r)| (r - self.predict(u, i, global_mean)).powi(2))
            .sum();
        (sse / samples.len() as f64).sqrt()
    }

    fn into_artifact(self, index: &DenseIndex, meta: ArtifactMeta<'_>) -> ModelArtifact {
        let zip = |ids: &[i64], values: Vec<f64>| -> HashMap<i64, f64> {
            ids.iter().copied().zip(values).collect()
        };
        let zip_vec = |ids: &[i64], values: Vec<Vec<f64>>| -> HashMap<i64, Vec<f64>> {
            ids.iter().copied().zip(values).collect()
        };

        ModelArtifact {
            version: meta.version,
            trained_at: meta.dataset.taken_at,
            global_bias: meta.global_mean,
            user_bias: zip(&index.users, self.user_bias),
            item_bias: zip(&index.movies, self.item_bias),
            user_factors: zip_vec(&index.users, self.user_factors),
            item_factors: zip_vec(&index.movies, self.item_factors),
            hyperparameters: meta.hyperparameters,
            stats: TrainingStats {
                ratings: meta.dataset.len(),
                users: index.users.len(),
                movies: index.movies.len(),
                loss_history: meta.losses,
                rmse: Some(meta.rmse),
                seed: Some(meta.seed),
            },
        }
    }
}
