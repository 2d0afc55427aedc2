use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use movie_rec_api::{
    config::Config,
    db::{self, Cache, InMemoryRatingStore, ModelFileStore, PgRatingStore, RatingStore},
    models::{ModelArtifact, MovieCatalog},
    routes::{create_router, AppState},
    services::{
        exporter::build_dataset, FeatureExporter, ModelRegistry, ModelTrainer,
        RecommendationServer, RetrainScheduler,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("movie_rec_api=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    // Ratings and catalog
    let (ratings, movies) = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url).await?;
            let movies = db::movies::load_from_postgres(&pool).await?;
            let store: Arc<dyn RatingStore> = Arc::new(PgRatingStore::new(pool));
            (store, movies)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, ratings are kept in memory only");
            let movies = match &config.catalog_path {
                Some(path) => db::movies::load_from_file(path).await?,
                None => Vec::new(),
            };
            let store: Arc<dyn RatingStore> = Arc::new(InMemoryRatingStore::new());
            (store, movies)
        }
    };
    let catalog = Arc::new(MovieCatalog::new(movies));
    tracing::info!(movies = catalog.len(), "Movie catalog loaded");

    // Model registry
    let files = ModelFileStore::open(&config.model_dir).await?;
    let registry = match files.restore().await? {
        Some((active, previous)) => {
            tracing::info!(
                version = active.version,
                previous = ?previous.as_ref().map(|p| p.version),
                "Restored persisted models"
            );
            ModelRegistry::restored(active, previous)
        }
        None => ModelRegistry::new(bootstrap_model(ratings.as_ref()).await),
    };
    let registry = Arc::new(registry.attach_files(files).await?);

    // Optional recommendation cache
    let mut cache_writer = None;
    let mut recommender = RecommendationServer::new(
        registry.clone(),
        ratings.clone(),
        catalog.clone(),
        config.default_top_n,
    );
    if let Some(url) = &config.redis_url {
        let client = db::create_redis_client(url).context("Failed to create Redis client")?;
        let (cache, writer) = Cache::new(client).await;
        recommender = recommender.with_cache(cache, config.cache_ttl_secs);
        cache_writer = Some(writer);
        tracing::info!("Recommendation cache enabled");
    }

    // Retraining
    let scheduler = Arc::new(RetrainScheduler::new(
        FeatureExporter::new(ratings.clone()),
        ModelTrainer::new(config.trainer_options()),
        config.hyperparameters(),
        registry.clone(),
        config.scheduler_options(),
    ));
    let scheduler_handle = Arc::clone(&scheduler).spawn();

    let state = Arc::new(AppState {
        ratings,
        catalog,
        registry,
        recommender: Arc::new(recommender),
        scheduler,
    });
    let app = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Server running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler_handle.shutdown().await;
    if let Some(writer) = cache_writer {
        writer.shutdown().await;
    }
    Ok(())
}

/// Popularity model built from the current ratings, or the empty model when
/// the store cannot be read
async fn bootstrap_model(ratings: &dyn RatingStore) -> ModelArtifact {
    match ratings.export_snapshot().await {
        Ok(snapshot) => {
            let model = ModelArtifact::popularity(&build_dataset(snapshot));
            tracing::info!(movies = model.item_bias.len(), "Serving popularity bootstrap model");
            model
        }
        Err(e) => {
            tracing::warn!(error = %e, "Could not read ratings, serving empty bootstrap model");
            ModelArtifact::empty()
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
