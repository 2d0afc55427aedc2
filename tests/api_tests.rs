use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{json, Value};

use movie_rec_api::{
    db::{InMemoryRatingStore, RatingStore},
    models::{Hyperparameters, ModelArtifact, Movie, MovieCatalog},
    routes::{create_router, AppState},
    services::{
        CycleOutcome, FeatureExporter, ModelRegistry, ModelTrainer, RecommendationServer,
        RetrainScheduler, SchedulerOptions, TrainerOptions, Trigger,
    },
};

fn catalog() -> MovieCatalog {
    let movie = |movie_id: i64, title: &str, genre_ids: Vec<i32>| Movie {
        movie_id,
        title: title.to_string(),
        genre_ids,
        release_date: None,
        url: None,
        poster_url: None,
    };
    MovieCatalog::new([
        movie(10, "Heat", vec![1, 5]),
        movie(11, "Clueless", vec![4]),
        movie(12, "Alien", vec![1, 16]),
        movie(13, "Fargo", vec![5]),
        movie(14, "Babe", vec![4]),
    ])
}

fn create_test_server() -> (TestServer, Arc<AppState>) {
    let ratings: Arc<dyn RatingStore> = Arc::new(InMemoryRatingStore::new());
    let catalog = Arc::new(catalog());
    let registry = Arc::new(ModelRegistry::new(ModelArtifact::empty()));

    let recommender =
        RecommendationServer::new(registry.clone(), ratings.clone(), catalog.clone(), 10);
    let scheduler = RetrainScheduler::new(
        FeatureExporter::new(ratings.clone()),
        ModelTrainer::new(TrainerOptions {
            seed: 7,
            ..TrainerOptions::default()
        }),
        Hyperparameters {
            factors: 2,
            learning_rate: 0.01,
            regularization: 0.02,
            epochs: 50,
        },
        registry.clone(),
        SchedulerOptions::default(),
    );

    let state = Arc::new(AppState {
        ratings,
        catalog,
        registry,
        recommender: Arc::new(recommender),
        scheduler: Arc::new(scheduler),
    });
    let server = TestServer::new(create_router(state.clone())).unwrap();
    (server, state)
}

async fn rate(server: &TestServer, user_id: i64, movie_id: i64, rating: i64) {
    server
        .post("/ratings")
        .json(&json!({ "user_id": user_id, "movie_id": movie_id, "rating": rating }))
        .await
        .assert_status_ok();
}

fn movie_ids(body: &[Value]) -> Vec<i64> {
    body.iter().map(|m| m["movie_id"].as_i64().unwrap()).collect()
}

#[tokio::test]
async fn test_health_check() {
    let (server, _) = create_test_server();
    let response = server.get("/health").await;
    response.assert_status_ok();
    response.assert_json(&json!({ "status": "healthy" }));
}

#[tokio::test]
async fn test_response_carries_request_id() {
    let (server, _) = create_test_server();
    let response = server.get("/health").await;
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_post_rating_echoes_persisted_rating() {
    let (server, state) = create_test_server();

    let response = server
        .post("/ratings")
        .json(&json!({ "user_id": 1, "movie_id": 10, "rating": 4 }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["user_id"], 1);
    assert_eq!(body["movie_id"], 10);
    assert_eq!(body["rating"], 4);
    assert!(body["rated_at"].is_string());

    assert_eq!(state.scheduler.status().pending_ratings, 1);
}

#[tokio::test]
async fn test_post_rating_out_of_range_is_bad_request() {
    let (server, state) = create_test_server();

    for rating in [0, 6] {
        let response = server
            .post("/ratings")
            .json(&json!({ "user_id": 1, "movie_id": 10, "rating": rating }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }
    assert!(state.ratings.get_ratings_for_user(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_recommendations_before_training_rank_by_movie_id() {
    let (server, _) = create_test_server();
    rate(&server, 1, 10, 5).await;

    let response = server.get("/recommendations/1").await;
    response.assert_status_ok();
    assert_eq!(response.header("x-model-version"), "0");

    let body: Vec<Value> = response.json();
    assert_eq!(movie_ids(&body), vec![11, 12, 13, 14]);
    assert_eq!(body[0]["title"], "Clueless");
}

#[tokio::test]
async fn test_non_positive_top_n_is_bad_request() {
    let (server, _) = create_test_server();
    server
        .get("/recommendations/1")
        .add_query_param("top_n", 0)
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_end_to_end_train_and_recommend() {
    let (server, state) = create_test_server();
    rate(&server, 1, 10, 5).await;
    rate(&server, 1, 11, 1).await;
    rate(&server, 2, 10, 4).await;

    let outcome = state.scheduler.run_cycle(Trigger::Manual).await;
    assert!(matches!(outcome, CycleOutcome::Published(_)));
    let model = state.registry.active();
    assert_eq!(model.version, 1);
    assert!(model.is_finite());

    let response = server
        .get("/recommendations/1")
        .add_query_param("top_n", 5)
        .await;
    response.assert_status_ok();
    assert_eq!(response.header("x-model-version"), "1");
    let body: Vec<Value> = response.json();
    let ids = movie_ids(&body);
    assert!(!ids.contains(&10));
    assert!(!ids.contains(&11));
    assert_eq!(ids.len(), 3);

    // An unseen user is ranked purely by the item baseline
    let response = server
        .get("/recommendations/3")
        .add_query_param("top_n", 5)
        .await;
    let body: Vec<Value> = response.json();
    let mut expected: Vec<(f64, i64)> = [10, 11, 12, 13, 14]
        .into_iter()
        .map(|id| (model.predict(None, id), id))
        .collect();
    expected.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
    let expected: Vec<i64> = expected.into_iter().map(|(_, id)| id).collect();
    assert_eq!(movie_ids(&body), expected);
}

#[tokio::test]
async fn test_genre_recommendations_with_skip() {
    let (server, _) = create_test_server();

    let response = server
        .get("/recommendations/genre/5")
        .add_query_param("top_n", 1)
        .add_query_param("skip", 1)
        .await;
    response.assert_status_ok();
    let body: Vec<Value> = response.json();
    assert_eq!(movie_ids(&body), vec![13]);

    rate(&server, 9, 10, 3).await;
    let response = server
        .get("/recommendations/genre/5")
        .add_query_param("user_id", 9)
        .await;
    let body: Vec<Value> = response.json();
    assert_eq!(movie_ids(&body), vec![13]);
}

#[tokio::test]
async fn test_predict_reports_unknowns() {
    let (server, _) = create_test_server();
    let response = server
        .post("/predict")
        .json(&json!({ "user_id": 5, "movie_id": 10 }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["known_user"], false);
    assert_eq!(body["known_movie"], false);
    assert_eq!(body["model_version"], 0);
    // Empty model scores 0, clipped to the bottom of the scale
    assert_eq!(body["predicted_score"], 1.0);
}

#[tokio::test]
async fn test_movies_lookup_and_listing() {
    let (server, _) = create_test_server();

    let response = server.get("/movies/12").await;
    response.assert_status_ok();
    let movie: Value = response.json();
    assert_eq!(movie["title"], "Alien");

    server
        .get("/movies/999")
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let response = server
        .get("/movies")
        .add_query_param("genre_id", 4)
        .await;
    let body: Vec<Value> = response.json();
    assert_eq!(movie_ids(&body), vec![11, 14]);

    let response = server
        .get("/movies")
        .add_query_param("skip", 1)
        .add_query_param("limit", 2)
        .await;
    let body: Vec<Value> = response.json();
    assert_eq!(movie_ids(&body), vec![11, 12]);
}

#[tokio::test]
async fn test_model_status_retrain_and_rollback() {
    let (server, state) = create_test_server();

    let response = server.get("/model").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["active"]["version"], 0);
    assert!(body["previous_version"].is_null());
    assert_eq!(body["scheduler"]["state"], "idle");

    server
        .post("/model/rollback")
        .await
        .assert_status(StatusCode::NOT_FOUND);

    server
        .post("/model/retrain")
        .await
        .assert_status(StatusCode::ACCEPTED);

    rate(&server, 1, 10, 5).await;
    rate(&server, 2, 11, 2).await;
    state.scheduler.run_cycle(Trigger::Manual).await;

    let body: Value = server.get("/model").await.json();
    assert_eq!(body["active"]["version"], 1);
    assert_eq!(body["previous_version"], 0);
    assert_eq!(body["scheduler"]["last_cycle"]["published_version"], 1);

    let response = server.post("/model/rollback").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["version"], 0);
    assert_eq!(state.registry.active().version, 0);
}

#[tokio::test]
async fn test_failed_cycle_keeps_serving() {
    let (server, state) = create_test_server();

    // Nothing rated yet, so training has no data
    let outcome = state.scheduler.run_cycle(Trigger::Manual).await;
    assert!(matches!(outcome, CycleOutcome::Failed { .. }));

    let response = server.get("/recommendations/1").await;
    response.assert_status_ok();
    let body: Vec<Value> = response.json();
    assert_eq!(body.len(), 5);
}
