use crate::recommender::{
    clamp_top_k, write_csv, RecommendOptions, Recommendation, RecommendationEngine,
    RecommenderError, SortOrder,
};
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::signal;

/// Engine handle shared by handlers. An engine that failed to start is kept
/// as its error message so requests can report it.
#[derive(Clone)]
pub struct SharedState {
    engine: Result<Arc<RecommendationEngine>, String>,
    default_top_k: usize,
    default_min_score: f32,
}

impl SharedState {
    pub fn new(
        engine: Result<Arc<RecommendationEngine>, RecommenderError>,
        default_top_k: usize,
        default_min_score: f32,
    ) -> Self {
        Self {
            engine: engine.map_err(|e| e.to_string()),
            default_top_k,
            default_min_score,
        }
    }

    fn engine(&self) -> Result<Arc<RecommendationEngine>, HttpError> {
        self.engine
            .clone()
            .map_err(HttpError::Unavailable)
    }

    /// Embedding is CPU bound, keep it off the async workers.
    async fn recommend(
        &self,
        request: RecommendRequest,
    ) -> Result<Vec<Recommendation>, HttpError> {
        let engine = self.engine()?;
        let options = request.options(self);
        tokio::task::spawn_blocking(move || engine.recommend_with(&request.query, &options))
            .await
            .map_err(|e| HttpError::Engine(RecommenderError::Internal(e.to_string())))?
            .map_err(HttpError::from)
    }
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/recommend", post(recommend))
        .route("/api/recommend.csv", get(recommend_csv))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(Arc::new(state))
}

async fn start_app(state: SharedState, listen: String) -> anyhow::Result<()> {
    async fn shutdown_signal() {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                log::error!("failed to install Ctrl+C handler: {e}");
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => log::error!("failed to install signal handler: {e}"),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
        log::warn!("shutting down");
    }

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    log::info!("listening on {listen}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn start_daemon(state: SharedState, listen: String) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_app(state, listen))
}

#[derive(Debug)]
enum HttpError {
    Unavailable(String),
    Engine(RecommenderError),
}

impl From<RecommenderError> for HttpError {
    fn from(err: RecommenderError) -> Self {
        Self::Engine(err)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        match self {
            HttpError::Unavailable(reason) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": format!("recommendation engine unavailable: {reason}")})),
            ),
            HttpError::Engine(err) => {
                log::error!("{err:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": err.to_string()})),
                )
            }
        }
        .into_response()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecommendRequest {
    #[serde(default)]
    pub query: String,

    /// Size of the ranked set before filters. Negative values become 0.
    pub top_k: Option<i64>,

    pub min_score: Option<f32>,

    /// Keep only these test types
    #[serde(default)]
    pub types: Vec<String>,

    #[serde(default)]
    pub sort: SortOrder,
}

#[derive(Debug, Serialize)]
pub struct RecommendResponse {
    pub query: String,
    pub results: Vec<Recommendation>,
}

impl RecommendRequest {
    fn options(&self, state: &SharedState) -> RecommendOptions {
        RecommendOptions {
            top_k: self.top_k.map(clamp_top_k).unwrap_or(state.default_top_k),
            min_score: Some(self.min_score.unwrap_or(state.default_min_score)),
            types: self.types.clone(),
            sort: self.sort,
        }
    }
}

/// Query-string form of `RecommendRequest`; `types` is comma separated.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecommendParams {
    #[serde(default)]
    pub query: String,
    pub top_k: Option<i64>,
    pub min_score: Option<f32>,
    pub types: Option<String>,
    #[serde(default)]
    pub sort: SortOrder,
}

impl From<RecommendParams> for RecommendRequest {
    fn from(params: RecommendParams) -> Self {
        Self {
            query: params.query,
            top_k: params.top_k,
            min_score: params.min_score,
            types: params
                .types
                .map(|types| {
                    types
                        .split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            sort: params.sort,
        }
    }
}

async fn health(State(state): State<Arc<SharedState>>) -> impl IntoResponse {
    match &state.engine {
        Ok(engine) => {
            let rows = engine.cache_status().map(|s| s.rows).unwrap_or_default();
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "model": engine.model_name(),
                    "catalog_size": engine.catalog().len(),
                    "cached_rows": rows,
                })),
            )
        }
        Err(reason) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "unavailable", "error": reason})),
        ),
    }
}

async fn recommend(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<RecommendRequest>,
) -> Result<Json<RecommendResponse>, HttpError> {
    log::debug!("payload: {payload:?}");

    let query = payload.query.clone();
    let results = state.recommend(payload).await?;

    Ok(Json(RecommendResponse { query, results }))
}

async fn recommend_csv(
    State(state): State<Arc<SharedState>>,
    Query(params): Query<RecommendParams>,
) -> Result<impl IntoResponse, HttpError> {
    log::debug!("params: {params:?}");

    let results = state.recommend(RecommendRequest::from(params)).await?;

    let mut body = Vec::new();
    write_csv(&mut body, &results)
        .map_err(|e| HttpError::Engine(RecommenderError::Internal(e.to_string())))?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"assessment_recommendations.csv\"",
            ),
        ],
        body,
    ))
}
