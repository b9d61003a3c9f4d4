use crate::ingest::{IngestSnapshot, IngestionCoordinator};
use crate::rules::Label;
use crate::store::{FruitState, ReadingStore, StoreError, StoreStats, StoredReading};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

/// Shared state for the query API
pub struct QueryAppState {
    pub store: Arc<dyn ReadingStore>,
    pub coordinator: IngestionCoordinator,
    /// Upper bound for `limit` on history queries
    pub history_max_limit: usize,
}

/// Query parameters for latest readings
#[derive(Deserialize)]
pub struct LatestParams {
    pub fruit_id: Option<String>,
}

/// Query parameters for reading history
#[derive(Deserialize)]
pub struct HistoryParams {
    /// Restrict to one fruit
    pub fruit_id: Option<String>,
    /// Look-back window in hours (default: 24)
    pub hours: Option<u32>,
    /// Max readings to return (default: 100)
    pub limit: Option<usize>,
}

/// Fruit status as shown on the dashboard
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FruitResponse {
    pub fruit_id: String,
    pub fruit_type: String,
    pub current_label: Label,
    pub status_color: &'static str,
    pub last_seen: String,
}

impl From<FruitState> for FruitResponse {
    fn from(state: FruitState) -> Self {
        Self {
            status_color: state.last_label.color(),
            fruit_id: state.fruit_id,
            fruit_type: state.fruit_type,
            current_label: state.last_label,
            last_seen: state.last_seen_at.to_rfc3339(),
        }
    }
}

/// One stored reading with its classification
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingResponse {
    pub id: i64,
    pub reading_id: String,
    pub fruit_id: String,
    pub fruit_type: String,
    pub r: u8,
    pub g: u8,
    pub b: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    pub label: Label,
    pub confidence: f64,
    pub observed_at: String,
}

impl From<StoredReading> for ReadingResponse {
    fn from(stored: StoredReading) -> Self {
        let reading = &stored.reading;
        let channels = reading.channels();
        Self {
            id: stored.id,
            reading_id: reading.reading_id().to_string(),
            fruit_id: reading.fruit_id().to_string(),
            fruit_type: reading.fruit_type().to_string(),
            r: channels.r,
            g: channels.g,
            b: channels.b,
            temperature: reading.temperature(),
            humidity: reading.humidity(),
            label: stored.classification.label,
            confidence: stored.classification.confidence,
            observed_at: reading.observed_at().to_rfc3339(),
        }
    }
}

/// Store counts plus live pipeline counters
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    #[serde(flatten)]
    pub store: StoreStats,
    pub pipeline: IngestSnapshot,
    pub connected_viewers: usize,
    pub dropped_viewers: u64,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Create query API router
pub fn create_query_router(state: Arc<QueryAppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/fruits", get(list_fruits))
        .route("/api/fruits/:id", get(get_fruit))
        .route("/api/sensors/latest", get(latest_readings))
        .route("/api/sensors/history", get(reading_history))
        .route("/api/stats", get(stats))
        .with_state(state)
}

/// GET / - service banner
async fn index() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "SIGMA",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "fruits": "/api/fruits",
            "latest": "/api/sensors/latest",
            "history": "/api/sensors/history",
            "stats": "/api/stats",
            "websocket": "/ws",
        },
    }))
}

/// GET /api/fruits - every monitored fruit, ordered by id
async fn list_fruits(
    State(state): State<Arc<QueryAppState>>,
) -> Result<Json<Vec<FruitResponse>>, QueryError> {
    let fruits = run_store(&state, |store| store.fruits()).await?;
    Ok(Json(fruits.into_iter().map(FruitResponse::from).collect()))
}

/// GET /api/fruits/:id - one fruit's current status
async fn get_fruit(
    State(state): State<Arc<QueryAppState>>,
    Path(id): Path<String>,
) -> Result<Json<FruitResponse>, QueryError> {
    let fruit = run_store(&state, move |store| store.fruit(&id))
        .await?
        .ok_or(QueryError::NotFound)?;

    Ok(Json(fruit.into()))
}

/// GET /api/sensors/latest?fruit_id=X
///
/// Most recent reading per fruit, or only the given fruit's.
async fn latest_readings(
    State(state): State<Arc<QueryAppState>>,
    Query(params): Query<LatestParams>,
) -> Result<Json<Vec<ReadingResponse>>, QueryError> {
    let readings = run_store(&state, move |store| store.latest(params.fruit_id.as_deref())).await?;
    Ok(Json(readings.into_iter().map(ReadingResponse::from).collect()))
}

/// GET /api/sensors/history?fruit_id=X&hours=H&limit=N
///
/// Newest first. `limit` is clamped to 1..=history_max_limit.
async fn reading_history(
    State(state): State<Arc<QueryAppState>>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<ReadingResponse>>, QueryError> {
    let hours = params.hours.unwrap_or(24);
    let limit = params
        .limit
        .unwrap_or(100)
        .clamp(1, state.history_max_limit.max(1));
    let since = chrono::Duration::hours(i64::from(hours));

    let readings = run_store(&state, move |store| {
        store.history(params.fruit_id.as_deref(), since, limit)
    })
    .await?;

    Ok(Json(readings.into_iter().map(ReadingResponse::from).collect()))
}

/// GET /api/stats
async fn stats(State(state): State<Arc<QueryAppState>>) -> Result<Json<StatsResponse>, QueryError> {
    let store_stats = run_store(&state, |store| store.stats()).await?;
    let hub = state.coordinator.hub();

    Ok(Json(StatsResponse {
        store: store_stats,
        pipeline: state.coordinator.metrics(),
        connected_viewers: hub.viewer_count(),
        dropped_viewers: hub.dropped_total(),
    }))
}

/// Run a store call on the blocking pool
async fn run_store<T, F>(state: &QueryAppState, f: F) -> Result<T, QueryError>
where
    T: Send + 'static,
    F: FnOnce(&dyn ReadingStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(&state.store);
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| QueryError::Store(StoreError::Unavailable(e.to_string())))?
        .map_err(QueryError::Store)
}

/// Query error types
#[derive(Debug)]
enum QueryError {
    NotFound,
    Store(StoreError),
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            QueryError::NotFound => (StatusCode::NOT_FOUND, "Fruit not found".to_string()),
            QueryError::Store(e) => {
                error!(error = %e, "Query failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to read from store".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}
