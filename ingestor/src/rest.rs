use crate::errors::Error;
use crate::metrics::{
    ACCEPTED_UPDATES_TOTAL, BATTERY_LEVEL, REJECTED_UPDATES_TOTAL, TRACKERS_KNOWN,
    UPDATES_TOTAL, UPDATES_WITHOUT_FIX_TOTAL,
};
use crate::model::{TrackerQuery, TrackersResponse, UpdateResponse};
use crate::store::TrackerRegistry;
use crate::validate::validate;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct AppState {
    registry: TrackerRegistry,
}

pub fn create_router(registry: TrackerRegistry) -> Router {
    let state = AppState { registry };

    Router::new()
        .route("/tracker-update", post(post_update))
        .route("/api/v1/trackers", get(get_trackers))
        .with_state(state)
}

async fn post_update(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<UpdateResponse>, AppError> {
    UPDATES_TOTAL.inc();
    let now = Utc::now();

    let update = validate(&body, now).map_err(|e| {
        REJECTED_UPDATES_TOTAL.inc();
        warn!("Rejected tracker update: {}", e);
        AppError::from(e)
    })?;

    if update.coordinates.is_none() {
        UPDATES_WITHOUT_FIX_TOTAL.inc();
    }
    BATTERY_LEVEL.observe(f64::from(update.battery_level));

    let record = state.registry.upsert(update, now).await;
    ACCEPTED_UPDATES_TOTAL.inc();
    TRACKERS_KNOWN.set(state.registry.len().await as f64);
    debug!(
        "Accepted update from {} (battery {}%)",
        record.device_id, record.battery_level
    );

    Ok(Json(UpdateResponse {
        success: true,
        data: record,
    }))
}

async fn get_trackers(
    State(state): State<AppState>,
    Query(params): Query<TrackerQuery>,
) -> Json<TrackersResponse> {
    let page = state.registry.list(&params).await;
    debug!(
        "Listing {} of {} trackers (offset {})",
        page.records.len(),
        page.total,
        page.offset
    );
    Json(TrackersResponse::from(page))
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    message: String,
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        // Every ingestor error stems from the request body
        Self {
            status: StatusCode::BAD_REQUEST,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracker::DeviceStatus;

    fn state() -> AppState {
        AppState {
            registry: TrackerRegistry::new(),
        }
    }

    #[test]
    fn test_post_update_accepted() {
        tokio_test::block_on(async {
            let state = state();
            let body = Bytes::from_static(
                br#"{"device_id":"GPS001","latitude":28.6139,"longitude":77.2090,"battery_level":85,"status":"in_transit","timestamp":1760000000}"#,
            );

            let Json(response) = post_update(State(state.clone()), body).await.unwrap();
            assert!(response.success);
            assert_eq!(response.data.status, DeviceStatus::InTransit);
            assert_eq!(state.registry.len().await, 1);
        });
    }

    #[test]
    fn test_post_update_rejected_is_bad_request() {
        tokio_test::block_on(async {
            let body = Bytes::from_static(br#"{"device_id":"GPS001"}"#);
            let err = post_update(State(state()), body).await.unwrap_err();
            assert_eq!(err.status, StatusCode::BAD_REQUEST);
            assert!(err.message.contains("Missing required fields"));
            assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
        });
    }

    #[test]
    fn test_get_trackers_filters_by_device() {
        tokio_test::block_on(async {
            let state = state();
            for id in ["GPS001", "GPS002"] {
                let body = format!(r#"{{"device_id":"{}","battery_level":60}}"#, id);
                post_update(State(state.clone()), Bytes::from(body))
                    .await
                    .unwrap();
            }

            let query = TrackerQuery {
                device_id: Some("GPS002".to_string()),
                ..Default::default()
            };
            let Json(response) = get_trackers(State(state), Query(query)).await;
            assert_eq!(response.total, 1);
            assert_eq!(response.data[0].device_id.as_str(), "GPS002");
            assert_eq!(response.data[0].status, DeviceStatus::InStorage);
        });
    }

    #[test]
    fn test_get_trackers_total_counts_all_matches() {
        tokio_test::block_on(async {
            let state = state();
            for id in ["GPS001", "GPS002", "GPS003"] {
                let body = format!(r#"{{"device_id":"{}","battery_level":60}}"#, id);
                post_update(State(state.clone()), Bytes::from(body))
                    .await
                    .unwrap();
            }

            let query = TrackerQuery {
                limit: Some(1),
                ..Default::default()
            };
            let Json(response) = get_trackers(State(state.clone()), Query(query)).await;
            assert_eq!(response.data.len(), 1);
            assert_eq!(response.total, 3);
            assert!(response.has_more);

            let query = TrackerQuery {
                limit: Some(1),
                offset: Some(2),
                ..Default::default()
            };
            let Json(response) = get_trackers(State(state), Query(query)).await;
            assert_eq!(response.data.len(), 1);
            assert!(!response.has_more);
        });
    }
}
