use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use businessmap_client::{
    AddCommentData, CardDetails, GetCardsRequest, GetCardsWithRetryResponse,
    ReadCardWithRetryResponse, RetryConfigOverrides,
};
use serde::Deserialize;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::{
    config::Config,
    error::{ApiError, ApiResult},
    main_lib::AppState,
};

pub async fn healthz() -> &'static str {
    "ok"
}

/// Retry knobs accepted on the query string.
///
/// Mirrors `RetryConfigOverrides` field for field: `serde_urlencoded` hands
/// flattened fields over as strings, so `#[serde(flatten)]` cannot parse the
/// typed values.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RetryQuery {
    fail_on_partial: bool,
    max_attempts: Option<u32>,
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    multiplier: Option<f64>,
    respect_retry_after: Option<bool>,
    total_wait_cap_ms: Option<u64>,
}

impl RetryQuery {
    fn overrides(&self) -> RetryConfigOverrides {
        RetryConfigOverrides {
            max_attempts: self.max_attempts,
            initial_delay_ms: self.initial_delay_ms,
            max_delay_ms: self.max_delay_ms,
            multiplier: self.multiplier,
            respect_retry_after: self.respect_retry_after,
            total_wait_cap_ms: self.total_wait_cap_ms,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CardsQuery {
    board_ids: Option<String>,
    lane_ids: Option<String>,
    workflow_ids: Option<String>,
    card_ids: Option<String>,
}

/// Parse a comma-separated id list such as `1,2,3`.
fn parse_ids(name: &str, raw: Option<&str>) -> ApiResult<Vec<i64>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| ApiError::BadRequest(format!("invalid {} value: '{}'", name, s)))
        })
        .collect()
}

impl CardsQuery {
    fn filter(&self) -> ApiResult<GetCardsRequest> {
        Ok(GetCardsRequest {
            board_ids: parse_ids("board_ids", self.board_ids.as_deref())?,
            lane_ids: parse_ids("lane_ids", self.lane_ids.as_deref())?,
            workflow_ids: parse_ids("workflow_ids", self.workflow_ids.as_deref())?,
            card_ids: parse_ids("card_ids", self.card_ids.as_deref())?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct AddCommentBody {
    text: String,
}

async fn read_card(
    State(state): State<Arc<AppState>>,
    Path(card): Path<String>,
) -> ApiResult<Json<CardDetails>> {
    let details = state.client.read_card(&card).await?;
    Ok(Json(details))
}

async fn read_card_with_retry(
    State(state): State<Arc<AppState>>,
    Path(card): Path<String>,
    Query(query): Query<RetryQuery>,
) -> ApiResult<Json<ReadCardWithRetryResponse>> {
    let config = query.overrides().apply(state.retry_defaults);
    let client = state.client.clone();
    let fetched = state
        .with_deadline(|cancel| async move {
            client
                .read_card_with_retry(&cancel, &card, config, query.fail_on_partial)
                .await
        })
        .await?;

    match fetched.into_result() {
        Ok(response) => Ok(Json(response)),
        Err((response, error)) => Err(ApiError::fetch(error, &response)),
    }
}

async fn get_cards_with_retry(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CardsQuery>,
    Query(retry): Query<RetryQuery>,
) -> ApiResult<Json<GetCardsWithRetryResponse>> {
    let filter = query.filter()?;
    let config = retry.overrides().apply(state.retry_defaults);
    let client = state.client.clone();
    let fetched = state
        .with_deadline(|cancel| async move {
            client
                .get_cards_with_retry(&cancel, &filter, config, retry.fail_on_partial)
                .await
        })
        .await?;

    match fetched.into_result() {
        Ok(response) => Ok(Json(response)),
        Err((response, error)) => Err(ApiError::fetch(error, &response)),
    }
}

async fn add_card_comment(
    State(state): State<Arc<AppState>>,
    Path(card): Path<String>,
    Json(body): Json<AddCommentBody>,
) -> ApiResult<(StatusCode, Json<AddCommentData>)> {
    let comment = state.client.add_card_comment(&card, &body.text).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

pub fn app_router(state: Arc<AppState>, config: &Config) -> Router {
    let cors = if config.cors_allow.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins = config
            .cors_allow
            .iter()
            .filter_map(|o| o.parse::<HeaderValue>().ok())
            .collect::<Vec<_>>();
        CorsLayer::new().allow_origin(origins)
    };

    let api = Router::new()
        .route("/healthz", get(healthz))
        .route("/cards", get(get_cards_with_retry))
        .route("/cards/{card}", get(read_card))
        .route("/cards/{card}/retry", get(read_card_with_retry))
        .route("/cards/{card}/comments", post(add_card_comment));

    Router::new()
        .nest("/api/v1", api)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ids() {
        assert_eq!(parse_ids("board_ids", Some("1, 2,3")).unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_ids("board_ids", None).unwrap(), Vec::<i64>::new());
        assert_eq!(parse_ids("lane_ids", Some("")).unwrap(), Vec::<i64>::new());
        assert!(matches!(
            parse_ids("lane_ids", Some("4,x")),
            Err(ApiError::BadRequest(msg)) if msg == "invalid lane_ids value: 'x'"
        ));
    }

    #[test]
    fn test_retry_query_maps_to_overrides() {
        let query = RetryQuery {
            max_attempts: Some(3),
            initial_delay_ms: Some(10),
            ..Default::default()
        };
        let overrides = query.overrides();
        assert_eq!(overrides.max_attempts, Some(3));
        assert_eq!(overrides.initial_delay_ms, Some(10));
        assert!(RetryQuery::default().overrides().is_empty());
    }
}
