use std::{net::SocketAddr, sync::Arc};

use ajo_core::{Payout, RotationError};
use ajo_platform::{
    ActorRequest, ContributionReportQuery, ErrorBody, PgEventStore, PgRotationStore,
    PublishingEventStore, RedisBus, ReorderRequest, ServiceConfig, ensure_schema,
};
use ajo_rotation::{
    ContributionReport, CycleSummary, OrderProposal, PayoutDecision, RotationService,
    ScheduleSummary,
};
use anyhow::Result as AnyResult;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

type Service = RotationService<PgRotationStore, PublishingEventStore<PgEventStore>>;
type ApiError = (StatusCode, Json<ErrorBody>);
type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Clone)]
struct AppState {
    service: Service,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "ajo_gateway=info,ajo_rotation=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8080")?;
    let store = PgRotationStore::connect(&config.database_url).await?;
    ensure_schema(store.pool()).await?;
    let redis = RedisBus::connect(&config.redis_url)?;
    let events = PublishingEventStore::new(PgEventStore::from_pool(store.pool().clone()), redis);

    let service = RotationService::new(Arc::new(store), Arc::new(events))
        .with_risk_policy(config.risk_policy);
    let state = AppState { service };

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/groups/{group_id}/payout-order",
            get(preview_order).put(reorder),
        )
        .route("/groups/{group_id}/payout-order/draft", post(draft_order))
        .route(
            "/groups/{group_id}/payout-order/finalize",
            post(finalize_order),
        )
        .route("/groups/{group_id}/schedule", post(generate_schedule))
        .route("/groups/{group_id}/cycles", get(list_cycles))
        .route(
            "/groups/{group_id}/cycles/{cycle}/readiness",
            get(cycle_readiness),
        )
        .route("/groups/{group_id}/cycles/{cycle}/payout", post(release_payout))
        .route("/groups/{group_id}/contributions", get(contribution_report))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn preview_order(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
) -> ApiResult<OrderProposal> {
    state
        .service
        .preview_order(group_id)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn draft_order(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Json(payload): Json<ActorRequest>,
) -> ApiResult<OrderProposal> {
    state
        .service
        .draft_order(group_id, payload.actor_id)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn reorder(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Json(payload): Json<ReorderRequest>,
) -> ApiResult<OrderProposal> {
    state
        .service
        .reorder(group_id, payload.actor_id, &payload.member_ids)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn finalize_order(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Json(payload): Json<ActorRequest>,
) -> ApiResult<OrderProposal> {
    state
        .service
        .finalize_order(group_id, payload.actor_id)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn generate_schedule(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Json(payload): Json<ActorRequest>,
) -> Result<(StatusCode, Json<ScheduleSummary>), ApiError> {
    let summary = state
        .service
        .generate_schedule(group_id, payload.actor_id)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn list_cycles(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
) -> ApiResult<Vec<CycleSummary>> {
    state
        .service
        .cycle_summaries(group_id)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn cycle_readiness(
    State(state): State<AppState>,
    Path((group_id, cycle)): Path<(Uuid, u32)>,
) -> ApiResult<PayoutDecision> {
    state
        .service
        .cycle_readiness(group_id, cycle)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn release_payout(
    State(state): State<AppState>,
    Path((group_id, cycle)): Path<(Uuid, u32)>,
    Json(payload): Json<ActorRequest>,
) -> Result<(StatusCode, Json<Payout>), ApiError> {
    let payout = state
        .service
        .release_payout(group_id, payload.actor_id, cycle)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(payout)))
}

async fn contribution_report(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Query(query): Query<ContributionReportQuery>,
) -> ApiResult<ContributionReport> {
    let at = query.at.unwrap_or_else(Utc::now);
    state
        .service
        .contribution_report(group_id, at)
        .await
        .map(Json)
        .map_err(api_error)
}

fn status_for(err: &RotationError) -> StatusCode {
    match err {
        RotationError::Validation(_) => StatusCode::BAD_REQUEST,
        RotationError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        RotationError::NotFound { .. } => StatusCode::NOT_FOUND,
        RotationError::Conflict(_) => StatusCode::CONFLICT,
        RotationError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
        RotationError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(err: RotationError) -> ApiError {
    let status = status_for(&err);
    if status.is_server_error() {
        error!(error = %err, "rotation request failed");
    }
    (status, Json(ErrorBody::from(&err)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (RotationError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (RotationError::PermissionDenied("x".into()), StatusCode::FORBIDDEN),
            (RotationError::not_found("group", Uuid::nil()), StatusCode::NOT_FOUND),
            (RotationError::Conflict("already paid".into()), StatusCode::CONFLICT),
            (
                RotationError::PreconditionFailed("x".into()),
                StatusCode::PRECONDITION_FAILED,
            ),
            (RotationError::Store("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(status_for(&err), expected);
        }
    }

    #[test]
    fn test_error_body_names_kind() {
        let (status, Json(body)) = api_error(RotationError::Conflict("already paid".into()));
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.kind, "conflict");
    }
}
