/// REST 조회/관리 핸들러 (등록/로그인은 외부 서비스 담당)
// region:    --- Imports
use crate::auction::model::AuctionSpec;
use crate::gateway::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

// endregion: --- Imports

// region:    --- Admin Handlers

/// 경매 생성 (관리자 용)
pub async fn handle_create_auction(
    State(state): State<Arc<AppState>>,
    Json(spec): Json<AuctionSpec>,
) -> impl IntoResponse {
    info!("{:<12} --> 경매 생성 요청: item={}", "Handler", spec.item_id);

    if spec.end_time <= spec.start_time {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "종료 시각은 시작 시각보다 뒤여야 합니다."
            })),
        )
            .into_response();
    }
    if spec.starting_bid <= Decimal::ZERO {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "시작가는 0 보다 커야 합니다."
            })),
        )
            .into_response();
    }

    match state.store.create_auction(spec).await {
        Ok(auction) => Json(auction).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

// endregion: --- Admin Handlers

// region:    --- Query Handlers

/// 모든 경매 조회
pub async fn handle_list_auctions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("{:<12} --> 경매 목록 조회", "Handler");
    match state.store.list_auctions().await {
        Ok(auctions) => Json(auctions).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// 경매 상태 조회 (온디맨드 종료 감지 포함)
pub async fn handle_get_auction(
    State(state): State<Arc<AppState>>,
    Path(auction_id): Path<Uuid>,
) -> impl IntoResponse {
    info!("{:<12} --> 경매 상태 조회 id: {}", "Handler", auction_id);

    let auction = match state.store.get_auction(auction_id).await {
        Ok(Some(auction)) => auction,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    };

    // 만료된 ACTIVE 경매를 보면 먼저 종료하고 최종 상태를 돌려준다
    if auction.is_expired(chrono::Utc::now()) {
        if let Err(e) = state.lifecycle.finalize(auction_id).await {
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
        return match state.store.get_auction(auction_id).await {
            Ok(Some(ended)) => Json(ended).into_response(),
            Ok(None) => StatusCode::NOT_FOUND.into_response(),
            Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        };
    }

    Json(auction).into_response()
}

/// 입찰 이력 조회
pub async fn handle_get_bid_history(
    State(state): State<Arc<AppState>>,
    Path(auction_id): Path<Uuid>,
) -> impl IntoResponse {
    info!("{:<12} --> 입찰 이력 조회 id: {}", "Handler", auction_id);
    match state.store.list_bids(auction_id, 100).await {
        Ok(bids) => Json(bids).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// 레플리카 헬스 체크
pub async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "replicaId": state.hub.replica_id(),
        "clients": state.registry.session_count(),
        "rooms": state.hub.room_count(),
    }))
}

// endregion: --- Query Handlers
