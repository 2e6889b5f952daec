/// 세션 게이트웨이: 인증된 전이중 클라이언트 세션
/// 인바운드 메시지를 종류 별 디스패치 테이블로 처리한다
// region:    --- Imports
use crate::bidding::BidValidator;
use crate::config::Config;
use crate::error::GatewayError;
use crate::gateway::auth::TokenSigner;
use crate::gateway::protocol::{ClientMessage, ServerMessage};
use crate::hot_state::{RedisManager, SessionMeta};
use crate::rooms::{RoomHub, SessionHandle, SessionRegistry};
use crate::scheduler::LifecycleScheduler;
use crate::store::Store;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::header::AUTHORIZATION,
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{info, warn};
use uuid::Uuid;

pub mod auth;
pub mod protocol;

// endregion: --- Imports

// region:    --- App State
/// 요청 당 데드라인 (커밋 이후의 타임아웃은 입찰을 되돌리지 않는다)
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// keepalive ping 주기
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// 공유 애플리케이션 상태 (명시적 조립: main 에서 구성)
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub validator: Arc<BidValidator>,
    pub hub: Arc<RoomHub>,
    pub registry: Arc<SessionRegistry>,
    pub redis: RedisManager,
    pub signer: Arc<TokenSigner>,
    pub lifecycle: Arc<LifecycleScheduler>,
}

/// 라우터 구성
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(crate::handlers::handle_health))
        .route(
            "/auctions",
            post(crate::handlers::handle_create_auction)
                .get(crate::handlers::handle_list_auctions),
        )
        .route("/auctions/:id", get(crate::handlers::handle_get_auction))
        .route(
            "/auctions/:id/bids",
            get(crate::handlers::handle_get_bid_history),
        )
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}
// endregion: --- App State

// region:    --- WebSocket Handler
/// WebSocket 업그레이드: 토큰은 쿼리 파라미터 또는 Authorization 헤더로 전달
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let token = params.get("token").cloned().or_else(|| {
        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|v| v.to_string())
    });

    ws.on_upgrade(move |socket| handle_socket(socket, state, token.unwrap_or_default()))
}

/// 커넥션 처리
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, token: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // 핸드셰이크 인증: 실패 시 error 전송 후 종료
    let claims = match state.signer.verify(&token) {
        Ok(claims) => claims,
        Err(e) => {
            warn!("{:<12} --> 핸드셰이크 인증 실패: {:?}", "Gateway", e);
            let msg = ServerMessage::Error {
                message: GatewayError::Unauthenticated("유효하지 않은 토큰".to_string())
                    .to_string(),
            };
            let json = serde_json::to_string(&msg).unwrap_or_default();
            let _ = ws_tx.send(Message::Text(json)).await;
            let _ = ws_tx.close().await;
            return;
        }
    };

    let (session, mut rx) = SessionHandle::new(claims.sub, claims.username.clone());
    state.registry.register(Arc::clone(&session));
    info!(
        "{:<12} --> 세션 연결: user={} session={}",
        "Gateway", session.user_id, session.id
    );

    // 프레즌스 등록 (best-effort)
    let meta = SessionMeta {
        user_id: session.user_id,
        username: session.username.clone(),
        replica_id: state.hub.replica_id(),
        connected_at: chrono::Utc::now(),
    };
    if let Err(e) = state.redis.set_session(&meta).await {
        warn!("{:<12} --> 프레즌스 등록 실패: {:?}", "Gateway", e);
    }

    let _ = session.send(&ServerMessage::Connected {
        user_id: session.user_id,
        username: session.username.clone(),
    });

    // 아웃바운드 전용 태스크: 큐 전달 + keepalive ping
    let send_task = tokio::spawn(async move {
        let mut ping = interval(PING_INTERVAL);
        ping.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(json) => {
                        if ws_tx.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // 커넥션 당 동시 처리 상한 (경매 별 레이트 게이트와는 독립)
    let inflight = Arc::new(Semaphore::new(state.config.connection_inflight_cap));

    loop {
        tokio::select! {
            biased;

            // SlowConsumer 등으로 강제 종료된 경우
            _ = session.closed() => break,

            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    dispatch_frame(&state, &session, &inflight, text.as_bytes());
                }
                Some(Ok(Message::Binary(data))) => {
                    dispatch_frame(&state, &session, &inflight, &data);
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // ping/pong 은 하위 계층이 처리
                Some(Err(e)) => {
                    warn!("{:<12} --> 소켓 오류: session={} {:?}", "Gateway", session.id, e);
                    break;
                }
            }
        }
    }

    // 정리: 입장한 룸 전부 퇴장 + 레지스트리 해제
    state.hub.disconnect(session.id);
    if state.registry.sessions_for_user(session.user_id).is_empty() {
        if let Err(e) = state.redis.clear_session(session.user_id).await {
            warn!("{:<12} --> 프레즌스 해제 실패: {:?}", "Gateway", e);
        }
    }
    send_task.abort();
    info!(
        "{:<12} --> 세션 종료: user={} session={}",
        "Gateway", session.user_id, session.id
    );
}

/// 인바운드 프레임 파싱 후 핸들러 태스크 디스패치
fn dispatch_frame(
    state: &Arc<AppState>,
    session: &Arc<SessionHandle>,
    inflight: &Arc<Semaphore>,
    payload: &[u8],
) {
    let parsed = match serde_json::from_slice::<ClientMessage>(payload) {
        Ok(parsed) => parsed,
        Err(e) => {
            // 알 수 없는 종류 포함 파싱 실패는 error 로 거부
            let _ = session.send(&ServerMessage::Error {
                message: GatewayError::Json(e).to_string(),
            });
            return;
        }
    };

    match Arc::clone(inflight).try_acquire_owned() {
        Ok(permit) => {
            let state = Arc::clone(state);
            let session = Arc::clone(session);
            tokio::spawn(async move {
                let _permit = permit;
                handle_client_message(&state, &session, parsed).await;
            });
        }
        Err(_) => {
            let _ = session.send(&ServerMessage::Error {
                message: GatewayError::InflightExceeded.to_string(),
            });
        }
    }
}

/// 메시지 종류 별 디스패치
async fn handle_client_message(
    state: &Arc<AppState>,
    session: &Arc<SessionHandle>,
    msg: ClientMessage,
) {
    match msg {
        ClientMessage::JoinAuction { auction_id } => {
            match timeout(REQUEST_TIMEOUT, join_auction(state, session, auction_id)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    let _ = session.send(&ServerMessage::Error {
                        message: e.to_string(),
                    });
                }
                Err(_) => {
                    let _ = session.send(&ServerMessage::Error {
                        message: GatewayError::Timeout.to_string(),
                    });
                }
            }
        }

        ClientMessage::PlaceBid { auction_id, amount } => {
            match timeout(
                REQUEST_TIMEOUT,
                state.validator.submit(session.user_id, auction_id, &amount),
            )
            .await
            {
                Ok(Ok(bid)) => {
                    let _ = session.send(&ServerMessage::BidPlaced {
                        bid_id: bid.bid_id,
                        amount: bid.amount,
                    });
                }
                Ok(Err(rejection)) => {
                    let _ = session.send(&ServerMessage::BidError {
                        code: rejection.code().to_string(),
                        message: rejection.to_string(),
                    });
                }
                // 응답 데드라인 초과: 커밋됐을 수 있으므로 클라이언트는 newBid 로 확인
                Err(_) => {
                    let _ = session.send(&ServerMessage::Error {
                        message: GatewayError::Timeout.to_string(),
                    });
                }
            }
        }

        ClientMessage::GetBidHistory { auction_id } => {
            match timeout(REQUEST_TIMEOUT, state.store.list_bids(auction_id, 50)).await {
                Ok(Ok(bids)) => {
                    let _ = session.send(&ServerMessage::BidHistory { auction_id, bids });
                }
                Ok(Err(e)) => {
                    let _ = session.send(&ServerMessage::Error {
                        message: e.to_string(),
                    });
                }
                Err(_) => {
                    let _ = session.send(&ServerMessage::Error {
                        message: GatewayError::Timeout.to_string(),
                    });
                }
            }
        }
    }
}

/// 룸 입장: 온디맨드 종료 감지 → 입장 → 스냅샷 회신
async fn join_auction(
    state: &Arc<AppState>,
    session: &Arc<SessionHandle>,
    auction_id: Uuid,
) -> Result<(), GatewayError> {
    let auction = state
        .store
        .get_auction(auction_id)
        .await?
        .ok_or(crate::error::StoreError::AuctionNotFound)?;

    // 만료된 ACTIVE 경매를 보면 먼저 종료 처리
    state.lifecycle.ensure_ended(&auction).await?;

    state.hub.join(session, auction_id);
    let mut snapshot = state.store.snapshot(auction_id).await?;

    // 2단 읽기: 표시 전용 테일/캐시가 있으면 사용, 없거나 실패하면 Store 폴백
    match state.redis.get_history(auction_id, 20).await {
        Ok(tail) if !tail.is_empty() => snapshot.recent_bids = tail,
        Ok(_) => {}
        Err(e) => warn!("{:<12} --> 이력 테일 조회 실패, Store 사용: {:?}", "Gateway", e),
    }
    let highest = match state.redis.get_highest(auction_id).await {
        // 캐시는 Store 보다 뒤처질 수 있다: 뒤처진 값이면 Store 쪽을 쓴다
        Ok(Some(cached)) if cached.amount >= snapshot.current_highest_bid => Some(cached),
        _ => snapshot.highest_bidder.clone(),
    };

    let _ = session.send(&ServerMessage::JoinedAuction {
        auction_id,
        snapshot,
    });
    if let Some(h) = highest {
        let _ = session.send(&ServerMessage::CurrentHighestBid {
            amount: h.amount,
            user_id: h.user_id,
            username: h.username,
            timestamp: h.timestamp,
        });
    }
    Ok(())
}
// endregion: --- WebSocket Handler
