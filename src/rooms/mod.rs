/// 경매 룸 허브: 경매 별 구독 세션 집합과 팬아웃
/// 레플리카 간 중계는 Redis pub/sub 채널로 수신하고 로컬 멤버에게만 전달한다
// region:    --- Imports
use crate::auction::events::{RelayEnvelope, RelayEvent};
use crate::auction::model::BidSummary;
use crate::gateway::protocol::ServerMessage;
use crate::hot_state::{RedisManager, BID_CHANNEL_PATTERN, GLOBAL_CHANNEL};
use dashmap::{DashMap, DashSet};
use futures::StreamExt;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// endregion: --- Imports

// region:    --- Session Registry
/// 세션 당 아웃바운드 버퍼 상한: 가득 차면 해당 구독자를 끊는다
const OUTBOUND_BUFFER: usize = 64;

pub type SessionId = Uuid;

/// 연결된 세션 핸들
/// 아웃바운드 큐는 소켓 태스크가 단독 소유하고, 다른 태스크는 enqueue 만 한다
pub struct SessionHandle {
    pub id: SessionId,
    pub user_id: Uuid,
    pub username: String,
    tx: mpsc::Sender<String>,
    /// 입장한 경매 집합
    pub joined: DashSet<Uuid>,
    /// 강제 종료 신호 (SlowConsumer 등)
    close: Notify,
}

/// 송신 실패 사유
pub enum SendFailure {
    /// 버퍼 가득참: 가장 느린 구독자
    SlowConsumer,
    /// 커넥션 이미 종료
    Closed,
}

impl SessionHandle {
    pub fn new(user_id: Uuid, username: String) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let handle = Arc::new(Self {
            id: Uuid::new_v4(),
            user_id,
            username,
            tx,
            joined: DashSet::new(),
            close: Notify::new(),
        });
        (handle, rx)
    }

    /// 직렬화된 메시지 enqueue (논블로킹)
    pub fn try_send_raw(&self, json: String) -> Result<(), SendFailure> {
        self.tx.try_send(json).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendFailure::SlowConsumer,
            mpsc::error::TrySendError::Closed(_) => SendFailure::Closed,
        })
    }

    /// 단일 세션에 메시지 전송
    pub fn send(&self, msg: &ServerMessage) -> Result<(), SendFailure> {
        match serde_json::to_string(msg) {
            Ok(json) => self.try_send_raw(json),
            Err(e) => {
                error!("{:<12} --> 메시지 직렬화 실패: {:?}", "RoomHub", e);
                Ok(())
            }
        }
    }

    /// 강제 종료 신호 대기 (소켓 태스크에서 select)
    pub async fn closed(&self) {
        self.close.notified().await;
    }
}

/// 연결된 세션 레지스트리
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
    by_user: DashMap<Uuid, DashSet<SessionId>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            by_user: DashMap::new(),
        }
    }

    pub fn register(&self, handle: Arc<SessionHandle>) {
        self.by_user
            .entry(handle.user_id)
            .or_default()
            .insert(handle.id);
        self.sessions.insert(handle.id, handle);
    }

    pub fn unregister(&self, session_id: SessionId) -> Option<Arc<SessionHandle>> {
        let (_, handle) = self.sessions.remove(&session_id)?;
        if let Some(set) = self.by_user.get(&handle.user_id) {
            set.remove(&session_id);
        }
        self.by_user
            .remove_if(&handle.user_id, |_, set| set.is_empty());
        Some(handle)
    }

    pub fn get(&self, session_id: SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.get(&session_id).map(|r| r.clone())
    }

    /// 사용자의 라이브 세션 목록 (알림 전달용)
    pub fn sessions_for_user(&self, user_id: Uuid) -> Vec<Arc<SessionHandle>> {
        match self.by_user.get(&user_id) {
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.sessions.get(&*id).map(|r| r.clone()))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
// endregion: --- Session Registry

// region:    --- Room Hub
/// 경매 룸 하나
struct Room {
    members: DashSet<SessionId>,
    /// 전달한 최고 금액: 이보다 작거나 같은 newBid 는 버린다
    /// 레플리카 간 중계가 순서를 보장하지 않으므로 금액 단조성이 신뢰 기준
    last_amount: Mutex<Decimal>,
}

pub struct RoomHub {
    rooms: DashMap<Uuid, Arc<Room>>,
    registry: Arc<SessionRegistry>,
    replica_id: Uuid,
}

impl RoomHub {
    pub fn new(registry: Arc<SessionRegistry>, replica_id: Uuid) -> Self {
        Self {
            rooms: DashMap::new(),
            registry,
            replica_id,
        }
    }

    pub fn replica_id(&self) -> Uuid {
        self.replica_id
    }

    /// 룸 입장
    pub fn join(&self, session: &Arc<SessionHandle>, auction_id: Uuid) {
        let room = self
            .rooms
            .entry(auction_id)
            .or_insert_with(|| {
                Arc::new(Room {
                    members: DashSet::new(),
                    last_amount: Mutex::new(Decimal::ZERO),
                })
            })
            .clone();
        room.members.insert(session.id);
        session.joined.insert(auction_id);
        debug!(
            "{:<12} --> 룸 입장: auction={} session={}",
            "RoomHub", auction_id, session.id
        );
    }

    /// 룸 퇴장, 비면 룸 제거
    pub fn leave(&self, session: &Arc<SessionHandle>, auction_id: Uuid) {
        if let Some(room) = self.rooms.get(&auction_id) {
            room.members.remove(&session.id);
        }
        session.joined.remove(&auction_id);
        self.rooms
            .remove_if(&auction_id, |_, room| room.members.is_empty());
    }

    /// 연결 종료 처리: 모든 룸에서 제거하고 레지스트리에서 해제
    pub fn disconnect(&self, session_id: SessionId) {
        if let Some(handle) = self.registry.unregister(session_id) {
            for auction_id in handle.joined.iter() {
                let auction_id = *auction_id;
                if let Some(room) = self.rooms.get(&auction_id) {
                    room.members.remove(&session_id);
                }
                self.rooms
                    .remove_if(&auction_id, |_, room| room.members.is_empty());
            }
            handle.close.notify_one();
        }
    }

    /// 수락된 입찰 브로드캐스트 (단조 금액 가드 적용)
    pub fn broadcast_new_bid(&self, bid: &BidSummary) {
        if !self.advance_amount(bid.auction_id, bid.amount) {
            debug!(
                "{:<12} --> 이미 지난 입찰 브로드캐스트 폐기: auction={} amount={}",
                "RoomHub", bid.auction_id, bid.amount
            );
            return;
        }
        self.broadcast(bid.auction_id, &ServerMessage::new_bid(bid));
    }

    /// 경매 종료 브로드캐스트
    pub fn broadcast_auction_ended(
        &self,
        auction_id: Uuid,
        winner_user_id: Option<Uuid>,
        winning_amount: Option<Decimal>,
    ) {
        self.broadcast(
            auction_id,
            &ServerMessage::AuctionEnded {
                auction_id,
                winner_user_id,
                winning_amount,
            },
        );
    }

    /// 룸 멤버 전원에게 메시지 전달
    /// 한 번만 직렬화하고, 버퍼가 가득 찬 구독자는 끊는다
    pub fn broadcast(&self, auction_id: Uuid, msg: &ServerMessage) {
        let Some(room) = self.rooms.get(&auction_id).map(|r| r.clone()) else {
            return;
        };

        let json = match serde_json::to_string(msg) {
            Ok(j) => j,
            Err(e) => {
                error!("{:<12} --> 브로드캐스트 직렬화 실패: {:?}", "RoomHub", e);
                return;
            }
        };

        let mut slow = Vec::new();
        for member in room.members.iter() {
            let Some(session) = self.registry.get(*member) else {
                continue;
            };
            match session.try_send_raw(json.clone()) {
                Ok(()) => {}
                Err(SendFailure::SlowConsumer) => {
                    warn!(
                        "{:<12} --> 느린 구독자 연결 해제: session={} auction={}",
                        "RoomHub", session.id, auction_id
                    );
                    slow.push(session.id);
                }
                Err(SendFailure::Closed) => slow.push(session.id),
            }
        }

        // 느린/닫힌 구독자만 정리, 나머지 멤버는 영향 없음
        for id in slow {
            self.disconnect(id);
        }
    }

    /// 금액 단조 가드: 더 큰 금액일 때만 전진
    fn advance_amount(&self, auction_id: Uuid, amount: Decimal) -> bool {
        let Some(room) = self.rooms.get(&auction_id) else {
            // 로컬 구독자가 없으면 전달할 곳도 없다
            return false;
        };
        let mut last = room.last_amount.lock().unwrap_or_else(|e| e.into_inner());
        if amount <= *last {
            return false;
        }
        *last = amount;
        true
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
// endregion: --- Room Hub

// region:    --- Cross-replica Relay
/// 레플리카 간 중계 태스크: Redis 채널을 구독해 로컬 룸에 전달
/// 자기 레플리카가 발행한 메시지는 무시한다 (루프 방지)
pub fn spawn_relay(hub: Arc<RoomHub>, redis: RedisManager) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match redis.subscriber().await {
                Ok(mut pubsub) => {
                    let subscribed = pubsub.psubscribe(BID_CHANNEL_PATTERN).await.is_ok()
                        && pubsub.subscribe(GLOBAL_CHANNEL).await.is_ok();
                    if !subscribed {
                        error!("{:<12} --> 중계 채널 구독 실패", "Relay");
                    } else {
                        info!(
                            "{:<12} --> 레플리카 중계 시작: pattern={}",
                            "Relay", BID_CHANNEL_PATTERN
                        );
                        let mut stream = pubsub.on_message();
                        while let Some(msg) = stream.next().await {
                            handle_relay_message(&hub, &msg);
                        }
                        warn!("{:<12} --> 중계 스트림 종료, 재접속", "Relay");
                    }
                }
                Err(e) => error!("{:<12} --> Redis 구독 커넥션 실패: {:?}", "Relay", e),
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    })
}

fn handle_relay_message(hub: &RoomHub, msg: &redis::Msg) {
    let channel = msg.get_channel_name();
    if channel == GLOBAL_CHANNEL {
        // 캐시 무효화 통지: 읽기 경로는 어차피 Store 폴백이므로 기록만
        debug!("{:<12} --> 글로벌 무효화 통지 수신", "Relay");
        return;
    }

    let payload: String = match msg.get_payload() {
        Ok(p) => p,
        Err(e) => {
            error!("{:<12} --> 중계 페이로드 읽기 실패: {:?}", "Relay", e);
            return;
        }
    };

    let envelope: RelayEnvelope = match serde_json::from_str(&payload) {
        Ok(env) => env,
        Err(e) => {
            error!("{:<12} --> 중계 메시지 파싱 실패: {:?}", "Relay", e);
            return;
        }
    };

    // 자기 자신이 발행한 메시지는 로컬에 이미 전달됨
    if envelope.replica_id == hub.replica_id() {
        return;
    }

    match envelope.event {
        RelayEvent::NewBid { bid } => hub.broadcast_new_bid(&bid),
        RelayEvent::AuctionEnded {
            auction_id,
            winner_id,
            winning_amount,
        } => hub.broadcast_auction_ended(auction_id, winner_id, winning_amount),
    }
}
// endregion: --- Cross-replica Relay

// endregion: --- Tests
