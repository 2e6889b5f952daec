use crate::auction::model::BidSummary;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// bid.audit 스트림: 수락된 입찰마다 1건
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidAuditEvent {
    pub bid_id: Uuid,
    pub auction_id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// auction.ended 스트림: ENDED 전이마다 1건
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionEndedEvent {
    pub auction_id: Uuid,
    pub winner_id: Option<Uuid>,
    pub winning_amount: Option<Decimal>,
    pub participants: Vec<Uuid>,
    pub ended_at: DateTime<Utc>,
}

/// notify.user 스트림의 알림 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    #[serde(rename = "WON")]
    Won,
    #[serde(rename = "LOST")]
    Lost,
    #[serde(rename = "NO_BIDS_WATCHER")]
    NoBidsWatcher,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Won => "WON",
            NotificationKind::Lost => "LOST",
            NotificationKind::NoBidsWatcher => "NO_BIDS_WATCHER",
        }
    }
}

/// notify.user 스트림: 수신자 별 알림
/// recipient_id 가 None 이면 경매 룸 전체 브로드캐스트
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserNotification {
    pub auction_id: Uuid,
    pub recipient_id: Option<Uuid>,
    pub kind: NotificationKind,
    pub payload: serde_json::Value,
}

/// 레플리카 간 Redis 채널로 중계되는 이벤트
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RelayEvent {
    /// 수락된 입찰 (팬아웃)
    NewBid { bid: BidSummary },
    /// 경매 종료
    AuctionEnded {
        auction_id: Uuid,
        winner_id: Option<Uuid>,
        winning_amount: Option<Decimal>,
    },
}

/// 중계 봉투: 발신 레플리카 id 태깅 (루프 방지)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub replica_id: Uuid,
    pub event: RelayEvent,
}
