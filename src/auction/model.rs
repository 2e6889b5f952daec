use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// 경매 상태 값
pub const STATUS_ACTIVE: &str = "ACTIVE";
pub const STATUS_ENDED: &str = "ENDED";
pub const STATUS_CANCELLED: &str = "CANCELLED";

// 사용자 모델
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub full_name: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// 경매 모델
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Auction {
    pub id: Uuid,
    pub item_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub starting_bid: Decimal,
    pub current_highest_bid: Decimal,
    pub winner_id: Option<Uuid>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Auction {
    /// ACTIVE 이면서 종료 시각이 지난 경매인지
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == STATUS_ACTIVE && self.end_time <= now
    }
}

// 입찰 모델
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Bid {
    pub id: Uuid,
    pub user_id: Uuid,
    pub auction_id: Uuid,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// 브로드캐스트/캐시에 사용하는 입찰 요약 (username 포함)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BidSummary {
    pub bid_id: Uuid,
    pub auction_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// 룸 입장 시 내려주는 스냅샷
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionSnapshot {
    pub auction_id: Uuid,
    pub status: String,
    pub current_highest_bid: Decimal,
    pub highest_bidder: Option<BidSummary>,
    pub recent_bids: Vec<BidSummary>,
    pub participant_count: i64,
    pub end_time: DateTime<Utc>,
}

/// EndAuction 결과: 경매 최종 상태 + 참여자 + 이번 호출로 종료됐는지
#[derive(Debug, Clone)]
pub struct EndOutcome {
    pub auction: Auction,
    pub participants: Vec<Uuid>,
    pub just_ended: bool,
}

/// 경매 생성 입력
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionSpec {
    pub item_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub starting_bid: Decimal,
}
