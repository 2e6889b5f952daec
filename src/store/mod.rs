/// 경매/입찰 영속 저장소
/// 입찰 수락의 직렬화 지점: 경매 행 잠금(FOR UPDATE) 기반
// region:    --- Imports
use crate::auction::model::{
    Auction, AuctionSnapshot, AuctionSpec, Bid, BidSummary, EndOutcome, User, STATUS_ACTIVE,
};
use crate::database::DatabaseManager;
use crate::error::StoreError;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

pub mod queries;

// endregion: --- Imports

// region:    --- Store
// 일시적 오류(데드락 등) 재시도 한도
const MAX_RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

pub struct Store {
    db: Arc<DatabaseManager>,
}

impl Store {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    /// 경매 생성: current_highest_bid 는 starting_bid 로 초기화
    pub async fn create_auction(&self, spec: AuctionSpec) -> Result<Auction, StoreError> {
        let auction = sqlx::query_as::<_, Auction>(queries::INSERT_AUCTION)
            .bind(Uuid::new_v4())
            .bind(&spec.item_id)
            .bind(spec.start_time)
            .bind(spec.end_time)
            .bind(spec.starting_bid)
            .fetch_one(self.db.pool())
            .await?;
        info!("{:<12} --> 경매 생성: {}", "Store", auction.id);
        Ok(auction)
    }

    /// 경매 조회
    pub async fn get_auction(&self, auction_id: Uuid) -> Result<Option<Auction>, StoreError> {
        let auction = sqlx::query_as::<_, Auction>(queries::GET_AUCTION)
            .bind(auction_id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(auction)
    }

    /// 입찰 수락: 단일 트랜잭션에서 검증과 삽입, 최고가 갱신까지 수행
    /// 일시적 오류는 내부에서 한도까지 재시도
    pub async fn place_bid(
        &self,
        auction_id: Uuid,
        user_id: Uuid,
        amount: Decimal,
    ) -> Result<BidSummary, StoreError> {
        let mut attempt = 0;
        loop {
            match self.place_bid_once(auction_id, user_id, amount).await {
                Err(StoreError::Sqlx(e)) if StoreError::is_transient(&e) => {
                    attempt += 1;
                    if attempt > MAX_RETRIES {
                        return Err(StoreError::RetriesExhausted);
                    }
                    warn!(
                        "{:<12} --> 일시적 오류로 재시도 ({}/{}): {:?}",
                        "Store", attempt, MAX_RETRIES, e
                    );
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
                other => return other,
            }
        }
    }

    async fn place_bid_once(
        &self,
        auction_id: Uuid,
        user_id: Uuid,
        amount: Decimal,
    ) -> Result<BidSummary, StoreError> {
        self.db
            .transaction(|tx| {
                Box::pin(async move {
                    // 행 잠금으로 재조회
                    let auction = sqlx::query_as::<_, Auction>(queries::GET_AUCTION_FOR_UPDATE)
                        .bind(auction_id)
                        .fetch_optional(&mut **tx)
                        .await?
                        .ok_or(StoreError::AuctionNotFound)?;

                    if auction.status != STATUS_ACTIVE {
                        return Err(StoreError::AuctionNotActive);
                    }
                    if Utc::now() >= auction.end_time {
                        return Err(StoreError::AuctionEnded);
                    }
                    if amount < auction.starting_bid || amount <= auction.current_highest_bid {
                        return Err(StoreError::BidTooLow {
                            current: auction.current_highest_bid,
                        });
                    }

                    // 자기 최고가 재입찰 방지
                    let highest = sqlx::query_as::<_, BidSummary>(queries::GET_HIGHEST_BID_ROW)
                        .bind(auction_id)
                        .fetch_optional(&mut **tx)
                        .await?;
                    if let Some(ref h) = highest {
                        if h.user_id == user_id {
                            return Err(StoreError::SelfOutbid);
                        }
                    }

                    // 입찰 삽입 (timestamp 는 서버 할당, 경매 내 단조 증가)
                    let bid = sqlx::query_as::<_, Bid>(queries::INSERT_BID)
                        .bind(Uuid::new_v4())
                        .bind(user_id)
                        .bind(auction_id)
                        .bind(amount)
                        .fetch_one(&mut **tx)
                        .await?;

                    sqlx::query(queries::UPDATE_HIGHEST_BID)
                        .bind(amount)
                        .bind(auction_id)
                        .execute(&mut **tx)
                        .await?;

                    let username: String = sqlx::query_scalar(
                        "SELECT username FROM users WHERE id = $1",
                    )
                    .bind(user_id)
                    .fetch_one(&mut **tx)
                    .await?;

                    Ok(BidSummary {
                        bid_id: bid.id,
                        auction_id,
                        user_id,
                        username,
                        amount: bid.amount,
                        timestamp: bid.timestamp,
                    })
                })
            })
            .await
    }

    /// 경매 종료: 멱등
    /// 이미 터미널 상태면 현재 상태를 그대로 반환하고 just_ended=false
    pub async fn end_auction(&self, auction_id: Uuid) -> Result<EndOutcome, StoreError> {
        self.db
            .transaction(|tx| {
                Box::pin(async move {
                    let auction = sqlx::query_as::<_, Auction>(queries::GET_AUCTION_FOR_UPDATE)
                        .bind(auction_id)
                        .fetch_optional(&mut **tx)
                        .await?
                        .ok_or(StoreError::AuctionNotFound)?;

                    let participants: Vec<Uuid> =
                        sqlx::query_scalar(queries::LIST_PARTICIPANTS)
                            .bind(auction_id)
                            .fetch_all(&mut **tx)
                            .await?;

                    // 터미널 상태면 그대로 반환 (다른 레플리카가 먼저 종료한 경우 포함)
                    if auction.status != STATUS_ACTIVE {
                        return Ok(EndOutcome {
                            auction,
                            participants,
                            just_ended: false,
                        });
                    }

                    // 승자: 최고 입찰의 사용자, 입찰이 없으면 없음
                    let highest = sqlx::query_as::<_, BidSummary>(queries::GET_HIGHEST_BID_ROW)
                        .bind(auction_id)
                        .fetch_optional(&mut **tx)
                        .await?;
                    let winner_id = highest.as_ref().map(|h| h.user_id);

                    let ended = sqlx::query_as::<_, Auction>(queries::END_AUCTION)
                        .bind(auction_id)
                        .bind(winner_id)
                        .fetch_one(&mut **tx)
                        .await?;

                    Ok(EndOutcome {
                        auction: ended,
                        participants,
                        just_ended: true,
                    })
                })
            })
            .await
    }

    /// 종료 시각이 지난 ACTIVE 경매 id 목록
    pub async fn list_expired(
        &self,
        now: chrono::DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let ids = sqlx::query_scalar::<_, Uuid>(queries::LIST_EXPIRED)
            .bind(now)
            .fetch_all(self.db.pool())
            .await?;
        Ok(ids)
    }

    /// 입찰 이력 조회 (최신 순)
    pub async fn list_bids(
        &self,
        auction_id: Uuid,
        limit: i64,
    ) -> Result<Vec<BidSummary>, StoreError> {
        let bids = sqlx::query_as::<_, BidSummary>(queries::LIST_BIDS)
            .bind(auction_id)
            .bind(limit)
            .fetch_all(self.db.pool())
            .await?;
        Ok(bids)
    }

    /// 모든 경매 조회 (최신 순)
    pub async fn list_auctions(&self) -> Result<Vec<Auction>, StoreError> {
        let auctions = sqlx::query_as::<_, Auction>(queries::LIST_AUCTIONS)
            .fetch_all(self.db.pool())
            .await?;
        Ok(auctions)
    }

    /// 룸 입장 스냅샷: 현재 최고가 + 최근 입찰 + 참여자 수
    pub async fn snapshot(&self, auction_id: Uuid) -> Result<AuctionSnapshot, StoreError> {
        let auction = self
            .get_auction(auction_id)
            .await?
            .ok_or(StoreError::AuctionNotFound)?;
        let recent_bids = self.list_bids(auction_id, 20).await?;
        let highest_bidder = sqlx::query_as::<_, BidSummary>(queries::GET_HIGHEST_BID_ROW)
            .bind(auction_id)
            .fetch_optional(self.db.pool())
            .await?;
        let participant_count: i64 = sqlx::query_scalar(queries::COUNT_PARTICIPANTS)
            .bind(auction_id)
            .fetch_one(self.db.pool())
            .await?;

        Ok(AuctionSnapshot {
            auction_id,
            status: auction.status,
            current_highest_bid: auction.current_highest_bid,
            highest_bidder,
            recent_bids,
            participant_count,
            end_time: auction.end_time,
        })
    }

    /// 사용자 생성 (테스트/시드 용: 인증 서비스는 외부 협력자)
    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
    ) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(queries::INSERT_USER)
            .bind(Uuid::new_v4())
            .bind(username)
            .bind(email)
            .bind("external")
            .bind(Option::<String>::None)
            .fetch_one(self.db.pool())
            .await?;
        Ok(user)
    }
}
// endregion: --- Store

// endregion: --- Tests
