/// 경매 라이프사이클 스케줄러
/// 모든 레플리카에서 돌지만 Store 의 멱등 EndAuction 으로 조정된다:
/// 먼저 성공한 레플리카만 이벤트를 내고 나머지는 no-op
// region:    --- Imports
use crate::auction::events::{AuctionEndedEvent, RelayEnvelope, RelayEvent};
use crate::auction::model::{Auction, EndOutcome};
use crate::error::StoreError;
use crate::hot_state::RedisManager;
use crate::message_broker::{KafkaProducer, TOPIC_AUCTION_EVENTS};
use crate::rooms::RoomHub;
use crate::store::Store;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// endregion: --- Imports

// region:    --- Lifecycle Scheduler
pub struct LifecycleScheduler {
    store: Arc<Store>,
    producer: Arc<KafkaProducer>,
    hub: Arc<RoomHub>,
    redis: RedisManager,
    tick: Duration,
}

impl LifecycleScheduler {
    pub fn new(
        store: Arc<Store>,
        producer: Arc<KafkaProducer>,
        hub: Arc<RoomHub>,
        redis: RedisManager,
        tick: Duration,
    ) -> Self {
        Self {
            store,
            producer,
            hub,
            redis,
            tick,
        }
    }

    /// 주기적 스윕 시작
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(this.tick);
            loop {
                ticker.tick().await;
                if let Err(e) = this.sweep().await {
                    error!("{:<12} --> 스윕 중 오류 발생: {:?}", "Scheduler", e);
                }
            }
        });
    }

    /// 종료 시각이 지난 ACTIVE 경매를 모두 종료
    async fn sweep(&self) -> Result<(), StoreError> {
        let now = Utc::now();
        let expired = self.store.list_expired(now).await?;
        if expired.is_empty() {
            debug!("{:<12} --> 만료 경매 없음", "Scheduler");
            return Ok(());
        }

        info!("{:<12} --> 만료 경매 {}건 종료 시작", "Scheduler", expired.len());
        for auction_id in expired {
            if let Err(e) = self.finalize(auction_id).await {
                error!(
                    "{:<12} --> 경매 종료 실패: auction={} {:?}",
                    "Scheduler", auction_id, e
                );
            }
        }
        Ok(())
    }

    /// 읽기 경로의 온디맨드 감지: 만료된 ACTIVE 경매를 보면 종료를 먼저 수행
    pub async fn ensure_ended(&self, auction: &Auction) -> Result<(), StoreError> {
        if auction.is_expired(Utc::now()) {
            self.finalize(auction.id).await?;
        }
        Ok(())
    }

    /// ENDED 전이 + 이벤트 발행
    /// EndAuction 이 멱등이므로 경매 당 정확히 한 번만 이벤트 클러스터가 나간다
    pub async fn finalize(&self, auction_id: Uuid) -> Result<EndOutcome, StoreError> {
        let outcome = self.store.end_auction(auction_id).await?;
        if !outcome.just_ended {
            // 다른 레플리카 또는 이전 호출이 이미 종료함
            return Ok(outcome);
        }

        let auction = &outcome.auction;
        let winning_amount = auction.winner_id.map(|_| auction.current_highest_bid);
        info!(
            "{:<12} --> 경매 종료: auction={} winner={:?}",
            "Scheduler", auction_id, auction.winner_id
        );

        // auction.ended 스트림 (NotificationDispatcher 가 소비)
        let event = AuctionEndedEvent {
            auction_id,
            winner_id: auction.winner_id,
            winning_amount,
            participants: outcome.participants.clone(),
            ended_at: Utc::now(),
        };
        if let Err(e) = self
            .producer
            .publish_json(TOPIC_AUCTION_EVENTS, &auction_id.to_string(), &event)
            .await
        {
            // 발행 실패는 상태를 되돌리지 않는다: Store 의 ENDED 가 최종
            error!("{:<12} --> auction.ended 발행 실패: {:?}", "Scheduler", e);
        }

        // 로컬 룸 + 레플리카 간 브로드캐스트
        self.hub
            .broadcast_auction_ended(auction_id, auction.winner_id, winning_amount);
        let envelope = RelayEnvelope {
            replica_id: self.hub.replica_id(),
            event: RelayEvent::AuctionEnded {
                auction_id,
                winner_id: auction.winner_id,
                winning_amount,
            },
        };
        if let Err(e) = self.redis.publish_relay(auction_id, &envelope).await {
            warn!("{:<12} --> 종료 중계 발행 실패: {:?}", "Scheduler", e);
        }

        // 최고가 캐시 제거 + 글로벌 무효화 통지
        if let Err(e) = self.redis.clear_highest(auction_id).await {
            warn!("{:<12} --> 최고가 캐시 제거 실패: {:?}", "Scheduler", e);
        }
        if let Err(e) = self
            .redis
            .publish_global(&format!("auction-ended:{}", auction_id))
            .await
        {
            debug!("{:<12} --> 글로벌 무효화 통지 실패: {:?}", "Scheduler", e);
        }

        Ok(outcome)
    }
}
// endregion: --- Lifecycle Scheduler
