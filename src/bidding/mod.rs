/// 입찰 수락 파이프라인
/// 정규화 → 레이트 게이트 → 내구 커밋 → 커밋 후 부수효과
// region:    --- Imports
use crate::auction::events::{BidAuditEvent, RelayEnvelope, RelayEvent};
use crate::auction::model::BidSummary;
use crate::config::Config;
use crate::error::BidRejection;
use crate::hot_state::RedisManager;
use crate::message_broker::{KafkaProducer, TOPIC_AUDIT};
use crate::rooms::RoomHub;
use crate::store::Store;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

pub use crate::gateway::protocol::AmountInput;

// endregion: --- Imports

// region:    --- Normalize
/// 입찰 금액 정규화
/// 숫자/문자열 입력을 Decimal 로 강제하고 비유한·0 이하·상한 초과를 거부
pub fn normalize_amount(input: &AmountInput, max: Decimal) -> Result<Decimal, BidRejection> {
    let amount = match input {
        AmountInput::Number(f) => {
            if !f.is_finite() {
                return Err(BidRejection::InvalidAmount("유한한 숫자가 아닙니다".into()));
            }
            Decimal::from_f64_retain(*f)
                .ok_or_else(|| BidRejection::InvalidAmount("금액 변환 실패".into()))?
        }
        AmountInput::Text(s) => s
            .trim()
            .parse::<Decimal>()
            .map_err(|_| BidRejection::InvalidAmount(format!("숫자가 아닙니다: {}", s)))?,
    };

    if amount <= Decimal::ZERO {
        return Err(BidRejection::InvalidAmount("0 이하 금액".into()));
    }
    if amount > max {
        return Err(BidRejection::InvalidAmount(format!(
            "상한({}) 초과",
            max
        )));
    }
    Ok(amount)
}
// endregion: --- Normalize

// region:    --- Bid Validator
pub struct BidValidator {
    store: Arc<Store>,
    redis: RedisManager,
    producer: Arc<KafkaProducer>,
    hub: Arc<RoomHub>,
    max_bid_amount: Decimal,
    rate_limit_count: u32,
    rate_window: Duration,
}

impl BidValidator {
    pub fn new(
        store: Arc<Store>,
        redis: RedisManager,
        producer: Arc<KafkaProducer>,
        hub: Arc<RoomHub>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            redis,
            producer,
            hub,
            max_bid_amount: config.max_bid_amount,
            rate_limit_count: config.bid_rate_limit_count,
            rate_window: config.bid_rate_window,
        }
    }

    /// 입찰 제출
    /// 수락 순서는 Store 의 경매 행 잠금이 결정한다: 같은 경매의 수락 입찰은
    /// 전순서를 가지며 timestamp 순서와 일치한다
    pub async fn submit(
        &self,
        user_id: Uuid,
        auction_id: Uuid,
        amount: &AmountInput,
    ) -> Result<BidSummary, BidRejection> {
        // 1. 정규화
        let amount = normalize_amount(amount, self.max_bid_amount)?;

        // 2. 레이트 게이트 (HotState 불가 시 fail-open: Store 가 진실 원천)
        match self
            .redis
            .incr_rate(user_id, auction_id, self.rate_window, self.rate_limit_count)
            .await
        {
            Ok(count) if count > self.rate_limit_count as u64 => {
                info!(
                    "{:<12} --> 레이트 리밋 초과: user={} auction={} count={}",
                    "Validator", user_id, auction_id, count
                );
                return Err(BidRejection::RateLimited);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    "{:<12} --> 레이트 게이트 불가, 통과 처리: {:?}",
                    "Validator", e
                );
            }
        }

        // 3. 내구 커밋
        let bid = self.store.place_bid(auction_id, user_id, amount).await?;
        info!(
            "{:<12} --> 입찰 수락: auction={} user={} amount={}",
            "Validator", auction_id, user_id, amount
        );

        // 4. 커밋 후 부수효과: 실패해도 수락 응답을 막지 않는다
        // 로컬 팬아웃은 커밋 순서 그대로 여기서 수행 (enqueue 만 하므로 블록 없음)
        self.hub.broadcast_new_bid(&bid);
        self.spawn_post_commit(bid.clone());

        Ok(bid)
    }

    /// 커밋 후 부수효과를 순서대로 수행하는 태스크
    /// 캐시 갱신 → 레플리카 간 발행 → 감사 스트림 발행
    fn spawn_post_commit(&self, bid: BidSummary) {
        let redis = self.redis.clone();
        let producer = Arc::clone(&self.producer);
        let hub = Arc::clone(&self.hub);

        tokio::spawn(async move {
            // 최고가 캐시 + 이력 테일
            if let Err(e) = redis.set_highest(&bid).await {
                warn!("{:<12} --> 최고가 캐시 갱신 실패: {:?}", "Validator", e);
            }
            if let Err(e) = redis.push_history(&bid).await {
                warn!("{:<12} --> 이력 테일 갱신 실패: {:?}", "Validator", e);
            }

            // 레플리카 간 팬아웃
            let envelope = RelayEnvelope {
                replica_id: hub.replica_id(),
                event: RelayEvent::NewBid { bid: bid.clone() },
            };
            if let Err(e) = redis.publish_relay(bid.auction_id, &envelope).await {
                warn!("{:<12} --> 중계 발행 실패: {:?}", "Validator", e);
            }

            // 감사 스트림
            let audit = BidAuditEvent {
                bid_id: bid.bid_id,
                auction_id: bid.auction_id,
                user_id: bid.user_id,
                amount: bid.amount,
                timestamp: bid.timestamp,
            };
            if let Err(e) = producer
                .publish_json(TOPIC_AUDIT, &bid.bid_id.to_string(), &audit)
                .await
            {
                warn!("{:<12} --> 감사 이벤트 발행 실패: {:?}", "Validator", e);
            }
        });
    }
}
// endregion: --- Bid Validator

// region:    --- Tests
#[cfg(test)]
mod tests {
    use super::*;

    fn max() -> Decimal {
        Decimal::from(1_000_000)
    }

    #[test]
    fn test_normalize_accepts_number_and_string() {
        let n = normalize_amount(&AmountInput::Number(150.0), max()).unwrap();
        assert_eq!(n, Decimal::from(150));

        let s = normalize_amount(&AmountInput::Text(" 150.50 ".to_string()), max()).unwrap();
        assert_eq!(s.to_string(), "150.50");
    }

    #[test]
    fn test_normalize_rejects_non_finite() {
        assert!(normalize_amount(&AmountInput::Number(f64::NAN), max()).is_err());
        assert!(normalize_amount(&AmountInput::Number(f64::INFINITY), max()).is_err());
    }

    #[test]
    fn test_normalize_rejects_non_positive() {
        assert!(normalize_amount(&AmountInput::Number(0.0), max()).is_err());
        assert!(normalize_amount(&AmountInput::Number(-5.0), max()).is_err());
    }

    #[test]
    fn test_normalize_rejects_over_max() {
        assert!(normalize_amount(&AmountInput::Number(1_000_001.0), max()).is_err());
    }

    #[test]
    fn test_normalize_rejects_garbage_string() {
        assert!(normalize_amount(&AmountInput::Text("abc".to_string()), max()).is_err());
    }
}
// endregion: --- Tests
