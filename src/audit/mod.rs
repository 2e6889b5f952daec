/// 입찰 감사 싱크: bid.audit 스트림을 소비해 감사 로그 테이블에 적재
/// bidId 키 멱등: 브로커 재전달로 중복이 와도 1건만 남는다
// region:    --- Imports
use crate::auction::events::BidAuditEvent;
use crate::message_broker::{KafkaConsumer, TOPIC_AUDIT};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, warn};

// endregion: --- Imports

// region:    --- Audit Consumer
pub struct AuditConsumer {
    pool: Arc<PgPool>,
    consumer: KafkaConsumer,
}

impl AuditConsumer {
    pub fn new(pool: Arc<PgPool>, consumer: KafkaConsumer) -> Self {
        Self { pool, consumer }
    }

    /// 소비 시작
    pub async fn start(&self) {
        let pool = Arc::clone(&self.pool);
        if let Err(e) = self
            .consumer
            .consume_json::<BidAuditEvent, _, _>(TOPIC_AUDIT, move |event| {
                let pool = Arc::clone(&pool);
                async move { Self::record(pool, event).await }
            })
            .await
        {
            warn!("{:<12} --> bid.audit 소비 종료: {:?}", "Audit", e);
        }
    }

    async fn record(
        pool: Arc<PgPool>,
        event: BidAuditEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let result = sqlx::query(
            "INSERT INTO bid_audit_log (bid_id, auction_id, user_id, amount, bid_timestamp)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (bid_id) DO NOTHING",
        )
        .bind(event.bid_id)
        .bind(event.auction_id)
        .bind(event.user_id)
        .bind(event.amount)
        .bind(event.timestamp)
        .execute(&*pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!("{:<12} --> 중복 감사 이벤트 폐기: bid={}", "Audit", event.bid_id);
        }
        Ok(())
    }
}
// endregion: --- Audit Consumer
