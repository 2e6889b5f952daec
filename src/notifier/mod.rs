/// 알림 파이프라인
/// auction.ended 소비 → notify.user 발행 → 전달 싱크 (키 기반 멱등)
// region:    --- Imports
use crate::auction::events::{AuctionEndedEvent, NotificationKind, UserNotification};
use crate::gateway::protocol::ServerMessage;
use crate::hot_state::RedisManager;
use crate::message_broker::{
    KafkaConsumer, KafkaProducer, TOPIC_AUCTION_EVENTS, TOPIC_NOTIFICATIONS,
};
use crate::rooms::{RoomHub, SessionRegistry};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

// endregion: --- Imports

// region:    --- Fan-out
/// 알림 멱등 키: (auctionId, recipient|room, kind)
fn notification_key(
    auction_id: Uuid,
    recipient_id: Option<Uuid>,
    kind: NotificationKind,
) -> String {
    let recipient = recipient_id
        .map(|u| u.to_string())
        .unwrap_or_else(|| "room".to_string());
    format!("{}:{}:{}", auction_id, recipient, kind.as_str())
}

/// 종료 이벤트를 수신자 별 알림으로 전개
fn build_notifications(event: &AuctionEndedEvent) -> Vec<UserNotification> {
    match event.winner_id {
        Some(winner) => {
            let mut out = vec![UserNotification {
                auction_id: event.auction_id,
                recipient_id: Some(winner),
                kind: NotificationKind::Won,
                payload: json!({
                    "auctionId": event.auction_id,
                    "winningAmount": event.winning_amount,
                    "message": "축하합니다! 경매에서 낙찰되었습니다.",
                }),
            }];
            for participant in &event.participants {
                if *participant == winner {
                    continue;
                }
                out.push(UserNotification {
                    auction_id: event.auction_id,
                    recipient_id: Some(*participant),
                    kind: NotificationKind::Lost,
                    payload: json!({
                        "auctionId": event.auction_id,
                        "winningAmount": event.winning_amount,
                        "message": "경매가 종료되었습니다. 아쉽게도 낙찰받지 못했습니다.",
                    }),
                });
            }
            out
        }
        // 입찰이 없었던 경매: 룸 전체 브로드캐스트 1건
        None => vec![UserNotification {
            auction_id: event.auction_id,
            recipient_id: None,
            kind: NotificationKind::NoBidsWatcher,
            payload: json!({
                "auctionId": event.auction_id,
                "message": "입찰 없이 경매가 종료되었습니다.",
            }),
        }],
    }
}
// endregion: --- Fan-out

// region:    --- Notification Dispatcher
/// auction.ended 소비자: 수신자를 풀어 notify.user 스트림으로 발행
pub struct NotificationDispatcher {
    producer: Arc<KafkaProducer>,
    consumer: KafkaConsumer,
}

impl NotificationDispatcher {
    pub fn new(producer: Arc<KafkaProducer>, consumer: KafkaConsumer) -> Self {
        Self { producer, consumer }
    }

    /// 소비 시작
    pub async fn start(&self) {
        let producer = Arc::clone(&self.producer);
        if let Err(e) = self
            .consumer
            .consume_json::<AuctionEndedEvent, _, _>(TOPIC_AUCTION_EVENTS, move |event| {
                let producer = Arc::clone(&producer);
                async move { Self::handle_auction_ended(producer, event).await }
            })
            .await
        {
            warn!("{:<12} --> auction.ended 소비 종료: {:?}", "Notifier", e);
        }
    }

    async fn handle_auction_ended(
        producer: Arc<KafkaProducer>,
        event: AuctionEndedEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(
            "{:<12} --> 종료 이벤트 수신: auction={} participants={}",
            "Notifier",
            event.auction_id,
            event.participants.len()
        );

        for notification in build_notifications(&event) {
            let key = notification_key(
                notification.auction_id,
                notification.recipient_id,
                notification.kind,
            );
            producer
                .publish_json(TOPIC_NOTIFICATIONS, &key, &notification)
                .await?;
        }
        Ok(())
    }
}
// endregion: --- Notification Dispatcher

// region:    --- Notification Deliverer
/// notify.user 소비자: 멱등 싱크에 기록하고 라이브 세션에 전달
pub struct NotificationDeliverer {
    pool: Arc<PgPool>,
    registry: Arc<SessionRegistry>,
    hub: Arc<RoomHub>,
    redis: RedisManager,
    consumer: KafkaConsumer,
}

impl NotificationDeliverer {
    pub fn new(
        pool: Arc<PgPool>,
        registry: Arc<SessionRegistry>,
        hub: Arc<RoomHub>,
        redis: RedisManager,
        consumer: KafkaConsumer,
    ) -> Self {
        Self {
            pool,
            registry,
            hub,
            redis,
            consumer,
        }
    }

    /// 소비 시작
    pub async fn start(&self) {
        let pool = Arc::clone(&self.pool);
        let registry = Arc::clone(&self.registry);
        let hub = Arc::clone(&self.hub);
        let redis = self.redis.clone();
        if let Err(e) = self
            .consumer
            .consume_json::<UserNotification, _, _>(TOPIC_NOTIFICATIONS, move |notification| {
                let pool = Arc::clone(&pool);
                let registry = Arc::clone(&registry);
                let hub = Arc::clone(&hub);
                let redis = redis.clone();
                async move { Self::deliver(pool, registry, hub, redis, notification).await }
            })
            .await
        {
            warn!("{:<12} --> notify.user 소비 종료: {:?}", "Notifier", e);
        }
    }

    async fn deliver(
        pool: Arc<PgPool>,
        registry: Arc<SessionRegistry>,
        hub: Arc<RoomHub>,
        redis: RedisManager,
        notification: UserNotification,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // 멱등 싱크: 같은 키의 중복 메시지는 폐기
        let inserted: Option<i64> = sqlx::query_scalar(
            "INSERT INTO notifications (auction_id, recipient_id, kind, payload)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT DO NOTHING
             RETURNING id",
        )
        .bind(notification.auction_id)
        .bind(notification.recipient_id)
        .bind(notification.kind.as_str())
        .bind(&notification.payload)
        .fetch_optional(&*pool)
        .await?;

        let Some(row_id) = inserted else {
            debug!(
                "{:<12} --> 중복 알림 폐기: auction={} kind={}",
                "Notifier",
                notification.auction_id,
                notification.kind.as_str()
            );
            return Ok(());
        };

        // 라이브 세션 전달 (없으면 미전달 상태로 남아 재시도 대상)
        let msg = ServerMessage::UserNotification {
            kind: notification.kind,
            payload: notification.payload.clone(),
        };
        let delivered = match notification.recipient_id {
            Some(user_id) => {
                let sessions = registry.sessions_for_user(user_id);
                let mut sent = false;
                for session in &sessions {
                    sent |= session.send(&msg).is_ok();
                }
                if !sent {
                    // 이 레플리카에 세션이 없다: 프레즌스로 온라인 여부만 기록하고
                    // 미전달 행은 재시도 대상으로 남긴다
                    match redis.get_session(user_id).await {
                        Ok(Some(meta)) => debug!(
                            "{:<12} --> 수신자가 다른 레플리카에 연결됨: user={} replica={}",
                            "Notifier", user_id, meta.replica_id
                        ),
                        _ => debug!(
                            "{:<12} --> 수신자 오프라인, 미전달 보관: user={}",
                            "Notifier", user_id
                        ),
                    }
                }
                sent
            }
            // 수신자 미지정: 경매 룸 브로드캐스트
            None => {
                hub.broadcast(notification.auction_id, &msg);
                true
            }
        };

        if delivered {
            sqlx::query("UPDATE notifications SET delivered = TRUE WHERE id = $1")
                .bind(row_id)
                .execute(&*pool)
                .await?;
        }
        Ok(())
    }
}
// endregion: --- Notification Deliverer

// endregion: --- Tests
