/// Redis 핫 스테이트: 최고가 캐시, 이력 테일, 세션 프레즌스, 레이트 카운터, pub/sub
/// 모든 연산은 best-effort: 실패는 로그만 남기고 입찰 수락을 막지 않는다 (Store 가 진실 원천)
// region:    --- Imports
use crate::auction::events::RelayEnvelope;
use crate::auction::model::BidSummary;
use crate::config::Config;
use crate::error::HotStateError;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

// endregion: --- Imports

// region:    --- Keys & Channels
// 최고가 캐시: auction:{id}:highest
const HIGHEST_TTL_SECS: u64 = 3600;
// 이력 테일: auction:{id}:history (표시 전용, 최신 50건)
const HISTORY_MAX: isize = 50;
const HISTORY_TTL_SECS: i64 = 7 * 24 * 3600;

/// 글로벌 캐시 무효화 채널
pub const GLOBAL_CHANNEL: &str = "bid:global";
/// 레플리카 간 팬아웃 채널 패턴
pub const BID_CHANNEL_PATTERN: &str = "auction:*:bids";

fn highest_key(auction_id: Uuid) -> String {
    format!("auction:{}:highest", auction_id)
}

fn history_key(auction_id: Uuid) -> String {
    format!("auction:{}:history", auction_id)
}

fn session_key(user_id: Uuid) -> String {
    format!("session:{}", user_id)
}

fn rate_key(user_id: Uuid, auction_id: Uuid) -> String {
    format!("rate_limit:{}:{}", user_id, auction_id)
}

/// 경매 별 팬아웃 채널 이름
pub fn bid_channel(auction_id: Uuid) -> String {
    format!("auction:{}:bids", auction_id)
}
// endregion: --- Keys & Channels

// region:    --- Session Meta
/// 세션 프레즌스 메타데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub user_id: Uuid,
    pub username: String,
    pub replica_id: Uuid,
    pub connected_at: chrono::DateTime<chrono::Utc>,
}
// endregion: --- Session Meta

// region:    --- Redis Manager
#[derive(Clone)]
pub struct RedisManager {
    client: redis::Client,
    session_ttl: Duration,
}

impl RedisManager {
    pub fn new(config: &Config) -> Result<Self, HotStateError> {
        let client = redis::Client::open(config.hot_state_url.as_str())?;
        Ok(Self {
            client,
            session_ttl: config.session_ttl,
        })
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, HotStateError> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn)
    }

    /// pub/sub 전용 커넥션 (중계 태스크에서 사용)
    pub async fn subscriber(&self) -> Result<redis::aio::PubSub, HotStateError> {
        let pubsub = self.client.get_async_pubsub().await?;
        Ok(pubsub)
    }

    // --- 최고가 캐시

    /// 최고가 캐시 갱신 (Store 커밋 이후에만 호출)
    pub async fn set_highest(&self, summary: &BidSummary) -> Result<(), HotStateError> {
        let mut conn = self.conn().await?;
        let json = serde_json::to_string(summary)?;
        conn.set_ex::<_, _, ()>(highest_key(summary.auction_id), json, HIGHEST_TTL_SECS)
            .await?;
        Ok(())
    }

    /// 최고가 캐시 조회 (미스 시 호출자가 Store 로 폴백)
    pub async fn get_highest(
        &self,
        auction_id: Uuid,
    ) -> Result<Option<BidSummary>, HotStateError> {
        let mut conn = self.conn().await?;
        let json: Option<String> = conn.get(highest_key(auction_id)).await?;
        match json {
            Some(j) => Ok(Some(serde_json::from_str(&j)?)),
            None => Ok(None),
        }
    }

    /// 최고가 캐시 제거 (경매 종료 시)
    pub async fn clear_highest(&self, auction_id: Uuid) -> Result<(), HotStateError> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(highest_key(auction_id)).await?;
        Ok(())
    }

    // --- 이력 테일

    /// 이력 테일에 추가, 50건 초과분 트림
    pub async fn push_history(&self, summary: &BidSummary) -> Result<(), HotStateError> {
        let mut conn = self.conn().await?;
        let json = serde_json::to_string(summary)?;
        let key = history_key(summary.auction_id);
        redis::pipe()
            .lpush(&key, json)
            .ltrim(&key, 0, HISTORY_MAX - 1)
            .expire(&key, HISTORY_TTL_SECS)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// 이력 테일 조회 (표시 전용)
    pub async fn get_history(
        &self,
        auction_id: Uuid,
        limit: isize,
    ) -> Result<Vec<BidSummary>, HotStateError> {
        let mut conn = self.conn().await?;
        let entries: Vec<String> = conn
            .lrange(history_key(auction_id), 0, limit - 1)
            .await?;
        let mut bids = Vec::with_capacity(entries.len());
        for entry in entries {
            bids.push(serde_json::from_str(&entry)?);
        }
        Ok(bids)
    }

    // --- 세션 프레즌스

    pub async fn set_session(&self, meta: &SessionMeta) -> Result<(), HotStateError> {
        let mut conn = self.conn().await?;
        let json = serde_json::to_string(meta)?;
        conn.set_ex::<_, _, ()>(session_key(meta.user_id), json, self.session_ttl.as_secs())
            .await?;
        Ok(())
    }

    pub async fn get_session(
        &self,
        user_id: Uuid,
    ) -> Result<Option<SessionMeta>, HotStateError> {
        let mut conn = self.conn().await?;
        let json: Option<String> = conn.get(session_key(user_id)).await?;
        match json {
            Some(j) => Ok(Some(serde_json::from_str(&j)?)),
            None => Ok(None),
        }
    }

    pub async fn clear_session(&self, user_id: Uuid) -> Result<(), HotStateError> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(session_key(user_id)).await?;
        Ok(())
    }

    // --- 레이트 카운터

    /// 슬라이딩 윈도우 카운터 증가, 새 카운트 반환
    /// 첫 증가 시 만료 = window, 카운트가 2×limit 초과 시 만료를 5×window 로 연장
    pub async fn incr_rate(
        &self,
        user_id: Uuid,
        auction_id: Uuid,
        window: Duration,
        limit: u32,
    ) -> Result<u64, HotStateError> {
        let mut conn = self.conn().await?;
        let key = rate_key(user_id, auction_id);
        let count: u64 = conn.incr(&key, 1).await?;

        if count == 1 {
            let _: bool = conn.expire(&key, window.as_secs() as i64).await?;
        } else if count > (2 * limit) as u64 {
            // 반복 위반자 페널티: 윈도우 5배 연장
            let _: bool = conn.expire(&key, (window.as_secs() * 5) as i64).await?;
            debug!(
                "{:<12} --> 레이트 리밋 페널티 연장: user={} auction={}",
                "HotState", user_id, auction_id
            );
        }
        Ok(count)
    }

    // --- pub/sub

    /// 경매 채널로 중계 이벤트 발행 (레플리카 간 팬아웃)
    pub async fn publish_relay(
        &self,
        auction_id: Uuid,
        envelope: &RelayEnvelope,
    ) -> Result<(), HotStateError> {
        let mut conn = self.conn().await?;
        let json = serde_json::to_string(envelope)?;
        let _: i64 = conn.publish(bid_channel(auction_id), json).await?;
        Ok(())
    }

    /// 글로벌 채널로 캐시 무효화 통지
    pub async fn publish_global(&self, payload: &str) -> Result<(), HotStateError> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.publish(GLOBAL_CHANNEL, payload).await?;
        Ok(())
    }
}
// endregion: --- Redis Manager

// endregion: --- Tests
