/// 환경 변수 기반 설정
// region:    --- Imports
use std::time::Duration;

// endregion: --- Imports

// region:    --- Config
/// 서버 전역 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 리슨 주소 (예: 0.0.0.0:3000)
    pub listen_address: String,
    /// Postgres 접속 URL
    pub store_url: String,
    /// Redis 접속 URL
    pub hot_state_url: String,
    /// Kafka 브로커 주소
    pub event_bus_brokers: String,
    /// 세션 토큰 서명 키
    pub jwt_signing_key: String,
    /// (userId, auctionId) 별 윈도우 내 허용 입찰 횟수
    pub bid_rate_limit_count: u32,
    /// 입찰 레이트 리밋 윈도우
    pub bid_rate_window: Duration,
    /// 커넥션 당 동시 처리 메시지 상한
    pub connection_inflight_cap: usize,
    /// 스케줄러 스윕 주기
    pub scheduler_tick: Duration,
    /// 입찰 금액 상한
    pub max_bid_amount: rust_decimal::Decimal,
    /// 세션 프레즌스 TTL
    pub session_ttl: Duration,
}

impl Config {
    /// 환경 변수에서 설정 로드 (필수 값 없으면 기본값 사용)
    pub fn from_env() -> Self {
        Self {
            listen_address: env_or("LISTEN_ADDRESS", "0.0.0.0:3000"),
            store_url: std::env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            hot_state_url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
            event_bus_brokers: env_or("KAFKA_BROKERS", "localhost:9092"),
            jwt_signing_key: std::env::var("JWT_SIGNING_KEY")
                .expect("JWT_SIGNING_KEY must be set"),
            bid_rate_limit_count: env_parse("BID_RATE_LIMIT_COUNT", 5),
            bid_rate_window: Duration::from_secs(env_parse("BID_RATE_WINDOW_SEC", 30)),
            connection_inflight_cap: env_parse("CONNECTION_INFLIGHT_CAP", 10),
            scheduler_tick: Duration::from_secs(env_parse("SCHEDULER_TICK_SEC", 30)),
            max_bid_amount: env_or("MAX_BID_AMOUNT", "1000000000")
                .parse()
                .expect("MAX_BID_AMOUNT must be a decimal"),
            session_ttl: Duration::from_secs(env_parse("SESSION_TTL_SEC", 7200)),
        }
    }
}

/// 환경 변수 조회, 없으면 기본값
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// 환경 변수 파싱, 없으면 기본값
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(v) => v.parse().unwrap_or(default),
        Err(_) => default,
    }
}
// endregion: --- Config
