/// 서브시스템 별 오류 타입
// region:    --- Imports
use thiserror::Error;

// endregion: --- Imports

// region:    --- Store Error
/// 저장소 오류
#[derive(Debug, Error)]
pub enum StoreError {
    /// 경매 없음
    #[error("경매를 찾을 수 없습니다")]
    AuctionNotFound,

    /// 경매가 ACTIVE 상태가 아님 (ENDED/CANCELLED)
    #[error("경매가 활성 상태가 아닙니다")]
    AuctionNotActive,

    /// 경매 종료 시각 경과
    #[error("경매가 이미 종료되었습니다")]
    AuctionEnded,

    /// 현재 최고가 이하 입찰
    #[error("입찰 금액이 현재 최고가({current}) 이하입니다")]
    BidTooLow { current: rust_decimal::Decimal },

    /// 자기 최고가 재입찰
    #[error("이미 최고 입찰자입니다")]
    SelfOutbid,

    /// 재시도 후에도 실패한 일시적 오류
    #[error("일시적 저장소 오류: 재시도 한도 초과")]
    RetriesExhausted,

    #[error("데이터베이스 오류: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl StoreError {
    /// 데드락/직렬화 실패 여부 (SQLSTATE 40001, 40P01)
    pub fn is_transient(err: &sqlx::Error) -> bool {
        if let sqlx::Error::Database(db) = err {
            matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
        } else {
            false
        }
    }
}
// endregion: --- Store Error

// region:    --- Bid Rejection
/// 클라이언트에 내려가는 입찰 거절 코드
pub const CODE_RATE_LIMIT: &str = "RATE_LIMIT_EXCEEDED";
pub const CODE_INVALID_AMOUNT: &str = "INVALID_AMOUNT";
pub const CODE_VALIDATION: &str = "BID_VALIDATION_ERROR";

/// 입찰 거절 사유
#[derive(Debug, Error)]
pub enum BidRejection {
    /// 레이트 리밋 초과
    #[error("입찰 횟수 제한을 초과했습니다. 잠시 후 다시 시도하세요")]
    RateLimited,

    /// 금액 파싱/범위 오류
    #[error("유효하지 않은 입찰 금액입니다: {0}")]
    InvalidAmount(String),

    /// 저장소 검증 실패
    #[error("{0}")]
    Validation(String),
}

impl BidRejection {
    /// 와이어 오류 코드
    pub fn code(&self) -> &'static str {
        match self {
            BidRejection::RateLimited => CODE_RATE_LIMIT,
            BidRejection::InvalidAmount(_) => CODE_INVALID_AMOUNT,
            BidRejection::Validation(_) => CODE_VALIDATION,
        }
    }
}

impl From<StoreError> for BidRejection {
    fn from(err: StoreError) -> Self {
        match err {
            // BidTooLow 는 금액 문제로 분류
            StoreError::BidTooLow { .. } => BidRejection::InvalidAmount(err.to_string()),
            other => BidRejection::Validation(other.to_string()),
        }
    }
}
// endregion: --- Bid Rejection

// region:    --- Hot State Error
/// Redis 핫 스테이트 오류 (모든 호출자는 로그 후 계속 진행)
#[derive(Debug, Error)]
pub enum HotStateError {
    #[error("Redis 오류: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON 오류: {0}")]
    Json(#[from] serde_json::Error),
}
// endregion: --- Hot State Error

// region:    --- Broker Error
/// Kafka 이벤트 버스 오류
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Kafka 오류: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("JSON 오류: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Kafka 초기화 실패: {0}")]
    Init(String),
}
// endregion: --- Broker Error

// region:    --- Gateway Error
/// 세션 게이트웨이 오류
#[derive(Debug, Error)]
pub enum GatewayError {
    /// 핸드셰이크 인증 실패
    #[error("인증 실패: {0}")]
    Unauthenticated(String),

    /// 알 수 없는 메시지 종류 포함 파싱 오류
    #[error("메시지 파싱 오류: {0}")]
    Json(#[from] serde_json::Error),

    /// 커넥션 당 동시 처리 상한 초과
    #[error("동시 처리 가능한 요청 수를 초과했습니다")]
    InflightExceeded,

    /// 요청 데드라인 초과
    #[error("요청 처리 시간이 초과되었습니다")]
    Timeout,

    #[error(transparent)]
    Store(#[from] StoreError),
}
// endregion: --- Gateway Error
