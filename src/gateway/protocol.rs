/// 와이어 프로토콜: 종류 태그가 붙은 메시지 정의
/// 알 수 없는 종류는 역직렬화 단계에서 거부된다
// region:    --- Imports
use crate::auction::events::NotificationKind;
use crate::auction::model::{AuctionSnapshot, BidSummary};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// endregion: --- Imports

// region:    --- Client Messages
/// 입찰 금액 입력: 숫자 또는 문자열 둘 다 허용
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Number(f64),
    Text(String),
}

/// 클라이언트 → 서버
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    JoinAuction { auction_id: Uuid },
    #[serde(rename_all = "camelCase")]
    PlaceBid {
        auction_id: Uuid,
        amount: AmountInput,
    },
    #[serde(rename_all = "camelCase")]
    GetBidHistory { auction_id: Uuid },
}
// endregion: --- Client Messages

// region:    --- Server Messages
/// 서버 → 클라이언트
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Connected { user_id: Uuid, username: String },
    #[serde(rename_all = "camelCase")]
    JoinedAuction {
        auction_id: Uuid,
        snapshot: AuctionSnapshot,
    },
    #[serde(rename_all = "camelCase")]
    CurrentHighestBid {
        amount: Decimal,
        user_id: Uuid,
        username: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    NewBid {
        bid_id: Uuid,
        auction_id: Uuid,
        amount: Decimal,
        user_id: Uuid,
        username: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    BidPlaced { bid_id: Uuid, amount: Decimal },
    #[serde(rename_all = "camelCase")]
    BidError { code: String, message: String },
    #[serde(rename_all = "camelCase")]
    BidHistory {
        auction_id: Uuid,
        bids: Vec<BidSummary>,
    },
    #[serde(rename_all = "camelCase")]
    AuctionEnded {
        auction_id: Uuid,
        winner_user_id: Option<Uuid>,
        winning_amount: Option<Decimal>,
    },
    #[serde(rename_all = "camelCase")]
    UserNotification {
        kind: NotificationKind,
        payload: serde_json::Value,
    },
    Error { message: String },
}

impl ServerMessage {
    /// 수락된 입찰 요약으로 newBid 이벤트 구성
    pub fn new_bid(bid: &BidSummary) -> Self {
        ServerMessage::NewBid {
            bid_id: bid.bid_id,
            auction_id: bid.auction_id,
            amount: bid.amount,
            user_id: bid.user_id,
            username: bid.username.clone(),
            timestamp: bid.timestamp,
        }
    }
}
// endregion: --- Server Messages

// region:    --- Tests
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_place_bid_amount_number_and_string() {
        let n: ClientMessage = serde_json::from_str(
            r#"{"type":"placeBid","auctionId":"00000000-0000-0000-0000-000000000000","amount":150}"#,
        )
        .unwrap();
        assert!(matches!(
            n,
            ClientMessage::PlaceBid {
                amount: AmountInput::Number(_),
                ..
            }
        ));

        let s: ClientMessage = serde_json::from_str(
            r#"{"type":"placeBid","auctionId":"00000000-0000-0000-0000-000000000000","amount":"150.50"}"#,
        )
        .unwrap();
        assert!(matches!(
            s,
            ClientMessage::PlaceBid {
                amount: AmountInput::Text(_),
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result = serde_json::from_str::<ClientMessage>(
            r#"{"type":"retractBid","auctionId":"00000000-0000-0000-0000-000000000000"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_server_message_wire_shape() {
        let msg = ServerMessage::BidError {
            code: crate::error::CODE_RATE_LIMIT.to_string(),
            message: "제한 초과".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "bidError");
        assert_eq!(json["code"], "RATE_LIMIT_EXCEEDED");
    }
}
// endregion: --- Tests
