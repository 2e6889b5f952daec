//! 통합 테스트: 실행 중인 서버(기본 127.0.0.1:3000)와
//! DATABASE_URL / REDIS_URL / KAFKA_BROKERS 환경을 전제로 한다.
//! 토큰 서명 키는 서버와 같은 JWT_SIGNING_KEY 를 사용해야 한다.

use auction_engine::auction::model::Auction;
use auction_engine::config::Config;
use auction_engine::database::DatabaseManager;
use auction_engine::gateway::auth::TokenSigner;
use auction_engine::store::Store;
use chrono::{Duration as ChronoDuration, Utc};
use futures::{SinkExt, StreamExt};
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const BASE_URL: &str = "http://127.0.0.1:3000";
const WS_URL: &str = "ws://127.0.0.1:3000/ws";

/// 테스트 환경 기본값 설정
fn ensure_test_env() {
    if std::env::var("JWT_SIGNING_KEY").is_err() {
        std::env::set_var(
            "JWT_SIGNING_KEY",
            "auction_engine_test_signing_key_0123456789",
        );
    }
}

/// 데이터베이스 매니저 설정
async fn setup() -> (Arc<DatabaseManager>, Store) {
    ensure_test_env();
    let config = Config::from_env();
    let db_manager = Arc::new(
        DatabaseManager::new(&config)
            .await
            .expect("데이터베이스 연결 실패"),
    );
    let store = Store::new(Arc::clone(&db_manager));
    (db_manager, store)
}

/// 테스트용 사용자 생성
async fn create_test_user(store: &Store, prefix: &str) -> auction_engine::auction::model::User {
    let suffix = Uuid::new_v4().simple().to_string();
    store
        .create_user(
            &format!("{}_{}", prefix, &suffix[..8]),
            &format!("{}_{}@test.local", prefix, &suffix[..8]),
        )
        .await
        .expect("사용자 생성 실패")
}

/// 테스트용 경매 생성 (REST 관리 엔드포인트 사용)
async fn create_test_auction(client: &Client, starting_bid: i64, duration_secs: i64) -> Auction {
    let now = Utc::now();
    let spec = json!({
        "itemId": format!("item-{}", Uuid::new_v4()),
        "startTime": now,
        "endTime": now + ChronoDuration::seconds(duration_secs),
        "startingBid": starting_bid,
    });

    let response = client
        .post(format!("{}/auctions", BASE_URL))
        .json(&spec)
        .send()
        .await
        .expect("경매 생성 요청 실패");
    assert!(response.status().is_success());
    response.json().await.expect("경매 응답 파싱 실패")
}

/// 토큰 발급 (서버와 같은 서명 키)
fn issue_token(user_id: Uuid, username: &str) -> String {
    ensure_test_env();
    let signer = TokenSigner::new(std::env::var("JWT_SIGNING_KEY").unwrap());
    signer.issue(user_id, username, 3600).expect("토큰 발급 실패")
}

/// WebSocket 접속: connected 메시지까지 확인
async fn connect_session(user_id: Uuid, username: &str) -> WsClient {
    let token = issue_token(user_id, username);
    let (mut ws, _) = connect_async(format!("{}?token={}", WS_URL, token))
        .await
        .expect("WebSocket 접속 실패");

    let connected = next_message(&mut ws, Duration::from_secs(5)).await;
    assert_eq!(connected["type"], "connected");
    assert_eq!(connected["userId"], user_id.to_string());
    ws
}

/// 다음 JSON 메시지 수신 (ping 등 제어 프레임은 건너뜀)
async fn next_message(ws: &mut WsClient, limit: Duration) -> Value {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let frame = timeout(remaining, ws.next())
            .await
            .expect("메시지 수신 타임아웃")
            .expect("커넥션 종료")
            .expect("소켓 오류");
        match frame {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("JSON 파싱 실패");
            }
            Message::Ping(data) => {
                let _ = ws.send(Message::Pong(data)).await;
            }
            _ => {}
        }
    }
}

/// 특정 종류의 메시지가 올 때까지 수신
async fn wait_for(ws: &mut WsClient, kind: &str, limit: Duration) -> Value {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        assert!(
            !remaining.is_zero(),
            "{} 메시지를 기다리다 타임아웃",
            kind
        );
        let msg = next_message(ws, remaining).await;
        if msg["type"] == kind {
            return msg;
        }
    }
}

/// auctionEnded 와 userNotification 을 순서와 무관하게 수신
async fn collect_end_and_notification(ws: &mut WsClient, limit: Duration) -> (Value, Value) {
    let deadline = tokio::time::Instant::now() + limit;
    let mut ended = None;
    let mut notification = None;
    while ended.is_none() || notification.is_none() {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        assert!(!remaining.is_zero(), "종료 이벤트/알림 수신 타임아웃");
        let msg = next_message(ws, remaining).await;
        match msg["type"].as_str() {
            Some("auctionEnded") => ended = Some(msg),
            Some("userNotification") => notification = Some(msg),
            _ => {}
        }
    }
    (ended.unwrap(), notification.unwrap())
}

/// 룸 입장 후 스냅샷 회신 확인
async fn join_auction(ws: &mut WsClient, auction_id: Uuid) -> Value {
    ws.send(Message::Text(
        json!({"type": "joinAuction", "auctionId": auction_id}).to_string(),
    ))
    .await
    .expect("joinAuction 전송 실패");
    wait_for(ws, "joinedAuction", Duration::from_secs(5)).await
}

/// 입찰 전송 후 bidPlaced/bidError 회신 수신
async fn place_bid(ws: &mut WsClient, auction_id: Uuid, amount: i64) -> Value {
    ws.send(Message::Text(
        json!({"type": "placeBid", "auctionId": auction_id, "amount": amount}).to_string(),
    ))
    .await
    .expect("placeBid 전송 실패");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let msg = next_message(ws, remaining).await;
        if msg["type"] == "bidPlaced" || msg["type"] == "bidError" {
            return msg;
        }
    }
}

fn amount_of(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("금액 파싱 실패"),
        Value::Number(n) => n.to_string().parse().expect("금액 파싱 실패"),
        other => panic!("금액 형식이 아님: {:?}", other),
    }
}

/// 해피 패스: 입찰 수락 → 본인 bidPlaced + 룸 전체 newBid + Store 반영
#[tokio::test]
async fn test_happy_path_bid() {
    let (_db, store) = setup().await;
    let client = Client::new();

    let auction = create_test_auction(&client, 100, 60).await;
    let bidder = create_test_user(&store, "bidder").await;
    let watcher = create_test_user(&store, "watcher").await;

    let mut bidder_ws = connect_session(bidder.id, &bidder.username).await;
    let mut watcher_ws = connect_session(watcher.id, &watcher.username).await;
    join_auction(&mut bidder_ws, auction.id).await;
    join_auction(&mut watcher_ws, auction.id).await;

    let reply = place_bid(&mut bidder_ws, auction.id, 150).await;
    assert_eq!(reply["type"], "bidPlaced");
    assert_eq!(amount_of(&reply["amount"]), Decimal::from(150));

    // 룸 멤버 전원이 newBid 를 받는다
    let new_bid = wait_for(&mut watcher_ws, "newBid", Duration::from_secs(5)).await;
    assert_eq!(amount_of(&new_bid["amount"]), Decimal::from(150));
    assert_eq!(new_bid["userId"], bidder.id.to_string());
    assert_eq!(new_bid["auctionId"], auction.id.to_string());

    // Store 가 진실 원천: 최고가 반영 + 내구 입찰 행 존재 (고스트 입찰 없음)
    let stored = store.get_auction(auction.id).await.unwrap().unwrap();
    assert_eq!(stored.current_highest_bid, Decimal::from(150));
    let bids = store.list_bids(auction.id, 10).await.unwrap();
    assert_eq!(bids.len(), 1);
    assert_eq!(bids[0].bid_id.to_string(), new_bid["bidId"]);
}

/// 현재가 이하 입찰 거절, Store 불변
#[tokio::test]
async fn test_low_bid_rejected() {
    let (_db, store) = setup().await;
    let client = Client::new();

    let auction = create_test_auction(&client, 100, 60).await;
    let u1 = create_test_user(&store, "low1").await;
    let u2 = create_test_user(&store, "low2").await;

    let mut ws1 = connect_session(u1.id, &u1.username).await;
    let mut ws2 = connect_session(u2.id, &u2.username).await;
    join_auction(&mut ws1, auction.id).await;
    join_auction(&mut ws2, auction.id).await;

    let accepted = place_bid(&mut ws1, auction.id, 150).await;
    assert_eq!(accepted["type"], "bidPlaced");

    // 같은 금액은 거절
    let rejected = place_bid(&mut ws2, auction.id, 150).await;
    assert_eq!(rejected["type"], "bidError");
    let code = rejected["code"].as_str().unwrap();
    assert!(code == "INVALID_AMOUNT" || code == "BID_VALIDATION_ERROR");

    let stored = store.get_auction(auction.id).await.unwrap().unwrap();
    assert_eq!(stored.current_highest_bid, Decimal::from(150));
    assert_eq!(store.list_bids(auction.id, 10).await.unwrap().len(), 1);
}

/// 자기 최고가 재입찰 거절
#[tokio::test]
async fn test_self_outbid_rejected() {
    let (_db, store) = setup().await;
    let client = Client::new();

    let auction = create_test_auction(&client, 100, 60).await;
    let u1 = create_test_user(&store, "self").await;

    let mut ws = connect_session(u1.id, &u1.username).await;
    join_auction(&mut ws, auction.id).await;

    let first = place_bid(&mut ws, auction.id, 150).await;
    assert_eq!(first["type"], "bidPlaced");

    // 이미 최고 입찰자인데 더 올리는 것은 거절
    let second = place_bid(&mut ws, auction.id, 200).await;
    assert_eq!(second["type"], "bidError");
    assert_eq!(second["code"], "BID_VALIDATION_ERROR");

    let stored = store.get_auction(auction.id).await.unwrap().unwrap();
    assert_eq!(stored.current_highest_bid, Decimal::from(150));
}

/// 레이트 리밋: 윈도우 내 6번째 요청은 RATE_LIMIT_EXCEEDED
#[tokio::test]
async fn test_rate_limit() {
    let (_db, store) = setup().await;
    let client = Client::new();

    let auction = create_test_auction(&client, 100, 60).await;
    // 자기 최고가 재입찰에 걸리지 않도록 두 명이 번갈아 입찰
    let u3 = create_test_user(&store, "rate3").await;
    let u4 = create_test_user(&store, "rate4").await;

    let mut ws3 = connect_session(u3.id, &u3.username).await;
    let mut ws4 = connect_session(u4.id, &u4.username).await;
    join_auction(&mut ws3, auction.id).await;
    join_auction(&mut ws4, auction.id).await;

    // u3 의 처음 5번은 내용으로 평가된다 (번갈아 가며 유효 입찰)
    let mut amount = 100;
    for _ in 0..5 {
        amount += 100;
        let r3 = place_bid(&mut ws3, auction.id, amount).await;
        assert_eq!(r3["type"], "bidPlaced");
        amount += 100;
        let r4 = place_bid(&mut ws4, auction.id, amount).await;
        assert_eq!(r4["type"], "bidPlaced");
    }

    // u3 의 6번째는 윈도우 내 초과
    amount += 100;
    let sixth = place_bid(&mut ws3, auction.id, amount).await;
    assert_eq!(sixth["type"], "bidError");
    assert_eq!(sixth["code"], "RATE_LIMIT_EXCEEDED");
}

/// 동시 동일 금액 입찰: 정확히 하나만 수락
#[tokio::test]
async fn test_concurrent_same_amount_bids() {
    let (_db, store) = setup().await;
    let client = Client::new();

    let auction = create_test_auction(&client, 100, 60).await;
    let u4 = create_test_user(&store, "con4").await;
    let u5 = create_test_user(&store, "con5").await;

    let mut ws4 = connect_session(u4.id, &u4.username).await;
    let mut ws5 = connect_session(u5.id, &u5.username).await;
    join_auction(&mut ws4, auction.id).await;
    join_auction(&mut ws5, auction.id).await;

    let (r4, r5) = tokio::join!(
        place_bid(&mut ws4, auction.id, 200),
        place_bid(&mut ws5, auction.id, 200)
    );

    let accepted = [&r4, &r5]
        .iter()
        .filter(|r| r["type"] == "bidPlaced")
        .count();
    let rejected = [&r4, &r5]
        .iter()
        .filter(|r| r["type"] == "bidError")
        .count();
    assert_eq!(accepted, 1, "정확히 하나만 수락되어야 한다: {:?} {:?}", r4, r5);
    assert_eq!(rejected, 1);

    let stored = store.get_auction(auction.id).await.unwrap().unwrap();
    assert_eq!(stored.current_highest_bid, Decimal::from(200));
    assert_eq!(store.list_bids(auction.id, 10).await.unwrap().len(), 1);
}

/// 예약 종료: 스케줄러가 종료시키고 승자/패자 알림이 전달된다
#[tokio::test]
async fn test_scheduled_end_with_winner() {
    let (_db, store) = setup().await;
    let client = Client::new();

    let auction = create_test_auction(&client, 100, 3).await;
    let u6 = create_test_user(&store, "end6").await;
    let u7 = create_test_user(&store, "end7").await;

    let mut ws6 = connect_session(u6.id, &u6.username).await;
    let mut ws7 = connect_session(u7.id, &u7.username).await;
    join_auction(&mut ws6, auction.id).await;
    join_auction(&mut ws7, auction.id).await;

    assert_eq!(place_bid(&mut ws6, auction.id, 300).await["type"], "bidPlaced");
    assert_eq!(place_bid(&mut ws7, auction.id, 400).await["type"], "bidPlaced");

    // 스케줄러 틱 1번을 포함할 만큼 기다린다 (기본 30초 틱 + 여유)
    // auctionEnded 와 userNotification 의 도착 순서는 보장되지 않으므로 둘 다 모은다
    let wait = Duration::from_secs(45);
    let (ended6, lost) = collect_end_and_notification(&mut ws6, wait).await;
    assert_eq!(ended6["auctionId"], auction.id.to_string());
    assert_eq!(ended6["winnerUserId"], u7.id.to_string());
    assert_eq!(lost["kind"], "LOST");

    let (ended7, won) = collect_end_and_notification(&mut ws7, wait).await;
    assert_eq!(amount_of(&ended7["winningAmount"]), Decimal::from(400));
    assert_eq!(won["kind"], "WON");

    // Store 최종 상태
    let stored = store.get_auction(auction.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "ENDED");
    assert_eq!(stored.winner_id, Some(u7.id));
}

/// 온디맨드 종료 감지: 읽기 경로가 만료 경매를 종료시킨다
#[tokio::test]
async fn test_on_demand_end_detection() {
    let (_db, _store) = setup().await;
    let client = Client::new();

    let auction = create_test_auction(&client, 100, 1).await;
    tokio::time::sleep(Duration::from_millis(1500)).await;

    // 입찰 없는 만료 경매 조회 → ENDED, 승자 없음
    let response = client
        .get(format!("{}/auctions/{}", BASE_URL, auction.id))
        .send()
        .await
        .expect("경매 조회 실패");
    assert!(response.status().is_success());
    let body: Auction = response.json().await.unwrap();
    assert_eq!(body.status, "ENDED");
    assert_eq!(body.winner_id, None);
}

/// EndAuction 멱등성: 몇 번을 호출해도 같은 터미널 상태, 전이는 한 번뿐
#[tokio::test]
async fn test_end_auction_idempotent() {
    let (_db, store) = setup().await;
    let client = Client::new();

    let auction = create_test_auction(&client, 100, 1).await;
    tokio::time::sleep(Duration::from_millis(1500)).await;

    // 스케줄러와 경합할 수 있으므로 첫 호출의 just_ended 는 단정하지 않는다
    let first = store.end_auction(auction.id).await.unwrap();
    assert_eq!(first.auction.status, "ENDED");

    let second = store.end_auction(auction.id).await.unwrap();
    assert!(!second.just_ended);
    assert_eq!(second.auction.status, "ENDED");
    assert_eq!(second.auction.winner_id, first.auction.winner_id);
    assert_eq!(
        second.auction.current_highest_bid,
        first.auction.current_highest_bid
    );
}

/// 종료된 경매에는 입찰 불가
#[tokio::test]
async fn test_bid_on_ended_auction_rejected() {
    let (_db, store) = setup().await;
    let client = Client::new();

    let auction = create_test_auction(&client, 100, 1).await;
    let u = create_test_user(&store, "late").await;
    let mut ws = connect_session(u.id, &u.username).await;
    join_auction(&mut ws, auction.id).await;

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let reply = place_bid(&mut ws, auction.id, 500).await;
    assert_eq!(reply["type"], "bidError");
    assert_eq!(reply["code"], "BID_VALIDATION_ERROR");
}

/// 입찰 이력 조회 (WebSocket)
#[tokio::test]
async fn test_get_bid_history() {
    let (_db, store) = setup().await;
    let client = Client::new();

    let auction = create_test_auction(&client, 100, 60).await;
    let u1 = create_test_user(&store, "hist1").await;
    let u2 = create_test_user(&store, "hist2").await;

    let mut ws1 = connect_session(u1.id, &u1.username).await;
    let mut ws2 = connect_session(u2.id, &u2.username).await;
    join_auction(&mut ws1, auction.id).await;
    join_auction(&mut ws2, auction.id).await;

    assert_eq!(place_bid(&mut ws1, auction.id, 200).await["type"], "bidPlaced");
    assert_eq!(place_bid(&mut ws2, auction.id, 300).await["type"], "bidPlaced");

    ws1.send(Message::Text(
        json!({"type": "getBidHistory", "auctionId": auction.id}).to_string(),
    ))
    .await
    .unwrap();
    let history = wait_for(&mut ws1, "bidHistory", Duration::from_secs(5)).await;
    let bids = history["bids"].as_array().unwrap();
    assert_eq!(bids.len(), 2);
    // 최신 순
    assert_eq!(amount_of(&bids[0]["amount"]), Decimal::from(300));
    assert_eq!(amount_of(&bids[1]["amount"]), Decimal::from(200));
}

/// 늦게 입장한 세션은 스냅샷으로 현재 최고가를 받는다
#[tokio::test]
async fn test_join_snapshot_carries_current_highest() {
    let (_db, store) = setup().await;
    let client = Client::new();

    let auction = create_test_auction(&client, 100, 60).await;
    let bidder = create_test_user(&store, "snap1").await;
    let late = create_test_user(&store, "snap2").await;

    let mut ws1 = connect_session(bidder.id, &bidder.username).await;
    join_auction(&mut ws1, auction.id).await;
    assert_eq!(place_bid(&mut ws1, auction.id, 250).await["type"], "bidPlaced");

    let mut ws2 = connect_session(late.id, &late.username).await;
    let joined = join_auction(&mut ws2, auction.id).await;
    assert_eq!(
        amount_of(&joined["snapshot"]["currentHighestBid"]),
        Decimal::from(250)
    );
    assert_eq!(joined["snapshot"]["participantCount"], 1);

    // 스냅샷 회신 뒤에 currentHighestBid 이벤트도 따라온다
    let highest = wait_for(&mut ws2, "currentHighestBid", Duration::from_secs(5)).await;
    assert_eq!(amount_of(&highest["amount"]), Decimal::from(250));
    assert_eq!(highest["userId"], bidder.id.to_string());
}

/// 인증 실패: error 수신 후 커넥션 종료
#[tokio::test]
async fn test_invalid_token_closes_connection() {
    ensure_test_env();
    let (mut ws, _) = connect_async(format!("{}?token=invalid.token.here", WS_URL))
        .await
        .expect("WebSocket 접속 실패");

    let err = next_message(&mut ws, Duration::from_secs(5)).await;
    assert_eq!(err["type"], "error");

    // 서버가 곧 닫는다
    let closed = timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                None => break true,
                Some(Ok(Message::Close(_))) => break true,
                Some(Err(_)) => break true,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .unwrap();
    assert!(closed);
}

/// 알 수 없는 메시지 종류는 error 로 거부
#[tokio::test]
async fn test_unknown_kind_rejected() {
    let (_db, store) = setup().await;
    let u = create_test_user(&store, "unknown").await;
    let mut ws = connect_session(u.id, &u.username).await;

    ws.send(Message::Text(
        json!({"type": "retractBid", "auctionId": Uuid::new_v4()}).to_string(),
    ))
    .await
    .unwrap();
    let err = wait_for(&mut ws, "error", Duration::from_secs(5)).await;
    assert!(err["message"].as_str().unwrap().len() > 0);
}

/// 잘못된 금액 입력 거절
#[tokio::test]
async fn test_invalid_amount_rejected() {
    let (_db, store) = setup().await;
    let client = Client::new();

    let auction = create_test_auction(&client, 100, 60).await;
    let u = create_test_user(&store, "amount").await;
    let mut ws = connect_session(u.id, &u.username).await;
    join_auction(&mut ws, auction.id).await;

    for bad in [json!(-5), json!(0), json!("abc")] {
        ws.send(Message::Text(
            json!({"type": "placeBid", "auctionId": auction.id, "amount": bad}).to_string(),
        ))
        .await
        .unwrap();
        let reply = wait_for(&mut ws, "bidError", Duration::from_secs(5)).await;
        assert_eq!(reply["code"], "INVALID_AMOUNT");
    }
}
