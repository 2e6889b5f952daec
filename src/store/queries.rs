/// 경매 조회
pub const GET_AUCTION: &str = "SELECT id, item_id, start_time, end_time, starting_bid, current_highest_bid, winner_id, status, created_at, updated_at FROM auctions WHERE id = $1";

/// 경매 조회 (행 잠금)
/// 경매 당 입찰 직렬화 지점: 같은 경매의 입찰은 여기서 직렬화되고
/// 다른 경매끼리는 서로 블록하지 않는다
pub const GET_AUCTION_FOR_UPDATE: &str = "SELECT id, item_id, start_time, end_time, starting_bid, current_highest_bid, winner_id, status, created_at, updated_at FROM auctions WHERE id = $1 FOR UPDATE";

/// 경매 생성
pub const INSERT_AUCTION: &str = r#"
    INSERT INTO auctions (id, item_id, start_time, end_time, starting_bid, current_highest_bid, status)
    VALUES ($1, $2, $3, $4, $5, $5, 'ACTIVE')
    RETURNING id, item_id, start_time, end_time, starting_bid, current_highest_bid, winner_id, status, created_at, updated_at
"#;

/// 입찰 삽입
/// timestamp 는 서버 할당: 같은 경매의 직전 입찰보다 항상 뒤가 되도록
/// now() 와 (마지막 입찰 + 1µs) 중 큰 값을 쓴다
pub const INSERT_BID: &str = r#"
    INSERT INTO bids (id, user_id, auction_id, amount, timestamp)
    VALUES ($1, $2, $3, $4, GREATEST(
        now(),
        (SELECT COALESCE(MAX(timestamp) + interval '1 microsecond', 'epoch'::timestamptz)
         FROM bids WHERE auction_id = $3)
    ))
    RETURNING id, user_id, auction_id, amount, timestamp
"#;

/// 현재 최고가 갱신
pub const UPDATE_HIGHEST_BID: &str =
    "UPDATE auctions SET current_highest_bid = $1, updated_at = now() WHERE id = $2";

/// 최고 입찰 행 조회 (username 포함)
pub const GET_HIGHEST_BID_ROW: &str = r#"
    SELECT b.id AS bid_id, b.auction_id, b.user_id, u.username, b.amount, b.timestamp
    FROM bids b JOIN users u ON u.id = b.user_id
    WHERE b.auction_id = $1
    ORDER BY b.amount DESC
    LIMIT 1
"#;

/// 경매 종료 처리
pub const END_AUCTION: &str = r#"
    UPDATE auctions SET status = 'ENDED', winner_id = $2, updated_at = now()
    WHERE id = $1
    RETURNING id, item_id, start_time, end_time, starting_bid, current_highest_bid, winner_id, status, created_at, updated_at
"#;

/// 종료 시각이 지난 ACTIVE 경매 id 목록
pub const LIST_EXPIRED: &str =
    "SELECT id FROM auctions WHERE status = 'ACTIVE' AND end_time <= $1";

/// 입찰 이력 조회 (최신 순, 상한 있음)
pub const LIST_BIDS: &str = r#"
    SELECT b.id AS bid_id, b.auction_id, b.user_id, u.username, b.amount, b.timestamp
    FROM bids b JOIN users u ON u.id = b.user_id
    WHERE b.auction_id = $1
    ORDER BY b.timestamp DESC
    LIMIT $2
"#;

/// 참여자 목록 (입찰 1건 이상인 사용자)
pub const LIST_PARTICIPANTS: &str =
    "SELECT DISTINCT user_id FROM bids WHERE auction_id = $1";

/// 참여자 수
pub const COUNT_PARTICIPANTS: &str =
    "SELECT COUNT(DISTINCT user_id) FROM bids WHERE auction_id = $1";

/// 모든 경매 조회 (최신 순)
pub const LIST_AUCTIONS: &str = "SELECT id, item_id, start_time, end_time, starting_bid, current_highest_bid, winner_id, status, created_at, updated_at FROM auctions ORDER BY created_at DESC";

/// 사용자 생성
pub const INSERT_USER: &str = r#"
    INSERT INTO users (id, username, email, password_hash, full_name)
    VALUES ($1, $2, $3, $4, $5)
    RETURNING id, username, email, password_hash, full_name, is_active, created_at, updated_at
"#;
