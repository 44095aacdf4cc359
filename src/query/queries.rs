/// 경매 스냅샷 조회
pub const GET_AUCTION: &str = "SELECT id, vehicle_id, status, start_price, reserve_price, current_price, buy_now_price, start_time, end_time, winner_id, highest_bidder_id, bid_count, version, created_at FROM auctions WHERE id = $1";

/// 모든 경매 조회
pub const GET_ALL_AUCTIONS: &str = "SELECT id, vehicle_id, status, start_price, reserve_price, current_price, buy_now_price, start_time, end_time, winner_id, highest_bidder_id, bid_count, version, created_at FROM auctions ORDER BY created_at DESC";

/// 입찰 이력 조회 (시퀀스 순)
pub const GET_BID_HISTORY: &str = r#"
    SELECT id, auction_id, bidder_id, amount, seq, created_at
    FROM bids
    WHERE auction_id = $1
    ORDER BY seq DESC
"#;

/// 최고 입찰 조회
pub const GET_HIGHEST_BID: &str = r#"
    SELECT id, auction_id, bidder_id, amount, seq, created_at
    FROM bids
    WHERE auction_id = $1
    ORDER BY seq DESC
    LIMIT 1
"#;

/// 경매 생성 (리스팅 카탈로그가 공급한 메타데이터로)
pub const INSERT_AUCTION: &str = r#"
    INSERT INTO auctions (vehicle_id, start_price, reserve_price, current_price, buy_now_price, start_time, end_time)
    VALUES ($1, $2, $3, $2, $4, $5, $6)
    RETURNING id, vehicle_id, status, start_price, reserve_price, current_price, buy_now_price, start_time, end_time, winner_id, highest_bidder_id, bid_count, version, created_at
"#;
