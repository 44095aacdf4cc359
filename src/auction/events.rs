use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 경매별 이벤트 스트림에 기록되는 상태 변경 이벤트
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum AuctionEvent {
    // 입찰 이벤트
    BidPlaced {
        auction_id: i64,
        bidder_id: i64,
        amount: i64,
        seq: i64,
        current_price: i64,
        end_time: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
    // 즉시 구매 이벤트
    BuyNowExecuted {
        auction_id: i64,
        buyer_id: i64,
        price: i64,
        timestamp: DateTime<Utc>,
    },
    // 상태 전이 이벤트
    StatusChanged {
        auction_id: i64,
        from: String,
        to: String,
        winner_id: Option<i64>,
        timestamp: DateTime<Utc>,
    },
}

/// 외부 알림 전달 서비스로 발행되는 추상 이벤트
/// 전달 채널 관리는 알림 서비스의 몫이다.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum NotificationEvent {
    // 낙찰 알림
    AuctionWon {
        auction_id: i64,
        user_id: i64,
        price: i64,
        timestamp: DateTime<Utc>,
    },
    // 상회 입찰 알림
    BidOutbid {
        auction_id: i64,
        user_id: i64,
        new_amount: i64,
        timestamp: DateTime<Utc>,
    },
}
