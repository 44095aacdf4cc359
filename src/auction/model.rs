use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// region:    --- Auction Status
/// 경매 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuctionStatus {
    Scheduled,
    Live,
    Ended,
    Settled,
    Cancelled,
}

impl AuctionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuctionStatus::Scheduled => "SCHEDULED",
            AuctionStatus::Live => "LIVE",
            AuctionStatus::Ended => "ENDED",
            AuctionStatus::Settled => "SETTLED",
            AuctionStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SCHEDULED" => Some(AuctionStatus::Scheduled),
            "LIVE" => Some(AuctionStatus::Live),
            "ENDED" => Some(AuctionStatus::Ended),
            "SETTLED" => Some(AuctionStatus::Settled),
            "CANCELLED" => Some(AuctionStatus::Cancelled),
            _ => None,
        }
    }

    /// 종료 상태 여부 (룸 정리 판단에 사용)
    pub fn is_terminal(&self) -> bool {
        matches!(self, AuctionStatus::Settled | AuctionStatus::Cancelled)
    }
}
// endregion: --- Auction Status

// region:    --- Models
// 경매 모델
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Auction {
    pub id: i64,
    pub vehicle_id: i64,
    pub status: String,
    pub start_price: i64,
    pub reserve_price: i64,
    pub current_price: i64,
    pub buy_now_price: Option<i64>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub winner_id: Option<i64>,
    pub highest_bidder_id: Option<i64>,
    pub bid_count: i64,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl Auction {
    pub fn status(&self) -> AuctionStatus {
        // DB에는 위 다섯 가지 외의 상태가 기록되지 않는다
        AuctionStatus::parse(&self.status).unwrap_or(AuctionStatus::Cancelled)
    }
}

// 입찰 모델 (커밋 후 불변)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Bid {
    pub id: i64,
    pub auction_id: i64,
    pub bidder_id: i64,
    pub amount: i64,
    pub seq: i64,
    pub created_at: DateTime<Utc>,
}
// endregion: --- Models
