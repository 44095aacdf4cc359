// region:    --- Imports
use super::queries;
use crate::auction::model::{Auction, Bid};
use crate::database::DatabaseManager;
use crate::error::{map_not_found, AuctionError};
use chrono::{DateTime, Utc};
use tracing::info;

// endregion: --- Imports

// region:    --- Query Handlers

/// 경매 스냅샷 조회
/// 반환되는 version이 관전자 재동기화의 기준점이다.
pub async fn get_auction(
    db_manager: &DatabaseManager,
    auction_id: i64,
) -> Result<Auction, AuctionError> {
    info!("{:<12} --> 경매 스냅샷 조회 id: {}", "Query", auction_id);
    sqlx::query_as::<_, Auction>(queries::GET_AUCTION)
        .bind(auction_id)
        .fetch_one(db_manager.pool())
        .await
        .map_err(map_not_found)
}

/// 모든 경매 조회
pub async fn get_all_auctions(db_manager: &DatabaseManager) -> Result<Vec<Auction>, AuctionError> {
    info!("{:<12} --> 모든 경매 조회", "Query");
    let auctions = sqlx::query_as::<_, Auction>(queries::GET_ALL_AUCTIONS)
        .fetch_all(db_manager.pool())
        .await?;
    Ok(auctions)
}

/// 입찰 이력 조회
pub async fn get_bid_history(
    db_manager: &DatabaseManager,
    auction_id: i64,
) -> Result<Vec<Bid>, AuctionError> {
    info!("{:<12} --> 입찰 이력 조회 id: {}", "Query", auction_id);
    let bids = sqlx::query_as::<_, Bid>(queries::GET_BID_HISTORY)
        .bind(auction_id)
        .fetch_all(db_manager.pool())
        .await?;
    Ok(bids)
}

/// 최고 입찰 조회
pub async fn get_highest_bid(
    db_manager: &DatabaseManager,
    auction_id: i64,
) -> Result<Option<Bid>, AuctionError> {
    info!("{:<12} --> 최고 입찰 조회 id: {}", "Query", auction_id);
    let bid = sqlx::query_as::<_, Bid>(queries::GET_HIGHEST_BID)
        .bind(auction_id)
        .fetch_optional(db_manager.pool())
        .await?;
    Ok(bid)
}

/// 경매 생성 (카탈로그 연동 표면, 리스팅 데이터는 변경하지 않음)
#[allow(clippy::too_many_arguments)]
pub async fn create_auction(
    db_manager: &DatabaseManager,
    vehicle_id: i64,
    start_price: i64,
    reserve_price: i64,
    buy_now_price: Option<i64>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
) -> Result<Auction, AuctionError> {
    info!("{:<12} --> 경매 생성 vehicle: {}", "Query", vehicle_id);
    let auction = sqlx::query_as::<_, Auction>(queries::INSERT_AUCTION)
        .bind(vehicle_id)
        .bind(start_price)
        .bind(reserve_price)
        .bind(buy_now_price)
        .bind(start_time)
        .bind(end_time)
        .fetch_one(db_manager.pool())
        .await?;
    Ok(auction)
}

// endregion: --- Query Handlers
