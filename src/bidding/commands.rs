/// 입찰 관련 커맨드 처리
/// 1. 입찰
/// 2. 즉시 구매
///
/// 한 경매의 커밋은 경매별 슬롯으로 직렬화되고, 입찰 기록 추가 / 홀드
/// 교체 / 경매 갱신 / 이벤트 추가가 한 트랜잭션으로 적용된다. 어느 하나라도
/// 실패하면 전체가 롤백되어 부분 적용이 관측되지 않는다.
// region:    --- Imports
use crate::auction::events::{AuctionEvent, NotificationEvent};
use crate::auction::model::{Auction, AuctionStatus, Bid};
use crate::error::AuctionError;
use crate::event_store::{self, Event};
use crate::ledger;
use crate::scheduler;
use crate::state::AppState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// endregion: --- Imports

// region:    --- Commands
/// 입찰 명령
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PlaceBidCommand {
    pub auction_id: i64,
    pub bidder_id: i64,
    pub amount: i64,
}

/// 즉시 구매 명령
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BuyNowCommand {
    pub auction_id: i64,
    pub buyer_id: i64,
}
// endregion: --- Commands

// region:    --- Admission

/// 입찰 허용 선행 조건 (스냅샷 기준, 순서 고정)
/// 1. LIVE 상태이며 종료 전 -> AuctionNotOpen
/// 2. 현재가 초과 및 최소 증분 충족 -> BidTooLow (동액은 거절)
/// 잔액 검사는 트랜잭션 안에서 지갑 행을 읽은 뒤 수행한다.
pub fn check_admission(
    auction: &Auction,
    now: DateTime<Utc>,
    amount: i64,
    min_increment: i64,
) -> Result<(), AuctionError> {
    if auction.status() != AuctionStatus::Live || now >= auction.end_time {
        return Err(AuctionError::AuctionNotOpen);
    }
    if amount <= auction.current_price || amount < auction.current_price + min_increment {
        return Err(AuctionError::BidTooLow {
            current_price: auction.current_price,
        });
    }
    Ok(())
}
// endregion: --- Admission

// region:    --- Commit Outcome

/// 커밋 결과: 팬아웃과 알림 발행은 커밋 확정 후에만 일어난다
struct CommitOutcome {
    auction: Auction,
    bid: Bid,
    events: Vec<Event>,
    /// 상회 입찰로 밀려난 직전 최고 입찰자
    outbid: Option<i64>,
    /// 즉시 구매로 확정된 낙찰자와 가격
    won: Option<(i64, i64)>,
}

/// 커밋 확정 후 델타와 알림 발행 (경매 커밋 슬롯 안에서 호출)
async fn publish_outcome(state: &AppState, outcome: &CommitOutcome) {
    let terminal = outcome.auction.status().is_terminal();
    for event in &outcome.events {
        state.rooms.publish(outcome.auction.id, event, terminal);
    }

    let now = Utc::now();
    if let Some(user_id) = outcome.outbid {
        state
            .producer
            .publish_notification(
                outcome.auction.id,
                &NotificationEvent::BidOutbid {
                    auction_id: outcome.auction.id,
                    user_id,
                    new_amount: outcome.auction.current_price,
                    timestamp: now,
                },
            )
            .await;
    }
    if let Some((user_id, price)) = outcome.won {
        state
            .producer
            .publish_notification(
                outcome.auction.id,
                &NotificationEvent::AuctionWon {
                    auction_id: outcome.auction.id,
                    user_id,
                    price,
                    timestamp: now,
                },
            )
            .await;
    }
}
// endregion: --- Commit Outcome

// region:    --- Place Bid

/// 1. 입찰
/// 커밋이 확정된 입찰은 요청 연결이 끊겨도 최종이다. 클라이언트는 응답이
/// 아니라 팬아웃 스트림을 진실의 원천으로 삼는다.
pub async fn handle_place_bid(
    state: &AppState,
    cmd: PlaceBidCommand,
) -> Result<(Auction, Bid), AuctionError> {
    info!("{:<12} --> 입찰 요청 처리 시작: {:?}", "Command", cmd);

    let lock = state.locks.for_auction(cmd.auction_id);
    let _slot = lock.lock().await;

    let min_increment = state.config.min_increment;
    let window = state.config.extension_window_secs;
    let mut attempts: u32 = 0;

    loop {
        let now = Utc::now();
        let cmd_attempt = cmd.clone();
        let result = state
            .db
            .transaction(|tx| {
                Box::pin(async move {
                    commit_bid_in_tx(tx, cmd_attempt, min_increment, window, now).await
                })
            })
            .await;

        match result {
            Ok(outcome) => {
                publish_outcome(state, &outcome).await;
                return Ok((outcome.auction, outcome.bid));
            }
            Err(AuctionError::LedgerConflict)
                if attempts + 1 < state.config.max_commit_retries =>
            {
                attempts += 1;
                warn!(
                    "{:<12} --> 원장 충돌: 재시도 ({}/{})",
                    "Command", attempts, state.config.max_commit_retries
                );
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

/// 입찰 커밋의 트랜잭션 내부 적용
async fn commit_bid_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    cmd: PlaceBidCommand,
    min_increment: i64,
    extension_window_secs: i64,
    now: DateTime<Utc>,
) -> Result<CommitOutcome, AuctionError> {
    let auction = sqlx::query_as::<_, Auction>("SELECT * FROM auctions WHERE id = $1")
        .bind(cmd.auction_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(AuctionError::NotFound)?;

    check_admission(&auction, now, cmd.amount, min_increment)?;

    // 즉시구매 가격 이상의 입찰은 그 가격의 즉시 구매로 낙찰 처리
    if let Some(buy_now_price) = auction.buy_now_price {
        if cmd.amount >= buy_now_price {
            return commit_buy_now_in_tx(tx, auction, cmd.bidder_id, buy_now_price, now).await;
        }
    }

    // 직전 최고 입찰자의 홀드를 해제하고 새 홀드를 같은 커밋으로 만든다.
    // 본인 상회 입찰이면 해제로 돌아온 잔액이 아래 검사에 반영된다.
    let previous = auction.highest_bidder_id;
    if let Some(prev) = previous {
        ledger::release_in_tx(tx, prev, cmd.auction_id).await?;
    }

    let available = sqlx::query_scalar::<_, i64>(
        "SELECT available_balance FROM wallets WHERE user_id = $1",
    )
    .bind(cmd.bidder_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(AuctionError::NotFound)?;

    if available < cmd.amount {
        return Err(AuctionError::InsufficientFunds { available });
    }

    ledger::hold_in_tx(tx, cmd.bidder_id, cmd.auction_id, cmd.amount).await?;

    // 경매 범위의 연속 시퀀스 번호
    let seq = auction.bid_count + 1;
    let bid = sqlx::query_as::<_, Bid>(
        "INSERT INTO bids (auction_id, bidder_id, amount, seq, created_at)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING *",
    )
    .bind(cmd.auction_id)
    .bind(cmd.bidder_id)
    .bind(cmd.amount)
    .bind(seq)
    .bind(now)
    .fetch_one(&mut **tx)
    .await?;

    // 스나이핑 방지: 종료 임박 입찰이면 같은 커밋에서 종료 시각 연장
    let (new_end, extended) =
        scheduler::extend_end_time(now, auction.end_time, extension_window_secs);
    if extended {
        info!(
            "{:<12} --> 종료 시각 연장 auction: {}, end_time: {}",
            "Command", cmd.auction_id, new_end
        );
    }

    let updated = sqlx::query_as::<_, Auction>(
        "UPDATE auctions SET current_price = $1, highest_bidder_id = $2,
                bid_count = bid_count + 1, end_time = $3, version = version + 1
         WHERE id = $4 AND version = $5
         RETURNING *",
    )
    .bind(cmd.amount)
    .bind(cmd.bidder_id)
    .bind(new_end)
    .bind(cmd.auction_id)
    .bind(auction.version)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(AuctionError::LedgerConflict)?;

    let bid_event = AuctionEvent::BidPlaced {
        auction_id: cmd.auction_id,
        bidder_id: cmd.bidder_id,
        amount: cmd.amount,
        seq,
        current_price: updated.current_price,
        end_time: updated.end_time,
        timestamp: now,
    };
    let event = Event::from_auction_event(
        cmd.auction_id,
        "BidPlaced",
        &bid_event,
        now,
        updated.version,
    )?;
    event_store::append_in_tx(tx, &event).await?;

    Ok(CommitOutcome {
        auction: updated,
        bid,
        events: vec![event],
        outbid: previous.filter(|p| *p != cmd.bidder_id),
        won: None,
    })
}
// endregion: --- Place Bid

// region:    --- Buy Now

/// 2. 즉시 구매(낙찰)
/// 즉시 구매 가격으로 자금을 바로 확정하고 LIVE -> ENDED 전이를 같은
/// 커밋으로 강제한다.
pub async fn handle_buy_now(
    state: &AppState,
    cmd: BuyNowCommand,
) -> Result<(Auction, Bid), AuctionError> {
    info!("{:<12} --> 즉시 구매 요청 처리 시작: {:?}", "Command", cmd);

    let lock = state.locks.for_auction(cmd.auction_id);
    let _slot = lock.lock().await;

    let mut attempts: u32 = 0;

    loop {
        let now = Utc::now();
        let cmd_attempt = cmd.clone();
        let result = state
            .db
            .transaction(|tx| {
                Box::pin(async move {
                    let auction =
                        sqlx::query_as::<_, Auction>("SELECT * FROM auctions WHERE id = $1")
                            .bind(cmd_attempt.auction_id)
                            .fetch_optional(&mut **tx)
                            .await?
                            .ok_or(AuctionError::NotFound)?;

                    if auction.status() != AuctionStatus::Live || now >= auction.end_time {
                        return Err(AuctionError::AuctionNotOpen);
                    }
                    let price =
                        auction
                            .buy_now_price
                            .ok_or_else(|| AuctionError::InvalidTransition {
                                from: auction.status.clone(),
                                trigger: "buy_now".to_string(),
                            })?;

                    commit_buy_now_in_tx(tx, auction, cmd_attempt.buyer_id, price, now).await
                })
            })
            .await;

        match result {
            Ok(outcome) => {
                publish_outcome(state, &outcome).await;
                return Ok((outcome.auction, outcome.bid));
            }
            Err(AuctionError::LedgerConflict)
                if attempts + 1 < state.config.max_commit_retries =>
            {
                attempts += 1;
                warn!(
                    "{:<12} --> 원장 충돌: 재시도 ({}/{})",
                    "Command", attempts, state.config.max_commit_retries
                );
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

/// 즉시 구매 커밋의 트랜잭션 내부 적용
/// 호출자가 LIVE 상태와 가격 설정 여부를 이미 검증했다.
async fn commit_buy_now_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    auction: Auction,
    buyer_id: i64,
    price: i64,
    now: DateTime<Utc>,
) -> Result<CommitOutcome, AuctionError> {
    let auction_id = auction.id;
    let previous = auction.highest_bidder_id;
    if let Some(prev) = previous {
        ledger::release_in_tx(tx, prev, auction_id).await?;
    }

    let available = sqlx::query_scalar::<_, i64>(
        "SELECT available_balance FROM wallets WHERE user_id = $1",
    )
    .bind(buyer_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(AuctionError::NotFound)?;

    if available < price {
        return Err(AuctionError::InsufficientFunds { available });
    }

    // 홀드 생성 즉시 확정: 구매자 자금이 바로 캡처된다
    ledger::hold_in_tx(tx, buyer_id, auction_id, price).await?;
    ledger::capture_in_tx(tx, buyer_id, auction_id).await?;
    ledger::release_all_in_tx(tx, auction_id).await?;

    let seq = auction.bid_count + 1;
    let bid = sqlx::query_as::<_, Bid>(
        "INSERT INTO bids (auction_id, bidder_id, amount, seq, created_at)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING *",
    )
    .bind(auction_id)
    .bind(buyer_id)
    .bind(price)
    .bind(seq)
    .bind(now)
    .fetch_one(&mut **tx)
    .await?;

    // 즉시 구매와 상태 전이가 한 커밋: 버전은 이벤트 두 건만큼 전진
    let updated = sqlx::query_as::<_, Auction>(
        "UPDATE auctions SET current_price = $1, highest_bidder_id = $2, winner_id = $2,
                bid_count = bid_count + 1, status = 'ENDED', version = version + 2
         WHERE id = $3 AND version = $4
         RETURNING *",
    )
    .bind(price)
    .bind(buyer_id)
    .bind(auction_id)
    .bind(auction.version)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(AuctionError::LedgerConflict)?;

    let buy_now_event = AuctionEvent::BuyNowExecuted {
        auction_id,
        buyer_id,
        price,
        timestamp: now,
    };
    let status_event = AuctionEvent::StatusChanged {
        auction_id,
        from: AuctionStatus::Live.as_str().to_string(),
        to: AuctionStatus::Ended.as_str().to_string(),
        winner_id: Some(buyer_id),
        timestamp: now,
    };
    let event_a = Event::from_auction_event(
        auction_id,
        "BuyNowExecuted",
        &buy_now_event,
        now,
        updated.version - 1,
    )?;
    let event_b = Event::from_auction_event(
        auction_id,
        "StatusChanged",
        &status_event,
        now,
        updated.version,
    )?;
    event_store::append_in_tx(tx, &event_a).await?;
    event_store::append_in_tx(tx, &event_b).await?;

    Ok(CommitOutcome {
        auction: updated,
        bid,
        events: vec![event_a, event_b],
        outbid: previous.filter(|p| *p != buyer_id),
        won: Some((buyer_id, price)),
    })
}
// endregion: --- Buy Now

// region:    --- Tests
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn live_auction(current_price: i64) -> Auction {
        let now = Utc::now();
        Auction {
            id: 1,
            vehicle_id: 10,
            status: "LIVE".to_string(),
            start_price: current_price,
            reserve_price: 0,
            current_price,
            buy_now_price: None,
            start_time: now - Duration::hours(1),
            end_time: now + Duration::hours(1),
            winner_id: None,
            highest_bidder_id: None,
            bid_count: 0,
            version: 0,
            created_at: now,
        }
    }

    #[test]
    fn test_admission_rejects_non_live_auction() {
        let mut auction = live_auction(100_000);
        auction.status = "SCHEDULED".to_string();
        let err = check_admission(&auction, Utc::now(), 110_000, 0).unwrap_err();
        assert_eq!(err.code(), "AUCTION_NOT_OPEN");
    }

    #[test]
    fn test_admission_rejects_past_end_time() {
        let mut auction = live_auction(100_000);
        auction.end_time = Utc::now() - Duration::seconds(1);
        let err = check_admission(&auction, Utc::now(), 110_000, 0).unwrap_err();
        assert_eq!(err.code(), "AUCTION_NOT_OPEN");
    }

    #[test]
    fn test_admission_rejects_low_and_tied_amounts() {
        let auction = live_auction(105_000);
        // 직전 커밋보다 낮은 동시 입찰은 BidTooLow로 거절된다
        let err = check_admission(&auction, Utc::now(), 103_000, 0).unwrap_err();
        assert_eq!(err.code(), "BID_TOO_LOW");
        // 동액도 거절 (대기열 없음)
        let err = check_admission(&auction, Utc::now(), 105_000, 0).unwrap_err();
        assert_eq!(err.code(), "BID_TOO_LOW");
    }

    #[test]
    fn test_admission_enforces_min_increment() {
        let auction = live_auction(100_000);
        let err = check_admission(&auction, Utc::now(), 100_500, 1_000).unwrap_err();
        assert_eq!(err.code(), "BID_TOO_LOW");
        assert!(check_admission(&auction, Utc::now(), 101_000, 1_000).is_ok());
    }

    #[test]
    fn test_admission_accepts_strictly_higher_bid() {
        let auction = live_auction(100_000);
        assert!(check_admission(&auction, Utc::now(), 105_000, 0).is_ok());
    }
}
// endregion: --- Tests
