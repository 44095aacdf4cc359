/// 경매 상태 기계
/// SCHEDULED -> LIVE -> ENDED -> SETTLED | (LIVE -> CANCELLED)
/// 전이는 경매별 커밋 슬롯 안에서 한 트랜잭션으로 적용되며, 같은 트리거가
/// 중복 전달되어도 대상 상태에 이미 있으면 no-op으로 끝난다.
// region:    --- Imports
use crate::auction::events::{AuctionEvent, NotificationEvent};
use crate::auction::model::{Auction, AuctionStatus};
use crate::error::AuctionError;
use crate::event_store::{self, Event};
use crate::ledger;
use crate::state::AppState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

// endregion: --- Imports

// region:    --- Trigger

/// 상태 전이 트리거
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// 시작 시각 도달 또는 운영자 개시
    Start,
    /// 종료 시각 도달 또는 조기 종료
    End,
    /// 외부 결제 확인
    Settle,
    /// 운영자 취소
    Cancel,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Start => "start",
            Trigger::End => "end",
            Trigger::Settle => "settle",
            Trigger::Cancel => "cancel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "start" => Some(Trigger::Start),
            "end" => Some(Trigger::End),
            "settle" => Some(Trigger::Settle),
            "cancel" => Some(Trigger::Cancel),
            _ => None,
        }
    }
}
// endregion: --- Trigger

// region:    --- Transition Table

/// 전이 판정
/// Ok(Some(next)): 전이 적용, Ok(None): 이미 대상 상태(멱등 no-op),
/// Err: 허용되지 않는 전이.
pub fn next_status(
    current: AuctionStatus,
    trigger: Trigger,
) -> Result<Option<AuctionStatus>, AuctionError> {
    use AuctionStatus::*;
    let next = match (current, trigger) {
        (Scheduled, Trigger::Start) => Some(Live),
        (Live, Trigger::Start) => None,
        (Live, Trigger::End) => Some(Ended),
        (Ended, Trigger::End) => None,
        (Ended, Trigger::Settle) => Some(Settled),
        (Settled, Trigger::Settle) => None,
        (Live, Trigger::Cancel) => Some(Cancelled),
        (Cancelled, Trigger::Cancel) => None,
        (from, trigger) => {
            return Err(AuctionError::InvalidTransition {
                from: from.as_str().to_string(),
                trigger: trigger.as_str().to_string(),
            })
        }
    };
    Ok(next)
}
// endregion: --- Transition Table

// region:    --- Transition Executor

struct TransitionOutcome {
    auction: Auction,
    event: Option<Event>,
    notification: Option<NotificationEvent>,
}

/// 상태 전이 적용 (운영자/즉시구매 경로, 무조건 전이)
/// 커밋 후 status_changed 델타를 룸에 발행하고, 낙찰이 확정되면
/// auction_won 알림을 내보낸다.
pub async fn transition(
    state: &AppState,
    auction_id: i64,
    trigger: Trigger,
) -> Result<Auction, AuctionError> {
    run(state, auction_id, trigger, false).await
}

/// 만료 전이 (스케줄러 전용 End)
/// 커밋 슬롯 획득 후 저장된 end_time을 다시 확인한다. 슬롯을 기다리는 동안
/// 입찰이 마감을 연장했으면 경매는 아직 만료가 아니므로 no-op으로 끝난다.
/// 운영자 end는 transition을 통해 무조건 전이된다.
pub async fn expire(state: &AppState, auction_id: i64) -> Result<Auction, AuctionError> {
    run(state, auction_id, Trigger::End, true).await
}

async fn run(
    state: &AppState,
    auction_id: i64,
    trigger: Trigger,
    due_only: bool,
) -> Result<Auction, AuctionError> {
    let lock = state.locks.for_auction(auction_id);
    let _slot = lock.lock().await;

    let now = Utc::now();
    let outcome = state
        .db
        .transaction(|tx| {
            Box::pin(async move { apply_in_tx(tx, auction_id, trigger, now, due_only).await })
        })
        .await?;

    if let Some(event) = &outcome.event {
        info!(
            "{:<12} --> 상태 전이 커밋 auction: {}, trigger: {}, status: {}",
            "Machine",
            auction_id,
            trigger.as_str(),
            outcome.auction.status
        );
        state
            .rooms
            .publish(auction_id, event, outcome.auction.status().is_terminal());
    }
    if let Some(notification) = &outcome.notification {
        state.producer.publish_notification(auction_id, notification).await;
    }
    Ok(outcome.auction)
}

/// 전이의 트랜잭션 내부 적용
async fn apply_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    auction_id: i64,
    trigger: Trigger,
    now: DateTime<Utc>,
    due_only: bool,
) -> Result<TransitionOutcome, AuctionError> {
    let auction = sqlx::query_as::<_, Auction>("SELECT * FROM auctions WHERE id = $1")
        .bind(auction_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(AuctionError::NotFound)?;

    // 시각 기반 End: 재확인한 마감이 아직 미래면 만료가 아니다
    if due_only && auction.end_time > now {
        return Ok(TransitionOutcome {
            auction,
            event: None,
            notification: None,
        });
    }

    let current = auction.status();
    let next = match next_status(current, trigger)? {
        Some(next) => next,
        // 중복 트리거: 이미 대상 상태
        None => {
            return Ok(TransitionOutcome {
                auction,
                event: None,
                notification: None,
            })
        }
    };

    let mut winner_id: Option<i64> = auction.winner_id;
    let mut notification = None;

    match next {
        AuctionStatus::Ended => {
            // 입찰이 있으면 최고 입찰자가 낙찰자: 그 홀드만 확정하고
            // 나머지 활성 홀드는 전부 해제한다.
            if auction.bid_count > 0 {
                winner_id = auction.highest_bidder_id;
                if let Some(winner) = winner_id {
                    ledger::capture_in_tx(tx, winner, auction_id).await?;
                    notification = Some(NotificationEvent::AuctionWon {
                        auction_id,
                        user_id: winner,
                        price: auction.current_price,
                        timestamp: now,
                    });
                }
            }
            ledger::release_all_in_tx(tx, auction_id).await?;
        }
        AuctionStatus::Cancelled => {
            // 취소는 모든 활성 홀드를 무조건 해제
            ledger::release_all_in_tx(tx, auction_id).await?;
        }
        _ => {}
    }

    let updated = sqlx::query_as::<_, Auction>(
        "UPDATE auctions SET status = $1, winner_id = $2, version = version + 1
         WHERE id = $3 AND version = $4
         RETURNING *",
    )
    .bind(next.as_str())
    .bind(winner_id)
    .bind(auction_id)
    .bind(auction.version)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| {
        // 차량당 LIVE 경매 하나 제약 위반
        if e.as_database_error()
            .map(|d| d.is_unique_violation())
            .unwrap_or(false)
        {
            AuctionError::InvalidTransition {
                from: current.as_str().to_string(),
                trigger: trigger.as_str().to_string(),
            }
        } else {
            AuctionError::Database(e)
        }
    })?
    .ok_or(AuctionError::LedgerConflict)?;

    let status_event = AuctionEvent::StatusChanged {
        auction_id,
        from: current.as_str().to_string(),
        to: next.as_str().to_string(),
        winner_id,
        timestamp: now,
    };
    let event = Event::from_auction_event(
        auction_id,
        "StatusChanged",
        &status_event,
        now,
        updated.version,
    )?;
    event_store::append_in_tx(tx, &event).await?;

    Ok(TransitionOutcome {
        auction: updated,
        event: Some(event),
        notification,
    })
}
// endregion: --- Transition Executor

// region:    --- Tests
#[cfg(test)]
mod tests {
    use super::*;
    use AuctionStatus::*;

    #[test]
    fn test_lifecycle_transitions() {
        assert_eq!(next_status(Scheduled, Trigger::Start).unwrap(), Some(Live));
        assert_eq!(next_status(Live, Trigger::End).unwrap(), Some(Ended));
        assert_eq!(next_status(Ended, Trigger::Settle).unwrap(), Some(Settled));
        assert_eq!(next_status(Live, Trigger::Cancel).unwrap(), Some(Cancelled));
    }

    #[test]
    fn test_duplicate_trigger_is_noop() {
        assert_eq!(next_status(Live, Trigger::Start).unwrap(), None);
        assert_eq!(next_status(Ended, Trigger::End).unwrap(), None);
        assert_eq!(next_status(Settled, Trigger::Settle).unwrap(), None);
        assert_eq!(next_status(Cancelled, Trigger::Cancel).unwrap(), None);
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        for (from, trigger) in [
            (Scheduled, Trigger::End),
            (Scheduled, Trigger::Settle),
            (Scheduled, Trigger::Cancel),
            (Live, Trigger::Settle),
            (Ended, Trigger::Start),
            (Ended, Trigger::Cancel),
            (Settled, Trigger::Start),
            (Settled, Trigger::End),
            (Settled, Trigger::Cancel),
            (Cancelled, Trigger::Start),
            (Cancelled, Trigger::End),
            (Cancelled, Trigger::Settle),
        ] {
            let err = next_status(from, trigger).unwrap_err();
            assert_eq!(err.code(), "INVALID_TRANSITION", "{:?} + {:?}", from, trigger);
        }
    }

    #[test]
    fn test_trigger_parse_round_trip() {
        for t in [Trigger::Start, Trigger::End, Trigger::Settle, Trigger::Cancel] {
            assert_eq!(Trigger::parse(t.as_str()), Some(t));
        }
        assert_eq!(Trigger::parse("restart"), None);
    }
}
// endregion: --- Tests
