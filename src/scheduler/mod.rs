/// 경매 시각 스케줄러
/// 기동 시각 전이(SCHEDULED -> LIVE)와 만료 전이(LIVE -> ENDED)를 저장된
/// start_time / end_time에서 매 틱마다 다시 계산해 상태 기계로 전달한다.
/// 인메모리 타이머에 의존하지 않으므로 프로세스 재기동에 안전하다.
/// 이미 전이된 경매를 만난 웨이크업은 no-op이다.
// region:    --- Imports
use crate::auction::machine::{self, Trigger};
use crate::error::AuctionError;
use crate::state::AppState;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::time::{interval, Duration};
use tracing::{debug, error};

// endregion: --- Imports

// region:    --- Anti-Snipe

/// 스나이핑 방지 연장 판정
/// 마감까지 남은 시간이 윈도우 이하인 입찰이면 입찰 시각 + 윈도우로 연장.
/// 연장은 항상 **최신** end_time을 기준으로 하므로 반복되는 막판 입찰이
/// 마감을 계속 밀어낸다.
pub fn extend_end_time(
    bid_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    window_secs: i64,
) -> (DateTime<Utc>, bool) {
    if end_time - bid_time <= ChronoDuration::seconds(window_secs) {
        (bid_time + ChronoDuration::seconds(window_secs), true)
    } else {
        (end_time, false)
    }
}
// endregion: --- Anti-Snipe

// region:    --- Auction Scheduler
/// 경매 상태 전이 스케줄러
pub struct AuctionScheduler {
    state: AppState,
}

impl AuctionScheduler {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// 스케줄러 시작 (1초 주기)
    pub async fn start(&self) {
        let state = self.state.clone();
        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                if let Err(e) = Self::fire_due_transitions(&state).await {
                    error!(
                        "{:<12} --> 경매 상태 업데이트 중 오류 발생: {:?}",
                        "Scheduler", e
                    );
                }
            }
        });
    }

    /// 기한이 도래한 전이 실행
    async fn fire_due_transitions(state: &AppState) -> Result<(), AuctionError> {
        let now = Utc::now();

        // SCHEDULED -> LIVE
        let due_starts = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM auctions WHERE status = 'SCHEDULED' AND start_time <= $1",
        )
        .bind(now)
        .fetch_all(state.db.pool())
        .await?;

        for auction_id in due_starts {
            Self::fire(state, auction_id, Trigger::Start).await;
        }

        // LIVE -> ENDED: expire는 커밋 슬롯 획득 후 저장된 end_time을
        // 다시 확인하므로, 슬롯을 기다리는 동안 입찰이 마감을 연장했으면
        // no-op이 된다 (연장된 마감은 다음 틱에 반영)
        let due_ends = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM auctions WHERE status = 'LIVE' AND end_time <= $1",
        )
        .bind(now)
        .fetch_all(state.db.pool())
        .await?;

        for auction_id in due_ends {
            Self::fire(state, auction_id, Trigger::End).await;
        }

        debug!("{:<12} --> 기한 전이 점검 완료", "Scheduler");
        Ok(())
    }

    /// 단일 전이 전달: 먼저 전이된 경매는 no-op이며 오류가 아니다
    async fn fire(state: &AppState, auction_id: i64, trigger: Trigger) {
        let result = match trigger {
            Trigger::End => machine::expire(state, auction_id).await,
            _ => machine::transition(state, auction_id, trigger).await,
        };
        match result {
            Ok(_) => {}
            // 틱 조회와 전이 사이에 운영자/즉시구매가 먼저 전이시킨 경우
            Err(AuctionError::InvalidTransition { .. }) | Err(AuctionError::NotFound) => {
                debug!(
                    "{:<12} --> 이미 전이된 경매 건너뜀 auction: {}",
                    "Scheduler", auction_id
                );
            }
            Err(e) => {
                error!(
                    "{:<12} --> 전이 실패 auction: {}, trigger: {}, err: {:?}",
                    "Scheduler",
                    auction_id,
                    trigger.as_str(),
                    e
                );
            }
        }
    }
}
// endregion: --- Auction Scheduler

// endregion: --- Tests
