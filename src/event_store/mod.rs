/// 경매별 순서 보장 이벤트 스트림
/// 각 경매(aggregate)마다 version이 1씩 증가하는 append 전용 로그로,
/// 관전자는 스냅샷의 version 이후 이벤트만 이어받아 재동기화한다.
// region:    --- Imports
use crate::auction::events::AuctionEvent;
use crate::error::AuctionError;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

// endregion: --- Imports

// region:    --- Event Model
/// 이벤트 저장소에 저장되는 이벤트 모델
#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
pub struct Event {
    pub id: i64,
    pub aggregate_id: i64,
    pub event_type: String,
    pub data: serde_json::Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: i64,
}

impl Event {
    /// 도메인 이벤트로부터 저장용 이벤트 행 구성
    pub fn from_auction_event(
        auction_id: i64,
        event_type: &str,
        event: &AuctionEvent,
        timestamp: chrono::DateTime<chrono::Utc>,
        version: i64,
    ) -> Result<Self, AuctionError> {
        Ok(Event {
            id: 0,
            aggregate_id: auction_id,
            event_type: event_type.to_string(),
            data: serde_json::to_value(event)
                .map_err(|e| AuctionError::Database(sqlx::Error::Protocol(e.to_string())))?,
            timestamp,
            version,
        })
    }

    /// 관전자에게 전달되는 델타 종류
    pub fn delta_kind(&self) -> &'static str {
        match self.event_type.as_str() {
            "StatusChanged" => "status_changed",
            _ => "new_bid",
        }
    }
}
// endregion: --- Event Model

// region:    --- Event Store
/// 커밋 트랜잭션 안에서 이벤트 행 추가
/// (aggregate_id, version) 유니크 제약이 낙관적 동시성의 최종 방어선이다.
pub async fn append_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event: &Event,
) -> Result<i64, AuctionError> {
    let event_id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO events (aggregate_id, event_type, data, timestamp, version)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (aggregate_id, version) DO NOTHING
        RETURNING id",
    )
    .bind(event.aggregate_id)
    .bind(&event.event_type)
    .bind(&event.data)
    .bind(event.timestamp)
    .bind(event.version)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(AuctionError::LedgerConflict)?;

    Ok(event_id)
}

/// 스냅샷 이후 이벤트 조회 (재접속 관전자의 이어받기용)
pub async fn load_since(
    pool: &PgPool,
    auction_id: i64,
    after_version: i64,
) -> Result<Vec<Event>, AuctionError> {
    let events = sqlx::query_as::<_, Event>(
        "SELECT id, aggregate_id, event_type, data, timestamp, version
         FROM events
         WHERE aggregate_id = $1 AND version > $2
         ORDER BY version ASC",
    )
    .bind(auction_id)
    .bind(after_version)
    .fetch_all(pool)
    .await?;

    Ok(events)
}
// endregion: --- Event Store

// endregion: --- Tests
