/// 에스크로 원장
/// 사용자별 가용 잔액과 경매별 홀드를 관리한다. 모든 변경은 비교 후 커밋
/// (guarded UPDATE) 방식이라 긴 락 없이 여러 경매의 입찰이 같은 사용자의
/// 지갑에 동시 접근할 수 있다. 불변식:
///   available_balance = total_balance - Σ(활성 홀드), 항상 0 이상
///   (user_id, auction_id)당 활성(HELD) 홀드는 최대 하나
// region:    --- Imports
use crate::database::DatabaseManager;
use crate::error::{map_not_found, AuctionError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, Transaction};
use tracing::info;

// endregion: --- Imports

// region:    --- Models
// 지갑 모델
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Wallet {
    pub user_id: i64,
    pub total_balance: i64,
    pub available_balance: i64,
}

// 에스크로 홀드 모델
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EscrowHold {
    pub id: i64,
    pub user_id: i64,
    pub auction_id: i64,
    pub amount: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
// endregion: --- Models

// region:    --- In-Transaction Operations

/// 홀드 생성 (커밋 트랜잭션 내부)
/// 가용 잔액 차감과 홀드 행 추가를 한 단위로 수행한다. 스냅샷 선검증을
/// 통과한 뒤 guarded UPDATE가 0행이면 그 사이 다른 커밋이 끼어든 것이므로
/// LedgerConflict로 보고하고 호출자가 전체 입찰을 재시도한다.
pub async fn hold_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
    auction_id: i64,
    amount: i64,
) -> Result<(), AuctionError> {
    let updated = sqlx::query(
        "UPDATE wallets SET available_balance = available_balance - $2
         WHERE user_id = $1 AND available_balance >= $2",
    )
    .bind(user_id)
    .bind(amount)
    .execute(&mut **tx)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(AuctionError::LedgerConflict);
    }

    sqlx::query(
        "INSERT INTO escrow_holds (user_id, auction_id, amount, status)
         VALUES ($1, $2, $3, 'HELD')",
    )
    .bind(user_id)
    .bind(auction_id)
    .bind(amount)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        // 활성 홀드 유니크 제약 위반은 동시 커밋의 증거
        if e.as_database_error()
            .map(|d| d.is_unique_violation())
            .unwrap_or(false)
        {
            AuctionError::LedgerConflict
        } else {
            AuctionError::Database(e)
        }
    })?;

    Ok(())
}

/// 홀드 해제 (멱등)
/// 활성 홀드가 없으면 아무것도 하지 않고 성공한다. 해제된 금액을 반환한다.
pub async fn release_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
    auction_id: i64,
) -> Result<i64, AuctionError> {
    let released = sqlx::query_scalar::<_, i64>(
        "UPDATE escrow_holds SET status = 'RELEASED', updated_at = now()
         WHERE user_id = $1 AND auction_id = $2 AND status = 'HELD'
         RETURNING amount",
    )
    .bind(user_id)
    .bind(auction_id)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(amount) = released {
        sqlx::query("UPDATE wallets SET available_balance = available_balance + $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(amount)
            .execute(&mut **tx)
            .await?;
        return Ok(amount);
    }
    Ok(0)
}

/// 홀드 확정 (멱등)
/// HELD -> CAPTURED 전환. 총 잔액에서 금액을 영구히 차감하는 유일한 연산이다.
/// 가용 잔액은 홀드 시점에 이미 차감되어 있으므로 건드리지 않는다.
pub async fn capture_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
    auction_id: i64,
) -> Result<Option<i64>, AuctionError> {
    let captured = sqlx::query_scalar::<_, i64>(
        "UPDATE escrow_holds SET status = 'CAPTURED', updated_at = now()
         WHERE user_id = $1 AND auction_id = $2 AND status = 'HELD'
         RETURNING amount",
    )
    .bind(user_id)
    .bind(auction_id)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(amount) = captured {
        sqlx::query("UPDATE wallets SET total_balance = total_balance - $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(amount)
            .execute(&mut **tx)
            .await?;
    }
    Ok(captured)
}

/// 경매의 모든 활성 홀드 해제 (종료/취소 전이에서 사용)
pub async fn release_all_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    auction_id: i64,
) -> Result<u64, AuctionError> {
    let rows = sqlx::query_as::<_, (i64, i64)>(
        "UPDATE escrow_holds SET status = 'RELEASED', updated_at = now()
         WHERE auction_id = $1 AND status = 'HELD'
         RETURNING user_id, amount",
    )
    .bind(auction_id)
    .fetch_all(&mut **tx)
    .await?;

    for (user_id, amount) in &rows {
        sqlx::query("UPDATE wallets SET available_balance = available_balance + $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(amount)
            .execute(&mut **tx)
            .await?;
    }
    Ok(rows.len() as u64)
}
// endregion: --- In-Transaction Operations

// region:    --- Escrow Ledger

/// 단건 원장 연산 표면 (핸들러/정산 연동용)
pub struct EscrowLedger<'a> {
    db: &'a DatabaseManager,
}

impl<'a> EscrowLedger<'a> {
    pub fn new(db: &'a DatabaseManager) -> Self {
        Self { db }
    }

    /// 가용 잔액 조회
    pub async fn available_balance(&self, user_id: i64) -> Result<i64, AuctionError> {
        let wallet = self.wallet(user_id).await?;
        Ok(wallet.available_balance)
    }

    /// 지갑 조회
    pub async fn wallet(&self, user_id: i64) -> Result<Wallet, AuctionError> {
        sqlx::query_as::<_, Wallet>(
            "SELECT user_id, total_balance, available_balance FROM wallets WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(self.db.pool())
        .await
        .map_err(map_not_found)
    }

    /// 입금 (외부 정산 연동 표면, 지갑이 없으면 생성)
    pub async fn deposit(&self, user_id: i64, amount: i64) -> Result<Wallet, AuctionError> {
        info!(
            "{:<12} --> 입금 user: {}, amount: {}",
            "Ledger", user_id, amount
        );
        let wallet = sqlx::query_as::<_, Wallet>(
            "INSERT INTO wallets (user_id, total_balance, available_balance)
             VALUES ($1, $2, $2)
             ON CONFLICT (user_id) DO UPDATE SET
                total_balance = wallets.total_balance + $2,
                available_balance = wallets.available_balance + $2
             RETURNING user_id, total_balance, available_balance",
        )
        .bind(user_id)
        .bind(amount)
        .fetch_one(self.db.pool())
        .await?;
        Ok(wallet)
    }

    /// 단건 홀드 해제 (멱등)
    pub async fn release(&self, user_id: i64, auction_id: i64) -> Result<i64, AuctionError> {
        self.db
            .transaction(|tx| Box::pin(async move { release_in_tx(tx, user_id, auction_id).await }))
            .await
    }

    /// 경매의 활성 홀드 조회
    pub async fn active_holds(&self, auction_id: i64) -> Result<Vec<EscrowHold>, AuctionError> {
        let holds = sqlx::query_as::<_, EscrowHold>(
            "SELECT id, user_id, auction_id, amount, status, created_at, updated_at
             FROM escrow_holds
             WHERE auction_id = $1 AND status = 'HELD'",
        )
        .bind(auction_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(holds)
    }
}
// endregion: --- Escrow Ledger
