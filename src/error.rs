/// 경매 엔진 오류 분류
/// 모든 오류는 복구 가능하며, 실패한 선행 조건을 호출자에게 그대로 알린다.
// region:    --- Imports
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

// endregion: --- Imports

// region:    --- AuctionError
#[derive(Debug, Error)]
pub enum AuctionError {
    /// 경매가 LIVE 상태가 아니거나 종료 시각이 지났음
    #[error("경매가 입찰 가능한 상태가 아닙니다")]
    AuctionNotOpen,

    /// 입찰 금액이 현재 가격(및 최소 증분)보다 낮거나 같음
    #[error("입찰 금액이 현재 가격보다 낮습니다")]
    BidTooLow { current_price: i64 },

    /// 가용 잔액 부족
    #[error("가용 잔액이 부족합니다")]
    InsufficientFunds { available: i64 },

    /// 원장 또는 경매 버전의 동시 갱신 충돌 (재시도 한도 초과 후 표면화)
    #[error("원장 충돌: 동시 갱신으로 커밋에 실패했습니다")]
    LedgerConflict,

    /// 허용되지 않는 상태 전이
    #[error("허용되지 않는 상태 전이입니다")]
    InvalidTransition { from: String, trigger: String },

    /// 경매 또는 지갑을 찾을 수 없음
    #[error("대상을 찾을 수 없습니다")]
    NotFound,

    /// 저장소 오류
    #[error("데이터베이스 오류: {0}")]
    Database(sqlx::Error),
}

/// 재시도 가능한 SQLSTATE 분류
/// 직렬화 실패(40001)와 데드락(40P01)은 Postgres가 중단시킨 동시 갱신
/// 충돌이므로 LedgerConflict로 분류해 커밋 재시도 한도 안에서 흡수한다.
fn is_contention_code(code: &str) -> bool {
    code == "40001" || code == "40P01"
}

impl From<sqlx::Error> for AuctionError {
    fn from(e: sqlx::Error) -> Self {
        let contention = e
            .as_database_error()
            .and_then(|d| d.code())
            .map(|c| is_contention_code(&c))
            .unwrap_or(false);
        if contention {
            AuctionError::LedgerConflict
        } else {
            AuctionError::Database(e)
        }
    }
}

impl AuctionError {
    /// 클라이언트에 노출되는 안정적인 오류 코드
    pub fn code(&self) -> &'static str {
        match self {
            AuctionError::AuctionNotOpen => "AUCTION_NOT_OPEN",
            AuctionError::BidTooLow { .. } => "BID_TOO_LOW",
            AuctionError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            AuctionError::LedgerConflict => "LEDGER_CONFLICT",
            AuctionError::InvalidTransition { .. } => "INVALID_TRANSITION",
            AuctionError::NotFound => "NOT_FOUND",
            AuctionError::Database(_) => "DATABASE_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AuctionError::NotFound => StatusCode::NOT_FOUND,
            AuctionError::LedgerConflict => StatusCode::CONFLICT,
            AuctionError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// 오류 응답 본문
    pub fn to_json(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        match self {
            AuctionError::BidTooLow { current_price } => {
                body["current_price"] = serde_json::json!(current_price);
            }
            AuctionError::InsufficientFunds { available } => {
                body["available_balance"] = serde_json::json!(available);
            }
            AuctionError::InvalidTransition { from, trigger } => {
                body["from"] = serde_json::json!(from);
                body["trigger"] = serde_json::json!(trigger);
            }
            _ => {}
        }
        body
    }
}

impl IntoResponse for AuctionError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_json())).into_response()
    }
}

// RowNotFound는 NotFound로 표면화
pub fn map_not_found(e: sqlx::Error) -> AuctionError {
    match e {
        sqlx::Error::RowNotFound => AuctionError::NotFound,
        other => AuctionError::Database(other),
    }
}
// endregion: --- AuctionError

// region:    --- Tests
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(AuctionError::AuctionNotOpen.code(), "AUCTION_NOT_OPEN");
        assert_eq!(
            AuctionError::BidTooLow { current_price: 100 }.code(),
            "BID_TOO_LOW"
        );
        assert_eq!(
            AuctionError::InsufficientFunds { available: 0 }.code(),
            "INSUFFICIENT_FUNDS"
        );
        assert_eq!(AuctionError::LedgerConflict.code(), "LEDGER_CONFLICT");
        assert_eq!(AuctionError::NotFound.code(), "NOT_FOUND");
    }

    #[test]
    fn test_serialization_and_deadlock_classified_as_contention() {
        assert!(is_contention_code("40001"));
        assert!(is_contention_code("40P01"));
        assert!(!is_contention_code("23505"));
        assert!(!is_contention_code("42P01"));
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        assert_eq!(map_not_found(sqlx::Error::RowNotFound).code(), "NOT_FOUND");
        // 일반 sqlx 오류는 DATABASE_ERROR로 남는다
        assert_eq!(
            AuctionError::from(sqlx::Error::PoolClosed).code(),
            "DATABASE_ERROR"
        );
    }

    #[test]
    fn test_bid_too_low_body_carries_current_price() {
        let body = AuctionError::BidTooLow {
            current_price: 105_000,
        }
        .to_json();
        assert_eq!(body["code"], "BID_TOO_LOW");
        assert_eq!(body["current_price"], 105_000);
    }
}
// endregion: --- Tests
