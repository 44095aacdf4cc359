// region:    --- Imports
use crate::auction::machine::{self, Trigger};
use crate::bidding::commands::{handle_place_bid, BuyNowCommand, PlaceBidCommand};
use crate::error::AuctionError;
use crate::event_store;
use crate::ledger::EscrowLedger;
use crate::query;
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query as AxumQuery, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

// endregion: --- Imports

// region:    --- Command Handlers

/// 입찰 요청 처리
pub async fn handle_bid(
    State(state): State<AppState>,
    Json(cmd): Json<PlaceBidCommand>,
) -> impl IntoResponse {
    info!("{:<12} --> 입찰 요청 처리 시작: {:?}", "Handler", cmd);

    match handle_place_bid(&state, cmd).await {
        Ok((auction, bid)) => Json(serde_json::json!({
            "message": "입찰이 성공적으로 처리되었습니다.",
            "bid": bid,
            "current_price": auction.current_price,
            "end_time": auction.end_time,
            "version": auction.version,
        }))
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// 즉시 구매 요청 처리
pub async fn handle_buy_now(
    State(state): State<AppState>,
    Json(cmd): Json<BuyNowCommand>,
) -> impl IntoResponse {
    info!("{:<12} --> 즉시 구매 요청 처리 시작: {:?}", "Handler", cmd);

    match crate::bidding::commands::handle_buy_now(&state, cmd).await {
        Ok((auction, bid)) => Json(serde_json::json!({
            "message": "즉시 구매가 성공적으로 처리되었습니다.",
            "bid": bid,
            "winner_id": auction.winner_id,
            "current_price": auction.current_price,
            "status": auction.status,
        }))
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// 상태 전이 명령
#[derive(Debug, Deserialize)]
pub struct TransitionCommand {
    pub trigger: String,
}

/// 상태 전이 트리거 전달 (운영자 조기 종료/취소, 외부 결제 확인의 settle)
pub async fn handle_transition(
    State(state): State<AppState>,
    Path(auction_id): Path<i64>,
    Json(cmd): Json<TransitionCommand>,
) -> impl IntoResponse {
    info!(
        "{:<12} --> 상태 전이 요청 auction: {}, trigger: {}",
        "Handler", auction_id, cmd.trigger
    );

    let Some(trigger) = Trigger::parse(&cmd.trigger) else {
        return AuctionError::InvalidTransition {
            from: "-".to_string(),
            trigger: cmd.trigger,
        }
        .into_response();
    };

    match machine::transition(&state, auction_id, trigger).await {
        Ok(auction) => Json(auction).into_response(),
        Err(e) => e.into_response(),
    }
}

/// 경매 생성 명령 (리스팅 카탈로그가 공급하는 정적 메타데이터)
#[derive(Debug, Deserialize)]
pub struct CreateAuctionCommand {
    pub vehicle_id: i64,
    pub start_price: i64,
    #[serde(default)]
    pub reserve_price: i64,
    pub buy_now_price: Option<i64>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// 경매 생성
pub async fn handle_create_auction(
    State(state): State<AppState>,
    Json(cmd): Json<CreateAuctionCommand>,
) -> impl IntoResponse {
    info!("{:<12} --> 경매 생성 요청: {:?}", "Handler", cmd);
    match query::handlers::create_auction(
        &state.db,
        cmd.vehicle_id,
        cmd.start_price,
        cmd.reserve_price,
        cmd.buy_now_price,
        cmd.start_time,
        cmd.end_time,
    )
    .await
    {
        Ok(auction) => Json(auction).into_response(),
        Err(e) => e.into_response(),
    }
}

/// 입금 명령 (외부 정산 연동 표면)
#[derive(Debug, Deserialize)]
pub struct DepositCommand {
    pub user_id: i64,
    pub amount: i64,
}

/// 지갑 입금
pub async fn handle_deposit(
    State(state): State<AppState>,
    Json(cmd): Json<DepositCommand>,
) -> impl IntoResponse {
    match EscrowLedger::new(&state.db).deposit(cmd.user_id, cmd.amount).await {
        Ok(wallet) => Json(wallet).into_response(),
        Err(e) => e.into_response(),
    }
}

// endregion: --- Command Handlers

// region:    --- Query Handlers

/// 경매 스냅샷 조회
pub async fn handle_get_auction(
    State(state): State<AppState>,
    Path(auction_id): Path<i64>,
) -> impl IntoResponse {
    info!("{:<12} --> 경매 스냅샷 조회 id: {}", "HandlerQuery", auction_id);
    match query::handlers::get_auction(&state.db, auction_id).await {
        Ok(auction) => Json(auction).into_response(),
        Err(e) => e.into_response(),
    }
}

/// 모든 경매 조회
pub async fn handle_get_auctions(State(state): State<AppState>) -> impl IntoResponse {
    info!("{:<12} --> 모든 경매 조회", "HandlerQuery");
    match query::handlers::get_all_auctions(&state.db).await {
        Ok(auctions) => Json(auctions).into_response(),
        Err(e) => e.into_response(),
    }
}

/// 입찰 이력 조회
pub async fn handle_get_bid_history(
    State(state): State<AppState>,
    Path(auction_id): Path<i64>,
) -> impl IntoResponse {
    info!("{:<12} --> 입찰 이력 조회 id: {}", "HandlerQuery", auction_id);
    match query::handlers::get_bid_history(&state.db, auction_id).await {
        Ok(history) => Json(history).into_response(),
        Err(e) => e.into_response(),
    }
}

/// 최고 입찰 조회
pub async fn handle_get_highest_bid(
    State(state): State<AppState>,
    Path(auction_id): Path<i64>,
) -> impl IntoResponse {
    info!("{:<12} --> 최고 입찰 조회 id: {}", "HandlerQuery", auction_id);
    match query::handlers::get_highest_bid(&state.db, auction_id).await {
        Ok(bid) => Json(bid).into_response(),
        Err(e) => e.into_response(),
    }
}

/// 이벤트 이어받기 조회
/// 재접속한 클라이언트가 스냅샷 version 이후의 델타를 순서대로 받아간다.
pub async fn handle_get_events(
    State(state): State<AppState>,
    Path(auction_id): Path<i64>,
    AxumQuery(params): AxumQuery<EventsAfter>,
) -> impl IntoResponse {
    info!(
        "{:<12} --> 이벤트 이어받기 조회 id: {}, after: {}",
        "HandlerQuery", auction_id, params.after
    );
    match event_store::load_since(state.db.pool(), auction_id, params.after).await {
        Ok(events) => Json(events).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct EventsAfter {
    #[serde(default)]
    pub after: i64,
}

/// 지갑 조회
pub async fn handle_get_wallet(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> impl IntoResponse {
    match EscrowLedger::new(&state.db).wallet(user_id).await {
        Ok(wallet) => Json(wallet).into_response(),
        Err(e) => e.into_response(),
    }
}

// endregion: --- Query Handlers

// region:    --- Auction Room (WebSocket)

/// 경매 룸 합류: 연결이 join, 종료가 leave다
pub async fn handle_join_room(
    State(state): State<AppState>,
    Path(auction_id): Path<i64>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| room_session(state, auction_id, socket))
}

/// 관전자 세션
/// 구독을 먼저 등록한 뒤 스냅샷을 읽는다. 이후에는 스냅샷 version보다 큰
/// 델타만 전달하므로 유실도 중복도 없다.
async fn room_session(state: AppState, auction_id: i64, socket: WebSocket) {
    let mut rx = state.rooms.join(auction_id);

    let snapshot = match query::handlers::get_auction(&state.db, auction_id).await {
        Ok(auction) => auction,
        Err(e) => {
            let (mut ws_tx, _) = socket.split();
            let _ = ws_tx.send(Message::Text(e.to_json().to_string())).await;
            state.rooms.leave(auction_id);
            return;
        }
    };
    let snapshot_version = snapshot.version;

    let (mut ws_tx, mut ws_rx) = socket.split();
    let snapshot_msg = serde_json::json!({ "type": "snapshot", "auction": snapshot });
    if ws_tx
        .send(Message::Text(snapshot_msg.to_string()))
        .await
        .is_err()
    {
        state.rooms.leave(auction_id);
        return;
    }

    loop {
        tokio::select! {
            delta = rx.recv() => match delta {
                Ok(event) => {
                    // 스냅샷에 이미 반영된 델타는 건너뜀
                    if event.version <= snapshot_version {
                        continue;
                    }
                    let msg = serde_json::json!({
                        "type": event.delta_kind(),
                        "version": event.version,
                        "data": event.data,
                        "timestamp": event.timestamp,
                    });
                    if ws_tx.send(Message::Text(msg.to_string())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // 밀린 관전자는 끊고 스냅샷으로 재동기화시킨다
                    warn!(
                        "{:<12} --> 관전자 지연으로 연결 종료 auction: {}, skipped: {}",
                        "Fanout", auction_id, skipped
                    );
                    break;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
        }
    }

    state.rooms.leave(auction_id);
}
// endregion: --- Auction Room (WebSocket)
