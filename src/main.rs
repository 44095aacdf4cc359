// region:    --- Imports
use crate::config::Config;
use crate::database::DatabaseManager;
use crate::message_broker::{KafkaManager, NOTIFICATIONS_TOPIC};
use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
// endregion: --- Imports

// region:    --- Modules
mod auction;
mod bidding;
mod config;
mod database;
mod error;
mod event_store;
mod fanout;
mod handlers;
mod ledger;
mod message_broker;
mod query;
mod scheduler;
mod state;

// endregion: --- Modules

// region:    --- Main
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // logging 초기화
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .without_time()
        .with_target(false)
        .init();

    // 환경 설정 로드
    let app_config = Config::from_env();
    info!("{:<12} --> 설정 로드: {:?}", "Main", app_config);

    // DatabaseManager 생성
    let db_manager = Arc::new(DatabaseManager::new().await);

    // 데이터베이스 초기화 (멱등: 재기동 시 진행 중 경매/활성 홀드 유지)
    if let Err(e) = db_manager.initialize_database().await {
        error!("{:<12} --> 데이터베이스 초기화 실패: {:?}", "Main", e);
        return Err(e.into());
    }
    info!("{:<12} --> 데이터베이스 초기화 성공", "Main");

    // Kafka 매니저 생성 및 알림 토픽 준비
    let kafka_manager = Arc::new(KafkaManager::new());
    kafka_manager.create_topic(NOTIFICATIONS_TOPIC, 5, 1).await?;
    info!("{:<12} --> Kafka 초기화 성공", "Main");

    // 공유 상태 구성
    let bind_addr = app_config.bind_addr.clone();
    let app_state = AppState::new(
        Arc::clone(&db_manager),
        kafka_manager.get_producer(),
        app_config,
    );

    // 시각 기반 상태 전이 스케줄러 (저장된 start/end 시각에서 재계산)
    let auction_scheduler = scheduler::AuctionScheduler::new(app_state.clone());
    auction_scheduler.start().await;

    // 테스트 페이지를 위한 cors 설정
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // 라우터 설정
    let routes_all = Router::new()
        .route("/bid", post(handlers::handle_bid))
        .route("/buy-now", post(handlers::handle_buy_now))
        .route(
            "/auctions",
            post(handlers::handle_create_auction).get(handlers::handle_get_auctions),
        )
        .route("/auction/:id", get(handlers::handle_get_auction))
        .route(
            "/auction/:id/highest-bid",
            get(handlers::handle_get_highest_bid),
        )
        .route("/auction/:id/bids", get(handlers::handle_get_bid_history))
        .route("/auction/:id/events", get(handlers::handle_get_events))
        .route("/auction/:id/transition", post(handlers::handle_transition))
        .route("/auction/:id/ws", get(handlers::handle_join_room))
        .route("/wallets/deposit", post(handlers::handle_deposit))
        .route("/wallets/:id", get(handlers::handle_get_wallet))
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024 * 20)) // 동시성을 위한 바디 사이즈 10배 증가(20MB)
        .with_state(app_state);

    // 리스너 생성
    let listener = TcpListener::bind(&bind_addr).await?;
    info!(
        "{:<12} --> Web Server: Listening on {}",
        "Main",
        listener.local_addr()?
    );

    // 서버 실행
    if let Err(err) = axum::serve(listener, routes_all.into_make_service()).await {
        error!("{:<12} --> Server error: {}", "Main", err);
    }
    Ok(())
}
// endregion: --- Main
