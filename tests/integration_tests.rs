use axum::http::StatusCode;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use vehicle_auction_service::auction::machine;
use vehicle_auction_service::auction::model::{Auction, Bid};
use vehicle_auction_service::config::Config;
use vehicle_auction_service::database::DatabaseManager;
use vehicle_auction_service::ledger::{self, EscrowLedger};
use vehicle_auction_service::message_broker::KafkaManager;
use vehicle_auction_service::query;
use vehicle_auction_service::state::AppState;

const BASE_URL: &str = "http://localhost:3000";

/// 트레이싱 초기화
fn init_tracing() {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .without_time()
        .with_target(false)
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// 데이터베이스 매니저 설정
async fn setup() -> Arc<DatabaseManager> {
    Arc::new(DatabaseManager::new().await)
}

/// 상태 기계 직접 호출용 앱 상태
fn test_state(db: Arc<DatabaseManager>) -> AppState {
    AppState::new(db, KafkaManager::new().get_producer(), Config::default())
}

/// 테스트 간 지갑 간섭을 막기 위한 사용자 id 베이스
fn unique_base() -> i64 {
    Utc::now().timestamp_micros()
}

/// 테스트용 경매 생성 후 LIVE로 전이
async fn create_live_auction(
    client: &Client,
    start_price: i64,
    buy_now_price: Option<i64>,
    end_time: DateTime<Utc>,
) -> Auction {
    let now = Utc::now();
    let body = json!({
        "vehicle_id": unique_base(),
        "start_price": start_price,
        "buy_now_price": buy_now_price,
        "start_time": now,
        "end_time": end_time,
    });
    let auction: Auction = client
        .post(format!("{}/auctions", BASE_URL))
        .json(&body)
        .send()
        .await
        .expect("경매 생성 요청 실패")
        .json()
        .await
        .expect("경매 생성 응답 파싱 실패");

    // 운영자 개시 (스케줄러를 기다리지 않음)
    let response = client
        .post(format!("{}/auction/{}/transition", BASE_URL, auction.id))
        .json(&json!({ "trigger": "start" }))
        .send()
        .await
        .expect("전이 요청 실패");
    assert!(response.status().is_success());

    let started: Auction = response.json().await.unwrap();
    assert_eq!(started.status, "LIVE");
    started
}

/// 테스트용 입금
async fn deposit(client: &Client, user_id: i64, amount: i64) {
    let response = client
        .post(format!("{}/wallets/deposit", BASE_URL))
        .json(&json!({ "user_id": user_id, "amount": amount }))
        .send()
        .await
        .expect("입금 요청 실패");
    assert!(response.status().is_success());
}

/// 지갑 조회
async fn get_wallet(client: &Client, user_id: i64) -> Value {
    client
        .get(format!("{}/wallets/{}", BASE_URL, user_id))
        .send()
        .await
        .expect("지갑 조회 실패")
        .json()
        .await
        .unwrap()
}

/// 입찰 전송
async fn place_bid(client: &Client, auction_id: i64, bidder_id: i64, amount: i64) -> (StatusCode, Value) {
    let response = client
        .post(format!("{}/bid", BASE_URL))
        .json(&json!({
            "auction_id": auction_id,
            "bidder_id": bidder_id,
            "amount": amount,
        }))
        .send()
        .await
        .expect("입찰 요청 실패");
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    (status, body)
}

/// 경매의 활성 홀드 수 조회
async fn active_hold_count(db_manager: &DatabaseManager, auction_id: i64) -> i64 {
    sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM escrow_holds WHERE auction_id = $1 AND status = 'HELD'",
    )
    .bind(auction_id)
    .fetch_one(db_manager.pool())
    .await
    .unwrap()
}

/// 입찰 테스트
#[tokio::test]
async fn test_place_bid() {
    let db_manager = setup().await;
    let client = Client::new();
    let bidder = unique_base();

    let auction = create_live_auction(&client, 100_000, None, Utc::now() + Duration::hours(2)).await;
    deposit(&client, bidder, 500_000).await;

    let (status, body) = place_bid(&client, auction.id, bidder, 105_000).await;
    assert!(status.is_success(), "입찰 실패: {:?}", body);
    assert_eq!(body["current_price"], 105_000);

    // 스냅샷과 입찰 이력 확인
    let updated = query::handlers::get_auction(&db_manager, auction.id)
        .await
        .unwrap();
    assert_eq!(updated.current_price, 105_000);
    assert_eq!(updated.highest_bidder_id, Some(bidder));
    assert_eq!(updated.bid_count, 1);

    let bids = query::handlers::get_bid_history(&db_manager, auction.id)
        .await
        .unwrap();
    assert_eq!(bids.len(), 1);
    assert_eq!(bids[0].seq, 1);

    // 가용 잔액은 홀드만큼 차감, 총 잔액은 그대로
    let wallet = get_wallet(&client, bidder).await;
    assert_eq!(wallet["available_balance"], 500_000 - 105_000);
    assert_eq!(wallet["total_balance"], 500_000);
}

/// 잔액 부족 거절 테스트: 잔액은 변하지 않는다
#[tokio::test]
async fn test_insufficient_funds_rejected() {
    let client = Client::new();
    let bidder = unique_base();

    let auction = create_live_auction(&client, 10_000, None, Utc::now() + Duration::hours(2)).await;
    deposit(&client, bidder, 50_000).await;

    let (status, body) = place_bid(&client, auction.id, bidder, 60_000).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INSUFFICIENT_FUNDS");

    let wallet = get_wallet(&client, bidder).await;
    assert_eq!(wallet["available_balance"], 50_000);
    assert_eq!(wallet["total_balance"], 50_000);
}

/// 낮은 입찰 거절 테스트: 105,000 커밋 후 103,000은 BID_TOO_LOW
#[tokio::test]
async fn test_lower_concurrent_bid_rejected() {
    let client = Client::new();
    let base = unique_base();
    let (user_a, user_b) = (base + 1, base + 2);

    let auction = create_live_auction(&client, 100_000, None, Utc::now() + Duration::hours(2)).await;
    deposit(&client, user_a, 500_000).await;
    deposit(&client, user_b, 500_000).await;

    let (status, _) = place_bid(&client, auction.id, user_a, 105_000).await;
    assert!(status.is_success());

    let (status, body) = place_bid(&client, auction.id, user_b, 103_000).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BID_TOO_LOW");
    assert_eq!(body["current_price"], 105_000);
}

/// 번갈아 상회 입찰 테스트: 끝나면 활성 홀드는 정확히 하나
#[tokio::test]
async fn test_alternating_outbids_leave_single_hold() {
    let db_manager = setup().await;
    let client = Client::new();
    let base = unique_base();
    let (user_a, user_b) = (base + 1, base + 2);

    let auction = create_live_auction(&client, 10_000, None, Utc::now() + Duration::hours(2)).await;
    deposit(&client, user_a, 1_000_000).await;
    deposit(&client, user_b, 1_000_000).await;

    // 두 사용자가 다섯 번씩 번갈아 상회 입찰
    let mut amount = 10_000;
    let mut last_bidder = user_a;
    for round in 0..10 {
        amount += 5_000;
        last_bidder = if round % 2 == 0 { user_a } else { user_b };
        let (status, body) = place_bid(&client, auction.id, last_bidder, amount).await;
        assert!(status.is_success(), "round {} 실패: {:?}", round, body);
    }

    assert_eq!(active_hold_count(&db_manager, auction.id).await, 1);

    // 최고 입찰자만 자금이 묶이고, 밀려난 쪽은 전액 복원
    let loser = if last_bidder == user_a { user_b } else { user_a };
    let winner_wallet = get_wallet(&client, last_bidder).await;
    let loser_wallet = get_wallet(&client, loser).await;
    assert_eq!(winner_wallet["available_balance"], 1_000_000 - amount);
    assert_eq!(loser_wallet["available_balance"], 1_000_000);

    let updated = query::handlers::get_auction(&db_manager, auction.id)
        .await
        .unwrap();
    assert_eq!(updated.current_price, amount);
    assert_eq!(updated.highest_bidder_id, Some(last_bidder));
}

/// 종료 전이 멱등성 테스트: 같은 트리거 중복 전달은 no-op
#[tokio::test]
async fn test_end_transition_idempotent() {
    let db_manager = setup().await;
    let client = Client::new();
    let bidder = unique_base();

    let auction = create_live_auction(&client, 50_000, None, Utc::now() + Duration::hours(2)).await;
    deposit(&client, bidder, 200_000).await;

    let (status, _) = place_bid(&client, auction.id, bidder, 60_000).await;
    assert!(status.is_success());

    // 조기 종료 트리거를 두 번 전달
    for _ in 0..2 {
        let response = client
            .post(format!("{}/auction/{}/transition", BASE_URL, auction.id))
            .json(&json!({ "trigger": "end" }))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
        let ended: Auction = response.json().await.unwrap();
        assert_eq!(ended.status, "ENDED");
        assert_eq!(ended.winner_id, Some(bidder));
    }

    // 낙찰자 홀드는 캡처: 총 잔액에서 영구 차감, 가용 잔액 복원 없음
    let wallet = get_wallet(&client, bidder).await;
    assert_eq!(wallet["total_balance"], 200_000 - 60_000);
    assert_eq!(wallet["available_balance"], 200_000 - 60_000);
    assert_eq!(active_hold_count(&db_manager, auction.id).await, 0);
}

/// 취소 전이 테스트: 모든 활성 홀드 무조건 해제
#[tokio::test]
async fn test_cancel_releases_all_holds() {
    let db_manager = setup().await;
    let client = Client::new();
    let bidder = unique_base();

    let auction = create_live_auction(&client, 20_000, None, Utc::now() + Duration::hours(2)).await;
    deposit(&client, bidder, 100_000).await;

    let (status, _) = place_bid(&client, auction.id, bidder, 25_000).await;
    assert!(status.is_success());

    let response = client
        .post(format!("{}/auction/{}/transition", BASE_URL, auction.id))
        .json(&json!({ "trigger": "cancel" }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let wallet = get_wallet(&client, bidder).await;
    assert_eq!(wallet["available_balance"], 100_000);
    assert_eq!(wallet["total_balance"], 100_000);
    assert_eq!(active_hold_count(&db_manager, auction.id).await, 0);
}

/// 스나이핑 방지 테스트: 마감 임박 입찰이 종료 시각을 밀어낸다
/// 서버 기본 연장 윈도우(30초)를 가정한다.
#[tokio::test]
async fn test_anti_snipe_extends_end_time() {
    let db_manager = setup().await;
    let client = Client::new();
    let bidder = unique_base();

    let original_end = Utc::now() + Duration::seconds(5);
    let auction = create_live_auction(&client, 10_000, None, original_end).await;
    deposit(&client, bidder, 100_000).await;

    let bid_time = Utc::now();
    let (status, body) = place_bid(&client, auction.id, bidder, 15_000).await;
    assert!(status.is_success(), "입찰 실패: {:?}", body);

    let updated = query::handlers::get_auction(&db_manager, auction.id)
        .await
        .unwrap();
    assert!(updated.end_time > original_end);
    // 연장은 입찰 시각 기준
    assert!(updated.end_time >= bid_time + Duration::seconds(29));
    assert!(updated.end_time <= bid_time + Duration::seconds(35));
}

/// 만료 웨이크업 재확인 테스트
/// 틱 조회 시점에는 만료였어도, 커밋 슬롯을 기다리는 동안 입찰이 마감을
/// 연장했으면 만료 전이는 no-op이어야 한다. expire는 슬롯 획득 후 저장된
/// end_time을 다시 읽어 판정하므로 미래 마감에서는 경매를 끝내지 않는다.
#[tokio::test]
async fn test_expire_rechecks_end_time_after_slot() {
    let db_manager = setup().await;
    let client = Client::new();
    let bidder = unique_base();

    let auction = create_live_auction(&client, 10_000, None, Utc::now() + Duration::hours(2)).await;
    deposit(&client, bidder, 100_000).await;
    let (status, _) = place_bid(&client, auction.id, bidder, 15_000).await;
    assert!(status.is_success());

    let state = test_state(Arc::clone(&db_manager));

    // 마감이 미래인 경매에 만료 웨이크업이 도달해도 종료되지 않는다
    let unchanged = machine::expire(&state, auction.id).await.unwrap();
    assert_eq!(unchanged.status, "LIVE");
    assert_eq!(active_hold_count(&db_manager, auction.id).await, 1);

    // 마감이 지나면 같은 웨이크업이 경매를 종료하고 낙찰을 확정한다
    sqlx::query("UPDATE auctions SET end_time = $1 WHERE id = $2")
        .bind(Utc::now() - Duration::seconds(1))
        .bind(auction.id)
        .execute(db_manager.pool())
        .await
        .unwrap();

    let ended = machine::expire(&state, auction.id).await.unwrap();
    assert_eq!(ended.status, "ENDED");
    assert_eq!(ended.winner_id, Some(bidder));
}

/// 원장 단건 연산 테스트: 같은 홀드의 이중 해제는 멱등이며
/// 가용 잔액은 정확히 한 번만 복원된다
#[tokio::test]
async fn test_ledger_double_release_restores_balance_once() {
    let db_manager = setup().await;
    let client = Client::new();
    let user = unique_base();

    let auction = create_live_auction(&client, 10_000, None, Utc::now() + Duration::hours(2)).await;
    let auction_id = auction.id;

    deposit(&client, user, 100_000).await;
    let escrow = EscrowLedger::new(&db_manager);
    assert_eq!(escrow.available_balance(user).await.unwrap(), 100_000);

    db_manager
        .transaction(|tx| Box::pin(async move { ledger::hold_in_tx(tx, user, auction_id, 40_000).await }))
        .await
        .unwrap();

    assert_eq!(escrow.available_balance(user).await.unwrap(), 60_000);
    let holds = escrow.active_holds(auction_id).await.unwrap();
    assert_eq!(holds.len(), 1);
    assert_eq!(holds[0].amount, 40_000);
    assert_eq!(holds[0].status, "HELD");

    // 첫 해제는 금액을 반환하고, 두 번째 해제는 조용히 성공한다
    assert_eq!(escrow.release(user, auction_id).await.unwrap(), 40_000);
    assert_eq!(escrow.release(user, auction_id).await.unwrap(), 0);

    assert_eq!(escrow.available_balance(user).await.unwrap(), 100_000);
    assert!(escrow.active_holds(auction_id).await.unwrap().is_empty());
}

/// 즉시 구매 테스트
#[tokio::test]
async fn test_buy_now() {
    let db_manager = setup().await;
    let client = Client::new();
    let buyer = unique_base();

    let auction =
        create_live_auction(&client, 100_000, Some(500_000), Utc::now() + Duration::hours(2)).await;
    deposit(&client, buyer, 600_000).await;

    let response = client
        .post(format!("{}/buy-now", BASE_URL))
        .json(&json!({ "auction_id": auction.id, "buyer_id": buyer }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let updated = query::handlers::get_auction(&db_manager, auction.id)
        .await
        .unwrap();
    assert_eq!(updated.status, "ENDED");
    assert_eq!(updated.winner_id, Some(buyer));
    assert_eq!(updated.current_price, 500_000);

    // 자금 즉시 캡처
    let wallet = get_wallet(&client, buyer).await;
    assert_eq!(wallet["total_balance"], 100_000);
    assert_eq!(wallet["available_balance"], 100_000);
}

/// 동시성 입찰 테스트
/// 수락된 부분 수열은 금액과 시퀀스가 모두 단조 증가하며 시퀀스에 빈틈이 없다.
#[tokio::test]
async fn test_concurrent_bidding() {
    init_tracing();

    let db_manager = setup().await;
    let client = Client::new();
    let base = unique_base();

    let auction = create_live_auction(&client, 10_000, None, Utc::now() + Duration::hours(2)).await;

    // 50명의 입찰자 지갑 준비
    for i in 1..=50i64 {
        deposit(&client, base + i, 1_000_000).await;
    }

    // 50개의 동시 입찰 생성
    let mut handles = vec![];
    for i in 1..=50i64 {
        let bid_amount = 10_000 + i * 1_000;
        let auction_id = auction.id;
        let bidder_id = base + i;

        let handle = tokio::spawn(async move {
            let client = Client::new();
            let response = client
                .post(format!("{}/bid", BASE_URL))
                .json(&json!({
                    "auction_id": auction_id,
                    "bidder_id": bidder_id,
                    "amount": bid_amount,
                }))
                .send()
                .await
                .unwrap();
            (response.status(), bid_amount)
        });
        handles.push(handle);
    }

    let mut successful_bids = 0;
    let mut failed_bids = 0;
    let mut max_accepted = 0;
    for handle in handles {
        let (status, amount) = handle.await.unwrap();
        if status == StatusCode::OK {
            successful_bids += 1;
            max_accepted = max_accepted.max(amount);
        } else {
            failed_bids += 1;
        }
    }
    info!(
        "성공한 입찰 수: {}, 실패한 입찰 수: {}",
        successful_bids, failed_bids
    );
    assert!(successful_bids >= 1);

    // 수락된 입찰의 시퀀스는 1부터 빈틈없이 증가, 금액도 단조 증가
    let mut bids: Vec<Bid> = query::handlers::get_bid_history(&db_manager, auction.id)
        .await
        .unwrap();
    bids.sort_by_key(|b| b.seq);
    assert_eq!(bids.len(), successful_bids);
    for (idx, bid) in bids.iter().enumerate() {
        assert_eq!(bid.seq, idx as i64 + 1, "시퀀스에 빈틈 발생");
        if idx > 0 {
            assert!(bid.amount > bids[idx - 1].amount, "금액 단조 증가 위반");
        }
    }

    // 최종 가격은 수락된 최고 금액
    let updated = query::handlers::get_auction(&db_manager, auction.id)
        .await
        .unwrap();
    assert_eq!(updated.current_price, max_accepted);
    assert_eq!(updated.bid_count, successful_bids as i64);

    // 활성 홀드는 최고 입찰자 하나뿐
    assert_eq!(active_hold_count(&db_manager, auction.id).await, 1);
}
