/// 공유 애플리케이션 상태와 경매별 커밋 슬롯
// region:    --- Imports
use crate::config::Config;
use crate::database::DatabaseManager;
use crate::fanout::RoomManager;
use crate::message_broker::KafkaProducer;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

// endregion: --- Imports

// region:    --- Auction Locks

/// 경매별 배타 커밋 슬롯 레지스트리
/// 한 경매의 커밋(입찰, 즉시 구매, 상태 전이)은 이 뮤텍스로 직렬화되고,
/// 서로 다른 경매는 독립적으로 진행된다. 전역 락은 두지 않는다.
#[derive(Default)]
pub struct AuctionLocks {
    inner: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl AuctionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 해당 경매의 커밋 슬롯 핸들
    pub fn for_auction(&self, auction_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().expect("lock registry poisoned");
        Arc::clone(map.entry(auction_id).or_default())
    }
}
// endregion: --- Auction Locks

// region:    --- App State
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseManager>,
    pub producer: Arc<KafkaProducer>,
    pub rooms: Arc<RoomManager>,
    pub locks: Arc<AuctionLocks>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseManager>,
        producer: Arc<KafkaProducer>,
        config: Config,
    ) -> Self {
        Self {
            db,
            producer,
            rooms: Arc::new(RoomManager::new()),
            locks: Arc::new(AuctionLocks::new()),
            config: Arc::new(config),
        }
    }
}
// endregion: --- App State
