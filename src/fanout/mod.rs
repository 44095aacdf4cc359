/// 경매 룸 이벤트 팬아웃
/// 경매마다 broadcast 채널 하나를 두고, 커밋 순서 그대로 델타를 모든
/// 관전자에게 전달한다. 발행은 해당 경매의 커밋 슬롯 안에서만 일어나므로
/// 채널 순서 == 커밋 순서가 보장된다. 늦게 합류한 관전자는 구독을 먼저
/// 등록한 뒤 스냅샷을 읽고, 스냅샷 version 이후의 델타만 이어받는다.
// region:    --- Imports
use crate::event_store::Event;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

// endregion: --- Imports

// region:    --- Auction Room

/// 관전자 수용량: 이보다 밀린 관전자는 연결이 끊기고 스냅샷으로 재동기화한다
const ROOM_CHANNEL_CAPACITY: usize = 1024;

/// 경매 하나의 런타임 룸 (영속화되지 않음)
struct AuctionRoom {
    tx: broadcast::Sender<Event>,
    observers: usize,
    /// 경매가 SETTLED/CANCELLED에 도달했는지 여부
    terminal: bool,
}

impl AuctionRoom {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(ROOM_CHANNEL_CAPACITY);
        Self {
            tx,
            observers: 0,
            terminal: false,
        }
    }
}
// endregion: --- Auction Room

// region:    --- Room Manager

/// 전체 경매 룸 레지스트리
#[derive(Default)]
pub struct RoomManager {
    rooms: Mutex<HashMap<i64, AuctionRoom>>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 관전자 합류: 첫 합류 시 룸을 만들고 수신기를 반환한다.
    /// 호출자는 이 수신기를 얻은 **다음** 스냅샷을 읽어야 스냅샷 이전에
    /// 발행된 델타를 놓치는 경합이 생기지 않는다.
    pub fn join(&self, auction_id: i64) -> broadcast::Receiver<Event> {
        let mut rooms = self.rooms.lock().expect("room registry poisoned");
        let room = rooms.entry(auction_id).or_insert_with(AuctionRoom::new);
        room.observers += 1;
        debug!(
            "{:<12} --> 관전자 합류 auction: {}, observers: {}",
            "Fanout", auction_id, room.observers
        );
        room.tx.subscribe()
    }

    /// 관전자 이탈: 등록만 정리하며 경매 상태에는 영향이 없다.
    /// 종료 상태의 경매에서 마지막 관전자가 떠나면 룸을 파기한다.
    pub fn leave(&self, auction_id: i64) {
        let mut rooms = self.rooms.lock().expect("room registry poisoned");
        if let Some(room) = rooms.get_mut(&auction_id) {
            room.observers = room.observers.saturating_sub(1);
            debug!(
                "{:<12} --> 관전자 이탈 auction: {}, observers: {}",
                "Fanout", auction_id, room.observers
            );
            if room.observers == 0 && room.terminal {
                rooms.remove(&auction_id);
            }
        }
    }

    /// 커밋된 델타 발행 (커밋 슬롯 안에서 호출)
    /// 첫 델타(개시 전이)가 룸을 만든다. 관전자가 없으면 조용히 버린다.
    pub fn publish(&self, auction_id: i64, event: &Event, terminal: bool) {
        let mut rooms = self.rooms.lock().expect("room registry poisoned");
        let room = rooms.entry(auction_id).or_insert_with(AuctionRoom::new);
        if terminal {
            room.terminal = true;
        }
        // 수신자가 없을 때의 send 오류는 정상 경로
        let _ = room.tx.send(event.clone());
        if room.observers == 0 && room.terminal {
            rooms.remove(&auction_id);
        }
    }

    /// 현재 관전자 수 (테스트/관측용)
    pub fn observer_count(&self, auction_id: i64) -> usize {
        let rooms = self.rooms.lock().expect("room registry poisoned");
        rooms.get(&auction_id).map(|r| r.observers).unwrap_or(0)
    }
}
// endregion: --- Room Manager

// region:    --- Tests
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(auction_id: i64, version: i64) -> Event {
        Event {
            id: version,
            aggregate_id: auction_id,
            event_type: "BidPlaced".to_string(),
            data: serde_json::json!({}),
            timestamp: Utc::now(),
            version,
        }
    }

    #[tokio::test]
    async fn test_deltas_arrive_in_publish_order() {
        let rooms = RoomManager::new();
        let mut rx = rooms.join(1);

        for v in 1..=5 {
            rooms.publish(1, &event(1, v), false);
        }

        for expected in 1..=5 {
            let got = rx.recv().await.unwrap();
            assert_eq!(got.version, expected);
        }
    }

    #[tokio::test]
    async fn test_leave_does_not_affect_other_observers() {
        let rooms = RoomManager::new();
        let _rx_a = rooms.join(1);
        let mut rx_b = rooms.join(1);
        assert_eq!(rooms.observer_count(1), 2);

        rooms.leave(1);
        assert_eq!(rooms.observer_count(1), 1);

        rooms.publish(1, &event(1, 1), false);
        assert_eq!(rx_b.recv().await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_room_destroyed_when_terminal_and_empty() {
        let rooms = RoomManager::new();
        let _rx = rooms.join(1);

        // 종료 델타가 와도 관전자가 남아 있으면 룸 유지
        rooms.publish(1, &event(1, 1), true);
        assert_eq!(rooms.observer_count(1), 1);

        rooms.leave(1);
        // 새 합류는 새 룸을 만든다
        let mut rx2 = rooms.join(1);
        rooms.publish(1, &event(1, 2), false);
        assert_eq!(rx2.recv().await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_first_publish_creates_room() {
        let rooms = RoomManager::new();
        // 관전자보다 먼저 도착한 델타는 버려지지만 룸은 생긴다
        rooms.publish(42, &event(42, 1), false);
        assert_eq!(rooms.observer_count(42), 0);

        // 이후 합류한 관전자는 다음 델타부터 받는다
        let mut rx = rooms.join(42);
        rooms.publish(42, &event(42, 2), false);
        assert_eq!(rx.recv().await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_terminal_publish_without_observers_tears_down_room() {
        let rooms = RoomManager::new();
        rooms.publish(7, &event(7, 1), false);
        rooms.publish(7, &event(7, 2), true);

        // 종료 델타 이후의 합류는 새 룸에서 시작한다
        let mut rx = rooms.join(7);
        rooms.publish(7, &event(7, 3), false);
        assert_eq!(rx.recv().await.unwrap().version, 3);
    }
}
// endregion: --- Tests
