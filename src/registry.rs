//! 방 레지스트리
//!
//! 방 이름 → 방 상태. 방 하나의 모든 변경은 그 방의 Mutex 안에서 일어난다.

use crate::archive::RoomSnapshot;
use crate::spin::SpinArbitrator;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

pub type SharedRoom = Arc<Mutex<Room>>;

/// 방 정보
#[derive(Debug)]
pub struct Room {
    pub name: String,
    /// 입장 순서 유지
    pub members: Vec<String>,
    pub sections: Vec<String>,
    pub results: Vec<String>,
    pub arbitrator: SpinArbitrator,
    pub created_at: Instant,
    needs_restore: bool,
    closed: bool,
}

impl Room {
    pub fn new(name: String) -> Self {
        Self {
            name,
            members: Vec::new(),
            sections: Vec::new(),
            results: Vec::new(),
            arbitrator: SpinArbitrator::new(),
            created_at: Instant::now(),
            needs_restore: true,
            closed: false,
        }
    }

    pub fn is_member(&self, session_id: &str) -> bool {
        self.members.iter().any(|m| m == session_id)
    }

    /// 중복 입장은 무시
    pub fn add_member(&mut self, session_id: &str) {
        if !self.is_member(session_id) {
            self.members.push(session_id.to_string());
        }
    }

    pub fn remove_member(&mut self, session_id: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m != session_id);
        before != self.members.len()
    }

    /// 새로 만든 방에서 처음 한 번만 true를 반환한다
    pub fn begin_restore(&mut self) -> bool {
        std::mem::replace(&mut self.needs_restore, false)
    }

    pub fn restore(&mut self, snapshot: RoomSnapshot) {
        self.sections = snapshot.sections;
        self.results = snapshot.results;
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            sections: self.sections.clone(),
            results: self.results.clone(),
        }
    }

    pub fn reset_results(&mut self) {
        self.results.clear();
        self.arbitrator.reset();
    }

    /// 레지스트리에서 빠지기 직전에 호출. 이후 입장 시도는 새 방을 만든다.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// 방 레지스트리
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<String, SharedRoom>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 기존 방 반환 또는 빈 방 생성. DashMap 엔트리 락 안에서 생성되므로
    /// 같은 이름의 방이 둘 생기지 않는다.
    pub fn get_or_create(&self, name: &str) -> SharedRoom {
        let entry = self.rooms.entry(name.to_string()).or_insert_with(|| {
            tracing::info!(room = %name, "Room created");
            Arc::new(Mutex::new(Room::new(name.to_string())))
        });
        Arc::clone(entry.value())
    }

    pub fn get(&self, name: &str) -> Option<SharedRoom> {
        self.rooms.get(name).map(|r| Arc::clone(r.value()))
    }

    /// 레지스트리 엔트리가 여전히 `room`일 때만 제거.
    /// 호출자는 방 락을 쥔 채로 멤버가 비었는지 확인하고 `close()`를 먼저 호출해야 한다.
    pub fn remove_if_current(&self, name: &str, room: &SharedRoom) -> bool {
        self.rooms
            .remove_if(name, |_, current| Arc::ptr_eq(current, room))
            .is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rooms.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn clear(&self) {
        self.rooms.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_returns_same_room() {
        let registry = RoomRegistry::new();
        let a = registry.get_or_create("party");
        let b = registry.get_or_create("party");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);

        let other = registry.get_or_create("Party");
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_creates_share_one_room() {
        let registry = Arc::new(RoomRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move { registry.get_or_create("race") }));
        }

        let mut rooms = Vec::new();
        for handle in handles {
            rooms.push(handle.await.unwrap());
        }
        assert!(rooms.iter().all(|r| Arc::ptr_eq(r, &rooms[0])));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn remove_ignores_replaced_entry() {
        let registry = RoomRegistry::new();
        let old = registry.get_or_create("party");
        assert!(registry.remove_if_current("party", &old));

        let fresh = registry.get_or_create("party");
        assert!(!registry.remove_if_current("party", &old));
        assert!(registry.contains("party"));
        assert!(registry.remove_if_current("party", &fresh));
        assert!(registry.is_empty());
    }

    #[test]
    fn members_keep_join_order_without_duplicates() {
        let mut room = Room::new("party".into());
        room.add_member("a");
        room.add_member("b");
        room.add_member("a");
        assert_eq!(room.members, vec!["a", "b"]);

        assert!(room.remove_member("a"));
        assert!(!room.remove_member("a"));
        assert_eq!(room.members, vec!["b"]);
    }

    #[test]
    fn restore_happens_once() {
        let mut room = Room::new("party".into());
        assert!(room.begin_restore());
        assert!(!room.begin_restore());
    }

    #[test]
    fn reset_clears_results_and_authority() {
        let mut room = Room::new("party".into());
        room.results = vec!["A".into()];
        room.arbitrator.arm("a", "s1");
        room.reset_results();
        room.reset_results();
        assert!(room.results.is_empty());
        assert!(!room.arbitrator.is_armed());
    }
}
