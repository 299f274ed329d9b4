//! 애플리케이션 상태 관리

use crate::archive::ArchiveStore;
use crate::config::Config;
use crate::protocol::ServerMessage;
use crate::registry::RoomRegistry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc::UnboundedSender, watch, RwLock};

/// 세션 코디네이터 상태. 프로세스 시작 시 한 번 생성된다.
pub struct AppState {
    /// 방 정보 (room name -> Room)
    pub rooms: RoomRegistry,
    /// 연결 세션 (session id -> ConnectionSession)
    pub sessions: DashMap<String, Arc<ConnectionSession>>,
    /// 방에 속하지 않은 세션
    pub lobby: Lobby,
    /// 빈 방 아카이브
    pub archive: ArchiveStore,
    /// 설정
    pub config: Arc<Config>,
    /// 종료 신호. true가 되면 모든 소켓의 수신 루프가 끝난다.
    shutdown: watch::Sender<bool>,
}

impl AppState {
    pub fn new(config: Config, archive: ArchiveStore) -> Self {
        Self {
            rooms: RoomRegistry::new(),
            sessions: DashMap::new(),
            lobby: Lobby::new(),
            archive,
            config: Arc::new(config),
            shutdown: watch::channel(false).0,
        }
    }

    /// DashMap 가드를 await 너머로 들고 있지 않도록 Arc를 복제해 반환
    pub fn session(&self, session_id: &str) -> Option<Arc<ConnectionSession>> {
        self.sessions.get(session_id).map(|s| Arc::clone(s.value()))
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// 모든 연결 종료. 소켓 수신 루프를 깨우고 상태를 비운다.
    /// 아카이브는 이미 저장되어 있으므로 flush하지 않는다.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let sessions = self.sessions.len();
        self.sessions.clear();
        self.lobby.clear().await;
        self.rooms.clear();
        tracing::info!(sessions, "Coordinator state torn down");
    }
}

/// 연결 세션 정보
pub struct ConnectionSession {
    pub id: String,
    pub display_name: RwLock<String>,
    pub room: RwLock<Option<String>>,
    pub sender: UnboundedSender<ServerMessage>,
    pub connected_at: Instant,
}

impl ConnectionSession {
    pub fn new(id: String, sender: UnboundedSender<ServerMessage>) -> Self {
        let display_name = default_display_name(&id);
        Self {
            id,
            display_name: RwLock::new(display_name),
            room: RwLock::new(None),
            sender,
            connected_at: Instant::now(),
        }
    }

    /// 닫힌 채널이면 false. 호출자는 해당 수신자만 건너뛴다.
    pub fn send(&self, message: ServerMessage) -> bool {
        self.sender.send(message).is_ok()
    }
}

pub fn default_display_name(id: &str) -> String {
    let short: String = id.chars().take(8).collect();
    format!("Guest_{short}")
}

/// 로비 (입장 순서 유지)
#[derive(Default)]
pub struct Lobby {
    members: RwLock<Vec<String>>,
}

impl Lobby {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, session_id: &str) -> bool {
        let mut members = self.members.write().await;
        if members.iter().any(|m| m == session_id) {
            return false;
        }
        members.push(session_id.to_string());
        true
    }

    pub async fn remove(&self, session_id: &str) -> bool {
        let mut members = self.members.write().await;
        let before = members.len();
        members.retain(|m| m != session_id);
        before != members.len()
    }

    #[cfg(test)]
    pub async fn contains(&self, session_id: &str) -> bool {
        self.members.read().await.iter().any(|m| m == session_id)
    }

    pub async fn list(&self) -> Vec<String> {
        self.members.read().await.clone()
    }

    pub async fn clear(&self) {
        self.members.write().await.clear();
    }
}
