//! 연결 핸들러

use crate::protocol::{PeerInfo, ServerMessage};
use crate::state::{AppState, ConnectionSession};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// 새 연결 처리. 세션은 로비에서 시작한다.
pub async fn handle_connection(state: &AppState, sender: UnboundedSender<ServerMessage>) -> String {
    let session_id = Uuid::new_v4().to_string();
    let session = Arc::new(ConnectionSession::new(session_id.clone(), sender));

    state.sessions.insert(session_id.clone(), session);
    state.lobby.add(&session_id).await;

    tracing::info!(session_id = %session_id, "New connection established");
    broadcast_lobby(state).await;
    session_id
}

/// 연결 해제 처리
pub async fn handle_disconnect(state: &AppState, session_id: &str) {
    let Some((_, session)) = state.sessions.remove(session_id) else {
        return;
    };

    let room = session.room.write().await.take();
    if let Some(room) = room {
        crate::handlers::room::leave_room_internal(state, session_id, &room).await;
    }
    if state.lobby.remove(session_id).await {
        broadcast_lobby(state).await;
    }

    tracing::info!(
        session_id = %session_id,
        connected_secs = session.connected_at.elapsed().as_secs(),
        "Connection closed"
    );
}

/// Heartbeat 처리
pub fn handle_heartbeat(sender: &UnboundedSender<ServerMessage>) {
    let _ = sender.send(ServerMessage::Pong);
}

/// 표시 이름 변경
pub async fn handle_set_username(state: &AppState, session_id: &str, username: &str) {
    let Some(name) = sanitize_username(username, state.config.limits.max_username_len) else {
        tracing::debug!(session_id = %session_id, "Dropped empty username");
        return;
    };
    let Some(session) = state.session(session_id) else {
        return;
    };

    *session.display_name.write().await = name;
    broadcast_lobby(state).await;
}

/// 앞뒤 공백 제거 후 최대 길이(문자 단위)로 자른다. 비면 None.
pub fn sanitize_username(raw: &str, max_len: usize) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || max_len == 0 {
        return None;
    }
    Some(trimmed.chars().take(max_len).collect())
}

/// 로비 전체 스냅샷을 로비 세션들에게 전송
pub async fn broadcast_lobby(state: &AppState) {
    let members = state.lobby.list().await;
    let lobby = peer_list(state, &members).await;
    broadcast_to_sessions(state, &members, &ServerMessage::LobbyList { lobby });
}

/// 세션 id 목록 → 참가자 목록 (순서 유지, 사라진 세션 제외)
pub async fn peer_list(state: &AppState, session_ids: &[String]) -> Vec<PeerInfo> {
    let mut peers = Vec::with_capacity(session_ids.len());
    for id in session_ids {
        if let Some(session) = state.session(id) {
            peers.push(PeerInfo {
                id: id.clone(),
                username: session.display_name.read().await.clone(),
            });
        }
    }
    peers
}

/// 특정 세션에게 메시지 전송
pub fn send_to_session(state: &AppState, session_id: &str, message: ServerMessage) -> bool {
    match state.session(session_id) {
        Some(session) => {
            let delivered = session.send(message);
            if !delivered {
                tracing::debug!(session_id = %session_id, "Skipped stale recipient");
            }
            delivered
        }
        None => false,
    }
}

/// 세션 목록에 브로드캐스트. 닫힌 수신자는 건너뛴다.
pub fn broadcast_to_sessions(state: &AppState, session_ids: &[String], message: &ServerMessage) {
    for id in session_ids {
        send_to_session(state, id, message.clone());
    }
}

/// 특정 세션을 제외하고 브로드캐스트
pub fn broadcast_to_sessions_except(
    state: &AppState,
    session_ids: &[String],
    except_session_id: &str,
    message: &ServerMessage,
) {
    for id in session_ids.iter().filter(|id| *id != except_session_id) {
        send_to_session(state, id, message.clone());
    }
}
