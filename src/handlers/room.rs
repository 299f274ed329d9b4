//! 방 관리 핸들러

use crate::handlers::connection::{
    broadcast_lobby, broadcast_to_sessions, peer_list, sanitize_username,
};
use crate::protocol::ServerMessage;
use crate::registry::Room;
use crate::state::AppState;
use chrono::Utc;

/// 방 참여 처리
///
/// 아카이브 조회가 끝난 뒤에야 roomJoined를 보내므로, 입장한 클라이언트는
/// 항상 복원된 상태를 먼저 받는다.
pub async fn handle_join_room(
    state: &AppState,
    session_id: &str,
    room_name: &str,
    username: Option<&str>,
) {
    let limits = &state.config.limits;
    let Some(room_name) = sanitize_room_name(room_name, limits.max_room_name_len) else {
        tracing::debug!(session_id = %session_id, "Dropped joinRoom with invalid room name");
        return;
    };
    let Some(session) = state.session(session_id) else {
        return;
    };

    if let Some(name) = username.and_then(|u| sanitize_username(u, limits.max_username_len)) {
        *session.display_name.write().await = name;
    }

    // 다른 방(또는 같은 방)에 있었다면 먼저 나간다
    let previous = session.room.write().await.take();
    if let Some(previous) = previous {
        leave_room_internal(state, session_id, &previous).await;
    }
    let left_lobby = state.lobby.remove(session_id).await;

    // 닫힌 방은 잠금을 풀기 전에 레지스트리에서 빠지므로, 재시도하면 새 방이 만들어진다
    let mut room = loop {
        let guard = state.rooms.get_or_create(&room_name).lock_owned().await;
        if !guard.is_closed() {
            break guard;
        }
        tracing::debug!(room = %room_name, "Room closed while joining, retrying");
    };

    if room.begin_restore() {
        match state.archive.take_if_present(&room_name).await {
            Ok(Some(snapshot)) => {
                tracing::info!(
                    room = %room_name,
                    sections = snapshot.sections.len(),
                    results = snapshot.results.len(),
                    "Room restored from archive"
                );
                room.restore(snapshot);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(room = %room_name, error = %e, "Archive lookup failed, starting empty");
            }
        }
    }

    room.add_member(session_id);
    *session.room.write().await = Some(room_name.clone());

    if !room.sections.is_empty() {
        session.send(ServerMessage::UpdateParameters {
            parameters: room.sections.clone(),
        });
    }
    if !room.results.is_empty() {
        session.send(ServerMessage::UpdateResults {
            results: room.results.clone(),
        });
    }
    session.send(ServerMessage::RoomJoined {
        room: room_name.clone(),
    });
    broadcast_room_info(state, &room).await;

    let member_count = room.members.len();
    drop(room);

    if left_lobby {
        broadcast_lobby(state).await;
    }

    tracing::info!(
        session_id = %session_id,
        room = %room_name,
        member_count,
        "User joined room"
    );
}

/// 방 나가기 내부 로직
///
/// 마지막 멤버가 나가면 방 잠금을 쥔 채로 아카이브한 뒤 레지스트리에서 제거한다.
/// 아카이브 실패는 기록만 하고 방은 그대로 해제된다.
pub async fn leave_room_internal(state: &AppState, session_id: &str, room_name: &str) {
    let Some(shared) = state.rooms.get(room_name) else {
        return;
    };
    let mut room = shared.lock().await;
    if !room.remove_member(session_id) {
        return;
    }

    if room.members.is_empty() {
        room.close();
        match state.archive.put(room_name, &room.snapshot()).await {
            Ok(expire_at) => {
                tracing::info!(room = %room_name, expire_at = %expire_at, "Room archived");
            }
            Err(e) => {
                tracing::warn!(room = %room_name, error = %e, "Room archive failed, state discarded");
            }
        }
        state.rooms.remove_if_current(room_name, &shared);
        tracing::info!(
            room = %room_name,
            lifetime_secs = room.created_at.elapsed().as_secs(),
            "Room deleted"
        );
    } else {
        broadcast_room_info(state, &room).await;
        tracing::info!(
            session_id = %session_id,
            room = %room_name,
            remaining = room.members.len(),
            "User left room"
        );
    }
}

/// 방 나가기 처리 (userLeft). 세션은 로비로 돌아간다.
pub async fn handle_leave_room(state: &AppState, session_id: &str, room_name: Option<&str>) {
    let Some(session) = state.session(session_id) else {
        return;
    };
    let current = session.room.read().await.clone();
    let Some(current) = current else {
        tracing::debug!(session_id = %session_id, "Dropped userLeft outside a room");
        return;
    };
    if let Some(claimed) = room_name {
        if claimed.trim() != current {
            tracing::debug!(
                session_id = %session_id,
                room = %current,
                claimed = %claimed,
                "Dropped userLeft for a room the session is not in"
            );
            return;
        }
    }

    *session.room.write().await = None;
    leave_room_internal(state, session_id, &current).await;

    state.lobby.add(session_id).await;
    broadcast_lobby(state).await;
}

/// 방 참가자 목록을 방 전체에 전송
pub async fn broadcast_room_info(state: &AppState, room: &Room) {
    let clients = peer_list(state, &room.members).await;
    broadcast_to_sessions(
        state,
        &room.members,
        &ServerMessage::RoomInfo {
            room: room.name.clone(),
            clients,
        },
    );
}

/// 앞뒤 공백 제거. 비었거나 너무 길면 None.
pub fn sanitize_room_name(raw: &str, max_len: usize) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.chars().count() > max_len {
        return None;
    }
    Some(trimmed.to_string())
}

/// 만료된 아카이브 정리
pub async fn sweep_expired_archives(state: &AppState) -> usize {
    match state.archive.sweep_expired(Utc::now()).await {
        Ok(0) => 0,
        Ok(removed) => {
            tracing::info!(removed, "Expired room archives swept");
            removed
        }
        Err(e) => {
            tracing::warn!(error = %e, "Archive sweep failed");
            0
        }
    }
}
