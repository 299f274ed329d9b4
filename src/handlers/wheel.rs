//! 룰렛 동기화 핸들러 (스핀, 섹션, 결과)

use crate::handlers::connection::{broadcast_to_sessions, broadcast_to_sessions_except};
use crate::protocol::{ServerMessage, SpinData};
use crate::registry::Room;
use crate::state::{AppState, ConnectionSession};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// 발신자가 멤버인 방을 잠그고 반환. 멤버가 아니면 None.
async fn member_room(
    state: &AppState,
    session_id: &str,
) -> Option<(Arc<ConnectionSession>, OwnedMutexGuard<Room>)> {
    let session = state.session(session_id)?;
    let room_name = session.room.read().await.clone()?;
    let room = state.rooms.get(&room_name)?.lock_owned().await;
    room.is_member(session_id).then_some((session, room))
}

/// 스핀 시작: 발신자에게 결과 기록 권한을 주고 타이밍 파라미터를 방 전체에 중계
pub async fn handle_spin(state: &AppState, session_id: &str, spin_data: SpinData) {
    let Some((session, mut room)) = member_room(state, session_id).await else {
        tracing::debug!(session_id = %session_id, "Dropped spin from session outside a room");
        return;
    };

    if let Some(previous) = room.arbitrator.arm(session_id, &spin_data.spin_id) {
        tracing::warn!(
            room = %room.name,
            preempted = %previous.session_id,
            preempted_spin_id = %previous.spin_id,
            by = %session_id,
            "Spin authority preempted by a newer spin"
        );
    }

    let spun_by = session.display_name.read().await.clone();
    tracing::info!(
        room = %room.name,
        session_id = %session_id,
        spin_id = %spin_data.spin_id,
        "Spin started"
    );

    broadcast_to_sessions(
        state,
        &room.members,
        &ServerMessage::Spin { spin_data, spun_by },
    );
}

/// 섹션 교체. 발신자는 이미 로컬에 반영했으므로 제외한다.
pub async fn handle_update_parameters(state: &AppState, session_id: &str, parameters: Vec<String>) {
    let Some((_, mut room)) = member_room(state, session_id).await else {
        tracing::debug!(session_id = %session_id, "Dropped updateParameters from session outside a room");
        return;
    };

    room.sections = parameters.clone();
    tracing::debug!(room = %room.name, sections = parameters.len(), "Sections updated");

    broadcast_to_sessions_except(
        state,
        &room.members,
        session_id,
        &ServerMessage::UpdateParameters { parameters },
    );
}

/// 스핀 결과 기록. 현재 권한 보유자만 가능.
pub async fn handle_save_result(
    state: &AppState,
    session_id: &str,
    result: String,
    spin_id: Option<&str>,
) {
    let Some((_, mut room)) = member_room(state, session_id).await else {
        tracing::debug!(session_id = %session_id, "Dropped saveResult from session outside a room");
        return;
    };

    match room.arbitrator.settle(session_id, spin_id) {
        Ok(claim) => {
            room.results.push(result);
            tracing::info!(
                room = %room.name,
                session_id = %session_id,
                spin_id = %claim.spin_id,
                total = room.results.len(),
                "Spin result saved"
            );
            broadcast_to_sessions(
                state,
                &room.members,
                &ServerMessage::UpdateResults {
                    results: room.results.clone(),
                },
            );
        }
        Err(rejection) => {
            tracing::info!(
                room = %room.name,
                session_id = %session_id,
                reason = %rejection,
                "Ignored saveResult"
            );
        }
    }
}

/// 결과 초기화. 진행 중인 스핀과 아카이브도 함께 버린다.
pub async fn handle_reset_result(state: &AppState, session_id: &str) {
    let Some((_, mut room)) = member_room(state, session_id).await else {
        tracing::debug!(session_id = %session_id, "Dropped resetResult from session outside a room");
        return;
    };

    room.reset_results();
    broadcast_to_sessions(
        state,
        &room.members,
        &ServerMessage::UpdateResults { results: Vec::new() },
    );

    match state.archive.delete(&room.name).await {
        Ok(true) => tracing::info!(room = %room.name, "Archived results reset"),
        Ok(false) => {}
        Err(e) => tracing::warn!(room = %room.name, error = %e, "Archive delete failed on reset"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::RoomSnapshot;
    use crate::handlers::room::handle_join_room;
    use crate::handlers::test_support::{connect, drain, test_state};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn spin_data(spin_id: &str) -> SpinData {
        serde_json::from_value(serde_json::json!({
            "spinAngleStart": 15.0,
            "spinTimeTotal": 12_500.0,
            "scheduledStartTime": 1_700_000_000_500u64,
            "spinId": spin_id
        }))
        .unwrap()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    async fn two_member_room(
        state: &AppState,
    ) -> (
        (String, UnboundedReceiver<ServerMessage>),
        (String, UnboundedReceiver<ServerMessage>),
    ) {
        let (a, mut rx_a) = connect(state).await;
        let (b, mut rx_b) = connect(state).await;
        handle_join_room(state, &a, "party", Some("alice")).await;
        handle_join_room(state, &b, "party", Some("bob")).await;
        drain(&mut rx_a);
        drain(&mut rx_b);
        ((a, rx_a), (b, rx_b))
    }

    async fn results_of(state: &AppState, room: &str) -> Vec<String> {
        let room = state.rooms.get(room).unwrap();
        let room = room.lock().await;
        room.results.clone()
    }

    #[tokio::test]
    async fn spin_is_relayed_to_everyone_with_spinner_name() {
        let state = test_state();
        let ((a, mut rx_a), (_b, mut rx_b)) = two_member_room(&state).await;

        handle_spin(&state, &a, spin_data("s1")).await;

        let expected = ServerMessage::Spin {
            spin_data: spin_data("s1"),
            spun_by: "alice".into(),
        };
        assert_eq!(drain(&mut rx_a), vec![expected.clone()]);
        assert_eq!(drain(&mut rx_b), vec![expected]);
    }

    #[tokio::test]
    async fn spin_relay_keeps_unknown_timing_fields() {
        let state = test_state();
        let ((a, mut rx_a), (_b, mut rx_b)) = two_member_room(&state).await;

        let raw = serde_json::json!({
            "spinAngleStart": 3.25,
            "spinTimeTotal": 9000,
            "scheduledStartTime": 1_700_000_000_500.5,
            "spinId": "s7",
            "easing": "linear"
        });
        let spin: SpinData = serde_json::from_value(raw.clone()).unwrap();
        handle_spin(&state, &a, spin).await;

        for rx in [&mut rx_a, &mut rx_b] {
            let messages = drain(rx);
            let [ServerMessage::Spin { spin_data, .. }] = messages.as_slice() else {
                panic!("one spin expected");
            };
            assert_eq!(serde_json::to_value(spin_data).unwrap(), raw);
        }

        // 소수 시각이어도 권한은 정상적으로 부여된다
        handle_save_result(&state, &a, "A".into(), Some("s7")).await;
        assert_eq!(results_of(&state, "party").await, strings(&["A"]));
    }

    #[tokio::test]
    async fn only_spin_holder_can_save_result() {
        let state = test_state();
        let ((a, mut rx_a), (b, mut rx_b)) = two_member_room(&state).await;

        handle_spin(&state, &a, spin_data("s1")).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        handle_save_result(&state, &b, "B".into(), Some("s1")).await;
        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_b).is_empty());
        assert!(results_of(&state, "party").await.is_empty());

        handle_save_result(&state, &a, "A".into(), Some("s1")).await;
        let expected = vec![ServerMessage::UpdateResults {
            results: strings(&["A"]),
        }];
        assert_eq!(drain(&mut rx_a), expected);
        assert_eq!(drain(&mut rx_b), expected);

        // 권한은 한 번만 사용된다
        handle_save_result(&state, &a, "A".into(), Some("s1")).await;
        assert_eq!(results_of(&state, "party").await, strings(&["A"]));
    }

    #[tokio::test]
    async fn save_without_spin_is_ignored() {
        let state = test_state();
        let ((a, mut rx_a), _) = two_member_room(&state).await;

        handle_save_result(&state, &a, "A".into(), None).await;

        assert!(drain(&mut rx_a).is_empty());
        assert!(results_of(&state, "party").await.is_empty());
    }

    #[tokio::test]
    async fn later_spin_takes_over_authority() {
        let state = test_state();
        let ((a, _rx_a), (b, _rx_b)) = two_member_room(&state).await;

        handle_spin(&state, &a, spin_data("s1")).await;
        handle_spin(&state, &b, spin_data("s2")).await;

        handle_save_result(&state, &a, "A".into(), Some("s1")).await;
        assert!(results_of(&state, "party").await.is_empty());

        handle_save_result(&state, &b, "B".into(), Some("s2")).await;
        assert_eq!(results_of(&state, "party").await, strings(&["B"]));
    }

    #[tokio::test]
    async fn update_parameters_skips_sender() {
        let state = test_state();
        let ((a, mut rx_a), (_b, mut rx_b)) = two_member_room(&state).await;

        handle_update_parameters(&state, &a, strings(&["A", "B", "C"])).await;

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerMessage::UpdateParameters {
                parameters: strings(&["A", "B", "C"])
            }]
        );
        let room = state.rooms.get("party").unwrap();
        assert_eq!(room.lock().await.sections, strings(&["A", "B", "C"]));
    }

    #[tokio::test]
    async fn reset_is_idempotent_and_clears_authority() {
        let state = test_state();
        let ((a, mut rx_a), (b, mut rx_b)) = two_member_room(&state).await;

        handle_spin(&state, &a, spin_data("s1")).await;
        handle_save_result(&state, &a, "A".into(), Some("s1")).await;
        handle_spin(&state, &a, spin_data("s2")).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        for _ in 0..2 {
            handle_reset_result(&state, &b).await;
            let expected = vec![ServerMessage::UpdateResults { results: vec![] }];
            assert_eq!(drain(&mut rx_a), expected);
            assert_eq!(drain(&mut rx_b), expected);
            assert!(results_of(&state, "party").await.is_empty());
        }

        // 초기화로 버려진 스핀의 결과는 받지 않는다
        handle_save_result(&state, &a, "B".into(), Some("s2")).await;
        assert!(results_of(&state, "party").await.is_empty());
    }

    #[tokio::test]
    async fn reset_deletes_archive_record() {
        let state = test_state();
        let ((a, _rx_a), _) = two_member_room(&state).await;
        state
            .archive
            .put(
                "party",
                &RoomSnapshot {
                    sections: strings(&["A", "B"]),
                    results: strings(&["A"]),
                },
            )
            .await
            .unwrap();

        handle_reset_result(&state, &a).await;

        assert!(!state.archive.contains("party").await.unwrap());
    }

    #[tokio::test]
    async fn messages_from_lobby_sessions_are_dropped() {
        let state = test_state();
        let ((_a, mut rx_a), _) = two_member_room(&state).await;
        let (c, mut rx_c) = connect(&state).await;
        drain(&mut rx_c);

        handle_spin(&state, &c, spin_data("s1")).await;
        handle_update_parameters(&state, &c, strings(&["X", "Y"])).await;
        handle_save_result(&state, &c, "X".into(), None).await;
        handle_reset_result(&state, &c).await;

        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_c).is_empty());
        let room = state.rooms.get("party").unwrap();
        assert!(room.lock().await.sections.is_empty());
    }
}
