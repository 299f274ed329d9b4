//! 클라이언트-서버 메시지 프로토콜 정의
//!
//! 모든 메시지는 `type` 필드로 구분되는 JSON 객체 하나이다.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 클라이언트 → 서버 메시지
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    // Connection
    Ping,
    SetUsername {
        username: String,
    },

    // Room Management
    JoinRoom {
        room: String,
        #[serde(default)]
        username: Option<String>,
    },
    UserLeft {
        #[serde(default)]
        room: Option<String>,
    },

    // Wheel
    Spin {
        #[serde(rename = "spinData")]
        spin_data: SpinData,
    },
    UpdateParameters {
        parameters: Vec<String>,
    },
    SaveResult {
        result: String,
        #[serde(rename = "spinId", default)]
        spin_id: Option<String>,
    },
    ResetResult,
}

/// 서버 → 클라이언트 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    // Connection
    Pong,
    LobbyList {
        lobby: Vec<PeerInfo>,
    },

    // Room Events
    RoomInfo {
        room: String,
        clients: Vec<PeerInfo>,
    },
    RoomJoined {
        room: String,
    },

    // Wheel
    UpdateParameters {
        parameters: Vec<String>,
    },
    UpdateResults {
        results: Vec<String>,
    },
    Spin {
        #[serde(rename = "spinData")]
        spin_data: SpinData,
        #[serde(rename = "spunBy")]
        spun_by: String,
    },
}

/// 스핀 타이밍 파라미터.
///
/// 서버가 읽는 것은 `spinId`뿐이다. `spinAngleStart`, `spinTimeTotal`,
/// `scheduledStartTime`을 포함한 나머지 필드는 해석하지 않고 받은 그대로
/// 중계한다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpinData {
    #[serde(rename = "spinId")]
    pub spin_id: String,
    #[serde(flatten)]
    pub timing: Map<String, Value>,
}

/// 로비/방 참가자 목록 항목
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: String,
    pub username: String,
}
