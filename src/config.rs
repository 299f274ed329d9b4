//! 환경 변수 기반 설정 관리

use std::env;
use std::str::FromStr;

/// 서버 설정
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub archive: ArchiveConfig,
    pub limits: LimitsConfig,
    pub log_level: String,
}

/// 방 아카이브 설정
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    pub db_path: String,
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

/// 입력 길이 제한
#[derive(Debug, Clone)]
pub struct LimitsConfig {
    pub max_username_len: usize,
    pub max_room_name_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
            archive: ArchiveConfig::default(),
            limits: LimitsConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            db_path: "database.sqlite".to_string(),
            ttl_secs: 24 * 60 * 60,
            sweep_interval_secs: 300,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_username_len: 100,
            max_room_name_len: 100,
        }
    }
}

impl Config {
    /// 환경 변수에서 설정 로드
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Self {
            port: env_or("PORT", defaults.port),
            host: env::var("HOST").unwrap_or(defaults.host),
            archive: ArchiveConfig {
                db_path: env::var("ARCHIVE_DB_PATH").unwrap_or(defaults.archive.db_path),
                ttl_secs: env_or("ARCHIVE_TTL_SECS", defaults.archive.ttl_secs),
                sweep_interval_secs: env_or(
                    "ARCHIVE_SWEEP_INTERVAL_SECS",
                    defaults.archive.sweep_interval_secs,
                ),
            },
            limits: LimitsConfig {
                max_username_len: env_or("MAX_USERNAME_LEN", defaults.limits.max_username_len),
                max_room_name_len: env_or("MAX_ROOM_NAME_LEN", defaults.limits.max_room_name_len),
            },
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        }
    }
}

/// 파싱 실패 시 기본값 사용
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
