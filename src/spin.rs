//! 스핀 중재자
//!
//! 방마다 하나의 단일 작성자 토큰을 가진다. 스핀을 시작한 세션만
//! 결과를 기록할 수 있다.
//!
//! - Idle --spin(M)--> Armed(M)
//! - Armed(M) --saveResult(M)--> Idle (결과 추가)
//! - Armed(M) --saveResult(N != M)--> Armed(M) (폐기)
//! - Armed(_) --spin(N)--> Armed(N) (마지막 스핀 우선)
//! - any --resetResult--> Idle

use std::fmt;

/// 현재 결과 기록 권한
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpinClaim {
    pub session_id: String,
    pub spin_id: String,
}

/// saveResult 거부 사유
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpinRejection {
    /// 진행 중인 스핀 없음
    Idle,
    /// 다른 세션이 권한 보유
    NotHolder { holder: String },
    /// 권한 보유자이지만 이전 스핀의 결과
    StaleSpin { expected: String, got: String },
}

impl fmt::Display for SpinRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "no spin in progress"),
            Self::NotHolder { holder } => write!(f, "spin authority held by {holder}"),
            Self::StaleSpin { expected, got } => {
                write!(f, "stale spin result (expected {expected}, got {got})")
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct SpinArbitrator {
    claim: Option<SpinClaim>,
}

impl SpinArbitrator {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn holder(&self) -> Option<&SpinClaim> {
        self.claim.as_ref()
    }

    #[cfg(test)]
    pub fn is_armed(&self) -> bool {
        self.claim.is_some()
    }

    /// 권한을 새 발신자로 설정. 선점된 이전 권한을 반환한다.
    pub fn arm(&mut self, session_id: &str, spin_id: &str) -> Option<SpinClaim> {
        self.claim.replace(SpinClaim {
            session_id: session_id.to_string(),
            spin_id: spin_id.to_string(),
        })
    }

    /// 결과 기록 시도. 성공하면 Idle로 돌아간다.
    ///
    /// `spin_id`가 없으면 발신자만으로 판단한다.
    pub fn settle(&mut self, session_id: &str, spin_id: Option<&str>) -> Result<SpinClaim, SpinRejection> {
        let claim = self.claim.as_ref().ok_or(SpinRejection::Idle)?;

        if claim.session_id != session_id {
            return Err(SpinRejection::NotHolder {
                holder: claim.session_id.clone(),
            });
        }
        if let Some(got) = spin_id {
            if got != claim.spin_id {
                return Err(SpinRejection::StaleSpin {
                    expected: claim.spin_id.clone(),
                    got: got.to_string(),
                });
            }
        }

        self.claim.take().ok_or(SpinRejection::Idle)
    }

    pub fn reset(&mut self) {
        self.claim = None;
    }
}
