//! 수집기 와이어 계약
//!
//! 청크 하나를 보낼 때마다 수집기는 3바이트 리터럴 `ACK`를 돌려줘야 함.
//! 다른 응답이나 무응답은 해당 청크의 프로토콜 실패.

use crate::Error;

/// 수집기 확인 토큰
pub const ACK_TOKEN: &[u8; ACK_LEN] = b"ACK";

/// 확인 토큰 길이
pub const ACK_LEN: usize = 3;

/// 청크 하나 송신 후 ACK 대기 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckResult {
    /// 토큰 정확히 일치
    Ack,

    /// 다른 바이트 수신
    Nack(Vec<u8>),

    /// 타임아웃까지 수신 데이터 없음
    Timeout,

    /// 수신 가능 신호 후 읽기 실패 (연결 종료 등)
    NoResponse,
}

impl AckResult {
    pub fn is_ack(&self) -> bool {
        matches!(self, AckResult::Ack)
    }

    /// 실패 결과를 에러 분류로 변환
    pub fn into_error(self, timeout_ms: u64) -> Option<Error> {
        match self {
            AckResult::Ack => None,
            AckResult::Nack(got) => Some(Error::AckMismatch { got }),
            AckResult::Timeout => Some(Error::AckTimeout { timeout_ms }),
            AckResult::NoResponse => Some(Error::AckAbsent),
        }
    }
}

/// 수신한 확인 페이로드 판정
pub fn classify_ack(payload: &[u8]) -> AckResult {
    if payload == ACK_TOKEN {
        AckResult::Ack
    } else {
        AckResult::Nack(payload.to_vec())
    }
}
