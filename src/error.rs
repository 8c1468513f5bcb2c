//! 에러 타입 정의

use thiserror::Error;

/// camrelay 에러 타입
///
/// 파이프라인 구성요소는 이 에러를 치명적으로 전파하지 않음.
/// 결과 구조체(`ReceiveOutcome`, `TransmitOutcome`)에 바이트 수와 함께 담겨
/// 로그로 남고, 오케스트레이터는 항상 다음 사이클로 진행함.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("링크 사용 불가: {0}")]
    LinkUnavailable(String),

    #[error("부분 수신: {read}/{expected} bytes")]
    ShortRead { read: usize, expected: usize },

    #[error("버퍼 오버플로우: 최대 크기 {max_size} 초과 (시도 {attempted} bytes)")]
    BufferOverflow { max_size: usize, attempted: usize },

    #[error("ACK 불일치: got {got:?}")]
    AckMismatch { got: Vec<u8> },

    #[error("ACK 타임아웃: {timeout_ms}ms")]
    AckTimeout { timeout_ms: u64 },

    #[error("ACK 응답 없음")]
    AckAbsent,

    #[error("주변기기 없음: {0}")]
    PeerNotFound(String),

    #[error("설정 에러: {0}")]
    Config(String),

    #[error("연결 종료")]
    ConnectionClosed,
}

impl Error {
    /// 링크 자체가 끊어졌음을 의미하는 에러인지
    pub fn is_link_loss(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::LinkUnavailable(_) | Error::ConnectionClosed
        )
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
