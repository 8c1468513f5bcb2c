//! 청크 송신자 (합성 버퍼 → 수집기)
//!
//! - 최대 청크 크기 단위로 쓰기
//! - 청크마다 ACK 토큰을 기다린 뒤 다음 청크 (먼저 보내지 않음)
//! - ACK 불일치/타임아웃/무응답이면 나머지 전송 중단
//! - 호출 안에서 재전송 없음. 다음 사이클은 0바이트부터 새로 전송

use std::time::Duration;

use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::frame::chunk_spans;
use crate::link::NetworkSink;
use crate::message::{classify_ack, AckResult, ACK_LEN};
use crate::Error;

/// 호출 하나의 송신 상태
#[derive(Debug)]
pub enum TransmitState {
    /// 다음 청크 쓰기
    SendChunk,

    /// 방금 쓴 청크의 ACK 대기
    AwaitAck,

    /// 전체 전송 완료
    Done,

    /// 중단 (원인 포함)
    Aborted(Error),
}

/// 송신 결과
#[derive(Debug)]
pub struct TransmitOutcome {
    /// ACK 받은 바이트 수. 중단되면 항상 `total`보다 작음
    pub bytes_sent: usize,

    /// 쓰기 완료된 바이트 수 (ACK 여부 무관)
    pub bytes_written: usize,

    /// 보내려던 전체 크기
    pub total: usize,

    /// 쓰기 완료된 청크 수
    pub chunks_sent: usize,

    /// ACK 받은 청크 수
    pub chunks_acked: usize,

    /// 중단 원인 (완료면 None)
    pub failure: Option<Error>,
}

impl TransmitOutcome {
    pub fn is_complete(&self) -> bool {
        self.bytes_sent == self.total && self.failure.is_none()
    }
}

/// 청크 송신자
#[derive(Debug, Clone)]
pub struct ChunkedTransmitter {
    max_chunk_size: usize,
    ack_timeout: Duration,
    ack_poll_interval: Duration,
}

impl ChunkedTransmitter {
    pub fn new(max_chunk_size: usize, ack_timeout: Duration, ack_poll_interval: Duration) -> Self {
        Self {
            max_chunk_size: max_chunk_size.max(1),
            ack_timeout,
            ack_poll_interval,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.max_chunk_size,
            config.ack_timeout(),
            config.ack_poll_interval(),
        )
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    /// 버퍼 전체 송신
    pub async fn transmit<S: NetworkSink>(&self, buffer: &[u8], sink: &mut S) -> TransmitOutcome {
        let total = buffer.len();
        let mut spans = chunk_spans(total, self.max_chunk_size);
        let mut bytes_sent = 0;
        let mut bytes_written = 0;
        let mut chunks_sent = 0;
        let mut chunks_acked = 0;

        let mut state = TransmitState::SendChunk;
        let failure = loop {
            state = match state {
                TransmitState::SendChunk => match spans.next() {
                    None => TransmitState::Done,
                    Some(span) => match sink.write(&buffer[span.clone()]).await {
                        Ok(()) => {
                            bytes_written = span.end;
                            chunks_sent += 1;
                            TransmitState::AwaitAck
                        }
                        Err(e) => TransmitState::Aborted(e),
                    },
                },

                TransmitState::AwaitAck => match self.await_ack(sink).await {
                    AckResult::Ack => {
                        chunks_acked += 1;
                        bytes_sent = bytes_written;
                        if bytes_sent == total {
                            TransmitState::Done
                        } else {
                            TransmitState::SendChunk
                        }
                    }
                    other => {
                        let error = other
                            .into_error(self.ack_timeout.as_millis() as u64)
                            .unwrap_or(Error::AckAbsent);
                        TransmitState::Aborted(error)
                    }
                },

                TransmitState::Done => break None,

                TransmitState::Aborted(e) => break Some(e),
            };
        };

        match &failure {
            None => info!("이미지 데이터 {} bytes 전송 ({} 청크)", bytes_sent, chunks_sent),
            Some(e) => warn!(
                "수집기 전송 실패: {}/{} bytes (ACK 대기 {} bytes), {}",
                bytes_sent,
                total,
                bytes_written - bytes_sent,
                e
            ),
        }

        TransmitOutcome {
            bytes_sent,
            bytes_written,
            total,
            chunks_sent,
            chunks_acked,
            failure,
        }
    }

    /// 청크 하나의 ACK 대기
    ///
    /// 타임아웃은 이 상태에 들어온 시점부터 (읽기 포함) 적용.
    pub async fn await_ack<S: NetworkSink>(&self, sink: &mut S) -> AckResult {
        let deadline = Instant::now() + self.ack_timeout;

        match timeout_at(deadline, sink.wait_readable(self.ack_poll_interval)).await {
            Err(_) => {
                warn!("수집기 응답 대기 타임아웃 ({}ms)", self.ack_timeout.as_millis());
                return AckResult::Timeout;
            }
            Ok(Err(e)) => {
                warn!("수집기 응답 없음: {}", e);
                return AckResult::NoResponse;
            }
            Ok(Ok(())) => {}
        }

        let mut payload = [0u8; ACK_LEN];
        match timeout_at(deadline, sink.read_exact(&mut payload)).await {
            Ok(Ok(())) => {
                let result = classify_ack(&payload);
                if !result.is_ack() {
                    warn!("ACK 수신 실패: {:?}", String::from_utf8_lossy(&payload));
                } else {
                    debug!("ACK 수신");
                }
                result
            }
            Ok(Err(e)) => {
                warn!("수집기 응답 읽기 실패: {}", e);
                AckResult::NoResponse
            }
            Err(_) => {
                warn!("수집기 응답 읽기 타임아웃");
                AckResult::Timeout
            }
        }
    }
}
