//! 청크 수신자 (주변기기 → 프레임 버퍼)
//!
//! - 전송 단위(MTU) 청크를 반복해서 당겨와 버퍼를 채움
//! - 빈 청크나 읽기 에러는 이번 호출의 하드 폴트
//! - 버퍼 capacity를 넘기는 청크는 쓰지 않고 중단
//! - 내부 재시도 없음. 부분 수신 허용 여부는 호출자가 결정

use tracing::{debug, warn};

use crate::frame::FrameBuffer;
use crate::peer::PeripheralLink;
use crate::Error;

/// 수신 결과
#[derive(Debug)]
pub struct ReceiveOutcome {
    /// 기록된 바이트 수 (`[0, bytes_read)` 구간만 덮어씀)
    pub bytes_read: usize,

    /// 대상 버퍼 크기
    pub capacity: usize,

    /// 기록된 청크 수
    pub chunks: usize,

    /// 중단 원인 (완전 수신이면 None)
    pub fault: Option<Error>,
}

impl ReceiveOutcome {
    /// capacity 전부 수신했는지
    pub fn is_complete(&self) -> bool {
        self.bytes_read == self.capacity && self.fault.is_none()
    }

    /// 링크가 끊겨서 중단됐는지
    pub fn is_link_loss(&self) -> bool {
        self.fault.as_ref().map(Error::is_link_loss).unwrap_or(false)
    }

    pub fn is_overflow(&self) -> bool {
        matches!(self.fault, Some(Error::BufferOverflow { .. }))
    }
}

/// 청크 수신자
pub struct ChunkedReceiver {
    /// 청크 하나를 받는 임시 버퍼 (전송 단위 크기)
    scratch: Vec<u8>,
}

impl ChunkedReceiver {
    pub fn new(transfer_unit: usize) -> Self {
        Self {
            scratch: vec![0u8; transfer_unit.max(1)],
        }
    }

    pub fn transfer_unit(&self) -> usize {
        self.scratch.len()
    }

    /// 프레임 버퍼 수신. 신선도 플래그도 갱신
    pub async fn receive<L: PeripheralLink>(
        &mut self,
        link: &mut L,
        characteristic: &L::Characteristic,
        frame: &mut FrameBuffer,
    ) -> ReceiveOutcome {
        let outcome = self
            .receive_into(link, characteristic, frame.as_mut_slice())
            .await;
        frame.mark_received(outcome.bytes_read);
        outcome
    }

    /// `target` 전체를 채울 때까지 청크 수신
    ///
    /// `target` 밖은 절대 쓰지 않음. `[bytes_read, len)` 구간은 호출 전 값 유지.
    pub async fn receive_into<L: PeripheralLink>(
        &mut self,
        link: &mut L,
        characteristic: &L::Characteristic,
        target: &mut [u8],
    ) -> ReceiveOutcome {
        let capacity = target.len();
        let mut bytes_read = 0;
        let mut chunks = 0;
        let mut fault = None;

        while bytes_read < capacity {
            let len = match link.pull_chunk(characteristic, &mut self.scratch).await {
                Ok(len) => len.min(self.scratch.len()),
                Err(e) => {
                    warn!("characteristic 읽기 에러: {}", e);
                    fault = Some(e);
                    break;
                }
            };

            if len == 0 {
                warn!("characteristic 읽기 실패 ({}/{} bytes)", bytes_read, capacity);
                fault = Some(Error::ShortRead {
                    read: bytes_read,
                    expected: capacity,
                });
                break;
            }

            if bytes_read + len > capacity {
                warn!(
                    "수신 중 버퍼 오버플로우: {} + {} > {}",
                    bytes_read, len, capacity
                );
                fault = Some(Error::BufferOverflow {
                    max_size: capacity,
                    attempted: bytes_read + len,
                });
                break;
            }

            target[bytes_read..bytes_read + len].copy_from_slice(&self.scratch[..len]);
            bytes_read += len;
            chunks += 1;
        }

        debug!("이미지 데이터 {} bytes 수신 ({} 청크)", bytes_read, chunks);

        ReceiveOutcome {
            bytes_read,
            capacity,
            chunks,
            fault,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::peer::PeerAddress;
    use crate::sim::{expected_frame, SimCamera, SimulatedPeripheralLink};
    use crate::{PeripheralLink, Result};

    /// 정해진 청크 길이를 순서대로 내보내는 링크
    struct ScriptLink {
        chunks: VecDeque<usize>,
        pulls: usize,
    }

    impl ScriptLink {
        fn new(chunks: &[usize]) -> Self {
            Self {
                chunks: chunks.iter().copied().collect(),
                pulls: 0,
            }
        }
    }

    impl PeripheralLink for ScriptLink {
        type Peer = ();
        type Characteristic = ();

        async fn scan(&mut self, _known: &[PeerAddress]) -> Result<Vec<PeerAddress>> {
            Ok(Vec::new())
        }

        async fn connect(&mut self, _address: &PeerAddress) -> Result<()> {
            Ok(())
        }

        async fn resolve_characteristic(&mut self, _peer: &(), _id: &str) -> Result<()> {
            Ok(())
        }

        async fn pull_chunk(&mut self, _characteristic: &(), buf: &mut [u8]) -> Result<usize> {
            self.pulls += 1;
            match self.chunks.pop_front() {
                Some(len) => {
                    let len = len.min(buf.len());
                    buf[..len].fill(0xAB);
                    Ok(len)
                }
                None => Err(Error::LinkUnavailable("script exhausted".into())),
            }
        }

        fn is_connected(&self, _peer: &()) -> bool {
            true
        }

        fn is_valid(&self, _characteristic: &()) -> bool {
            true
        }

        async fn disconnect(&mut self, _peer: ()) {}
    }

    #[tokio::test]
    async fn test_full_frame_across_chunks() {
        let mut link = ScriptLink::new(&[512, 512, 100, 400]);
        let mut receiver = ChunkedReceiver::new(512);
        let mut frame = FrameBuffer::new(1524);

        let outcome = receiver.receive(&mut link, &(), &mut frame).await;

        assert!(outcome.is_complete());
        assert_eq!(outcome.bytes_read, 1524);
        assert_eq!(outcome.chunks, 4);
        assert!(frame.as_slice().iter().all(|&b| b == 0xAB));
        assert!(frame.is_fresh());
    }

    #[tokio::test]
    async fn test_empty_chunk_stops_short() {
        let mut link = ScriptLink::new(&[512, 0, 512]);
        let mut receiver = ChunkedReceiver::new(512);
        let mut frame = FrameBuffer::new(230_400);

        let outcome = receiver.receive(&mut link, &(), &mut frame).await;

        assert_eq!(outcome.bytes_read, 512);
        assert!(matches!(outcome.fault, Some(Error::ShortRead { read: 512, .. })));
        assert_eq!(link.pulls, 2);
        assert!(!frame.is_fresh());
        assert_eq!(frame.filled(), 512);
    }

    #[tokio::test]
    async fn test_overflow_never_writes_past_capacity() {
        // 앞뒤 감시 바이트로 capacity 밖 쓰기 확인
        let mut backing = vec![0x11u8; 1200];
        let mut link = ScriptLink::new(&[300, 300, 300, 300]);
        let mut receiver = ChunkedReceiver::new(512);

        let outcome = receiver
            .receive_into(&mut link, &(), &mut backing[100..1100])
            .await;

        assert_eq!(outcome.bytes_read, 900);
        assert!(outcome.is_overflow());
        assert!(backing[..100].iter().all(|&b| b == 0x11));
        assert!(backing[100..1000].iter().all(|&b| b == 0xAB));
        assert!(backing[1000..].iter().all(|&b| b == 0x11));
    }

    #[tokio::test]
    async fn test_short_read_keeps_previous_tail() {
        let mut link = ScriptLink::new(&[64, 0]);
        let mut receiver = ChunkedReceiver::new(64);
        let mut frame = FrameBuffer::new(256);
        frame.as_mut_slice().fill(0x42);

        receiver.receive(&mut link, &(), &mut frame).await;

        assert!(frame.as_slice()[..64].iter().all(|&b| b == 0xAB));
        assert!(frame.as_slice()[64..].iter().all(|&b| b == 0x42));
    }

    #[tokio::test]
    async fn test_link_error_is_link_loss() {
        let mut link = ScriptLink::new(&[64]);
        let mut receiver = ChunkedReceiver::new(64);
        let mut frame = FrameBuffer::new(256);

        let outcome = receiver.receive(&mut link, &(), &mut frame).await;

        assert_eq!(outcome.bytes_read, 64);
        assert!(outcome.is_link_loss());
    }

    #[tokio::test]
    async fn test_receives_sim_camera_frame() {
        let address = "24:0A:C4:00:00:01";
        let mut link = SimulatedPeripheralLink::new(vec![SimCamera::new(
            address, "img", 4_096, 512, 9,
        )]);
        let peer = link.connect(&PeerAddress::new(address)).await.unwrap();
        let characteristic = link.resolve_characteristic(&peer, "img").await.unwrap();
        let mut receiver = ChunkedReceiver::new(512);
        let mut frame = FrameBuffer::new(4_096);

        let outcome = receiver.receive(&mut link, &characteristic, &mut frame).await;

        assert!(outcome.is_complete());
        assert_eq!(frame.as_slice(), expected_frame(9, 0, 4_096).as_slice());
    }
}
