//! 프레임 버퍼와 합성 버퍼 정의
//!
//! - FrameBuffer: 카메라 하나의 원시 프레임 (고정 크기, 매 사이클 덮어씀)
//! - CompositeBuffer: A 프레임 + B 프레임 (고정 오프셋, 매 사이클 재조립)

use std::ops::Range;

use bytes::BytesMut;
use tokio::time::Instant;

use crate::{Error, Result, SOURCE_COUNT};

/// 카메라 하나의 프레임 버퍼
///
/// 이전 사이클 내용은 지우지 않음. 부분 수신이면 `[filled, capacity)` 구간은
/// 이전 사이클 바이트가 그대로 남음.
#[derive(Debug)]
pub struct FrameBuffer {
    /// 프레임 데이터 (capacity 고정)
    data: BytesMut,

    /// 이번 사이클에 기록된 바이트 수
    filled: usize,

    /// 이번 사이클에 capacity 전부 수신했는지
    fresh: bool,

    /// 마지막 완전 수신 시각
    last_complete_at: Option<Instant>,
}

impl FrameBuffer {
    /// 0으로 채운 새 프레임 버퍼
    pub fn new(capacity: usize) -> Self {
        let mut data = BytesMut::with_capacity(capacity);
        data.resize(capacity, 0);

        Self {
            data,
            filled: 0,
            fresh: false,
            last_complete_at: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// 이번 사이클에 기록된 바이트 수
    pub fn filled(&self) -> usize {
        self.filled
    }

    /// 이번 사이클 내용이 완전한 프레임인지
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    pub fn last_complete_at(&self) -> Option<Instant> {
        self.last_complete_at
    }

    /// 수신 결과 기록
    pub fn mark_received(&mut self, bytes_read: usize) {
        self.filled = bytes_read.min(self.capacity());
        self.fresh = self.filled == self.capacity();
        if self.fresh {
            self.last_complete_at = Some(Instant::now());
        }
    }

    /// 이번 사이클에 수신 시도조차 못 함
    pub fn mark_stale(&mut self) {
        self.filled = 0;
        self.fresh = false;
    }
}

/// 합성 프레임 버퍼 (프레임 크기 x 2)
#[derive(Debug)]
pub struct CompositeBuffer {
    data: BytesMut,
    frame_size: usize,
}

impl CompositeBuffer {
    pub fn new(frame_size: usize) -> Self {
        let total = frame_size * SOURCE_COUNT;
        let mut data = BytesMut::with_capacity(total);
        data.resize(total, 0);

        Self { data, frame_size }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// 소스 인덱스의 구간 (0 = A, 1 = B)
    pub fn half(&self, index: usize) -> &[u8] {
        let start = index * self.frame_size;
        &self.data[start..start + self.frame_size]
    }
}

/// 두 프레임 버퍼를 합성 버퍼로 복사
///
/// A는 오프셋 0, B는 오프셋 frame_size. 신선도는 보지 않음.
pub fn assemble(a: &FrameBuffer, b: &FrameBuffer, out: &mut CompositeBuffer) -> Result<()> {
    let frame_size = out.frame_size;
    for source in [a, b] {
        if source.capacity() != frame_size {
            return Err(Error::BufferOverflow {
                max_size: frame_size,
                attempted: source.capacity(),
            });
        }
    }

    out.data[..frame_size].copy_from_slice(a.as_slice());
    out.data[frame_size..frame_size * 2].copy_from_slice(b.as_slice());
    Ok(())
}

/// 전체 길이를 최대 청크 크기 구간들로 분할
pub fn chunk_spans(total: usize, max_chunk: usize) -> impl Iterator<Item = Range<usize>> {
    let step = max_chunk.max(1);
    (0..total)
        .step_by(step)
        .map(move |start| start..(start + step).min(total))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_frame(capacity: usize, seed: u8) -> FrameBuffer {
        let mut frame = FrameBuffer::new(capacity);
        for (i, byte) in frame.as_mut_slice().iter_mut().enumerate() {
            *byte = seed.wrapping_add(i as u8).wrapping_mul(7);
        }
        frame.mark_received(capacity);
        frame
    }

    #[test]
    fn test_assemble_fixed_order() {
        let a = filled_frame(1000, 3);
        let b = filled_frame(1000, 200);
        let mut composite = CompositeBuffer::new(1000);

        assemble(&a, &b, &mut composite).unwrap();

        assert_eq!(composite.len(), 2000);
        assert_eq!(&composite.as_slice()[..1000], a.as_slice());
        assert_eq!(&composite.as_slice()[1000..], b.as_slice());
        assert_eq!(composite.half(1), b.as_slice());
    }

    #[test]
    fn test_assemble_is_deterministic() {
        let a = filled_frame(256, 1);
        let b = filled_frame(256, 2);
        let mut first = CompositeBuffer::new(256);
        let mut second = CompositeBuffer::new(256);

        assemble(&a, &b, &mut first).unwrap();
        assemble(&a, &b, &mut second).unwrap();
        assert_eq!(first.as_slice(), second.as_slice());
    }

    #[test]
    fn test_assemble_rejects_mismatched_frame() {
        let a = FrameBuffer::new(100);
        let b = FrameBuffer::new(99);
        let mut composite = CompositeBuffer::new(100);

        assert!(assemble(&a, &b, &mut composite).is_err());
    }

    #[test]
    fn test_freshness() {
        let mut frame = FrameBuffer::new(512);
        assert!(!frame.is_fresh());

        frame.mark_received(100);
        assert!(!frame.is_fresh());
        assert_eq!(frame.filled(), 100);

        frame.mark_received(512);
        assert!(frame.is_fresh());
        assert!(frame.last_complete_at().is_some());

        frame.mark_stale();
        assert!(!frame.is_fresh());
        assert_eq!(frame.filled(), 0);
    }

    #[test]
    fn test_chunk_spans_full_composite() {
        let spans: Vec<_> = chunk_spans(460_800, 65_535).collect();

        assert_eq!(spans.len(), 8);
        assert!(spans[..7].iter().all(|s| s.len() == 65_535));
        assert_eq!(spans[7].len(), 460_800 - 7 * 65_535);
        assert_eq!(spans.iter().map(|s| s.len()).sum::<usize>(), 460_800);
        assert_eq!(spans[7].end, 460_800);
    }

    #[test]
    fn test_chunk_spans_edge_cases() {
        assert_eq!(chunk_spans(0, 10).count(), 0);
        assert_eq!(chunk_spans(10, 10).collect::<Vec<_>>(), vec![0..10]);
        assert_eq!(chunk_spans(5, 100).collect::<Vec<_>>(), vec![0..5]);
    }
}
