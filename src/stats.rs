//! 중계 통계

use std::time::Duration;

use tokio::time::Instant;

use crate::receiver::ReceiveOutcome;
use crate::sender::TransmitOutcome;
use crate::Error;

/// 전체 중계 통계
#[derive(Debug, Clone)]
pub struct RelayStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 실행한 사이클 수
    pub cycles: u64,

    /// 완전 수신한 프레임 수
    pub frames_complete: u64,

    /// 부분 수신 (빈 청크/읽기 에러)
    pub short_reads: u64,

    /// 버퍼 오버플로우로 중단된 수신
    pub overflows: u64,

    /// 주변기기에서 받은 바이트
    pub bytes_in: u64,

    /// 주변기기 재연결 시도
    pub peer_reconnects: u64,

    /// 수집기 재연결 시도
    pub link_reconnects: u64,

    /// 완전 전송한 합성 프레임
    pub composites_sent: u64,

    /// 중간에 중단된 합성 프레임
    pub composites_partial: u64,

    /// 부분 프레임 정책으로 건너뛴 송신
    pub skipped_transmits: u64,

    /// 수집기로 보낸 바이트
    pub bytes_out: u64,

    /// ACK 받은 청크 수
    pub chunks_acked: u64,

    pub ack_timeouts: u64,
    pub ack_mismatches: u64,
    pub ack_absent: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            cycles: 0,
            frames_complete: 0,
            short_reads: 0,
            overflows: 0,
            bytes_in: 0,
            peer_reconnects: 0,
            link_reconnects: 0,
            composites_sent: 0,
            composites_partial: 0,
            skipped_transmits: 0,
            bytes_out: 0,
            chunks_acked: 0,
            ack_timeouts: 0,
            ack_mismatches: 0,
            ack_absent: 0,
        }
    }

    /// 수신 결과 기록
    pub fn record_receive(&mut self, outcome: &ReceiveOutcome) {
        self.bytes_in += outcome.bytes_read as u64;
        if outcome.is_complete() {
            self.frames_complete += 1;
        } else if outcome.is_overflow() {
            self.overflows += 1;
        } else {
            self.short_reads += 1;
        }
    }

    /// 송신 결과 기록
    pub fn record_transmit(&mut self, outcome: &TransmitOutcome) {
        self.bytes_out += outcome.bytes_written as u64;
        self.chunks_acked += outcome.chunks_acked as u64;

        match &outcome.failure {
            None => self.composites_sent += 1,
            Some(e) => {
                self.composites_partial += 1;
                match e {
                    Error::AckTimeout { .. } => self.ack_timeouts += 1,
                    Error::AckMismatch { .. } => self.ack_mismatches += 1,
                    Error::AckAbsent => self.ack_absent += 1,
                    _ => {}
                }
            }
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 송신 처리율 (bytes/sec)
    pub fn outbound_throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.bytes_out as f64 / elapsed
    }

    /// 완전 전송 비율
    pub fn delivery_ratio(&self) -> f64 {
        let attempted = self.composites_sent + self.composites_partial;
        if attempted == 0 {
            return 0.0;
        }
        self.composites_sent as f64 / attempted as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Cycles: {} | Frames: {} ok / {} short / {} overflow | Composites: {}/{} | Out: {:.2} MB/s | ACK fail: {} timeout, {} mismatch, {} absent | Reconnects: {} peer, {} link",
            self.elapsed().as_secs_f64(),
            self.cycles,
            self.frames_complete,
            self.short_reads,
            self.overflows,
            self.composites_sent,
            self.composites_sent + self.composites_partial,
            self.outbound_throughput() / 1_000_000.0,
            self.ack_timeouts,
            self.ack_mismatches,
            self.ack_absent,
            self.peer_reconnects,
            self.link_reconnects,
        )
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}
