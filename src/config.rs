//! 중계 설정
//!
//! 크기/타임아웃 상수를 코드에 박아두지 않고 파이프라인 생성 시 전달

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    Error, Result, DEFAULT_ACK_TIMEOUT_MS, DEFAULT_COLLECTOR_ADDR, DEFAULT_FRAME_SIZE,
    DEFAULT_MAX_CHUNK_SIZE, DEFAULT_TRANSFER_UNIT, SOURCE_COUNT,
};

/// 한쪽 소스가 이번 사이클에 완전한 프레임을 받지 못했을 때의 처리
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleFramePolicy {
    /// 남아있는 (부분/이전) 바이트 그대로 합성해서 전송
    Transmit,

    /// 이번 사이클 송신 건너뜀
    Skip,
}

/// 카메라 주변기기 하나의 식별 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// 로그용 이름
    pub label: String,

    /// 주변기기 주소 (xx:xx:xx:xx:xx:xx)
    pub address: String,

    /// 이미지 데이터 characteristic UUID
    pub characteristic: String,
}

impl PeerConfig {
    pub fn new(label: &str, address: &str, characteristic: &str) -> Self {
        Self {
            label: label.to_string(),
            address: address.to_string(),
            characteristic: characteristic.to_string(),
        }
    }
}

/// camrelay 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 카메라 프레임 한 장 크기 (바이트)
    pub frame_size: usize,

    /// 주변기기 링크 전송 단위 (바이트)
    pub transfer_unit: usize,

    /// 네트워크 청크 최대 크기 (바이트)
    pub max_chunk_size: usize,

    /// ACK 대기 타임아웃 (밀리초)
    pub ack_timeout_ms: u64,

    /// 준비 알림이 없는 싱크의 수신 확인 간격 (밀리초)
    pub ack_poll_interval_ms: u64,

    /// 재연결 초기 대기 (밀리초)
    /// 0이면 매 사이클 재연결 시도
    pub reconnect_initial_ms: u64,

    /// 재연결 최대 대기 (밀리초)
    pub reconnect_max_ms: u64,

    /// TCP 연결 타임아웃 (밀리초)
    pub connect_timeout_ms: u64,

    /// 사이클 간 대기 (밀리초)
    /// 0이면 쉬지 않고 다음 사이클
    pub cycle_interval_ms: u64,

    /// 부분 프레임 처리 정책
    pub stale_frame_policy: StaleFramePolicy,

    /// 통계 요약 로그 주기 (사이클 수, 0이면 출력 안 함)
    pub stats_every: u64,

    /// 수집기 주소 (host:port)
    pub collector_addr: String,

    /// 카메라 주변기기 (순서 = 합성 프레임 내 순서)
    pub peers: Vec<PeerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frame_size: DEFAULT_FRAME_SIZE,
            transfer_unit: DEFAULT_TRANSFER_UNIT,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            ack_poll_interval_ms: 10,
            reconnect_initial_ms: 250,
            reconnect_max_ms: 8_000,
            connect_timeout_ms: 5_000,
            cycle_interval_ms: 0,
            stale_frame_policy: StaleFramePolicy::Transmit,
            stats_every: 100,
            collector_addr: DEFAULT_COLLECTOR_ADDR.to_string(),
            peers: vec![
                PeerConfig::new(
                    "cam-a",
                    "24:0A:C4:00:00:01",
                    "6e400003-b5a3-f393-e0a9-e50e24dcca9e",
                ),
                PeerConfig::new(
                    "cam-b",
                    "24:0A:C4:00:00:02",
                    "6e400003-b5a3-f393-e0a9-e50e24dcca9e",
                ),
            ],
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// TOML 파일에서 로드 (없는 항목은 기본값)
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// TOML 문자열 파싱
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 합성 프레임 크기
    pub fn composite_size(&self) -> usize {
        self.frame_size * SOURCE_COUNT
    }

    /// 합성 프레임당 네트워크 청크 수
    pub fn chunks_per_composite(&self) -> usize {
        if self.max_chunk_size == 0 {
            return 0;
        }
        (self.composite_size() + self.max_chunk_size - 1) / self.max_chunk_size
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn ack_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ack_poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.frame_size == 0 {
            return Err(Error::Config("frame_size는 0보다 커야 함".into()));
        }
        if self.transfer_unit == 0 || self.transfer_unit > self.frame_size {
            return Err(Error::Config(format!(
                "transfer_unit {}은 1..={} 범위여야 함",
                self.transfer_unit, self.frame_size
            )));
        }
        if self.max_chunk_size == 0 {
            return Err(Error::Config("max_chunk_size는 0보다 커야 함".into()));
        }
        if self.reconnect_initial_ms > self.reconnect_max_ms {
            return Err(Error::Config(format!(
                "reconnect_initial_ms {} > reconnect_max_ms {}",
                self.reconnect_initial_ms, self.reconnect_max_ms
            )));
        }
        if self.peers.len() != SOURCE_COUNT {
            return Err(Error::Config(format!(
                "카메라는 정확히 {}대 필요, 설정에 {}대",
                SOURCE_COUNT,
                self.peers.len()
            )));
        }
        Ok(())
    }

    /// 저대역 링크용 설정 (작은 청크, 긴 ACK 대기)
    pub fn low_bandwidth() -> Self {
        Self {
            max_chunk_size: 16_384,           // 16KB
            ack_timeout_ms: 20_000,           // 20초
            reconnect_initial_ms: 1_000,
            reconnect_max_ms: 30_000,
            connect_timeout_ms: 10_000,
            cycle_interval_ms: 100,
            ..Self::default()
        }
    }

    /// 테스트용 소형 설정
    pub fn test_small() -> Self {
        Self {
            frame_size: 4_096,
            transfer_unit: 512,
            max_chunk_size: 1_500,
            ack_timeout_ms: 500,
            ack_poll_interval_ms: 5,
            reconnect_initial_ms: 0,
            reconnect_max_ms: 0,
            connect_timeout_ms: 1_000,
            ..Self::default()
        }
    }
}
