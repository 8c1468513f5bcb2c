//! # camrelay
//!
//! 두 대의 무선 카메라 주변기기 → TCP 수집기 프레임 중계
//!
//! ## 핵심 특징
//! - **청크 수신**: 주변기기 전송 단위(MTU)로 고정 크기 프레임 버퍼를 채움
//! - **합성 프레임**: 카메라 A, B 프레임을 고정 순서로 이어붙임
//! - **ACK 게이트 송신**: 청크마다 수집기의 `ACK` 토큰을 기다린 뒤 다음 청크 전송
//! - **재연결 백오프**: 주변기기/네트워크 링크가 끊겨도 교착 없이 다음 사이클 진행
//! - **단일 협력 루프**: 수신 → 조립 → 송신을 한 태스크에서 순차 실행

pub mod backoff;
pub mod collector;
pub mod config;
pub mod error;
pub mod frame;
pub mod link;
pub mod message;
pub mod peer;
pub mod pipeline;
pub mod receiver;
pub mod sender;
pub mod sim;
pub mod stats;
pub mod tcp;

pub use backoff::ReconnectBackoff;
pub use collector::{Collector, CollectorConfig, ReceivedComposite};
pub use config::{Config, PeerConfig, StaleFramePolicy};
pub use error::{Error, Result};
pub use frame::{assemble, chunk_spans, CompositeBuffer, FrameBuffer};
pub use link::{LinkConnectionState, LinkSession, NetworkConnector, NetworkSink};
pub use message::{classify_ack, AckResult, ACK_TOKEN};
pub use peer::{PeerAddress, PeerConnectionState, PeerSession, PeripheralLink};
pub use pipeline::{CycleReport, Relay, StopHandle};
pub use receiver::{ChunkedReceiver, ReceiveOutcome};
pub use sender::{ChunkedTransmitter, TransmitOutcome, TransmitState};
pub use sim::{SimCamera, SimHandle, SimulatedPeripheralLink};
pub use stats::RelayStats;
pub use tcp::{TcpConnector, TcpSink};

/// 원시 프레임 한 장 크기 (320 x 240 x 3 바이트)
pub const DEFAULT_FRAME_SIZE: usize = 230_400;

/// 주변기기 링크 최대 전송 단위 (바이트)
pub const DEFAULT_TRANSFER_UNIT: usize = 512;

/// 네트워크 청크 최대 크기 (바이트)
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 65_535;

/// ACK 대기 타임아웃 (밀리초)
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 10_000;

/// 수집기 기본 주소
pub const DEFAULT_COLLECTOR_ADDR: &str = "127.0.0.1:5555";

/// 중계하는 카메라 수 (합성 프레임 = 프레임 크기 x 2)
pub const SOURCE_COUNT: usize = 2;
