//! 중계 오케스트레이터
//!
//! 사이클마다 고정 순서로 실행:
//! 1. 카메라마다 Ready 보장 → Ready면 프레임 버퍼 수신
//! 2. 두 프레임 버퍼를 합성 버퍼로 조립 (항상)
//! 3. 수집기 연결 보장 → 연결되면 합성 버퍼 송신
//!
//! 단일 태스크에서 순차 실행하므로 버퍼 공유에 락이 없음.
//! 어떤 단계가 실패해도 다음 사이클로 진행.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::{Config, StaleFramePolicy};
use crate::frame::{assemble, CompositeBuffer, FrameBuffer};
use crate::link::{LinkConnectionState, LinkSession, NetworkConnector};
use crate::peer::{PeerAddress, PeerConnectionState, PeerSession, PeripheralLink};
use crate::receiver::{ChunkedReceiver, ReceiveOutcome};
use crate::sender::{ChunkedTransmitter, TransmitOutcome};
use crate::stats::RelayStats;
use crate::Result;

/// 외부에서 중계 루프를 멈추는 핸들
#[derive(Debug, Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    /// 진행 중인 사이클이 끝난 뒤 멈춤
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        !self.running.load(Ordering::SeqCst)
    }
}

/// 사이클 하나의 결과
#[derive(Debug)]
pub struct CycleReport {
    /// 사이클 번호 (1부터)
    pub cycle: u64,

    /// 카메라별 연결 상태
    pub peer_states: Vec<PeerConnectionState>,

    /// 카메라별 수신 결과 (Ready가 아니면 None)
    pub receives: Vec<Option<ReceiveOutcome>>,

    /// 수집기 연결 상태
    pub link_state: LinkConnectionState,

    /// 송신 결과 (송신 안 했으면 None)
    pub transmit: Option<TransmitOutcome>,

    /// 부분 프레임 정책으로 송신 건너뜀
    pub skipped_stale: bool,
}

impl CycleReport {
    /// 합성 프레임이 완전히 전달됐는지
    pub fn delivered(&self) -> bool {
        self.transmit
            .as_ref()
            .map(TransmitOutcome::is_complete)
            .unwrap_or(false)
    }
}

/// 카메라 하나의 세션 + 프레임 버퍼
struct SourceSlot<L: PeripheralLink> {
    session: PeerSession<L>,
    frame: FrameBuffer,
}

/// 중계기
pub struct Relay<L: PeripheralLink, C: NetworkConnector> {
    config: Config,
    link: L,
    connector: C,
    sources: Vec<SourceSlot<L>>,
    composite: CompositeBuffer,
    receiver: ChunkedReceiver,
    transmitter: ChunkedTransmitter,
    link_session: LinkSession<C>,
    stats: RelayStats,
    cycle: u64,
    running: Arc<AtomicBool>,
}

impl<L: PeripheralLink, C: NetworkConnector> Relay<L, C> {
    /// 새 중계기 생성
    pub fn new(config: Config, link: L, connector: C) -> Result<Self> {
        config.validate()?;

        let sources = config
            .peers
            .iter()
            .map(|peer| SourceSlot {
                session: PeerSession::from_config(peer, &config),
                frame: FrameBuffer::new(config.frame_size),
            })
            .collect();

        Ok(Self {
            composite: CompositeBuffer::new(config.frame_size),
            receiver: ChunkedReceiver::new(config.transfer_unit),
            transmitter: ChunkedTransmitter::from_config(&config),
            link_session: LinkSession::from_config(&config),
            stats: RelayStats::new(),
            cycle: 0,
            running: Arc::new(AtomicBool::new(true)),
            sources,
            config,
            link,
            connector,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn connector_mut(&mut self) -> &mut C {
        &mut self.connector
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: self.running.clone(),
        }
    }

    pub fn peer_state(&self, index: usize) -> Option<PeerConnectionState> {
        self.sources.get(index).map(|slot| slot.session.state())
    }

    pub fn frame(&self, index: usize) -> Option<&FrameBuffer> {
        self.sources.get(index).map(|slot| &slot.frame)
    }

    pub fn composite(&self) -> &CompositeBuffer {
        &self.composite
    }

    pub fn link_state(&self) -> LinkConnectionState {
        self.link_session.state()
    }

    /// 알려진 카메라 중 광고 중인 것 확인 (시작 시 한 번)
    pub async fn discover(&mut self) -> Vec<PeerAddress> {
        let known: Vec<PeerAddress> = self
            .sources
            .iter()
            .map(|slot| slot.session.address().clone())
            .collect();

        match self.link.scan(&known).await {
            Ok(found) => {
                for address in &found {
                    info!("장치 발견: {}", address);
                }
                found
            }
            Err(e) => {
                warn!("주변기기 스캔 실패: {}", e);
                Vec::new()
            }
        }
    }

    /// 사이클 하나 실행
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycle += 1;
        self.stats.cycles += 1;

        // 1. 카메라별 수신
        let mut peer_states = Vec::with_capacity(self.sources.len());
        let mut receives = Vec::with_capacity(self.sources.len());

        for slot in self.sources.iter_mut() {
            let attempts = slot.session.reconnect_attempts();
            let state = slot.session.ensure_ready(&mut self.link).await;
            self.stats.peer_reconnects += slot.session.reconnect_attempts() - attempts;

            let outcome = match slot.session.characteristic() {
                Some(characteristic) => Some(
                    self.receiver
                        .receive(&mut self.link, characteristic, &mut slot.frame)
                        .await,
                ),
                None => {
                    debug!("{} 준비 안 됨 ({:?}), 수신 건너뜀", slot.session.label(), state);
                    slot.frame.mark_stale();
                    None
                }
            };

            if let Some(outcome) = &outcome {
                self.stats.record_receive(outcome);
                if outcome.is_link_loss() {
                    slot.session.mark_link_lost();
                }
            }

            peer_states.push(slot.session.state());
            receives.push(outcome);
        }

        // 2. 합성 (신선도와 무관하게 항상)
        if let Err(e) = assemble(
            &self.sources[0].frame,
            &self.sources[1].frame,
            &mut self.composite,
        ) {
            error!("합성 프레임 조립 실패: {}", e);
        }
        let all_fresh = self.sources.iter().all(|slot| slot.frame.is_fresh());

        // 3. 수집기 송신
        let attempts = self.link_session.reconnect_attempts();
        let link_state = self.link_session.ensure_connected(&mut self.connector).await;
        self.stats.link_reconnects += self.link_session.reconnect_attempts() - attempts;

        let mut transmit = None;
        let mut skipped_stale = false;

        if link_state == LinkConnectionState::Connected {
            if !all_fresh && self.config.stale_frame_policy == StaleFramePolicy::Skip {
                info!("부분 프레임 포함, 이번 사이클 송신 건너뜀");
                self.stats.skipped_transmits += 1;
                skipped_stale = true;
            } else if let Some(sink) = self.link_session.sink_mut() {
                let outcome = self
                    .transmitter
                    .transmit(self.composite.as_slice(), sink)
                    .await;
                self.stats.record_transmit(&outcome);

                // 수집기는 연결 단위로 합성 프레임 경계를 맞춤. 중단되면 재연결해서 0부터
                if !outcome.is_complete() {
                    self.link_session.mark_disconnected();
                }
                transmit = Some(outcome);
            }
        } else {
            debug!("수집기 연결 안 됨, 송신 건너뜀");
        }

        if self.config.stats_every > 0 && self.cycle % self.config.stats_every == 0 {
            info!("{}", self.stats.summary());
        }

        CycleReport {
            cycle: self.cycle,
            peer_states,
            receives,
            link_state,
            transmit,
            skipped_stale,
        }
    }

    /// 멈출 때까지 사이클 반복
    pub async fn run(&mut self) -> RelayStats {
        self.run_limited(None).await
    }

    /// 최대 `cycles`번 실행 (중간에 멈출 수 있음)
    pub async fn run_cycles(&mut self, cycles: u64) -> RelayStats {
        self.run_limited(Some(cycles)).await
    }

    async fn run_limited(&mut self, limit: Option<u64>) -> RelayStats {
        self.discover().await;
        let interval = Duration::from_millis(self.config.cycle_interval_ms);
        let mut executed = 0u64;

        while self.running.load(Ordering::SeqCst) {
            if limit.map(|max| executed >= max).unwrap_or(false) {
                break;
            }

            self.run_cycle().await;
            executed += 1;

            if interval.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(interval).await;
            }
        }

        info!("중계 종료: {}", self.stats.summary());
        self.stats.clone()
    }
}
