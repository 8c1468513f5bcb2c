//! 카메라 주변기기 연결 수명주기
//!
//! - 주변기기 링크 드라이버 추상화 (`PeripheralLink`)
//! - 주변기기별 연결/characteristic 확인 상태 추적
//! - Ready가 아니면 백오프에 맞춰 재연결

use std::fmt;

use tracing::{debug, info, warn};

use crate::backoff::ReconnectBackoff;
use crate::config::{Config, PeerConfig};
use crate::Result;

/// 주변기기 주소
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddress(pub String);

impl PeerAddress {
    pub fn new(address: &str) -> Self {
        Self(address.to_string())
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 주변기기 연결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    /// 연결 없음
    Disconnected,

    /// 연결됨, characteristic 미확인 (데이터 채널 사용 불가)
    Connected,

    /// 연결은 살아있으나 characteristic 핸들이 무효화됨
    CharacteristicUnresolved,

    /// 연결 + characteristic 확인 완료. 수신은 이 상태에서만 시도
    Ready,
}

impl PeerConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, PeerConnectionState::Ready)
    }
}

/// 주변기기 링크 드라이버
///
/// 스캔, 연결, characteristic 확인, 청크 읽기만 사용함.
/// 무선 스택 초기화와 주소 필터링은 드라이버 쪽 책임.
#[allow(async_fn_in_trait)]
pub trait PeripheralLink {
    /// 연결된 주변기기 핸들
    type Peer;

    /// 확인된 characteristic 핸들
    type Characteristic;

    /// 알려진 주소 중 현재 광고 중인 주변기기
    async fn scan(&mut self, known: &[PeerAddress]) -> Result<Vec<PeerAddress>>;

    async fn connect(&mut self, address: &PeerAddress) -> Result<Self::Peer>;

    async fn resolve_characteristic(
        &mut self,
        peer: &Self::Peer,
        id: &str,
    ) -> Result<Self::Characteristic>;

    /// 청크 하나를 `buf`에 읽음 (최대 `buf.len()` 바이트). 0이면 읽기 실패
    async fn pull_chunk(
        &mut self,
        characteristic: &Self::Characteristic,
        buf: &mut [u8],
    ) -> Result<usize>;

    fn is_connected(&self, peer: &Self::Peer) -> bool;

    fn is_valid(&self, characteristic: &Self::Characteristic) -> bool;

    async fn disconnect(&mut self, peer: Self::Peer);
}

/// 주변기기 하나의 연결 세션
pub struct PeerSession<L: PeripheralLink> {
    label: String,
    address: PeerAddress,
    characteristic_id: String,
    state: PeerConnectionState,
    peer: Option<L::Peer>,
    characteristic: Option<L::Characteristic>,
    backoff: ReconnectBackoff,
    reconnect_attempts: u64,
}

impl<L: PeripheralLink> PeerSession<L> {
    pub fn new(peer: &PeerConfig, backoff: ReconnectBackoff) -> Self {
        Self {
            label: peer.label.clone(),
            address: PeerAddress::new(&peer.address),
            characteristic_id: peer.characteristic.clone(),
            state: PeerConnectionState::Disconnected,
            peer: None,
            characteristic: None,
            backoff,
            reconnect_attempts: 0,
        }
    }

    pub fn from_config(peer: &PeerConfig, config: &Config) -> Self {
        Self::new(
            peer,
            ReconnectBackoff::from_millis(config.reconnect_initial_ms, config.reconnect_max_ms),
        )
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    pub fn state(&self) -> PeerConnectionState {
        self.state
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts
    }

    /// Ready일 때만 characteristic 반환
    pub fn characteristic(&self) -> Option<&L::Characteristic> {
        if self.state.is_ready() {
            self.characteristic.as_ref()
        } else {
            None
        }
    }

    /// 수신 중 링크 끊김 감지 시 호출
    pub fn mark_link_lost(&mut self) {
        if self.state != PeerConnectionState::Disconnected {
            warn!("{} 링크 끊김 감지", self.label);
        }
        self.state = PeerConnectionState::Disconnected;
        self.characteristic = None;
    }

    /// Ready 세션의 링크가 아직 유효한지 확인
    fn observe(&self, link: &L) -> PeerConnectionState {
        let Some(peer) = self.peer.as_ref() else {
            return PeerConnectionState::Disconnected;
        };
        if !link.is_connected(peer) {
            return PeerConnectionState::Disconnected;
        }
        match self.characteristic.as_ref() {
            Some(characteristic) if link.is_valid(characteristic) => PeerConnectionState::Ready,
            _ => PeerConnectionState::CharacteristicUnresolved,
        }
    }

    /// 살아있는 연결에서 characteristic만 다시 확인
    async fn re_resolve(&mut self, link: &mut L) -> PeerConnectionState {
        let Some(peer) = self.peer.as_ref() else {
            self.state = PeerConnectionState::Disconnected;
            return self.state;
        };

        self.reconnect_attempts += 1;
        info!("{} characteristic 재확인...", self.label);

        match link.resolve_characteristic(peer, &self.characteristic_id).await {
            Ok(characteristic) => {
                info!("{} characteristic 재확인 완료", self.label);
                self.characteristic = Some(characteristic);
                self.state = PeerConnectionState::Ready;
                self.backoff.reset();
            }
            Err(e) => {
                warn!("{} characteristic 재확인 실패: {}", self.label, e);
                self.characteristic = None;
                self.backoff.record_failure();
            }
        }

        self.state
    }

    /// Ready 보장 시도
    ///
    /// Ready면 I/O 없이 바로 반환. 아니면 연결 → characteristic 확인.
    /// - 연결 실패: `Disconnected` (확인 시도 안 함)
    /// - 확인 실패: `Connected` (수신 불가)
    /// - 둘 다 성공: `Ready`
    ///
    /// 연결은 살아있고 characteristic만 무효화됐으면 기존 연결에서 다시 확인.
    /// 실패하면 `CharacteristicUnresolved` 유지.
    ///
    /// 백오프 대기 중이면 I/O 없이 현재 상태 반환.
    pub async fn ensure_ready(&mut self, link: &mut L) -> PeerConnectionState {
        if matches!(
            self.state,
            PeerConnectionState::Ready | PeerConnectionState::CharacteristicUnresolved
        ) {
            let observed = self.observe(link);
            if observed.is_ready() {
                return observed;
            }
            if observed != self.state {
                warn!("{} 상태 변경: {:?} -> {:?}", self.label, self.state, observed);
                self.state = observed;
            }
        }

        if !self.backoff.ready() {
            debug!(
                "{} 재연결 대기 중 ({}ms 남음)",
                self.label,
                self.backoff.remaining().as_millis()
            );
            return self.state;
        }

        if self.state == PeerConnectionState::CharacteristicUnresolved {
            return self.re_resolve(link).await;
        }

        self.reconnect_attempts += 1;
        self.characteristic = None;
        if let Some(stale) = self.peer.take() {
            link.disconnect(stale).await;
        }

        info!("{} ({}) 연결 시도...", self.label, self.address);

        let peer = match link.connect(&self.address).await {
            Ok(peer) => peer,
            Err(e) => {
                warn!("{} 연결 실패: {}", self.label, e);
                self.state = PeerConnectionState::Disconnected;
                self.backoff.record_failure();
                return self.state;
            }
        };

        match link
            .resolve_characteristic(&peer, &self.characteristic_id)
            .await
        {
            Ok(characteristic) => {
                info!("{} 연결 완료", self.label);
                self.peer = Some(peer);
                self.characteristic = Some(characteristic);
                self.state = PeerConnectionState::Ready;
                self.backoff.reset();
            }
            Err(e) => {
                warn!(
                    "{} 이미지 데이터 characteristic {} 확인 실패: {}",
                    self.label, self.characteristic_id, e
                );
                self.peer = Some(peer);
                self.state = PeerConnectionState::Connected;
                self.backoff.record_failure();
            }
        }

        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimCamera, SimulatedPeripheralLink};

    const ADDR: &str = "24:0A:C4:00:00:01";
    const CHAR: &str = "image-data";

    fn setup() -> (SimulatedPeripheralLink, PeerSession<SimulatedPeripheralLink>) {
        let link = SimulatedPeripheralLink::new(vec![SimCamera::new(ADDR, CHAR, 1024, 256, 1)]);
        let session = PeerSession::new(
            &PeerConfig::new("cam-a", ADDR, CHAR),
            ReconnectBackoff::from_millis(0, 0),
        );
        (link, session)
    }

    #[tokio::test]
    async fn test_connect_and_resolve() {
        let (mut link, mut session) = setup();

        assert_eq!(session.ensure_ready(&mut link).await, PeerConnectionState::Ready);
        assert!(session.characteristic().is_some());

        // Ready면 I/O 없음
        assert_eq!(session.ensure_ready(&mut link).await, PeerConnectionState::Ready);
        assert_eq!(link.handle().connect_attempts(ADDR), 1);
        assert_eq!(session.reconnect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_skips_resolution() {
        let (mut link, mut session) = setup();
        link.handle().power_off(ADDR);

        assert_eq!(
            session.ensure_ready(&mut link).await,
            PeerConnectionState::Disconnected
        );
        assert_eq!(link.handle().connect_attempts(ADDR), 1);
        assert_eq!(link.handle().resolve_attempts(ADDR), 0);
        assert!(session.characteristic().is_none());
    }

    #[tokio::test]
    async fn test_resolution_failure_is_connected() {
        let (mut link, mut session) = setup();
        link.handle().fail_next_resolves(ADDR, 1);

        assert_eq!(
            session.ensure_ready(&mut link).await,
            PeerConnectionState::Connected
        );
        assert!(session.characteristic().is_none());

        // 다음 호출은 새로 연결
        assert_eq!(session.ensure_ready(&mut link).await, PeerConnectionState::Ready);
        assert_eq!(link.handle().connect_attempts(ADDR), 2);
    }

    #[tokio::test]
    async fn test_link_loss_reconnects() {
        let (mut link, mut session) = setup();
        session.ensure_ready(&mut link).await;

        link.handle().power_off(ADDR);
        assert_eq!(
            session.ensure_ready(&mut link).await,
            PeerConnectionState::Disconnected
        );

        link.handle().power_on(ADDR);
        assert_eq!(session.ensure_ready(&mut link).await, PeerConnectionState::Ready);
        assert_eq!(link.handle().connect_attempts(ADDR), 3);
    }

    #[tokio::test]
    async fn test_invalidated_characteristic_is_re_resolved() {
        let (mut link, mut session) = setup();
        session.ensure_ready(&mut link).await;

        link.handle().invalidate_characteristic(ADDR);
        assert_eq!(session.ensure_ready(&mut link).await, PeerConnectionState::Ready);
        assert_eq!(link.handle().resolve_attempts(ADDR), 2);
        // 연결은 재사용
        assert_eq!(link.handle().connect_attempts(ADDR), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolved_characteristic_is_reported_while_waiting() {
        let mut link =
            SimulatedPeripheralLink::new(vec![SimCamera::new(ADDR, CHAR, 1024, 256, 1)]);
        let mut session: PeerSession<SimulatedPeripheralLink> = PeerSession::new(
            &PeerConfig::new("cam-a", ADDR, CHAR),
            ReconnectBackoff::from_millis(1_000, 4_000),
        );
        assert_eq!(session.ensure_ready(&mut link).await, PeerConnectionState::Ready);

        link.handle().invalidate_characteristic(ADDR);
        link.handle().fail_next_resolves(ADDR, 1);
        assert_eq!(
            session.ensure_ready(&mut link).await,
            PeerConnectionState::CharacteristicUnresolved
        );
        assert!(session.characteristic().is_none());

        // 백오프 대기 중에는 I/O 없이 같은 상태
        assert_eq!(
            session.ensure_ready(&mut link).await,
            PeerConnectionState::CharacteristicUnresolved
        );
        assert_eq!(link.handle().resolve_attempts(ADDR), 2);

        tokio::time::advance(std::time::Duration::from_millis(1_000)).await;
        assert_eq!(session.ensure_ready(&mut link).await, PeerConnectionState::Ready);
        assert_eq!(link.handle().resolve_attempts(ADDR), 3);
        assert_eq!(link.handle().connect_attempts(ADDR), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolved_session_notices_link_loss() {
        let mut link =
            SimulatedPeripheralLink::new(vec![SimCamera::new(ADDR, CHAR, 1024, 256, 1)]);
        let mut session: PeerSession<SimulatedPeripheralLink> = PeerSession::new(
            &PeerConfig::new("cam-a", ADDR, CHAR),
            ReconnectBackoff::from_millis(1_000, 4_000),
        );
        session.ensure_ready(&mut link).await;
        link.handle().invalidate_characteristic(ADDR);
        link.handle().fail_next_resolves(ADDR, 1);
        session.ensure_ready(&mut link).await;

        link.handle().power_off(ADDR);
        assert_eq!(
            session.ensure_ready(&mut link).await,
            PeerConnectionState::Disconnected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_suppresses_attempts() {
        let mut link =
            SimulatedPeripheralLink::new(vec![SimCamera::new(ADDR, CHAR, 1024, 256, 1)]);
        let mut session: PeerSession<SimulatedPeripheralLink> = PeerSession::new(
            &PeerConfig::new("cam-a", ADDR, CHAR),
            ReconnectBackoff::from_millis(1_000, 4_000),
        );
        link.handle().power_off(ADDR);

        session.ensure_ready(&mut link).await;
        session.ensure_ready(&mut link).await;
        session.ensure_ready(&mut link).await;
        assert_eq!(link.handle().connect_attempts(ADDR), 1);

        tokio::time::advance(std::time::Duration::from_millis(1_000)).await;
        link.handle().power_on(ADDR);
        assert_eq!(session.ensure_ready(&mut link).await, PeerConnectionState::Ready);
        assert_eq!(link.handle().connect_attempts(ADDR), 2);
    }
}
