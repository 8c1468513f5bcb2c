//! 수집기 네트워크 링크 수명주기
//!
//! - 네트워크 싱크/커넥터 추상화
//! - 연결 상태 추적, 끊기면 백오프에 맞춰 재연결

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backoff::ReconnectBackoff;
use crate::config::Config;
use crate::{Error, Result};

/// 네트워크 링크 연결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkConnectionState {
    Disconnected,
    Connected,
}

/// 스트림형 네트워크 싱크
#[allow(async_fn_in_trait)]
pub trait NetworkSink {
    /// 바이트 전부 쓰기
    async fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// 읽을 데이터가 있는지 (블로킹 없음)
    fn has_data(&mut self) -> bool;

    /// `buf`를 정확히 채울 때까지 읽기
    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// 읽을 데이터가 생길 때까지 대기
    ///
    /// 기본 구현은 `poll_interval` 간격 확인. 준비 알림이 있는 싱크는 재정의.
    /// 타임아웃은 호출자가 씌움.
    async fn wait_readable(&mut self, poll_interval: Duration) -> Result<()> {
        loop {
            if self.has_data() {
                return Ok(());
            }
            if !self.is_connected() {
                return Err(Error::ConnectionClosed);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

/// 싱크를 만드는 커넥터
#[allow(async_fn_in_trait)]
pub trait NetworkConnector {
    type Sink: NetworkSink;

    async fn connect(&mut self, endpoint: &str) -> Result<Self::Sink>;
}

/// 수집기 링크 세션
pub struct LinkSession<C: NetworkConnector> {
    endpoint: String,
    sink: Option<C::Sink>,
    state: LinkConnectionState,
    backoff: ReconnectBackoff,
    reconnect_attempts: u64,
}

impl<C: NetworkConnector> LinkSession<C> {
    pub fn new(endpoint: &str, backoff: ReconnectBackoff) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            sink: None,
            state: LinkConnectionState::Disconnected,
            backoff,
            reconnect_attempts: 0,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.collector_addr,
            ReconnectBackoff::from_millis(config.reconnect_initial_ms, config.reconnect_max_ms),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> LinkConnectionState {
        self.state
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts
    }

    /// 연결된 싱크
    pub fn sink_mut(&mut self) -> Option<&mut C::Sink> {
        match self.state {
            LinkConnectionState::Connected => self.sink.as_mut(),
            LinkConnectionState::Disconnected => None,
        }
    }

    /// 싱크 폐기. 다음 `ensure_connected`에서 재연결
    pub fn mark_disconnected(&mut self) {
        if self.sink.take().is_some() {
            debug!("수집기 연결 폐기: {}", self.endpoint);
        }
        self.state = LinkConnectionState::Disconnected;
    }

    /// 연결 보장 시도. 끊겨 있으면 연결 한 번 시도
    pub async fn ensure_connected(&mut self, connector: &mut C) -> LinkConnectionState {
        if let Some(sink) = self.sink.as_ref() {
            if sink.is_connected() {
                self.state = LinkConnectionState::Connected;
                return self.state;
            }
            warn!("수집기 연결 끊김: {}", self.endpoint);
            self.mark_disconnected();
        }

        if !self.backoff.ready() {
            debug!(
                "수집기 재연결 대기 중 ({}ms 남음)",
                self.backoff.remaining().as_millis()
            );
            return self.state;
        }

        self.reconnect_attempts += 1;
        info!("수집기 연결 시도: {}", self.endpoint);

        match connector.connect(&self.endpoint).await {
            Ok(sink) => {
                info!("수집기 연결됨: {}", self.endpoint);
                self.sink = Some(sink);
                self.state = LinkConnectionState::Connected;
                self.backoff.reset();
            }
            Err(e) => {
                warn!("수집기 연결 실패: {}", e);
                self.state = LinkConnectionState::Disconnected;
                self.backoff.record_failure();
            }
        }

        self.state
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockConnector;
    use super::*;

    fn session() -> LinkSession<MockConnector> {
        LinkSession::new("127.0.0.1:5555", ReconnectBackoff::from_millis(0, 0))
    }

    #[tokio::test]
    async fn test_connects_once_then_reuses() {
        let mut connector = MockConnector::new();
        let mut session = session();

        assert_eq!(
            session.ensure_connected(&mut connector).await,
            LinkConnectionState::Connected
        );
        assert_eq!(
            session.ensure_connected(&mut connector).await,
            LinkConnectionState::Connected
        );
        assert_eq!(connector.attempts, 1);
        assert!(session.sink_mut().is_some());
    }

    #[tokio::test]
    async fn test_failed_connect_is_disconnected() {
        let mut connector = MockConnector::new();
        connector.fail_next = 1;
        let mut session = session();

        assert_eq!(
            session.ensure_connected(&mut connector).await,
            LinkConnectionState::Disconnected
        );
        assert!(session.sink_mut().is_none());

        assert_eq!(
            session.ensure_connected(&mut connector).await,
            LinkConnectionState::Connected
        );
        assert_eq!(session.reconnect_attempts(), 2);
    }

    #[tokio::test]
    async fn test_dead_sink_triggers_reconnect() {
        let mut connector = MockConnector::new();
        let mut session = session();
        session.ensure_connected(&mut connector).await;

        if let Some(sink) = session.sink_mut() {
            sink.connected = false;
        }

        assert_eq!(
            session.ensure_connected(&mut connector).await,
            LinkConnectionState::Connected
        );
        assert_eq!(connector.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_between_attempts() {
        let mut connector = MockConnector::new();
        connector.fail_next = 10;
        let mut session: LinkSession<MockConnector> =
            LinkSession::new("127.0.0.1:5555", ReconnectBackoff::from_millis(500, 500));

        session.ensure_connected(&mut connector).await;
        session.ensure_connected(&mut connector).await;
        assert_eq!(connector.attempts, 1);

        tokio::time::advance(Duration::from_millis(500)).await;
        session.ensure_connected(&mut connector).await;
        assert_eq!(connector.attempts, 2);
    }
}
