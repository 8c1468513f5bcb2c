//! TCP 네트워크 링크
//!
//! tokio `TcpStream` 기반 `NetworkSink`/`NetworkConnector`

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::Config;
use crate::link::{NetworkConnector, NetworkSink};
use crate::{Error, Result};

/// TCP 커넥터
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.connect_timeout())
    }
}

impl NetworkConnector for TcpConnector {
    type Sink = TcpSink;

    async fn connect(&mut self, endpoint: &str) -> Result<TcpSink> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(endpoint))
            .await
            .map_err(|_| {
                Error::LinkUnavailable(format!(
                    "{} 연결 타임아웃 ({}ms)",
                    endpoint,
                    self.connect_timeout.as_millis()
                ))
            })??;
        stream.set_nodelay(true)?;

        Ok(TcpSink::new(stream))
    }
}

/// TCP 싱크
///
/// `has_data` 확인 중 읽힌 바이트는 `pending`에 보관했다가 `read_exact`에서 먼저 소비.
#[derive(Debug)]
pub struct TcpSink {
    stream: TcpStream,
    pending: BytesMut,
    connected: bool,
    peer_addr: Option<SocketAddr>,
}

impl TcpSink {
    pub fn new(stream: TcpStream) -> Self {
        let peer_addr = stream.peer_addr().ok();
        Self {
            stream,
            pending: BytesMut::with_capacity(64),
            connected: true,
            peer_addr,
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    fn mark_failed(&mut self, e: &std::io::Error) {
        debug!("TCP 에러, 연결 끊김 처리: {}", e);
        self.connected = false;
    }

    fn fail<T>(&mut self, e: std::io::Error) -> Result<T> {
        self.mark_failed(&e);
        Err(e.into())
    }
}

impl NetworkSink for TcpSink {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::ConnectionClosed);
        }
        if let Err(e) = self.stream.write_all(bytes).await {
            return self.fail(e);
        }
        Ok(())
    }

    fn has_data(&mut self) -> bool {
        if !self.pending.is_empty() {
            return true;
        }
        if !self.connected {
            return false;
        }

        let mut buf = [0u8; 64];
        match self.stream.try_read(&mut buf) {
            Ok(0) => {
                self.connected = false;
                false
            }
            Ok(n) => {
                self.pending.extend_from_slice(&buf[..n]);
                true
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => false,
            Err(e) => {
                self.mark_failed(&e);
                false
            }
        }
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let buffered = self.pending.len().min(buf.len());
        buf[..buffered].copy_from_slice(&self.pending[..buffered]);
        self.pending.advance(buffered);

        if buffered < buf.len() {
            if !self.connected {
                return Err(Error::ConnectionClosed);
            }
            if let Err(e) = self.stream.read_exact(&mut buf[buffered..]).await {
                return self.fail(e);
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn wait_readable(&mut self, _poll_interval: Duration) -> Result<()> {
        loop {
            if self.has_data() {
                return Ok(());
            }
            if !self.connected {
                return Err(Error::ConnectionClosed);
            }
            if let Err(e) = self.stream.readable().await {
                return self.fail(e);
            }
        }
    }
}
