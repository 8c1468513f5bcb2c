//! 수집기 (TCP 서버측)
//!
//! - 합성 프레임을 청크 단위로 읽고 청크마다 `ACK` 응답
//! - 연결이 끊기면 진행 중이던 부분 합성 프레임은 버림
//! - 완성된 합성 프레임은 채널로 전달, 선택적으로 파일 저장

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::PathBuf;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::frame::chunk_spans;
use crate::message::ACK_TOKEN;
use crate::{Result, SOURCE_COUNT};

/// 완성된 합성 프레임 채널 수신기 타입
pub type CompositeReceiver = mpsc::Receiver<ReceivedComposite>;

/// 수집기 설정
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// 카메라 프레임 크기
    pub frame_size: usize,

    /// 청크 최대 크기 (송신측과 같아야 함)
    pub max_chunk_size: usize,

    /// 합성 프레임 저장 디렉토리
    pub output_dir: Option<PathBuf>,

    /// 완성 프레임 채널 크기
    pub channel_capacity: usize,
}

impl CollectorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            frame_size: config.frame_size,
            max_chunk_size: config.max_chunk_size,
            output_dir: None,
            channel_capacity: 16,
        }
    }

    pub fn composite_size(&self) -> usize {
        self.frame_size * SOURCE_COUNT
    }
}

/// 수신 완료된 합성 프레임
#[derive(Debug, Clone)]
pub struct ReceivedComposite {
    /// 수집기 시작 후 일련번호 (1부터)
    pub sequence: u64,

    /// 보낸 쪽 주소
    pub peer: SocketAddr,

    pub data: Bytes,

    /// CRC32 체크섬
    pub crc32: u32,
}

impl ReceivedComposite {
    /// (카메라 A, 카메라 B) 구간
    pub fn halves(&self, frame_size: usize) -> (&[u8], &[u8]) {
        self.data.split_at(frame_size.min(self.data.len()))
    }
}

/// 수집기
pub struct Collector {
    listener: TcpListener,
    config: CollectorConfig,
    completed_tx: mpsc::Sender<ReceivedComposite>,
    sequence: u64,
}

impl Collector {
    /// 바인딩 후 완성 프레임 수신기와 함께 반환
    pub async fn bind(
        addr: impl ToSocketAddrs,
        config: CollectorConfig,
    ) -> Result<(Self, CompositeReceiver)> {
        let listener = TcpListener::bind(addr).await?;
        let (completed_tx, completed_rx) = mpsc::channel(config.channel_capacity.max(1));

        if let Some(dir) = &config.output_dir {
            tokio::fs::create_dir_all(dir).await?;
        }

        info!("수집기 시작: {}", listener.local_addr()?);

        Ok((
            Self {
                listener,
                config,
                completed_tx,
                sequence: 0,
            },
            completed_rx,
        ))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// 수집한 합성 프레임 수
    pub fn received(&self) -> u64 {
        self.sequence
    }

    /// 연결을 하나씩 순서대로 처리
    pub async fn serve(&mut self) -> Result<()> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            info!("중계기 연결: {}", addr);

            match self.handle_connection(stream, addr).await {
                Ok(count) => info!("중계기 연결 종료: {} ({} 프레임)", addr, count),
                Err(e) => warn!("중계기 연결 에러: {}: {}", addr, e),
            }
        }
    }

    /// 연결 하나에서 합성 프레임 반복 수신
    pub async fn handle_connection(&mut self, mut stream: TcpStream, addr: SocketAddr) -> Result<u64> {
        stream.set_nodelay(true)?;
        let composite_size = self.config.composite_size();
        let mut count = 0;

        loop {
            let mut data = BytesMut::zeroed(composite_size);

            for span in chunk_spans(composite_size, self.config.max_chunk_size) {
                match stream.read_exact(&mut data[span.clone()]).await {
                    Ok(_) => {}
                    Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                        if span.start > 0 {
                            warn!(
                                "부분 합성 프레임 폐기: {}/{} bytes",
                                span.start, composite_size
                            );
                        }
                        return Ok(count);
                    }
                    Err(e) => return Err(e.into()),
                }
                stream.write_all(ACK_TOKEN).await?;
            }

            count += 1;
            self.complete(data.freeze(), addr).await;
        }
    }

    async fn complete(&mut self, data: Bytes, peer: SocketAddr) {
        self.sequence += 1;
        let crc32 = crc32fast::hash(&data);

        debug!(
            "합성 프레임 {} 수신: {} bytes, crc={:08X}",
            self.sequence,
            data.len(),
            crc32
        );

        if let Some(dir) = &self.config.output_dir {
            let path = dir.join(format!("composite-{:06}.bin", self.sequence));
            if let Err(e) = tokio::fs::write(&path, &data).await {
                warn!("합성 프레임 저장 실패: {:?}: {}", path, e);
            }
        }

        let composite = ReceivedComposite {
            sequence: self.sequence,
            peer,
            data,
            crc32,
        };
        // 수신 측이 없어도 수집은 계속
        let _ = self.completed_tx.send(composite).await;
    }
}
