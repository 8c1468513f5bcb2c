//! camrelay 수집기
//!
//! 중계기 TCP 연결을 받아 합성 프레임을 청크 단위로 수신, 청크마다 `ACK` 응답
//!
//! 사용법:
//!   cargo run --release --bin camrelay-collector -- [OPTIONS]
//!
//! 예시:
//!   # 기본 주소에서 대기
//!   cargo run --release --bin camrelay-collector
//!
//!   # 수신한 합성 프레임 저장
//!   cargo run --release --bin camrelay-collector -- --bind 0.0.0.0:5555 -o frames/

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use camrelay::collector::{Collector, CollectorConfig};
use camrelay::{Config, DEFAULT_COLLECTOR_ADDR};

#[derive(Parser, Debug)]
#[command(author, version, about = "camrelay 합성 프레임 수집기")]
struct Args {
    /// 바인드 주소
    #[arg(short, long, env = "CAMRELAY_BIND", default_value = DEFAULT_COLLECTOR_ADDR)]
    bind: String,

    /// 설정 파일 (TOML, 프레임/청크 크기만 사용)
    #[arg(short, long, env = "CAMRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// 카메라 프레임 크기 (바이트)
    #[arg(long)]
    frame_size: Option<usize>,

    /// 청크 최대 크기 (바이트, 중계기와 같아야 함)
    #[arg(long)]
    max_chunk_size: Option<usize>,

    /// 합성 프레임 저장 디렉토리
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_toml_file(path)?,
        None => Config::default(),
    };
    let mut collector_config = CollectorConfig::from_config(&config);
    if let Some(size) = args.frame_size {
        collector_config.frame_size = size;
    }
    if let Some(size) = args.max_chunk_size {
        collector_config.max_chunk_size = size;
    }
    collector_config.output_dir = args.output_dir;

    if collector_config.frame_size == 0 || collector_config.max_chunk_size == 0 {
        return Err(camrelay::Error::Config("frame_size, max_chunk_size는 0보다 커야 함".into()).into());
    }

    info!(
        "합성 프레임: {} bytes, 청크: {} bytes",
        collector_config.composite_size(),
        collector_config.max_chunk_size
    );
    if let Some(dir) = &collector_config.output_dir {
        info!("저장 위치: {:?}", dir);
    }

    let frame_size = collector_config.frame_size;
    let (mut collector, mut completed) = Collector::bind(&args.bind, collector_config).await?;

    tokio::spawn(async move {
        while let Some(composite) = completed.recv().await {
            let (a, b) = composite.halves(frame_size);
            info!(
                "합성 프레임 #{} from {}: {} bytes (A {} / B {}), crc={:08X}",
                composite.sequence,
                composite.peer,
                composite.data.len(),
                a.len(),
                b.len(),
                composite.crc32
            );
        }
    });

    collector.serve().await?;
    Ok(())
}
