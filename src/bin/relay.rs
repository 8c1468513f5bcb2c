//! camrelay 중계기
//!
//! 카메라 두 대에서 프레임을 받아 합성한 뒤 수집기로 청크 단위 ACK 전송
//! - 무선 스택은 시뮬레이션 주변기기 사용
//! - 설정 파일(TOML) + 명령행 옵션으로 덮어쓰기
//!
//! 사용법:
//!   cargo run --release --bin camrelay-relay -- [OPTIONS]
//!
//! 예시:
//!   # 기본 수집기(127.0.0.1:5555)로 중계
//!   cargo run --release --bin camrelay-relay
//!
//!   # 설정 파일 + 링크 끊김 주입
//!   cargo run --release --bin camrelay-relay -- -c relay.toml --sim-drop-probability 0.01

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use camrelay::config::StaleFramePolicy;
use camrelay::{Config, Relay, SimCamera, SimulatedPeripheralLink, TcpConnector};

#[derive(Parser, Debug)]
#[command(author, version, about = "카메라 프레임 중계기 (주변기기 → TCP 수집기)")]
struct Args {
    /// 설정 파일 (TOML)
    #[arg(short, long, env = "CAMRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// 수집기 주소 (host:port)
    #[arg(long, env = "CAMRELAY_COLLECTOR")]
    collector: Option<String>,

    /// 실행할 사이클 수 (생략하면 Ctrl-C까지)
    #[arg(short = 'n', long)]
    cycles: Option<u64>,

    /// 카메라 프레임 크기 (바이트)
    #[arg(long)]
    frame_size: Option<usize>,

    /// 네트워크 청크 최대 크기 (바이트)
    #[arg(long)]
    max_chunk_size: Option<usize>,

    /// ACK 대기 타임아웃 (밀리초)
    #[arg(long)]
    ack_timeout_ms: Option<u64>,

    /// 부분 프레임이 있으면 송신 건너뜀
    #[arg(long)]
    skip_stale: bool,

    /// 통계 요약 로그 주기 (사이클)
    #[arg(long)]
    stats_every: Option<u64>,

    /// 시뮬레이션: 청크마다 링크 끊김 확률
    #[arg(long, default_value_t = 0.0)]
    sim_drop_probability: f64,

    /// 시뮬레이션: 링크 끊김 난수 시드
    #[arg(long)]
    sim_seed: Option<u64>,
}

impl Args {
    fn into_config(self) -> Result<(Config, Option<u64>, f64, Option<u64>), camrelay::Error> {
        let mut config = match &self.config {
            Some(path) => Config::from_toml_file(path)?,
            None => Config::default(),
        };

        if let Some(addr) = self.collector {
            config.collector_addr = addr;
        }
        if let Some(size) = self.frame_size {
            config.frame_size = size;
        }
        if let Some(size) = self.max_chunk_size {
            config.max_chunk_size = size;
        }
        if let Some(ms) = self.ack_timeout_ms {
            config.ack_timeout_ms = ms;
        }
        if let Some(every) = self.stats_every {
            config.stats_every = every;
        }
        if self.skip_stale {
            config.stale_frame_policy = StaleFramePolicy::Skip;
        }
        config.validate()?;

        Ok((config, self.cycles, self.sim_drop_probability, self.sim_seed))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let (config, cycles, drop_probability, sim_seed) = Args::parse().into_config()?;

    info!("camrelay 중계기 시작");
    info!("수집기: {}", config.collector_addr);
    info!(
        "프레임: {} bytes x {}, 청크: {} bytes ({}개/합성), ACK 타임아웃: {}ms",
        config.frame_size,
        config.peers.len(),
        config.max_chunk_size,
        config.chunks_per_composite(),
        config.ack_timeout_ms
    );

    let cameras: Vec<SimCamera> = config
        .peers
        .iter()
        .enumerate()
        .map(|(i, peer)| {
            info!("카메라 {}: {} ({})", peer.label, peer.address, peer.characteristic);
            SimCamera::new(
                &peer.address,
                &peer.characteristic,
                config.frame_size,
                config.transfer_unit,
                (i as u8).wrapping_mul(0x40),
            )
        })
        .collect();

    let link = match sim_seed {
        Some(seed) => SimulatedPeripheralLink::with_seed(cameras, seed),
        None => SimulatedPeripheralLink::new(cameras),
    };
    link.handle().set_drop_probability(drop_probability);

    let connector = TcpConnector::from_config(&config);
    let mut relay = Relay::new(config, link, connector)?;

    let stop = relay.stop_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("종료 요청, 현재 사이클 후 멈춤");
                stop.stop();
            }
            Err(e) => warn!("시그널 대기 실패: {}", e),
        }
    });

    let stats = match cycles {
        Some(n) => relay.run_cycles(n).await,
        None => relay.run().await,
    };

    info!("Final: {}", stats.summary());
    info!("전달 비율: {:.1}%", stats.delivery_ratio() * 100.0);

    Ok(())
}
