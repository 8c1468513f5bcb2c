//! 시뮬레이션 카메라 주변기기
//!
//! 실제 무선 스택 없이 `PeripheralLink`를 구현.
//! 결정적 프레임 패턴을 전송 단위로 쪼개 내보내고,
//! `SimHandle`로 전원/연결 실패/프레임 잘림/링크 끊김을 주입.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::peer::{PeerAddress, PeripheralLink};
use crate::{Error, Result};

/// 시뮬레이션 카메라 정의
#[derive(Debug, Clone)]
pub struct SimCamera {
    pub address: PeerAddress,

    /// 이미지 데이터 characteristic UUID
    pub characteristic: String,

    /// 카메라가 내보내는 프레임 크기
    pub frame_size: usize,

    /// 한 번에 내보내는 최대 바이트
    pub chunk_len: usize,

    /// 프레임 패턴 시드
    pub seed: u8,
}

impl SimCamera {
    pub fn new(
        address: &str,
        characteristic: &str,
        frame_size: usize,
        chunk_len: usize,
        seed: u8,
    ) -> Self {
        Self {
            address: PeerAddress::new(address),
            characteristic: characteristic.to_string(),
            frame_size,
            chunk_len,
            seed,
        }
    }
}

/// `frame_no`번째 프레임의 `index` 위치 바이트
pub fn pattern_byte(seed: u8, frame_no: u64, index: usize) -> u8 {
    seed.wrapping_add(frame_no as u8).wrapping_add(index as u8)
}

/// 카메라가 `frame_no`번째로 내보내는 프레임 전체
pub fn expected_frame(seed: u8, frame_no: u64, frame_size: usize) -> Vec<u8> {
    (0..frame_size)
        .map(|i| pattern_byte(seed, frame_no, i))
        .collect()
}

struct CameraState {
    camera: SimCamera,
    powered: bool,

    /// 현재 연결 세대 (None = 미연결)
    connected_session: Option<u64>,
    characteristic_valid: bool,

    fail_connects: u32,
    fail_resolves: u32,

    /// 다음 프레임을 이 바이트에서 끊음
    truncate_next: Option<usize>,

    frame_no: u64,
    offset: usize,

    connect_attempts: u64,
    resolve_attempts: u64,
    frames_completed: u64,
}

impl CameraState {
    fn new(camera: SimCamera) -> Self {
        Self {
            camera,
            powered: true,
            connected_session: None,
            characteristic_valid: false,
            fail_connects: 0,
            fail_resolves: 0,
            truncate_next: None,
            frame_no: 0,
            offset: 0,
            connect_attempts: 0,
            resolve_attempts: 0,
            frames_completed: 0,
        }
    }

    fn drop_link(&mut self) {
        self.connected_session = None;
        self.characteristic_valid = false;
    }

    fn next_frame(&mut self) {
        self.frame_no += 1;
        self.offset = 0;
    }
}

struct SimState {
    cameras: HashMap<PeerAddress, CameraState>,
    drop_probability: f64,
    next_session: u64,
}

impl SimState {
    fn camera_mut(&mut self, address: &PeerAddress) -> Result<&mut CameraState> {
        self.cameras
            .get_mut(address)
            .ok_or_else(|| Error::PeerNotFound(address.to_string()))
    }
}

/// 시뮬레이션 제어 핸들 (복제 가능)
#[derive(Clone)]
pub struct SimHandle {
    inner: Arc<Mutex<SimState>>,
}

impl SimHandle {
    fn with_camera<T: Default>(&self, address: &str, f: impl FnOnce(&mut CameraState) -> T) -> T {
        let mut state = self.inner.lock();
        state
            .cameras
            .get_mut(&PeerAddress::new(address))
            .map(f)
            .unwrap_or_default()
    }

    /// 전원 차단 (연결도 끊김)
    pub fn power_off(&self, address: &str) {
        self.with_camera(address, |cam| {
            cam.powered = false;
            cam.drop_link();
        })
    }

    pub fn power_on(&self, address: &str) {
        self.with_camera(address, |cam| cam.powered = true)
    }

    /// 연결은 유지, characteristic 핸들만 무효화
    pub fn invalidate_characteristic(&self, address: &str) {
        self.with_camera(address, |cam| cam.characteristic_valid = false)
    }

    pub fn fail_next_connects(&self, address: &str, count: u32) {
        self.with_camera(address, |cam| cam.fail_connects = count)
    }

    pub fn fail_next_resolves(&self, address: &str, count: u32) {
        self.with_camera(address, |cam| cam.fail_resolves = count)
    }

    /// 다음 프레임을 `len` 바이트 후 끊음 (빈 청크 반환)
    pub fn truncate_next_frame(&self, address: &str, len: usize) {
        self.with_camera(address, |cam| cam.truncate_next = Some(len))
    }

    /// 청크마다 링크가 끊길 확률 (0.0 ~ 1.0)
    pub fn set_drop_probability(&self, probability: f64) {
        self.inner.lock().drop_probability = probability.clamp(0.0, 1.0);
    }

    pub fn connect_attempts(&self, address: &str) -> u64 {
        self.with_camera(address, |cam| cam.connect_attempts)
    }

    pub fn resolve_attempts(&self, address: &str) -> u64 {
        self.with_camera(address, |cam| cam.resolve_attempts)
    }

    pub fn frames_completed(&self, address: &str) -> u64 {
        self.with_camera(address, |cam| cam.frames_completed)
    }
}

/// 연결된 시뮬레이션 주변기기
#[derive(Debug, Clone)]
pub struct SimPeer {
    address: PeerAddress,
    session: u64,
}

#[derive(Debug, Clone)]
pub struct SimCharacteristic {
    address: PeerAddress,
    session: u64,
}

/// 시뮬레이션 주변기기 링크
pub struct SimulatedPeripheralLink {
    inner: Arc<Mutex<SimState>>,
    rng: StdRng,
}

impl SimulatedPeripheralLink {
    pub fn new(cameras: Vec<SimCamera>) -> Self {
        Self::with_rng(cameras, StdRng::from_entropy())
    }

    /// 링크 끊김 주입을 재현 가능하게
    pub fn with_seed(cameras: Vec<SimCamera>, seed: u64) -> Self {
        Self::with_rng(cameras, StdRng::seed_from_u64(seed))
    }

    fn with_rng(cameras: Vec<SimCamera>, rng: StdRng) -> Self {
        let cameras = cameras
            .into_iter()
            .map(|camera| (camera.address.clone(), CameraState::new(camera)))
            .collect();

        Self {
            inner: Arc::new(Mutex::new(SimState {
                cameras,
                drop_probability: 0.0,
                next_session: 1,
            })),
            rng,
        }
    }

    pub fn handle(&self) -> SimHandle {
        SimHandle {
            inner: self.inner.clone(),
        }
    }

    fn session_alive(&self, address: &PeerAddress, session: u64) -> bool {
        let state = self.inner.lock();
        state
            .cameras
            .get(address)
            .map(|cam| cam.powered && cam.connected_session == Some(session))
            .unwrap_or(false)
    }
}

impl PeripheralLink for SimulatedPeripheralLink {
    type Peer = SimPeer;
    type Characteristic = SimCharacteristic;

    async fn scan(&mut self, known: &[PeerAddress]) -> Result<Vec<PeerAddress>> {
        let state = self.inner.lock();
        Ok(known
            .iter()
            .filter(|address| {
                state
                    .cameras
                    .get(*address)
                    .map(|cam| cam.powered)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn connect(&mut self, address: &PeerAddress) -> Result<SimPeer> {
        let mut state = self.inner.lock();
        let session = state.next_session;
        let cam = state.camera_mut(address)?;
        cam.connect_attempts += 1;

        if !cam.powered {
            return Err(Error::LinkUnavailable(format!("{} 응답 없음", address)));
        }
        if cam.fail_connects > 0 {
            cam.fail_connects -= 1;
            return Err(Error::LinkUnavailable(format!("{} 연결 거부", address)));
        }

        cam.connected_session = Some(session);
        cam.characteristic_valid = false;
        // 새 연결은 새 프레임부터
        if cam.offset > 0 {
            cam.next_frame();
        }
        state.next_session += 1;

        Ok(SimPeer {
            address: address.clone(),
            session,
        })
    }

    async fn resolve_characteristic(&mut self, peer: &SimPeer, id: &str) -> Result<SimCharacteristic> {
        let mut state = self.inner.lock();
        let cam = state.camera_mut(&peer.address)?;
        cam.resolve_attempts += 1;

        if cam.connected_session != Some(peer.session) {
            return Err(Error::LinkUnavailable(format!("{} 연결 안 됨", peer.address)));
        }
        if cam.fail_resolves > 0 {
            cam.fail_resolves -= 1;
            return Err(Error::PeerNotFound(format!("{} characteristic {}", peer.address, id)));
        }
        if cam.camera.characteristic != id {
            return Err(Error::PeerNotFound(format!("{} characteristic {}", peer.address, id)));
        }

        cam.characteristic_valid = true;
        Ok(SimCharacteristic {
            address: peer.address.clone(),
            session: peer.session,
        })
    }

    async fn pull_chunk(&mut self, characteristic: &SimCharacteristic, buf: &mut [u8]) -> Result<usize> {
        let drop_roll: f64 = self.rng.gen();
        let mut state = self.inner.lock();
        let drop_probability = state.drop_probability;
        let cam = state.camera_mut(&characteristic.address)?;

        if !cam.powered || cam.connected_session != Some(characteristic.session) {
            return Err(Error::LinkUnavailable(format!(
                "{} 연결 끊김",
                characteristic.address
            )));
        }
        if drop_roll < drop_probability {
            debug!("{} 링크 끊김 주입", characteristic.address);
            cam.drop_link();
            return Err(Error::LinkUnavailable(format!(
                "{} 연결 끊김",
                characteristic.address
            )));
        }

        let mut frame_end = cam.camera.frame_size;
        if let Some(cut) = cam.truncate_next {
            if cam.offset >= cut {
                cam.truncate_next = None;
                cam.next_frame();
                return Ok(0);
            }
            frame_end = frame_end.min(cut);
        }

        let len = cam
            .camera
            .chunk_len
            .min(buf.len())
            .min(frame_end - cam.offset);
        for (i, byte) in buf[..len].iter_mut().enumerate() {
            *byte = pattern_byte(cam.camera.seed, cam.frame_no, cam.offset + i);
        }
        cam.offset += len;

        if cam.offset == cam.camera.frame_size {
            cam.frames_completed += 1;
            cam.next_frame();
        }

        Ok(len)
    }

    fn is_connected(&self, peer: &SimPeer) -> bool {
        self.session_alive(&peer.address, peer.session)
    }

    fn is_valid(&self, characteristic: &SimCharacteristic) -> bool {
        let state = self.inner.lock();
        state
            .cameras
            .get(&characteristic.address)
            .map(|cam| {
                cam.connected_session == Some(characteristic.session) && cam.characteristic_valid
            })
            .unwrap_or(false)
    }

    async fn disconnect(&mut self, peer: SimPeer) {
        let mut state = self.inner.lock();
        if let Ok(cam) = state.camera_mut(&peer.address) {
            if cam.connected_session == Some(peer.session) {
                cam.drop_link();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "24:0A:C4:00:00:09";

    async fn connected(frame_size: usize, chunk_len: usize) -> (SimulatedPeripheralLink, SimCharacteristic) {
        let mut link = SimulatedPeripheralLink::with_seed(
            vec![SimCamera::new(ADDR, "img", frame_size, chunk_len, 5)],
            7,
        );
        let peer = link.connect(&PeerAddress::new(ADDR)).await.unwrap();
        let characteristic = link.resolve_characteristic(&peer, "img").await.unwrap();
        (link, characteristic)
    }

    #[tokio::test]
    async fn test_streams_pattern_in_chunks() {
        let (mut link, characteristic) = connected(1000, 400).await;
        let mut buf = [0u8; 512];
        let mut frame = Vec::new();

        for expected_len in [400, 400, 200] {
            let len = link.pull_chunk(&characteristic, &mut buf).await.unwrap();
            assert_eq!(len, expected_len);
            frame.extend_from_slice(&buf[..len]);
        }

        assert_eq!(frame, expected_frame(5, 0, 1000));
        assert_eq!(link.handle().frames_completed(ADDR), 1);
    }

    #[tokio::test]
    async fn test_truncated_frame_yields_empty_chunk() {
        let (mut link, characteristic) = connected(1000, 400).await;
        link.handle().truncate_next_frame(ADDR, 500);
        let mut buf = [0u8; 512];

        assert_eq!(link.pull_chunk(&characteristic, &mut buf).await.unwrap(), 400);
        assert_eq!(link.pull_chunk(&characteristic, &mut buf).await.unwrap(), 100);
        assert_eq!(link.pull_chunk(&characteristic, &mut buf).await.unwrap(), 0);

        // 다음 프레임은 정상
        assert_eq!(link.pull_chunk(&characteristic, &mut buf).await.unwrap(), 400);
        assert_eq!(buf[0], pattern_byte(5, 1, 0));
    }

    #[tokio::test]
    async fn test_drop_probability_disconnects() {
        let (mut link, characteristic) = connected(1000, 400).await;
        link.handle().set_drop_probability(1.0);
        let mut buf = [0u8; 512];

        assert!(link.pull_chunk(&characteristic, &mut buf).await.is_err());
        assert!(!link.is_valid(&characteristic));
    }

    #[tokio::test]
    async fn test_scan_reports_powered_known_cameras() {
        let mut link = SimulatedPeripheralLink::new(vec![
            SimCamera::new("aa", "img", 10, 10, 0),
            SimCamera::new("bb", "img", 10, 10, 0),
        ]);
        link.handle().power_off("bb");

        let found = link
            .scan(&[PeerAddress::new("aa"), PeerAddress::new("bb"), PeerAddress::new("cc")])
            .await
            .unwrap();
        assert_eq!(found, vec![PeerAddress::new("aa")]);
    }
}
