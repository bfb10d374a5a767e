use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::codec;
use super::types::*;
use crate::clock::Ticker;
use crate::config::{self, DsConfig, SHUTDOWN_DEADLINE};
use crate::error::{DsError, EnableRejection};

/// Events published by the engine to interested subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum DsEvent {
    Connected { address: String },
    Disconnected,
    Status(StatusSnapshot),
}

struct DsState {
    intent: ControlIntent,
    observed: RobotObserved,
    joysticks: Vec<JoystickInput>,
    missed_ticks: u64,
    malformed_frames: u64,
}

struct Shared {
    cfg: DsConfig,
    state: Mutex<DsState>,
    events: broadcast::Sender<DsEvent>,
    shutdown: watch::Sender<bool>,
}

/// A driver station protocol engine.
///
/// Owns the UDP link to the robot and the two loops that service it: a
/// fixed 50Hz control-packet transmitter and a receive loop that parses
/// robot telemetry and runs the communications watchdog. Construction does
/// not touch the network; call [`start`](Self::start).
///
/// All methods take `&self` and are callable from any thread. Commands run
/// on the caller's context and only take the state lock briefly.
pub struct DriverStation {
    shared: Arc<Shared>,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DriverStation {
    pub fn new(cfg: DsConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        let (shutdown, _) = watch::channel(false);
        let state = DsState {
            intent: ControlIntent::new(cfg.team_number),
            observed: RobotObserved::default(),
            joysticks: Vec::new(),
            missed_ticks: 0,
            malformed_frames: 0,
        };
        Self {
            shared: Arc::new(Shared {
                cfg,
                state: Mutex::new(state),
                events,
                shutdown,
            }),
            socket: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Binds the UDP socket and launches the send and receive loops.
    pub async fn start(&self) -> Result<(), DsError> {
        {
            let mut slot = self.socket.lock();
            if slot.is_some() {
                tracing::warn!("driver station already running");
                return Ok(());
            }
            let socket = Arc::new(bind_socket(self.shared.cfg.local_port)?);
            *slot = Some(socket.clone());

            self.shared.shutdown.send_replace(false);
            let mut tasks = self.tasks.lock();
            tasks.push(tokio::spawn(send_loop(
                self.shared.clone(),
                socket.clone(),
                self.shared.shutdown.subscribe(),
            )));
            tasks.push(tokio::spawn(recv_loop(
                self.shared.clone(),
                socket,
                self.shared.shutdown.subscribe(),
            )));
        }

        let st = self.shared.state.lock();
        tracing::info!(
            "driver station started, target {}:{}, packet interval {:?}",
            st.intent.robot_address,
            self.shared.cfg.robot_port,
            self.shared.cfg.tick_period
        );
        Ok(())
    }

    /// Signals both loops, joins them within a deadline, and resets the
    /// observed status to disconnected defaults.
    pub async fn stop(&self) {
        self.shared.shutdown.send_replace(true);

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(SHUTDOWN_DEADLINE, task).await.is_err() {
                abort.abort();
            }
        }
        *self.socket.lock() = None;

        {
            let mut st = self.shared.state.lock();
            st.observed = RobotObserved::default();
            st.intent.enabled = false;
        }
        tracing::info!("driver station stopped");
    }

    /// Updates the team number and re-derives the robot address, clearing
    /// any manual override.
    pub fn set_team_number(&self, team: u16) -> Result<(), DsError> {
        if !(1..=9999).contains(&team) {
            return Err(DsError::InvalidTeam(team));
        }
        let address = config::team_address(team);
        {
            let mut st = self.shared.state.lock();
            st.intent.team_number = team;
            st.intent.robot_address = address;
            st.intent.address_overridden = false;
        }
        tracing::info!("team number set to {team}, robot at {address}");
        Ok(())
    }

    /// Overrides the derived robot address. The override persists until the
    /// next team-number change.
    pub fn set_robot_address(&self, address: &str) -> Result<(), DsError> {
        let addr: IpAddr = address
            .parse()
            .map_err(|_| DsError::InvalidAddress(address.to_string()))?;
        {
            let mut st = self.shared.state.lock();
            st.intent.robot_address = addr;
            st.intent.address_overridden = true;
        }
        tracing::info!("robot address set to {addr}");
        Ok(())
    }

    pub fn set_mode(&self, mode: Mode) {
        self.shared.state.lock().intent.mode = mode;
        tracing::info!("mode: {}", mode.name());
    }

    pub fn set_station(&self, station: Station) {
        self.shared.state.lock().intent.station = station;
    }

    pub fn set_fms_attached(&self, attached: bool) {
        self.shared.state.lock().intent.fms_attached = attached;
    }

    /// Enables the robot, provided it is communicating, running user code,
    /// and not emergency stopped.
    pub fn enable(&self) -> Result<(), EnableRejection> {
        let mode = {
            let mut st = self.shared.state.lock();
            if !st.observed.connected {
                return Err(EnableRejection::NoCommunication);
            }
            if !st.observed.code_present {
                return Err(EnableRejection::NoRobotCode);
            }
            if st.intent.emergency_stopped || st.observed.last_echoed_estop {
                return Err(EnableRejection::EmergencyStopped);
            }
            st.intent.enabled = true;
            st.intent.mode
        };
        tracing::info!("robot enabled in {} mode", mode.name());
        Ok(())
    }

    pub fn disable(&self) {
        self.shared.state.lock().intent.enabled = false;
        tracing::info!("robot disabled");
    }

    /// Latches the emergency stop and disables in the same critical section,
    /// so the next transmitted frame carries both.
    pub fn emergency_stop(&self) {
        {
            let mut st = self.shared.state.lock();
            st.intent.emergency_stopped = true;
            st.intent.enabled = false;
        }
        tracing::warn!("EMERGENCY STOP");
    }

    /// Clears the local e-stop latch. Does not re-enable.
    pub fn clear_emergency_stop(&self) {
        self.shared.state.lock().intent.emergency_stopped = false;
        tracing::info!("emergency stop cleared");
    }

    /// Latest joystick values pushed by a web client.
    pub fn update_joysticks(&self, sticks: Vec<JoystickInput>) {
        self.shared.state.lock().joysticks = sticks;
    }

    pub fn joysticks(&self) -> Vec<JoystickInput> {
        self.shared.state.lock().joysticks.clone()
    }

    /// Consistent copy of intent and observed status.
    pub fn snapshot(&self) -> StatusSnapshot {
        snapshot_locked(&self.shared.state.lock())
    }

    /// Human-readable state ladder shown in the UI header.
    pub fn mode_string(&self) -> String {
        let snap = self.snapshot();
        if snap.emergency_stopped || snap.last_echoed_estop {
            "Emergency Stopped".to_string()
        } else if !snap.connected {
            "No Communication".to_string()
        } else if !snap.code_present {
            "No Robot Code".to_string()
        } else if snap.enabled {
            format!("{} Enabled", snap.mode.name())
        } else {
            format!("{} Disabled", snap.mode.name())
        }
    }

    /// Subscribes to engine events (connection edges and status snapshots).
    pub fn subscribe(&self) -> broadcast::Receiver<DsEvent> {
        self.shared.events.subscribe()
    }

    /// Local address of the bound socket, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.lock().as_ref().and_then(|s| s.local_addr().ok())
    }
}

fn bind_socket(port: u16) -> Result<UdpSocket, DsError> {
    let socket =
        Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(DsError::BindFailed)?;
    socket.set_reuse_address(true).map_err(DsError::BindFailed)?;
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    socket.bind(&addr.into()).map_err(DsError::BindFailed)?;
    socket.set_nonblocking(true).map_err(DsError::BindFailed)?;
    UdpSocket::from_std(socket.into()).map_err(DsError::BindFailed)
}

fn snapshot_locked(st: &DsState) -> StatusSnapshot {
    // Either latch blocks enabling; the snapshot reports them separately.
    let any_estop = st.intent.emergency_stopped || st.observed.last_echoed_estop;
    StatusSnapshot {
        connected: st.observed.connected,
        enabled: st.intent.enabled,
        mode: st.intent.mode,
        voltage: st.observed.voltage,
        code_present: st.observed.code_present,
        emergency_stopped: st.intent.emergency_stopped,
        last_echoed_mode: st.observed.last_echoed_mode,
        last_echoed_estop: st.observed.last_echoed_estop,
        can_be_enabled: st.observed.connected && st.observed.code_present && !any_estop,
        fms_attached: st.intent.fms_attached,
        station: st.intent.station,
        team_number: st.intent.team_number,
        robot_address: st.intent.robot_address.to_string(),
        sequence: st.intent.sequence,
        last_packet_seq: st.observed.last_packet_seq,
        cpu_usage_pct: st.observed.cpu_usage_pct,
        ram_usage_pct: st.observed.ram_usage_pct,
        can_utilization_pct: st.observed.can_utilization_pct,
        missed_ticks: st.missed_ticks,
        malformed_frames: st.malformed_frames,
    }
}

/// Transmits one control frame per tick. The intent is copied out under the
/// lock; encoding and the send itself happen outside it.
async fn send_loop(shared: Arc<Shared>, socket: Arc<UdpSocket>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = Ticker::new(shared.cfg.tick_period);
    let mut sent: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        let (intent, dest) = {
            let mut st = shared.state.lock();
            let intent = st.intent.clone();
            st.intent.sequence = intent.sequence.wrapping_add(1);
            st.missed_ticks = ticker.missed();
            let dest = SocketAddr::new(intent.robot_address, shared.cfg.robot_port);
            (intent, dest)
        };

        let pkt = codec::encode_control(&intent);
        if let Err(e) = socket.send_to(&pkt, dest).await {
            tracing::trace!("send error: {e}");
        }

        sent += 1;
        if sent % 250 == 0 {
            tracing::debug!("sent {sent} control packets to {dest}");
        }
    }
}

/// Receives robot responses, filters by source address, and runs the
/// watchdog whenever the socket goes quiet.
async fn recv_loop(shared: Arc<Shared>, socket: Arc<UdpSocket>, mut shutdown: watch::Receiver<bool>) {
    let mut buf = [0u8; 1024];

    loop {
        let received = tokio::select! {
            r = tokio::time::timeout(shared.cfg.recv_timeout, socket.recv_from(&mut buf)) => r,
            _ = shutdown.changed() => break,
        };
        if *shutdown.borrow() {
            break;
        }

        match received {
            // Receive timeout: no traffic, see if the link has gone stale.
            Err(_) => check_watchdog(&shared),
            Ok(Ok((len, src))) => {
                let expected = shared.state.lock().intent.robot_address;
                if src.ip() != expected {
                    continue;
                }
                match codec::decode_status(&buf[..len]) {
                    Some(frame) => apply_status_frame(&shared, frame),
                    None => shared.state.lock().malformed_frames += 1,
                }
            }
            Ok(Err(e)) => {
                tracing::error!("receive error: {e}");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

fn apply_status_frame(shared: &Shared, frame: codec::StatusFrame) {
    let (was_connected, address, snapshot) = {
        let mut st = shared.state.lock();
        let was_connected = st.observed.connected;
        st.observed.connected = true;
        st.observed.code_present = frame.code_present;
        st.observed.voltage = frame.voltage;
        st.observed.last_echoed_mode = frame.mode;
        st.observed.last_echoed_estop = frame.emergency_stopped;
        st.observed.last_packet_seq = frame.sequence;
        st.observed.last_response_time = Some(Instant::now());
        if let Some(cpu) = frame.cpu_usage_pct {
            st.observed.cpu_usage_pct = cpu;
        }
        if let Some(ram) = frame.ram_usage_pct {
            st.observed.ram_usage_pct = ram;
        }
        if let Some(can) = frame.can_utilization_pct {
            st.observed.can_utilization_pct = can;
        }
        (was_connected, st.intent.robot_address, snapshot_locked(&st))
    };

    if !was_connected {
        tracing::info!("robot connected at {address}, voltage {:.1}V", snapshot.voltage);
        let _ = shared.events.send(DsEvent::Connected {
            address: address.to_string(),
        });
    }
    let _ = shared.events.send(DsEvent::Status(snapshot));
}

/// Connected → Disconnected transition. Force-disables locally so the next
/// transmitted frame carries enabled=0; the local e-stop latch is retained.
fn check_watchdog(shared: &Shared) {
    let snapshot = {
        let mut st = shared.state.lock();
        let stale = st
            .observed
            .last_response_time
            .map_or(true, |t| t.elapsed() > shared.cfg.watchdog_timeout);
        if !st.observed.connected || !stale {
            return;
        }
        st.observed.connected = false;
        st.observed.code_present = false;
        st.observed.voltage = 0.0;
        st.observed.last_echoed_estop = false;
        st.intent.enabled = false;
        snapshot_locked(&st)
    };

    tracing::warn!("lost communication with robot");
    let _ = shared.events.send(DsEvent::Disconnected);
    let _ = shared.events.send(DsEvent::Status(snapshot));
}
