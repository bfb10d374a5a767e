use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// UDP port control packets are sent to on the robot.
pub const DS_TO_ROBOT_PORT: u16 = 1110;
/// Local UDP port robot responses arrive on.
pub const ROBOT_TO_DS_PORT: u16 = 1150;
/// Control packets go out every 20ms (50Hz), matching the official DS.
pub const PACKET_INTERVAL: Duration = Duration::from_millis(20);
/// Silence longer than this marks the robot disconnected.
pub const WATCHDOG_TIMEOUT: Duration = Duration::from_millis(150);
/// Receive timeout so the loop can notice shutdown and run the watchdog.
pub const RECV_TIMEOUT: Duration = Duration::from_millis(100);
/// How long `stop()` waits for a loop to drain before abandoning it.
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(1);

/// Maximum lines retained in the log ring.
pub const MAX_LOG_HISTORY: usize = 500;
/// Dashboard snapshots are broadcast to subscribers at this period.
pub const DASHBOARD_INTERVAL: Duration = Duration::from_millis(50);
/// Host CPU/RAM statistics refresh period.
pub const SYSTEM_STATS_INTERVAL: Duration = Duration::from_secs(5);

pub const DEFAULT_TEAM_NUMBER: u16 = 1234;

/// Runtime settings for a [`DriverStation`](crate::DriverStation).
///
/// `Default` pulls the team number from the environment and uses the
/// standard FRC ports and timing; tests override the ports to loopback.
#[derive(Debug, Clone)]
pub struct DsConfig {
    pub team_number: u16,
    pub robot_port: u16,
    pub local_port: u16,
    pub tick_period: Duration,
    pub watchdog_timeout: Duration,
    pub recv_timeout: Duration,
}

impl Default for DsConfig {
    fn default() -> Self {
        Self {
            team_number: team_number_from_env(),
            robot_port: DS_TO_ROBOT_PORT,
            local_port: ROBOT_TO_DS_PORT,
            tick_period: PACKET_INTERVAL,
            watchdog_timeout: WATCHDOG_TIMEOUT,
            recv_timeout: RECV_TIMEOUT,
        }
    }
}

/// Team number from the `TEAM_NUMBER` environment variable.
pub fn team_number_from_env() -> u16 {
    std::env::var("TEAM_NUMBER")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_TEAM_NUMBER)
}

/// Derives the robot address for a team number: `10.TE.AM.2`.
pub fn team_address(team: u16) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, (team / 100) as u8, (team % 100) as u8, 2))
}
