use std::net::IpAddr;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Teleoperated,
    Autonomous,
    Test,
}

impl Mode {
    pub fn to_bits(self) -> u8 {
        match self {
            Mode::Teleoperated => 0x00,
            Mode::Autonomous => 0x02,
            Mode::Test => 0x01,
        }
    }

    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0x02 => Mode::Autonomous,
            0x01 => Mode::Test,
            _ => Mode::Teleoperated,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Mode::Teleoperated => "Teleoperated",
            Mode::Autonomous => "Autonomous",
            Mode::Test => "Test",
        }
    }
}

/// Alliance color and position, transmitted to the robot for field awareness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Station {
    Red1,
    Red2,
    Red3,
    Blue1,
    Blue2,
    Blue3,
}

impl Station {
    pub fn to_byte(self) -> u8 {
        match self {
            Station::Red1 => 0,
            Station::Red2 => 1,
            Station::Red3 => 2,
            Station::Blue1 => 3,
            Station::Blue2 => 4,
            Station::Blue3 => 5,
        }
    }
}

impl Default for Station {
    fn default() -> Self {
        Station::Red1
    }
}

/// Request codes carried in byte 4 of the control frame. Only `Normal` is
/// transmitted today; the restart/reboot codes are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestCode {
    Normal,
    RestartCode,
    Reboot,
}

impl RequestCode {
    pub fn to_byte(self) -> u8 {
        match self {
            RequestCode::Normal => 0x00,
            RequestCode::RestartCode => 0x04,
            RequestCode::Reboot => 0x08,
        }
    }
}

/// Operator intent, owned by the engine and mutated only by command entry
/// points. The send loop copies it out once per tick.
#[derive(Debug, Clone)]
pub struct ControlIntent {
    pub mode: Mode,
    pub enabled: bool,
    pub emergency_stopped: bool,
    pub fms_attached: bool,
    pub station: Station,
    pub team_number: u16,
    pub robot_address: IpAddr,
    pub address_overridden: bool,
    pub sequence: u16,
}

impl ControlIntent {
    pub fn new(team_number: u16) -> Self {
        Self {
            mode: Mode::Teleoperated,
            enabled: false,
            emergency_stopped: false,
            fms_attached: false,
            station: Station::Red1,
            team_number,
            robot_address: config::team_address(team_number),
            address_overridden: false,
            sequence: 0,
        }
    }
}

/// Telemetry observed from the robot, mutated only by the receive path and
/// the watchdog.
#[derive(Debug, Clone)]
pub struct RobotObserved {
    pub connected: bool,
    pub code_present: bool,
    pub voltage: f32,
    pub last_echoed_mode: Mode,
    pub last_echoed_estop: bool,
    pub last_packet_seq: u16,
    pub last_response_time: Option<Instant>,
    pub cpu_usage_pct: f32,
    pub ram_usage_pct: f32,
    pub can_utilization_pct: f32,
}

impl Default for RobotObserved {
    fn default() -> Self {
        Self {
            connected: false,
            code_present: false,
            voltage: 0.0,
            last_echoed_mode: Mode::Teleoperated,
            last_echoed_estop: false,
            last_packet_seq: 0,
            last_response_time: None,
            cpu_usage_pct: 0.0,
            ram_usage_pct: 0.0,
            can_utilization_pct: 0.0,
        }
    }
}

/// Consistent copy of intent and observed status, taken under one lock.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub connected: bool,
    pub enabled: bool,
    pub mode: Mode,
    pub voltage: f32,
    pub code_present: bool,
    pub emergency_stopped: bool,
    pub last_echoed_mode: Mode,
    pub last_echoed_estop: bool,
    pub can_be_enabled: bool,
    pub fms_attached: bool,
    pub station: Station,
    pub team_number: u16,
    pub robot_address: String,
    pub sequence: u16,
    pub last_packet_seq: u16,
    pub cpu_usage_pct: f32,
    pub ram_usage_pct: f32,
    pub can_utilization_pct: f32,
    pub missed_ticks: u64,
    pub malformed_frames: u64,
}

/// Joystick values forwarded from a web client. The control frame does not
/// carry them; the engine retains the latest set for future frame tags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoystickInput {
    #[serde(default)]
    pub axes: Vec<f32>,
    #[serde(default)]
    pub buttons: Vec<bool>,
    #[serde(default)]
    pub povs: Vec<i16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_bits_round_trip() {
        for mode in [Mode::Teleoperated, Mode::Autonomous, Mode::Test] {
            assert_eq!(Mode::from_bits(mode.to_bits()), mode);
        }
    }

    #[test]
    fn mode_bits_ignore_flag_bits() {
        assert_eq!(Mode::from_bits(0x80 | 0x02), Mode::Autonomous);
        assert_eq!(Mode::from_bits(0x04), Mode::Teleoperated);
    }

    #[test]
    fn station_bytes_match_wire_order() {
        let stations = [
            Station::Red1,
            Station::Red2,
            Station::Red3,
            Station::Blue1,
            Station::Blue2,
            Station::Blue3,
        ];
        for (i, s) in stations.into_iter().enumerate() {
            assert_eq!(s.to_byte(), i as u8);
        }
    }

    #[test]
    fn intent_defaults_are_safe() {
        let intent = ControlIntent::new(1234);
        assert!(!intent.enabled);
        assert!(!intent.emergency_stopped);
        assert_eq!(intent.mode, Mode::Teleoperated);
        assert_eq!(intent.robot_address.to_string(), "10.12.34.2");
    }

    #[test]
    fn joystick_input_deserializes_with_missing_fields() {
        let js: JoystickInput = serde_json::from_str(r#"{"axes":[0.5,-1.0]}"#).unwrap();
        assert_eq!(js.axes, vec![0.5, -1.0]);
        assert!(js.buttons.is_empty());
        assert!(js.povs.is_empty());
    }
}
