use serde::Serialize;
use thiserror::Error;

use crate::protocol::connection::DriverStation;
use crate::protocol::types::{Mode, StatusSnapshot};

/// A control-surface command. The HTTP façade parses its flat query-string
/// vocabulary into this type at the boundary and hands it to
/// [`DriverStation::dispatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Enable,
    Disable,
    SetMode(Mode),
    EmergencyStop,
    ClearEmergencyStop,
    SetTeam(u16),
    SetAddress(String),
    Status,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActionParseError {
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Team number required")]
    TeamRequired,

    #[error("Invalid team number")]
    InvalidTeam,

    #[error("IP address required")]
    AddressRequired,
}

impl Command {
    /// Parses an `action` query value plus its optional argument
    /// (`team` for `set_team`, `address` for `set_address`).
    pub fn parse(action: &str, param: Option<&str>) -> Result<Self, ActionParseError> {
        match action {
            "enable" => Ok(Self::Enable),
            "disable" => Ok(Self::Disable),
            "teleop" => Ok(Self::SetMode(Mode::Teleoperated)),
            "auto" => Ok(Self::SetMode(Mode::Autonomous)),
            "test" => Ok(Self::SetMode(Mode::Test)),
            "estop" => Ok(Self::EmergencyStop),
            "clear_estop" => Ok(Self::ClearEmergencyStop),
            "set_team" => {
                let raw = param.ok_or(ActionParseError::TeamRequired)?;
                let team = raw.parse().map_err(|_| ActionParseError::InvalidTeam)?;
                Ok(Self::SetTeam(team))
            }
            "set_address" => {
                let raw = param.ok_or(ActionParseError::AddressRequired)?;
                Ok(Self::SetAddress(raw.to_string()))
            }
            "status" => Ok(Self::Status),
            other => Err(ActionParseError::UnknownAction(other.to_string())),
        }
    }
}

/// Reply record for a dispatched command, serialized straight to the façade.
/// Always carries `success`; the remaining fields depend on the command.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActionReply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode_string: Option<String>,
    #[serde(flatten)]
    pub snapshot: Option<StatusSnapshot>,
}

impl ActionReply {
    fn with_status(status: &str) -> Self {
        Self {
            success: true,
            status: Some(status.to_string()),
            ..Default::default()
        }
    }

    fn failed(error: String) -> Self {
        Self {
            success: false,
            error: Some(error),
            ..Default::default()
        }
    }
}

impl DriverStation {
    /// Executes a control-surface command and produces the façade reply.
    /// Rejections come back as data; nothing here panics or blocks.
    pub fn dispatch(&self, cmd: Command) -> ActionReply {
        match cmd {
            Command::Enable => match self.enable() {
                Ok(()) => ActionReply::with_status("enabled"),
                Err(rejection) => ActionReply {
                    status: Some("failed".to_string()),
                    ..ActionReply::failed(rejection.to_string())
                },
            },
            Command::Disable => {
                self.disable();
                ActionReply::with_status("disabled")
            }
            Command::SetMode(mode) => {
                self.set_mode(mode);
                ActionReply {
                    success: true,
                    mode: Some(mode.name().to_lowercase()),
                    ..Default::default()
                }
            }
            Command::EmergencyStop => {
                self.emergency_stop();
                ActionReply::with_status("emergency_stopped")
            }
            Command::ClearEmergencyStop => {
                self.clear_emergency_stop();
                ActionReply::with_status("estop_cleared")
            }
            Command::SetTeam(team) => match self.set_team_number(team) {
                Ok(()) => ActionReply {
                    success: true,
                    team: Some(team),
                    ..Default::default()
                },
                Err(e) => ActionReply::failed(e.to_string()),
            },
            Command::SetAddress(address) => match self.set_robot_address(&address) {
                Ok(()) => ActionReply {
                    success: true,
                    address: Some(address),
                    ..Default::default()
                },
                Err(e) => ActionReply::failed(e.to_string()),
            },
            Command::Status => ActionReply {
                success: true,
                mode_string: Some(self.mode_string()),
                snapshot: Some(self.snapshot()),
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DsConfig;

    fn station() -> DriverStation {
        DriverStation::new(DsConfig {
            team_number: 1234,
            ..DsConfig::default()
        })
    }

    #[test]
    fn parses_the_action_vocabulary() {
        assert_eq!(Command::parse("enable", None), Ok(Command::Enable));
        assert_eq!(Command::parse("disable", None), Ok(Command::Disable));
        assert_eq!(
            Command::parse("teleop", None),
            Ok(Command::SetMode(Mode::Teleoperated))
        );
        assert_eq!(
            Command::parse("auto", None),
            Ok(Command::SetMode(Mode::Autonomous))
        );
        assert_eq!(Command::parse("test", None), Ok(Command::SetMode(Mode::Test)));
        assert_eq!(Command::parse("estop", None), Ok(Command::EmergencyStop));
        assert_eq!(
            Command::parse("clear_estop", None),
            Ok(Command::ClearEmergencyStop)
        );
        assert_eq!(
            Command::parse("set_team", Some("1234")),
            Ok(Command::SetTeam(1234))
        );
        assert_eq!(
            Command::parse("set_address", Some("10.0.0.2")),
            Ok(Command::SetAddress("10.0.0.2".to_string()))
        );
        assert_eq!(Command::parse("status", None), Ok(Command::Status));
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert_eq!(
            Command::parse("explode", None),
            Err(ActionParseError::UnknownAction("explode".to_string()))
        );
        assert_eq!(
            Command::parse("set_team", None),
            Err(ActionParseError::TeamRequired)
        );
        assert_eq!(
            Command::parse("set_team", Some("abc")),
            Err(ActionParseError::InvalidTeam)
        );
        assert_eq!(
            Command::parse("set_address", None),
            Err(ActionParseError::AddressRequired)
        );
    }

    #[test]
    fn enable_offline_reports_no_communication() {
        let ds = station();
        let reply = ds.dispatch(Command::Enable);
        assert!(!reply.success);
        assert_eq!(reply.status.as_deref(), Some("failed"));
        assert_eq!(reply.error.as_deref(), Some("No communication with robot"));
        assert!(!ds.snapshot().enabled);
    }

    #[test]
    fn mode_replies_use_lowercase_names() {
        let ds = station();
        assert_eq!(
            ds.dispatch(Command::SetMode(Mode::Teleoperated)).mode.as_deref(),
            Some("teleoperated")
        );
        assert_eq!(
            ds.dispatch(Command::SetMode(Mode::Autonomous)).mode.as_deref(),
            Some("autonomous")
        );
        assert_eq!(ds.snapshot().mode, Mode::Autonomous);
    }

    #[test]
    fn estop_round_trip_through_dispatch() {
        let ds = station();
        let reply = ds.dispatch(Command::EmergencyStop);
        assert!(reply.success);
        assert_eq!(reply.status.as_deref(), Some("emergency_stopped"));
        assert!(ds.snapshot().emergency_stopped);

        let reply = ds.dispatch(Command::ClearEmergencyStop);
        assert_eq!(reply.status.as_deref(), Some("estop_cleared"));
        assert!(!ds.snapshot().emergency_stopped);
        assert!(!ds.snapshot().enabled);
    }

    #[test]
    fn set_team_reply_carries_the_team() {
        let ds = station();
        let reply = ds.dispatch(Command::SetTeam(47));
        assert!(reply.success);
        assert_eq!(reply.team, Some(47));

        let reply = ds.dispatch(Command::SetTeam(0));
        assert!(!reply.success);
        assert!(reply.error.unwrap().contains("out of range"));
    }

    #[test]
    fn status_reply_flattens_the_snapshot() {
        let ds = station();
        let value = serde_json::to_value(ds.dispatch(Command::Status)).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["connected"], false);
        assert_eq!(value["team_number"], 1234);
        assert_eq!(value["robot_address"], "10.12.34.2");
        assert_eq!(value["mode_string"], "No Communication");
    }
}
