use thiserror::Error;

/// Errors surfaced by [`DriverStation`](crate::DriverStation) operations.
#[derive(Debug, Error)]
pub enum DsError {
    #[error("failed to bind UDP socket: {0}")]
    BindFailed(#[source] std::io::Error),

    #[error("team number {0} out of range (1-9999)")]
    InvalidTeam(u16),

    #[error("invalid robot address: {0}")]
    InvalidAddress(String),
}

/// Why an enable request was refused. The intent is left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnableRejection {
    #[error("No communication with robot")]
    NoCommunication,

    #[error("Robot code not detected")]
    NoRobotCode,

    #[error("Robot is emergency stopped")]
    EmergencyStopped,
}
