//! Protocol core for a web-based FRC driver station.
//!
//! Maintains the 50Hz UDP control channel with the robot controller,
//! enforces the safety invariants around enable, e-stop, and link loss,
//! and fans dashboard and log updates out to attached user interfaces.
//! The HTTP façade and web UI live outside this crate; they talk to it
//! through [`DriverStation`], [`Command`], and [`StatusFanout`].

pub mod clock;
pub mod command;
pub mod config;
pub mod error;
pub mod fanout;
pub mod protocol;
pub mod system_info;

pub use command::{ActionParseError, ActionReply, Command};
pub use config::DsConfig;
pub use error::{DsError, EnableRejection};
pub use fanout::{LogFormat, StatusFanout, WsMessage};
pub use protocol::connection::{DriverStation, DsEvent};
pub use protocol::types::{JoystickInput, Mode, Station, StatusSnapshot};
pub use system_info::SystemStats;

/// Installs the process-wide tracing subscriber used by the driver station
/// binaries. Call once at startup.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("webds_core=info,warn")
        .init();
}
