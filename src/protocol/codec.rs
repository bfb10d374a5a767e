use byteorder::{BigEndian, WriteBytesExt};

use super::types::{ControlIntent, Mode, RequestCode};

pub const PROTOCOL_VERSION: u8 = 0x01;

pub const CONTROL_ENABLED: u8 = 0x04;
pub const CONTROL_FMS_ATTACHED: u8 = 0x08;
pub const CONTROL_ESTOP: u8 = 0x80;
const STATUS_CODE_PRESENT: u8 = 0x20;

/// Builds the 6-byte DS→robot control frame.
///
/// Packet layout:
///   [0-1] sequence number (big-endian u16)
///   [2]   protocol version tag
///   [3]   control byte (mode bits + enable/FMS/e-stop flags)
///   [4]   request code
///   [5]   station code
pub fn encode_control(intent: &ControlIntent) -> Vec<u8> {
    let mut pkt = Vec::with_capacity(6);
    let _ = pkt.write_u16::<BigEndian>(intent.sequence);
    pkt.push(PROTOCOL_VERSION);

    let mut control = intent.mode.to_bits();
    // The enabled bit never rides along with an e-stop, whatever the intent says.
    if intent.enabled && !intent.emergency_stopped {
        control |= CONTROL_ENABLED;
    }
    if intent.fms_attached {
        control |= CONTROL_FMS_ATTACHED;
    }
    if intent.emergency_stopped {
        control |= CONTROL_ESTOP;
    }
    pkt.push(control);

    pkt.push(RequestCode::Normal.to_byte());
    pkt.push(intent.station.to_byte());
    pkt
}

/// Robot→DS status frame decoded from the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusFrame {
    pub sequence: u16,
    pub mode: Mode,
    pub emergency_stopped: bool,
    pub code_present: bool,
    pub voltage: f32,
    pub cpu_usage_pct: Option<f32>,
    pub ram_usage_pct: Option<f32>,
    pub can_utilization_pct: Option<f32>,
}

/// Parses a robot status frame.
///
/// Response layout:
///   [0-1] echoed sequence number
///   [2]   protocol version
///   [3]   control echo (0x80 = e-stop, low bits = mode)
///   [4]   robot status (0x20 = user code present)
///   [5-6] battery voltage, integer + fractional/256
///   [7+]  extended telemetry tags
///
/// Returns `None` for frames that must be discarded: shorter than 7 bytes
/// or carrying an unknown protocol version. Trailing bytes are tolerated.
pub fn decode_status(data: &[u8]) -> Option<StatusFrame> {
    if data.len() < 7 {
        return None;
    }
    if data[2] != PROTOCOL_VERSION {
        return None;
    }

    let control = data[3];
    let status = data[4];
    let mut frame = StatusFrame {
        sequence: u16::from_be_bytes([data[0], data[1]]),
        mode: Mode::from_bits(control),
        emergency_stopped: control & CONTROL_ESTOP != 0,
        code_present: status & STATUS_CODE_PRESENT != 0,
        voltage: data[5] as f32 + data[6] as f32 / 256.0,
        cpu_usage_pct: None,
        ram_usage_pct: None,
        can_utilization_pct: None,
    };

    // Extended block: [size][id][data...] tags starting at byte 8, where
    // size = len(id + data). Unknown or truncated tags are skipped.
    let mut i = 8;
    while i < data.len() {
        let size = data[i] as usize;
        if size == 0 || i + 1 + size > data.len() {
            break;
        }
        let tag = data[i + 1];
        let tag_data = &data[i + 2..i + 1 + size];
        match tag {
            0x05 => {
                if let Some(cpu) = parse_cpu(tag_data) {
                    frame.cpu_usage_pct = Some(cpu);
                }
            }
            0x06 => {
                if let Some(ram) = read_be_f32(tag_data) {
                    frame.ram_usage_pct = Some(ram);
                }
            }
            0x0E => {
                if let Some(can) = read_be_f32(tag_data) {
                    frame.can_utilization_pct = Some(can);
                }
            }
            _ => {}
        }
        i += 1 + size;
    }

    Some(frame)
}

fn read_be_f32(data: &[u8]) -> Option<f32> {
    let b = data.get(..4)?;
    Some(f32::from_bits(u32::from_be_bytes([b[0], b[1], b[2], b[3]])))
}

/// CPU tag: core count followed by one big-endian f32 per core, averaged.
fn parse_cpu(data: &[u8]) -> Option<f32> {
    let cores = *data.first()? as usize;
    if cores == 0 || data.len() < 1 + cores * 4 {
        return None;
    }
    let mut total = 0.0f32;
    for c in 0..cores {
        total += read_be_f32(&data[1 + c * 4..])?;
    }
    Some(total / cores as f32)
}
