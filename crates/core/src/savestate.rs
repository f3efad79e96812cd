//! Save state (quick save / quick load) for the network simulation.
//!
//! Captures every register of every node plus the bus wiring using bincode
//! serialization with deflate compression.
//!
//! ## File format
//!
//! ```text
//! +------------------+
//! | Magic "SPNS"     |  4 bytes
//! +------------------+
//! | Format version   |  u32 little-endian (currently 1)
//! +------------------+
//! | Topology         |  u8 (0 = single, 1 = dual)
//! +------------------+
//! | Compressed data  |  deflate-compressed bincode payload
//! +------------------+
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::NetworkConfig;
use crate::error::NetError;
use crate::peripherals::SpiRole;
use crate::responder::ResponderKind;

/// Magic bytes identifying a spinet save state file.
const MAGIC: &[u8; 4] = b"SPNS";
/// Current save state format version.
const FORMAT_VERSION: u32 = 1;
/// Magic + version + topology
const HEADER_LEN: usize = 9;

// ─── Per-component state structs ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStateSnapshot {
    pub sampled: u8,
    pub counter: u8,
    pub pulse_width: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdcState {
    pub adon: bool,
    pub go: bool,
    pub adie: bool,
    pub adif: bool,
    pub chs: u8,
    pub adresh: u8,
    pub adresl: u8,
    pub inputs: Vec<u16>,
    pub done_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpiState {
    pub role: SpiRole,
    pub sspen: bool,
    pub sspie: bool,
    pub sspif: bool,
    pub bf: bool,
    pub wcol: bool,
    pub sspov: bool,
    pub rx_buf: u8,
    pub shift: u8,
    pub busy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PwmState {
    pub pr2: u8,
    pub prescale: u8,
    pub tmr2on: bool,
    pub pwm_mode: bool,
    pub ccpr1l: u8,
    pub dc1b: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortChangeState {
    pub grounded: u8,
    pub pull_ups: u8,
    pub iocb: u8,
    pub latch: u8,
    pub rbie: bool,
    pub rbif: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusState {
    pub select_high: Vec<bool>,
    /// (mosi, done_at, participating lines)
    pub in_flight: Option<(u8, u64, Vec<usize>)>,
    pub clock_held: bool,
    pub peak_selected: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorState {
    pub device: DeviceStateSnapshot,
    pub adc: AdcState,
    pub spi: SpiState,
    pub porta: u8,
    pub display: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponderState {
    pub kind: ResponderKind,
    pub device: DeviceStateSnapshot,
    pub spi: SpiState,
    pub portb: PortChangeState,
    pub pwm: PwmState,
    pub display: u8,
    pub gie: bool,
    pub pending_since: Option<u64>,
}

// ─── Top-level save state ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveState {
    pub config: NetworkConfig,
    pub tick: u64,
    pub iterations: u64,
    pub coordinator: CoordinatorState,
    pub responders: Vec<ResponderState>,
    pub bus: BusState,
}

// ─── Encoding ───────────────────────────────────────────────────────────────

/// Encode a save state with header and deflate compression.
pub fn to_bytes(state: &SaveState, topology_byte: u8) -> Result<Vec<u8>, NetError> {
    let payload = bincode::serialize(state)
        .map_err(|e| NetError::SaveState(format!("serialize error: {}", e)))?;

    let compressed = miniz_oxide::deflate::compress_to_vec(&payload, 6);

    let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.push(topology_byte);
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Decode a save state, verifying magic, version, and topology.
pub fn from_bytes(data: &[u8], expected_topology: u8) -> Result<SaveState, NetError> {
    if data.len() < HEADER_LEN {
        return Err(NetError::SaveState("file too small".into()));
    }
    if &data[0..4] != MAGIC {
        return Err(NetError::SaveState("invalid save state file (bad magic)".into()));
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != FORMAT_VERSION {
        return Err(NetError::SaveState(format!(
            "unsupported save state version {} (expected {})", version, FORMAT_VERSION)));
    }
    let topology = data[8];
    if topology != expected_topology {
        let names = ["single", "dual"];
        return Err(NetError::SaveState(format!(
            "topology mismatch: save={} current={}",
            names.get(topology as usize).unwrap_or(&"?"),
            names.get(expected_topology as usize).unwrap_or(&"?"))));
    }

    let decompressed = miniz_oxide::inflate::decompress_to_vec(&data[HEADER_LEN..])
        .map_err(|e| NetError::SaveState(format!("decompress error: {:?}", e)))?;

    bincode::deserialize(&decompressed)
        .map_err(|e| NetError::SaveState(format!("deserialize error: {}", e)))
}

/// Save state to file.
pub fn save_to_file(state: &SaveState, topology_byte: u8, path: &Path) -> Result<(), NetError> {
    let out = to_bytes(state, topology_byte)?;
    std::fs::write(path, &out)?;
    Ok(())
}

/// Load state from file.
pub fn load_from_file(path: &Path, expected_topology: u8) -> Result<SaveState, NetError> {
    let data = std::fs::read(path)?;
    from_bytes(&data, expected_topology)
}
