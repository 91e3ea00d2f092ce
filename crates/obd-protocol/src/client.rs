//! OBD-II Client for ELM327 Adapters
//!
//! Provides async serial communication with OBD-II adapters, plus a
//! simulated vehicle for running without hardware.

use crate::command::{CommandRegistry, DiagnosticCommand};
use crate::decode::Decoder;
use crate::elm327::{self, Reply, PROMPT};
use crate::error::ObdError;
use crate::link::{ConnectOptions, DiagnosticLink};
use crate::mode;
use crate::protocol::ObdProtocol;
use crate::response::{Payload, RawResponse};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

/// Timeout for the `ATZ` reset, which prints a banner after rebooting
const RESET_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for the first vehicle query while the adapter searches protocols
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Name used for the port of the simulated adapter
const SIMULATED_PORT: &str = "simulated";

enum Transport {
    Serial(SerialStream),
    Simulated(Simulator),
    Closed,
}

/// OBD-II client for communicating with ELM327-compatible adapters
pub struct ObdClient {
    /// Serial port device path (e.g., "/dev/ttyUSB0" or "COM3")
    port_name: Option<String>,
    options: ConnectOptions,
    registry: CommandRegistry,
    transport: Transport,
    connected: bool,
}

impl ObdClient {
    /// Open the adapter and perform the ELM327 handshake.
    ///
    /// When `options.port` is unset every serial port on the system is tried
    /// in turn; the first one that completes the handshake wins.
    pub async fn connect(options: ConnectOptions, registry: CommandRegistry) -> Result<Self, ObdError> {
        let candidates = match &options.port {
            Some(port) => vec![port.clone()],
            None => scan_ports(),
        };

        if candidates.is_empty() {
            warn!("No serial ports found");
            return Err(ObdError::NoAdapter);
        }

        let mut last_error = ObdError::NoAdapter;
        for port in candidates {
            info!("Trying OBD adapter on {}", port);
            match open_port(&port, &options).await {
                Ok((stream, protocol)) => {
                    info!("OBD adapter on {} connected using {:?}", port, protocol);
                    return Ok(Self {
                        port_name: Some(port),
                        options,
                        registry,
                        transport: Transport::Serial(stream),
                        connected: true,
                    });
                }
                Err(e) => {
                    warn!("OBD adapter on {} failed: {}", port, e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    /// Create a client backed by a simulated vehicle (no hardware required)
    pub fn simulated(registry: CommandRegistry) -> Self {
        info!("Creating simulated OBD client");
        Self {
            port_name: Some(SIMULATED_PORT.to_string()),
            options: ConnectOptions::default(),
            registry,
            transport: Transport::Simulated(Simulator::default()),
            connected: true,
        }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Request string, with the response count appended in fast mode
    fn request_for(&self, command: &DiagnosticCommand) -> String {
        let request = command.request();
        if self.options.fast && command.mode() == mode::CURRENT_DATA {
            format!("{}1", request)
        } else {
            request
        }
    }

    /// Walk the `01 00/20/40...` bitmasks and collect the mode 01 commands
    async fn supported_current_data(&mut self) -> Result<Vec<DiagnosticCommand>, ObdError> {
        let mut supported = Vec::new();
        let mut base: u8 = 0x00;

        loop {
            let data = match self.query(&support_command(mode::CURRENT_DATA, base)).await {
                Ok(RawResponse::Value(Payload::Bytes(data))) => data,
                // The first bitmask must answer, later ones are optional
                Ok(_) if base == 0 => return Err(ObdError::VehicleNotConnected),
                Err(e) if base == 0 => return Err(e),
                other => {
                    debug!("Support bitmask {:02X} unavailable: {:?}", base, other);
                    break;
                }
            };

            let pids = elm327::supported_pids(base, &data);
            for pid in &pids {
                if pid % 0x20 == 0 {
                    continue;
                }
                if let Some(command) = self.registry.current_data(*pid) {
                    supported.push(command.clone());
                }
            }

            match base.checked_add(0x20) {
                Some(next) if pids.contains(&next) => base = next,
                _ => break,
            }
        }

        Ok(supported)
    }
}

#[async_trait]
impl DiagnosticLink for ObdClient {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    async fn query(&mut self, command: &DiagnosticCommand) -> Result<RawResponse, ObdError> {
        if !self.connected {
            return Err(ObdError::AdapterNotResponding);
        }

        let request = self.request_for(command);
        let timeout = self.options.timeout;
        debug!("Querying {} [{}] ({})", command.name(), command.description(), request);

        let reply = match &mut self.transport {
            Transport::Serial(stream) => {
                let raw = transact(stream, &request, timeout).await?;
                elm327::parse_reply(command, &raw)?
            }
            Transport::Simulated(simulator) => simulator.reply(command),
            Transport::Closed => return Err(ObdError::AdapterNotResponding),
        };

        match reply {
            Reply::NoData => Ok(RawResponse::Empty),
            Reply::Data(data) => Ok(RawResponse::Value(command.decoder().decode(&data)?)),
        }
    }

    async fn supported_commands(&mut self) -> Result<Vec<DiagnosticCommand>, ObdError> {
        let mut supported = self.supported_current_data().await?;

        if !supported.is_empty() {
            for name in ["GET_DTC", "FREEZE_DTC"] {
                if let Some(command) = self.registry.lookup(name) {
                    supported.push(command.clone());
                }
            }
        }

        if let Ok(RawResponse::Value(Payload::Bytes(data))) =
            self.query(&support_command(mode::VEHICLE_INFO, 0x00)).await
        {
            if elm327::supported_pids(0x00, &data).contains(&0x02) {
                if let Some(vin) = self.registry.lookup("VIN") {
                    supported.push(vin.clone());
                }
            }
        }

        // Mode 22 has no support bitmask; probe each configured DID once
        let manufacturer: Vec<DiagnosticCommand> =
            self.registry.manufacturer_commands().cloned().collect();
        for command in manufacturer {
            match self.query(&command).await {
                Ok(RawResponse::Value(_)) => supported.push(command),
                Ok(RawResponse::Empty) => debug!("{} returned no data", command.name()),
                Err(e) => debug!("{} not supported: {}", command.name(), e),
            }
        }

        info!("Vehicle reports {} supported commands", supported.len());
        Ok(supported)
    }

    fn known_commands(&self) -> Vec<DiagnosticCommand> {
        self.registry.iter().cloned().collect()
    }

    async fn close(&mut self) {
        if matches!(self.transport, Transport::Closed) {
            return;
        }
        if let Transport::Serial(stream) = &mut self.transport {
            // Best effort: put the adapter back into its power-on state
            if let Err(e) = stream.write_all(b"ATZ\r").await {
                debug!("Reset on close failed: {}", e);
            }
        }
        info!("Disconnecting OBD client");
        self.transport = Transport::Closed;
        self.connected = false;
    }
}

/// Bitmask query for PIDs `base + 1 ..= base + 0x20`
fn support_command(mode: u8, base: u8) -> DiagnosticCommand {
    DiagnosticCommand::new(
        format!("PIDS_{:02X}_{:02X}", mode, base),
        "Supported PIDs",
        mode,
        Some(u16::from(base)),
        Decoder::Raw,
    )
}

/// Candidate serial ports, most likely adapters first
fn scan_ports() -> Vec<String> {
    let mut ports: Vec<String> = match tokio_serial::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            warn!("Serial port enumeration failed: {}", e);
            Vec::new()
        }
    };
    ports.sort_by_key(|name| {
        !["rfcomm", "ttyUSB", "ttyACM", "usbserial"]
            .iter()
            .any(|hint| name.contains(hint))
    });
    ports
}

async fn open_port(port: &str, options: &ConnectOptions) -> Result<(SerialStream, ObdProtocol), ObdError> {
    let mut stream = tokio_serial::new(port, options.baud_rate)
        .timeout(options.timeout)
        .open_native_async()?;

    transact(&mut stream, "ATZ", RESET_TIMEOUT).await?;
    let select = options.protocol.select_command();
    for command in ["ATE0", "ATL0", "ATS0", "ATH0", select.as_str()] {
        let reply = transact(&mut stream, command, options.timeout).await?;
        if !reply.contains("OK") {
            return Err(ObdError::InvalidResponse(format!(
                "{} answered {:?}",
                command,
                reply.trim()
            )));
        }
    }

    let probe = support_command(mode::CURRENT_DATA, 0x00);
    let raw = transact(&mut stream, &probe.request(), PROBE_TIMEOUT).await?;
    match elm327::parse_reply(&probe, &raw)? {
        Reply::Data(_) => {}
        Reply::NoData => return Err(ObdError::VehicleNotConnected),
    }

    let described = transact(&mut stream, "ATDPN", options.timeout).await?;
    let protocol = described
        .split(|c| c == '\r' || c == '>')
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.parse().ok())
        .unwrap_or(options.protocol);

    Ok((stream, protocol))
}

/// Send one command and read until the prompt
async fn transact(stream: &mut SerialStream, command: &str, timeout: Duration) -> Result<String, ObdError> {
    // Discard anything left over from an earlier timed-out query
    if let Err(e) = stream.clear(ClearBuffer::Input) {
        debug!("Clearing input buffer failed: {}", e);
    }

    stream.write_all(format!("{}\r", command).as_bytes()).await?;
    stream.flush().await?;

    let mut reply = Vec::with_capacity(64);
    tokio::time::timeout(timeout, read_until_prompt(stream, &mut reply))
        .await
        .map_err(|_| ObdError::Timeout(timeout.as_millis() as u64))??;

    Ok(String::from_utf8_lossy(&reply).into_owned())
}

async fn read_until_prompt(stream: &mut SerialStream, reply: &mut Vec<u8>) -> Result<(), ObdError> {
    let mut chunk = [0u8; 64];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(ObdError::AdapterNotResponding);
        }
        reply.extend_from_slice(&chunk[..n]);
        if reply.contains(&PROMPT) {
            return Ok(());
        }
    }
}

/// Names of the standard commands the simulated vehicle answers
const SIMULATED_SUPPORT: &[&str] = &[
    "STATUS",
    "FUEL_STATUS",
    "ENGINE_LOAD",
    "COOLANT_TEMP",
    "SHORT_FUEL_TRIM_1",
    "LONG_FUEL_TRIM_1",
    "RPM",
    "SPEED",
    "MAF",
    "THROTTLE_POS",
    "O2_B1S1",
    "GET_DTC",
    "FREEZE_DTC",
    "VIN",
];

/// Deterministic synthetic vehicle
#[derive(Default)]
struct Simulator {
    tick: u64,
}

impl Simulator {
    fn reply(&mut self, command: &DiagnosticCommand) -> Reply {
        self.tick += 1;

        // Support bitmasks are built from the supported command list
        if command.name().starts_with("PIDS_") {
            return self.support_bitmask(command);
        }

        if !command.is_manufacturer() && !SIMULATED_SUPPORT.contains(&command.name()) {
            return Reply::NoData;
        }

        let mut hasher = DefaultHasher::new();
        self.tick.hash(&mut hasher);
        command.name().hash(&mut hasher);
        let hash = hasher.finish();

        let data = match (command.mode(), command.pid()) {
            (mode::CURRENT_DATA, Some(pid)) => match pid {
                0x01 => vec![0x81, 0x07, 0xE5, 0x00],
                0x03 => vec![0x02, 0x00],
                // RPM: 800-3500 RPM range
                0x0C => {
                    let encoded = (800 + (hash % 2700) as u16) * 4;
                    encoded.to_be_bytes().to_vec()
                }
                // Speed: 0-120 km/h
                0x0D => vec![(hash % 120) as u8],
                // Coolant temp: 70-105°C (stored as value + 40)
                0x05 => vec![(110 + (hash % 35)) as u8],
                // Engine load / throttle: 20-80%
                0x04 | 0x11 => vec![(51 + (hash % 153)) as u8],
                // MAF: 5-50 g/s
                0x10 => (500 + (hash % 4500) as u16).to_be_bytes().to_vec(),
                // Fuel trims: -10% to +10%
                0x06 | 0x07 => vec![(115 + (hash % 26)) as u8],
                // O2 voltage: 0.1-0.9V
                0x14 => vec![(20 + (hash % 160)) as u8, 0xFF],
                _ => return Reply::NoData,
            },
            (mode::READ_DTC, _) => vec![0x01, 0x01, 0x33],
            (mode::PENDING_DTC, _) => vec![0x00],
            (mode::VEHICLE_INFO, Some(0x02)) => {
                let mut vin = vec![0x01];
                vin.extend_from_slice(b"1HGCM82633A004352");
                vin
            }
            (mode::MANUFACTURER, _) => (hash as u16).to_be_bytes().to_vec(),
            _ => return Reply::NoData,
        };

        Reply::Data(data)
    }

    fn support_bitmask(&self, command: &DiagnosticCommand) -> Reply {
        let base = command.pid().unwrap_or(0) as u8;
        let registry = CommandRegistry::standard();
        let mut mask: u32 = 0;
        for name in SIMULATED_SUPPORT {
            let Some(supported) = registry.lookup(name) else {
                continue;
            };
            if supported.mode() != command.mode() {
                continue;
            }
            if let Some(pid) = supported.pid() {
                let pid = pid as u8;
                if pid > base && pid <= base.saturating_add(0x20) {
                    mask |= 1 << (31 - (pid - base - 1));
                }
            }
        }
        Reply::Data(mask.to_be_bytes().to_vec())
    }
}
