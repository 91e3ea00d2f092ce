//! OBD-II Command Definitions
//!
//! Defines the queryable diagnostic commands, their request encoding and the
//! static registry of commands known to this crate.

use crate::decode::Decoder;
use crate::mode;
use std::borrow::Cow;
use std::hash::{Hash, Hasher};

/// One queryable diagnostic parameter
#[derive(Debug, Clone)]
pub struct DiagnosticCommand {
    name: Cow<'static, str>,
    description: Cow<'static, str>,
    mode: u8,
    /// PID within the mode; 16-bit DID for mode 22, absent for mode 03/07
    pid: Option<u16>,
    decoder: Decoder,
}

impl DiagnosticCommand {
    /// Create a command from its parts
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        description: impl Into<Cow<'static, str>>,
        mode: u8,
        pid: Option<u16>,
        decoder: Decoder,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            mode,
            pid,
            decoder,
        }
    }

    /// Mode 01 (current data) command
    pub fn current(name: &'static str, description: &'static str, pid: u8, decoder: Decoder) -> Self {
        Self {
            name: Cow::Borrowed(name),
            description: Cow::Borrowed(description),
            mode: mode::CURRENT_DATA,
            pid: Some(u16::from(pid)),
            decoder,
        }
    }

    /// Mode 22 manufacturer-specific command addressed by a 16-bit DID
    pub fn manufacturer(name: impl Into<Cow<'static, str>>, did: u16, decoder: Decoder) -> Self {
        let name = name.into();
        Self {
            description: Cow::Owned(format!("Manufacturer DID {:04X}", did)),
            name,
            mode: mode::MANUFACTURER,
            pid: Some(did),
            decoder,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn mode(&self) -> u8 {
        self.mode
    }

    pub fn pid(&self) -> Option<u16> {
        self.pid
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    /// Whether this is a manufacturer-specific (mode 22) command
    pub fn is_manufacturer(&self) -> bool {
        self.mode == mode::MANUFACTURER
    }

    /// Number of PID bytes echoed in the reply header
    pub fn pid_width(&self) -> usize {
        match (self.mode, self.pid) {
            (_, None) => 0,
            (mode::MANUFACTURER, Some(_)) => 2,
            (_, Some(_)) => 1,
        }
    }

    /// Hex request string sent to the adapter, e.g. `010C`, `03`, `221234`
    pub fn request(&self) -> String {
        match (self.pid_width(), self.pid) {
            (2, Some(pid)) => format!("{:02X}{:04X}", self.mode, pid),
            (1, Some(pid)) => format!("{:02X}{:02X}", self.mode, pid),
            _ => format!("{:02X}", self.mode),
        }
    }
}

impl PartialEq for DiagnosticCommand {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.mode == other.mode && self.pid == other.pid
    }
}

impl Eq for DiagnosticCommand {}

impl Hash for DiagnosticCommand {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.mode.hash(state);
        self.pid.hash(state);
    }
}

/// Standard commands known without asking the vehicle
pub fn standard_commands() -> Vec<DiagnosticCommand> {
    use Decoder::*;
    vec![
        DiagnosticCommand::current("STATUS", "Status since DTCs cleared", 0x01, MonitorStatus),
        DiagnosticCommand::current("FUEL_STATUS", "Fuel System Status", 0x03, FuelStatus),
        DiagnosticCommand::current("ENGINE_LOAD", "Calculated Engine Load", 0x04, Percent),
        DiagnosticCommand::current("COOLANT_TEMP", "Engine Coolant Temperature", 0x05, Temperature),
        DiagnosticCommand::current("SHORT_FUEL_TRIM_1", "Short Term Fuel Trim - Bank 1", 0x06, FuelTrim),
        DiagnosticCommand::current("LONG_FUEL_TRIM_1", "Long Term Fuel Trim - Bank 1", 0x07, FuelTrim),
        DiagnosticCommand::current("INTAKE_PRESSURE", "Intake Manifold Pressure", 0x0B, Pressure),
        DiagnosticCommand::current("RPM", "Engine RPM", 0x0C, Rpm),
        DiagnosticCommand::current("SPEED", "Vehicle Speed", 0x0D, Speed),
        DiagnosticCommand::current("TIMING_ADVANCE", "Timing Advance", 0x0E, TimingAdvance),
        DiagnosticCommand::current("INTAKE_TEMP", "Intake Air Temp", 0x0F, Temperature),
        DiagnosticCommand::current("MAF", "Air Flow Rate (MAF)", 0x10, Maf),
        DiagnosticCommand::current("THROTTLE_POS", "Throttle Position", 0x11, Percent),
        DiagnosticCommand::current("O2_B1S1", "O2: Bank 1 - Sensor 1 Voltage", 0x14, O2Voltage),
        DiagnosticCommand::current("OBD_COMPLIANCE", "OBD Standards Compliance", 0x1C, ObdCompliance),
        DiagnosticCommand::current("AUX_INPUT_STATUS", "Auxiliary input status", 0x1E, AuxInput),
        DiagnosticCommand::current("RUN_TIME", "Engine Run Time", 0x1F, Seconds),
        DiagnosticCommand::current("DISTANCE_W_MIL", "Distance Traveled with MIL on", 0x21, Distance),
        DiagnosticCommand::current("FUEL_LEVEL", "Fuel Level Input", 0x2F, Percent),
        DiagnosticCommand::current("BAROMETRIC_PRESSURE", "Barometric Pressure", 0x33, Pressure),
        DiagnosticCommand::current("CONTROL_MODULE_VOLTAGE", "Control module voltage", 0x42, ModuleVoltage),
        DiagnosticCommand::current("AMBIANT_AIR_TEMP", "Ambient air temperature", 0x46, Temperature),
        DiagnosticCommand::current("OIL_TEMP", "Engine oil temperature", 0x5C, Temperature),
        DiagnosticCommand::new("GET_DTC", "Get DTCs", mode::READ_DTC, None, Dtc),
        DiagnosticCommand::new("FREEZE_DTC", "Get pending DTCs", mode::PENDING_DTC, None, Dtc),
        DiagnosticCommand::new("VIN", "Vehicle Identification Number", mode::VEHICLE_INFO, Some(0x02), Vin),
    ]
}

/// Set of commands that can be resolved by name
#[derive(Debug, Clone)]
pub struct CommandRegistry {
    commands: Vec<DiagnosticCommand>,
}

impl CommandRegistry {
    /// Registry holding the standard commands
    pub fn standard() -> Self {
        Self {
            commands: standard_commands(),
        }
    }

    /// Registry holding nothing
    pub fn empty() -> Self {
        Self {
            commands: Vec::new(),
        }
    }

    /// Add commands, replacing any existing command with the same name
    pub fn extend(&mut self, commands: impl IntoIterator<Item = DiagnosticCommand>) {
        for command in commands {
            self.commands.retain(|c| c.name() != command.name());
            self.commands.push(command);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&DiagnosticCommand> {
        self.commands.iter().find(|c| c.name() == name)
    }

    /// Find the mode 01 command for a PID
    pub fn current_data(&self, pid: u8) -> Option<&DiagnosticCommand> {
        self.commands
            .iter()
            .find(|c| c.mode() == mode::CURRENT_DATA && c.pid() == Some(u16::from(pid)))
    }

    pub fn manufacturer_commands(&self) -> impl Iterator<Item = &DiagnosticCommand> {
        self.commands.iter().filter(|c| c.is_manufacturer())
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiagnosticCommand> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
