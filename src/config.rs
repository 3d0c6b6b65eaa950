//! Run configuration, read from an optional TOML file
//!
//! Every field has a default, so that an empty file, or no file at all, is a valid
//! configuration.
//!
//! ```
//! # use parasol::config::Config;
//! let config = Config::from_toml_str("[testbench]\nsupply_voltage = 1.2\n").unwrap();
//! assert_eq!(config.testbench.supply_voltage, 1.2);
//! assert_eq!(config.testbench.hold_voltage, 0.0);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::circuit::{Direction, Port};
use crate::Result;

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Supply net naming
    pub nets: NetsConfig,
    /// Test deck generation
    pub testbench: TestbenchConfig,
    /// Result reduction
    pub reduce: ReduceConfig,
}

impl Config {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(s: &str) -> Result<Config> {
        Ok(toml::from_str(s)?)
    }

    /// Read a configuration file
    pub fn from_file(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path)?;
        Config::from_toml_str(&content)
    }

    /// Read a configuration file if given, or use the defaults
    pub fn load(path: Option<&Path>) -> Result<Config> {
        match path {
            Some(p) => Config::from_file(p),
            None => Ok(Config::default()),
        }
    }
}

/// Names of the power and ground nets, and of the ports guessed to be outputs
///
/// Device headers often give ports without a direction. Such a port is taken as a supply if
/// its name is a power or ground net, as an output if its name is in `outputs` (ignoring
/// case), and as an input otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetsConfig {
    /// Power nets, driven at the supply voltage
    pub power: Vec<String>,
    /// Ground nets, tied to 0V
    pub ground: Vec<String>,
    /// Port names guessed to be outputs when no direction is given
    pub outputs: Vec<String>,
}

impl Default for NetsConfig {
    fn default() -> Self {
        let outputs = [
            "COUT", "COUT_N", "GCLK", "HI", "LO", "Q", "QN", "Q_N", "SUM", "X", "Y", "Z",
        ];
        NetsConfig {
            power: vec!["VDD".to_owned(), "VPWR".to_owned()],
            ground: vec!["VSS".to_owned(), "VGND".to_owned()],
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl NetsConfig {
    /// Return whether the net is a power net
    pub fn is_power(&self, name: &str) -> bool {
        self.power.iter().any(|n| n == name)
    }

    /// Return whether the net is a ground net
    pub fn is_ground(&self, name: &str) -> bool {
        self.ground.iter().any(|n| n == name)
    }

    /// Return whether the net is a supply net of either kind
    pub fn is_supply(&self, name: &str) -> bool {
        self.is_power(name) || self.is_ground(name)
    }

    /// Direction of a port, guessed from its name when it is not given
    pub fn port_direction(&self, port: &Port) -> Direction {
        if port.direction != Direction::None {
            return port.direction;
        }
        let name = port.name();
        if self.is_supply(name) {
            Direction::Inout
        } else if self.outputs.iter().any(|o| o.eq_ignore_ascii_case(name)) {
            Direction::Output
        } else {
            Direction::Input
        }
    }
}

/// Small-signal response requested from the simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    /// Admittance (Y) parameters
    #[default]
    Admittance,
    /// Impedance (Z) parameters
    Impedance,
}

/// Direction of the stimulus edge of delay tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Edge {
    /// Low to high
    #[default]
    Rising,
    /// High to low
    Falling,
}

/// Test deck settings; voltages in volts, times in seconds, frequencies in hertz
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestbenchConfig {
    /// Voltage of the power nets
    pub supply_voltage: f64,
    /// DC bias of the instrumented input in capacitance tests
    pub bias_voltage: f64,
    /// Level other inputs are held at
    pub hold_voltage: f64,
    /// Start of the AC sweep
    pub start_frequency: f64,
    /// End of the AC sweep
    pub stop_frequency: f64,
    /// Points per decade of the AC sweep
    pub points_per_decade: u32,
    /// Reference impedance of the AC port
    pub reference_impedance: f64,
    /// Requested small-signal response
    pub response: Response,
    /// Stimulus edge of delay tests
    pub edge: Edge,
    /// Transition time of the stimulus edge
    pub slew: f64,
    /// Time at which the stimulus edge starts
    pub edge_delay: f64,
    /// Transient time step
    pub step: f64,
    /// Transient stop time
    pub stop_time: f64,
    /// Load capacitance on each observed output
    pub load_capacitance: f64,
    /// Model files included in every test deck
    pub libraries: Vec<String>,
}

impl Default for TestbenchConfig {
    fn default() -> Self {
        TestbenchConfig {
            supply_voltage: 1.8,
            bias_voltage: 0.9,
            hold_voltage: 0.0,
            start_frequency: 1e3,
            stop_frequency: 1e6,
            points_per_decade: 10,
            reference_impedance: 50.0,
            response: Response::Admittance,
            edge: Edge::Rising,
            slew: 10e-12,
            edge_delay: 100e-12,
            step: 1e-12,
            stop_time: 2e-9,
            load_capacitance: 1e-15,
            libraries: Vec::new(),
        }
    }
}

/// Result reduction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReduceConfig {
    /// Relative spread of the per-point capacitance above which a fit is degraded
    pub tolerance: f64,
    /// Minimum voltage swing of an output to count as a transition
    pub min_swing: f64,
}

impl Default for ReduceConfig {
    fn default() -> Self {
        ReduceConfig {
            tolerance: 0.05,
            min_swing: 0.05,
        }
    }
}
