//! Synthesize characterization test decks and their manifest
//!
//! For each target input of a module, a test deck embeds the module, biases its supplies,
//! holds its other inputs, loads its outputs and instruments the target:
//! * input capacitance: a small-signal port on a DC bias, with an AC sweep written as
//!   admittance or impedance parameters;
//! * delay: a single transient edge, with the voltage of the target and of every output
//!   printed over time.
//!
//! The module under test is either a module of the package, defined in the deck, or an
//! external cell, called from the included libraries. Ports without a direction get one
//! guessed from their name, see [`NetsConfig`].
//!
//! The manifest records which file holds which measurement, so that the reduction never
//! has to guess it from a file name.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use fxhash::FxHashSet;
use kdam::{tqdm, BarExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::circuit::{Bit, Direction, ModuleRef, Package, Parameter, QualifiedName};
use crate::config::{Edge, NetsConfig, Response, TestbenchConfig};
use crate::deck::{element_line, DeckMode, DeckWriter};
use crate::{Error, Result};

/// Measurement a test deck is generated for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestIntent {
    /// Small-signal capacitance seen at an input
    InputCapacitance,
    /// Propagation delay from an input to every output
    Delay,
}

impl TestIntent {
    /// Name used in file names and reports
    pub fn name(&self) -> &'static str {
        match self {
            TestIntent::InputCapacitance => "input-capacitance",
            TestIntent::Delay => "delay",
        }
    }

    /// Extension of the simulator output
    pub fn output_extension(&self) -> &'static str {
        match self {
            TestIntent::InputCapacitance => "ts",
            TestIntent::Delay => "prn",
        }
    }
}

impl fmt::Display for TestIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for TestIntent {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "input-capacitance" | "capacitance" => Ok(TestIntent::InputCapacitance),
            "delay" => Ok(TestIntent::Delay),
            _ => Err(format!(
                "unknown test intent {s}, expected input-capacitance or delay"
            )),
        }
    }
}

/// One generated test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Generated deck, relative to the manifest
    pub file: PathBuf,
    /// Output the simulator writes, relative to the manifest
    pub output: PathBuf,
    /// Module under test
    pub module: String,
    /// Instrumented port bit
    pub target: String,
    /// Measurement to extract
    pub intent: TestIntent,
    /// Observed output bits, for delay tests
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub observed: Vec<String>,
}

/// Record of every generated test; the entries are independent of each other
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Generated tests
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Return whether there is no entry
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A test deck and its manifest entry
#[derive(Debug, Clone)]
pub struct TestDeck {
    /// Manifest entry
    pub entry: ManifestEntry,
    /// Deck text
    pub text: String,
}

/// Stem of the files of a test: `{module}__{target}__{intent}`, restricted to `[A-Za-z0-9._-]`
pub fn file_stem(module: &str, target: &str, intent: TestIntent) -> String {
    format!("{}__{}__{}", module, target, intent.name())
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Numbers in deck syntax
fn num(v: f64) -> String {
    Parameter::float(v).to_deck_string()
}

/// Generate test decks for the modules of a package
pub struct Synthesizer<'a> {
    package: &'a Package,
    nets: &'a NetsConfig,
    config: &'a TestbenchConfig,
}

impl<'a> Synthesizer<'a> {
    /// Create a synthesizer
    pub fn new(
        package: &'a Package,
        nets: &'a NetsConfig,
        config: &'a TestbenchConfig,
    ) -> Synthesizer<'a> {
        Synthesizer {
            package,
            nets,
            config,
        }
    }

    /// Bits of the non-supply ports in a given direction, guessed if not given
    fn port_bits(&self, dut: ModuleRef<'_>, direction: Direction) -> Vec<Bit> {
        dut.ports()
            .iter()
            .filter(|p| !self.nets.is_supply(p.name()))
            .filter(|p| self.nets.port_direction(p) == direction)
            .flat_map(|p| p.signal.bits())
            .collect()
    }

    /// Default targets: the bits of every non-supply input port
    pub fn targets(&self, dut: ModuleRef<'_>) -> Vec<Bit> {
        self.port_bits(dut, Direction::Input)
    }

    /// Observed outputs: the bits of every non-supply output port
    pub fn observed(&self, dut: ModuleRef<'_>) -> Vec<Bit> {
        self.port_bits(dut, Direction::Output)
    }

    /// Select targets by name: either a port, for all its bits, or a single bit `port.index`
    fn select_targets(&self, dut: ModuleRef<'_>, names: &[String]) -> Result<Vec<Bit>> {
        if names.is_empty() {
            return Ok(self.targets(dut));
        }
        let mut ret = Vec::new();
        for name in names {
            let port_bits = dut
                .ports()
                .iter()
                .flat_map(|p| p.signal.bits())
                .filter(|b| b.signal == *name || b.to_string() == *name)
                .collect::<Vec<_>>();
            if port_bits.is_empty() {
                return Err(Error::UnknownSignal {
                    module: dut.name().to_string(),
                    signal: name.clone(),
                });
            }
            for b in port_bits {
                if !ret.contains(&b) {
                    ret.push(b);
                }
            }
        }
        Ok(ret)
    }

    /// Text of one test deck
    ///
    /// `definition` is the deck defining the module under test, empty for an external cell;
    /// `output` is the file the simulator writes.
    pub fn test_deck(
        &self,
        dut: ModuleRef<'_>,
        definition: &str,
        intent: TestIntent,
        target: &Bit,
        observed: &[Bit],
        output: &str,
    ) -> String {
        let tb = self.config;
        let mut out = format!(
            "* {} test of module {}, target {}\n",
            intent,
            dut.name(),
            target
        );
        for lib in &tb.libraries {
            out.push_str(&format!(".INCLUDE \"{lib}\"\n"));
        }
        out.push('\n');
        if definition.is_empty() {
            out.push_str(&format!(
                "* {} is defined in the included libraries\n",
                dut.name()
            ));
        } else {
            out.push_str(definition);
        }
        out.push('\n');

        let nodes: Vec<String> = dut
            .ports()
            .iter()
            .flat_map(|p| p.signal.bits())
            .map(|b| b.to_string())
            .collect();
        out.push_str(&element_line("XDUT", dut, &nodes, &BTreeMap::new()));
        out.push('\n');

        for p in dut.ports() {
            let direction = self.nets.port_direction(p);
            for b in p.signal.bits() {
                if b == *target {
                    continue;
                }
                let node = b.to_string();
                if self.nets.is_power(p.name()) {
                    out.push_str(&format!(
                        "Vsupply_{node} {node} 0 {}\n",
                        num(tb.supply_voltage)
                    ));
                } else if self.nets.is_ground(p.name()) {
                    out.push_str(&format!("Vsupply_{node} {node} 0 0\n"));
                } else if direction == Direction::Output {
                    out.push_str(&format!(
                        "Cload_{node} {node} 0 {}\n",
                        num(tb.load_capacitance)
                    ));
                } else {
                    out.push_str(&format!(
                        "Vhold_{node} {node} 0 {}\n",
                        num(tb.hold_voltage)
                    ));
                }
            }
        }

        let t = target.to_string();
        match intent {
            TestIntent::InputCapacitance => {
                out.push_str(&format!(
                    "Pstim {t} 0 port=1 z0={} DC {} AC 1\n",
                    num(tb.reference_impedance),
                    num(tb.bias_voltage)
                ));
                out.push_str(&format!(
                    ".AC DEC {} {} {}\n",
                    tb.points_per_decade,
                    num(tb.start_frequency),
                    num(tb.stop_frequency)
                ));
                let lintype = match tb.response {
                    Response::Admittance => "y",
                    Response::Impedance => "z",
                };
                out.push_str(&format!(
                    ".LIN sparcalc=0 format=touchstone2 lintype={lintype} file={output}\n"
                ));
            }
            TestIntent::Delay => {
                let (v0, v1) = match tb.edge {
                    Edge::Rising => (0.0, tb.supply_voltage),
                    Edge::Falling => (tb.supply_voltage, 0.0),
                };
                out.push_str(&format!(
                    "Vstim {t} 0 PWL(0 {} {} {} {} {})\n",
                    num(v0),
                    num(tb.edge_delay),
                    num(v0),
                    num(tb.edge_delay + tb.slew),
                    num(v1)
                ));
                out.push_str(&format!(
                    ".TRAN {} {}\n",
                    num(tb.step),
                    num(tb.stop_time)
                ));
                let mut print = format!(".PRINT TRAN FORMAT=NOINDEX FILE={output} V({t})");
                for o in observed {
                    print.push_str(&format!(" V({o})"));
                }
                out.push_str(&print);
                out.push('\n');
            }
        }
        out.push_str(".END\n");
        out
    }

    /// Generate the test decks of a module or external cell, one per target
    ///
    /// With no target names, every non-supply input is a target.
    pub fn synthesize(
        &self,
        top: &QualifiedName,
        intent: TestIntent,
        target_names: &[String],
    ) -> Result<Vec<TestDeck>> {
        let dut = self
            .package
            .get(top)
            .ok_or_else(|| Error::ModuleNotFound(top.to_string()))?
            .as_module_ref();
        let definition = match dut {
            ModuleRef::Module(_) => {
                DeckWriter::new(self.package, DeckMode::Hierarchical).module_deck(top)?
            }
            ModuleRef::External(_) => {
                if self.config.libraries.is_empty() {
                    warn!("No library included to define external module {}", top);
                }
                String::new()
            }
        };
        let targets = self.select_targets(dut, target_names)?;
        if targets.is_empty() {
            warn!("Module {} has no input to test", top);
        }
        let observed = match intent {
            TestIntent::InputCapacitance => Vec::new(),
            TestIntent::Delay => {
                let o = self.observed(dut);
                if o.is_empty() {
                    return Err(Error::NoObservableOutputs(top.to_string()));
                }
                o
            }
        };

        let mut stems = FxHashSet::default();
        let mut ret = Vec::new();
        for target in &targets {
            let stem = file_stem(&top.name, &target.to_string(), intent);
            if !stems.insert(stem.clone()) {
                return Err(Error::NameCollision(stem));
            }
            let file = PathBuf::from(format!("{stem}.sp"));
            let output = PathBuf::from(format!("{stem}.{}", intent.output_extension()));
            let text = self.test_deck(
                dut,
                &definition,
                intent,
                target,
                &observed,
                &output.to_string_lossy(),
            );
            debug!("Generated {} test for {}", intent, target);
            ret.push(TestDeck {
                entry: ManifestEntry {
                    file,
                    output,
                    module: top.to_string(),
                    target: target.to_string(),
                    intent,
                    observed: observed.iter().map(|b| b.to_string()).collect(),
                },
                text,
            });
        }
        Ok(ret)
    }

    /// Generate the test decks of every external cell used in the hierarchy below `top`
    ///
    /// A cell that cannot be tested is left out and its error returned; the others are
    /// still generated.
    pub fn synthesize_used_by(
        &self,
        top: &QualifiedName,
        intent: TestIntent,
    ) -> Result<(Vec<TestDeck>, Vec<Error>)> {
        let mut decks = Vec::new();
        let mut errors = Vec::new();
        let cells = self.package.external_modules_used_by(top)?;
        info!("Module {} uses {} external cells", top, cells.len());
        for cell in cells {
            match self.synthesize(&cell.name, intent, &[]) {
                Ok(d) => decks.extend(d),
                Err(e) => {
                    warn!("No {} test for cell {}: {}", intent, cell.name, e);
                    errors.push(e);
                }
            }
        }
        Ok((decks, errors))
    }
}

/// Write test decks to a directory and return their manifest
///
/// Two decks with the same file name are a name collision, and nothing is written.
pub fn write_tests(dir: &Path, decks: &[TestDeck]) -> Result<Manifest> {
    let mut files = FxHashSet::default();
    for deck in decks {
        if !files.insert(&deck.entry.file) {
            return Err(Error::NameCollision(deck.entry.file.to_string_lossy().into_owned()));
        }
    }
    std::fs::create_dir_all(dir)?;
    let mut progress = tqdm!(total = decks.len());
    progress.set_description("Test decks");
    let mut manifest = Manifest::default();
    for deck in decks {
        std::fs::write(dir.join(&deck.entry.file), &deck.text)?;
        manifest.entries.push(deck.entry.clone());
        progress.update(1)?;
    }
    progress.refresh()?;
    info!("Wrote {} test decks to {}", decks.len(), dir.display());
    Ok(manifest)
}
