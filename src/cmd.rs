//! Command line interface

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use parasol::circuit::stats::stats;
use parasol::circuit::{Definition, QualifiedName};
use parasol::config::Config;
use parasol::deck::{DeckMode, DeckWriter};
use parasol::io::{
    read_definitions, read_manifest, read_package, read_parasitics, write_manifest,
    write_package,
};
use parasol::merge::{promote_supply_nets, Contribution, Merger};
use parasol::parasitics::attach;
use parasol::reduce::{reduce, write_csv_file};
use parasol::testbench::{write_tests, Synthesizer, TestIntent};
use parasol::{Error, Result};

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log debug messages
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Command line arguments
#[derive(Subcommand)]
pub enum Commands {
    /// Show statistics about a package
    ///
    /// Will print statistics on the number of modules, signals and instances in the package,
    /// then every inconsistency and unresolved reference found.
    #[clap()]
    Show(ShowArgs),

    /// Merge contributions into a package
    ///
    /// Contributions are applied in order, and a later definition replaces an earlier one
    /// with the same name. Each input is given as KIND:PATH, where KIND is:
    ///   * structural: a netlist with module bodies
    ///   * header: device headers, giving port order
    ///   * fill: definitions only used for names not defined yet
    #[clap()]
    Merge(MergeArgs),

    /// Attach extracted parasitics to a module
    ///
    /// Each extracted net replaces the original net by its RC network. Nets that cannot be
    /// attached are reported and left unchanged.
    #[clap()]
    Attach(AttachArgs),

    /// Generate a SPICE deck
    #[clap()]
    Deck(DeckArgs),

    /// Generate characterization test decks and their manifest
    ///
    /// The module under test is either given with --top, which may name an external cell,
    /// or is every external cell used below the module given with --used-by.
    #[clap(alias = "tb")]
    Tests(TestsArgs),

    /// Reduce simulator outputs to a table of measurements
    ///
    /// Entries whose output is missing or unusable are reported as failures in the table.
    #[clap()]
    Reduce(ReduceArgs),
}

impl Cli {
    /// Run the selected command
    pub fn run(&self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;
        match &self.command {
            Commands::Show(a) => a.run(),
            Commands::Merge(a) => a.run(&config),
            Commands::Attach(a) => a.run(&config),
            Commands::Deck(a) => a.run(),
            Commands::Tests(a) => a.run(&config),
            Commands::Reduce(a) => a.run(&config),
        }
    }
}

/// Command arguments for package informations
#[derive(Args)]
pub struct ShowArgs {
    /// Package to show
    file: PathBuf,
}

impl ShowArgs {
    pub fn run(&self) -> Result<()> {
        let package = read_package(&self.file)?;
        println!("Package {}\n{}", package.name(), stats(&package));
        let mut errors = package.check();
        errors.extend(package.unresolved_references());
        if errors.is_empty() {
            println!("No inconsistency found");
        }
        for e in errors {
            println!("  {}", e);
        }
        Ok(())
    }
}

/// How an input contributes to a merge
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum InputKind {
    Structural,
    Header,
    Fill,
}

/// An input of a merge, given as KIND:PATH
#[derive(Clone, Debug)]
pub struct MergeInput {
    kind: InputKind,
    path: PathBuf,
}

impl FromStr for MergeInput {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (kind, path) = s
            .split_once(':')
            .ok_or_else(|| format!("expected KIND:PATH, got {s}"))?;
        let kind = match kind {
            "structural" => InputKind::Structural,
            "header" => InputKind::Header,
            "fill" => InputKind::Fill,
            _ => {
                return Err(format!(
                    "unknown input kind {kind}, expected structural, header or fill"
                ))
            }
        };
        Ok(MergeInput {
            kind,
            path: PathBuf::from(path),
        })
    }
}

/// Command arguments for merging
#[derive(Args)]
pub struct MergeArgs {
    /// Inputs, as KIND:PATH, in order of increasing precedence
    #[arg(short = 'i', long = "input", required = true)]
    inputs: Vec<MergeInput>,

    /// Output file for the merged package
    #[arg(short = 'o', long)]
    output: PathBuf,

    /// Name of the merged package
    #[arg(long, default_value = "merged")]
    name: String,

    /// Turn power and ground nets into ports, and connect them through the hierarchy
    #[arg(long)]
    promote_supplies: bool,
}

impl MergeArgs {
    pub fn run(&self, config: &Config) -> Result<()> {
        let mut merger = Merger::new(&self.name);
        for input in &self.inputs {
            let source = input.path.to_string_lossy();
            let definitions = read_definitions(&input.path)?;
            info!(
                "Read {} definitions from {}",
                definitions.len(),
                input.path.display()
            );
            for d in definitions {
                match input.kind {
                    InputKind::Structural => merger.add(Contribution::structural(&source, d)),
                    InputKind::Header => merger.add(Contribution::header(&source, d)),
                    InputKind::Fill => {
                        merger.add_if_absent(Contribution::header(&source, d));
                    }
                }
            }
        }
        let (mut package, report) = merger.finish();
        if self.promote_supplies {
            let nb = promote_supply_nets(&mut package, &config.nets);
            info!("Created {} supply ports", nb);
        }
        for e in package.unresolved_references() {
            warn!("{}", e);
        }
        write_package(&self.output, &package)?;
        info!("{}", report);
        Ok(())
    }
}

/// Command arguments for parasitic attachment
#[derive(Args)]
pub struct AttachArgs {
    /// Package containing the module
    file: PathBuf,

    /// Module to refine
    #[arg(short = 'm', long)]
    module: String,

    /// Extracted parasitic networks
    #[arg(short = 'p', long)]
    parasitics: PathBuf,

    /// Ground net for capacitors; defaults to the first configured ground
    #[arg(long)]
    ground: Option<String>,

    /// Output file for the refined package
    #[arg(short = 'o', long)]
    output: PathBuf,
}

impl AttachArgs {
    pub fn run(&self, config: &Config) -> Result<()> {
        let mut package = read_package(&self.file)?;
        let nets = read_parasitics(&self.parasitics)?;
        let name = QualifiedName::from(self.module.as_str());
        let ground = match &self.ground {
            Some(g) => g.clone(),
            None => config
                .nets
                .ground
                .first()
                .cloned()
                .ok_or_else(|| Error::Invalid("no ground net configured".to_owned()))?,
        };
        let attachment = attach(package.expect_module(&name)?, &nets, &ground);
        for (net, e) in &attachment.failures {
            warn!("Net {} left unchanged: {}", net, e);
        }
        info!(
            "Attached {} nets to module {}, {} rejected",
            attachment.attached.len(),
            name,
            attachment.failures.len()
        );
        package.insert(Definition::Module(attachment.module));
        let nb = promote_supply_nets(&mut package, &config.nets);
        if nb != 0 {
            info!("Created {} supply ports", nb);
        }
        write_package(&self.output, &package)
    }
}

/// Command arguments for deck generation
#[derive(Args)]
pub struct DeckArgs {
    /// Package to write
    file: PathBuf,

    /// Module to write, with everything below it
    #[arg(short = 't', long, required_unless_present = "all")]
    top: Option<String>,

    /// Write every module of the package
    #[arg(long, conflicts_with = "top")]
    all: bool,

    /// Inline the hierarchy into a single subcircuit
    #[arg(long)]
    flatten: bool,

    /// Output deck
    #[arg(short = 'o', long)]
    output: PathBuf,
}

impl DeckArgs {
    pub fn run(&self) -> Result<()> {
        let package = read_package(&self.file)?;
        let mode = if self.flatten {
            DeckMode::Flattened
        } else {
            DeckMode::Hierarchical
        };
        let writer = DeckWriter::new(&package, mode);
        let mut w = BufWriter::new(File::create(&self.output)?);
        match &self.top {
            Some(top) => {
                writer.write_module(&mut w, &QualifiedName::from(top.as_str()))?;
                info!("Wrote deck of {} to {}", top, self.output.display());
            }
            None => {
                let (deck, errors) = writer.library_deck();
                w.write_all(deck.as_bytes())?;
                info!(
                    "Wrote deck of package {} to {}, {} modules left out",
                    package.name(),
                    self.output.display(),
                    errors.len()
                );
            }
        }
        w.flush()?;
        Ok(())
    }
}

/// Command arguments for test generation
#[derive(Args)]
pub struct TestsArgs {
    /// Package containing the module
    file: PathBuf,

    /// Module or external cell under test
    #[arg(short = 't', long, required_unless_present = "used_by")]
    top: Option<String>,

    /// Test every external cell used in the hierarchy below this module
    #[arg(long, conflicts_with_all = ["top", "targets"])]
    used_by: Option<String>,

    /// Measurement to generate tests for: input-capacitance or delay
    #[arg(long)]
    intent: TestIntent,

    /// Ports or port bits to test; all non-supply inputs by default
    #[arg(long = "target")]
    targets: Vec<String>,

    /// Output directory for the test decks and the manifest
    #[arg(short = 'd', long)]
    dir: PathBuf,
}

impl TestsArgs {
    pub fn run(&self, config: &Config) -> Result<()> {
        let package = read_package(&self.file)?;
        let synthesizer = Synthesizer::new(&package, &config.nets, &config.testbench);
        let decks = match (&self.top, &self.used_by) {
            (_, Some(top)) => {
                let (decks, errors) =
                    synthesizer.synthesize_used_by(&QualifiedName::from(top.as_str()), self.intent)?;
                if !errors.is_empty() {
                    warn!("{} cells left without tests", errors.len());
                }
                decks
            }
            (Some(top), None) => synthesizer.synthesize(
                &QualifiedName::from(top.as_str()),
                self.intent,
                &self.targets,
            )?,
            (None, None) => return Err(Error::Invalid("no module to test".to_owned())),
        };
        let manifest = write_tests(&self.dir, &decks)?;
        write_manifest(&manifest_path(&self.dir), &manifest)
    }
}

fn manifest_path(dir: &Path) -> PathBuf {
    dir.join("manifest.json")
}

/// Command arguments for result reduction
#[derive(Args)]
pub struct ReduceArgs {
    /// Manifest of the tests; outputs are looked up next to it
    manifest: PathBuf,

    /// Output table
    #[arg(short = 'o', long)]
    output: PathBuf,
}

impl ReduceArgs {
    pub fn run(&self, config: &Config) -> Result<()> {
        let manifest = read_manifest(&self.manifest)?;
        let base_dir = self.manifest.parent().unwrap_or_else(|| Path::new("."));
        let reduction = reduce(&manifest, base_dir, &config.reduce)?;
        write_csv_file(&reduction, &self.output)?;
        info!("Wrote {} to {}", reduction, self.output.display());
        Ok(())
    }
}
