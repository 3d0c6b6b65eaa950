//! Circuit model merging, deck generation and characterization test synthesis
//!
//! This crate reconciles partial descriptions of a circuit into a single model, refines it
//! with extracted parasitics, and generates SPICE decks and characterization testbenches
//! from it. The outputs of the simulator are then reduced to capacitance and delay tables.
//!
//! # Usage
//!
//! Parasol is distributed as a library as well as a binary program.
//! Every stage reads and writes the model as JSON, so that stages can be chained.
//!
//! ```bash
//! # Show available commands
//! parasol help
//! # Merge structural netlists and device headers into one package
//! parasol merge -i structural:design.json -i header:cells.json -o merged.json --promote-supplies
//! # Refine a module with its extracted parasitics
//! parasol attach merged.json --module top --parasitics top.rc.json -o refined.json
//! # Generate a deck for the module and everything below it
//! parasol deck refined.json --top top -o top.sp
//! # Generate delay tests, then reduce the outputs of the simulator
//! parasol tests refined.json --top top --intent delay -d tests
//! parasol reduce tests/manifest.json -o delays.csv
//! # Characterize the input capacitance of every standard cell used by a module
//! parasol --config cells.toml tests refined.json --used-by top --intent input-capacitance -d caps
//! ```
//!
//! # Development
//!
//! ## Datastructures
//!
//! All stages operate on a single datastructure, [`circuit::Package`]: a collection of
//! modules, each with ordered ports, internal signals and instances of other modules.
//! Modules are either structural, with a body, or external, known only by their ports.
//! Resistors, capacitors and inductors are external modules with a well-known name.
//!
//! For example, here is a resistor divider:
//! ```
//! # use parasol::circuit::{Connection, Direction, Instance, Module, Parameter};
//! let mut m = Module::new("divider");
//! m.add_port("vin", 1, Direction::Input);
//! m.add_port("vout", 1, Direction::Output);
//! m.add_port("gnd", 1, Direction::None);
//! m.add_instance(
//!     Instance::new("r0", "RESISTOR")
//!         .connect("A", Connection::signal("vin"))
//!         .connect("B", Connection::signal("vout"))
//!         .with_parameter("resistance", Parameter::float(1e3)),
//! );
//! m.add_instance(
//!     Instance::new("r1", "RESISTOR")
//!         .connect("A", Connection::signal("vout"))
//!         .connect("B", Connection::signal("gnd"))
//!         .with_parameter("resistance", Parameter::float(1e3)),
//! );
//! assert!(m.check().is_ok());
//! ```
//!
//! ## Stages
//!
//! * [`merge`] combines contributions from several sources, later ones taking precedence;
//! * [`parasitics`] replaces nets of a module by their extracted RC networks;
//! * [`deck`] writes subcircuits, hierarchical or flattened;
//! * [`testbench`] generates test decks and the manifest that describes them;
//! * [`reduce`] turns simulator outputs back into measurements.

#![warn(missing_docs)]

pub mod circuit;
pub mod config;
pub mod deck;
pub mod error;
pub mod io;
pub mod logger;
pub mod merge;
pub mod parasitics;
pub mod reduce;
pub mod testbench;

pub use error::{Error, Result};
