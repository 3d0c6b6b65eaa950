//! Compute package statistics
//!
//! ```
//! # use parasol::circuit::Package;
//! # let package = Package::new("lib");
//! use parasol::circuit::stats::stats;
//! let stats = stats(&package);
//!
//! // Check that there is no resistor
//! assert_eq!(stats.nb_resistors, 0);
//!
//! // Show the statistics
//! println!("{}", stats);
//! ```

use std::fmt;

use crate::circuit::{ModuleRef, Package, Primitive};

/// Number of modules, signals and instances in a package
#[derive(Clone, Debug, Default)]
pub struct PackageStats {
    /// Number of modules with internal structure
    pub nb_modules: usize,
    /// Number of external modules
    pub nb_external: usize,
    /// Number of ports, over all modules
    pub nb_ports: usize,
    /// Number of internal signals, over all modules
    pub nb_signals: usize,
    /// Number of bits in ports and signals
    pub nb_bits: usize,
    /// Number of instances, over all modules
    pub nb_instances: usize,
    /// Number of resistor instances
    pub nb_resistors: usize,
    /// Number of capacitor instances
    pub nb_capacitors: usize,
    /// Number of inductor instances
    pub nb_inductors: usize,
    /// Number of instances of other external modules
    pub nb_external_instances: usize,
    /// Number of instances whose reference does not resolve
    pub nb_unresolved: usize,
}

impl PackageStats {
    /// Number of primitive instances
    pub fn nb_primitives(&self) -> usize {
        self.nb_resistors + self.nb_capacitors + self.nb_inductors
    }
}

impl fmt::Display for PackageStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Stats:")?;
        writeln!(f, "  Modules: {}", self.nb_modules)?;
        writeln!(f, "  External modules: {}", self.nb_external)?;
        writeln!(f, "  Ports: {}", self.nb_ports)?;
        writeln!(f, "  Signals: {} ({} bits)", self.nb_signals, self.nb_bits)?;
        writeln!(f, "  Instances: {}", self.nb_instances)?;
        if self.nb_primitives() != 0 {
            writeln!(f, "  Primitives: {}", self.nb_primitives())?;
            if self.nb_resistors != 0 {
                writeln!(f, "      resistors: {}", self.nb_resistors)?;
            }
            if self.nb_capacitors != 0 {
                writeln!(f, "      capacitors: {}", self.nb_capacitors)?;
            }
            if self.nb_inductors != 0 {
                writeln!(f, "      inductors: {}", self.nb_inductors)?;
            }
        }
        if self.nb_external_instances != 0 {
            writeln!(f, "  External cells: {}", self.nb_external_instances)?;
        }
        if self.nb_unresolved != 0 {
            writeln!(f, "  Unresolved: {}", self.nb_unresolved)?;
        }
        fmt::Result::Ok(())
    }
}

/// Compute the statistics of the package
pub fn stats(p: &Package) -> PackageStats {
    let mut ret = PackageStats {
        nb_external: p.external_modules().count(),
        ..PackageStats::default()
    };
    for m in p.modules() {
        ret.nb_modules += 1;
        ret.nb_ports += m.ports.len();
        ret.nb_signals += m.signals.len();
        ret.nb_bits += m
            .ports
            .iter()
            .map(|p| &p.signal)
            .chain(m.signals.iter())
            .map(|s| s.width as usize)
            .sum::<usize>();
        for inst in &m.instances {
            ret.nb_instances += 1;
            match p.resolve(&inst.module) {
                None => ret.nb_unresolved += 1,
                Some(ModuleRef::Module(_)) => (),
                Some(r) => match r.primitive() {
                    Some(Primitive::Resistor) => ret.nb_resistors += 1,
                    Some(Primitive::Capacitor) => ret.nb_capacitors += 1,
                    Some(Primitive::Inductor) => ret.nb_inductors += 1,
                    None => ret.nb_external_instances += 1,
                },
            }
        }
    }
    ret
}
