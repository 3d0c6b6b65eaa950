//! Merge partial module definitions from several sources into one package
//!
//! Contributions are processed in order. The first definition of a name is inserted as is;
//! a later definition of the same name replaces it entirely and emits a warning naming the
//! source of the discarded definition.
//!
//! ```
//! # use parasol::circuit::{Definition, Module};
//! use parasol::merge::{merge, Contribution};
//! let contributions = vec![
//!     Contribution::structural("top.v", Definition::Module(Module::new("inv"))),
//!     Contribution::header("cells.sp", Definition::Module(Module::new("inv"))),
//! ];
//! let (package, report) = merge("lib", contributions);
//! assert_eq!(package.nb_definitions(), 1);
//! assert_eq!(report.warnings.len(), 1);
//! ```

use std::fmt;

use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::circuit::{Connection, Definition, Direction, Package, Port, QualifiedName};
use crate::config::NetsConfig;

/// Kind of source a definition comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Structural connectivity: ports, nets and instances
    Structural,
    /// Device or header definition, used mostly for port order
    DeviceHeader,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Structural => write!(f, "structural"),
            SourceKind::DeviceHeader => write!(f, "header"),
        }
    }
}

/// Where a definition comes from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provenance {
    /// Kind of source
    pub kind: SourceKind,
    /// Name of the source, usually a file path
    pub source: String,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} source {}", self.kind, self.source)
    }
}

/// A module definition tagged with its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    /// Origin of the definition
    pub provenance: Provenance,
    /// The definition itself
    pub definition: Definition,
}

impl Contribution {
    /// Definition from a structural connectivity source
    pub fn structural(source: &str, definition: Definition) -> Contribution {
        Contribution {
            provenance: Provenance {
                kind: SourceKind::Structural,
                source: source.to_owned(),
            },
            definition,
        }
    }

    /// Definition from a device or header source
    pub fn header(source: &str, definition: Definition) -> Contribution {
        Contribution {
            provenance: Provenance {
                kind: SourceKind::DeviceHeader,
                source: source.to_owned(),
            },
            definition,
        }
    }
}

/// A definition that was replaced by a later one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeWarning {
    /// Name defined twice
    pub name: QualifiedName,
    /// Provenance of the discarded definition
    pub discarded: Provenance,
    /// Provenance of the definition that replaced it
    pub replaced_by: Provenance,
}

impl fmt::Display for MergeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "module {} from {} overwritten by {}",
            self.name, self.discarded, self.replaced_by
        )
    }
}

/// Summary of a merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Number of names defined for the first time
    pub nb_inserted: usize,
    /// Number of fill-only contributions skipped because the name was already defined
    pub nb_skipped: usize,
    /// Overwritten definitions
    pub warnings: Vec<MergeWarning>,
}

impl fmt::Display for MergeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} definitions inserted, {} overwritten, {} skipped",
            self.nb_inserted,
            self.warnings.len(),
            self.nb_skipped
        )
    }
}

/// Incremental merge of contributions into a package
pub struct Merger {
    package: Package,
    provenance: FxHashMap<QualifiedName, Provenance>,
    report: MergeReport,
}

impl Merger {
    /// Start a merge into an empty package
    pub fn new(name: &str) -> Merger {
        Merger {
            package: Package::new(name),
            provenance: FxHashMap::default(),
            report: MergeReport::default(),
        }
    }

    /// Add a contribution; a previous definition with the same name is replaced
    pub fn add(&mut self, contribution: Contribution) {
        let Contribution {
            provenance,
            definition,
        } = contribution;
        let name = definition.name().clone();
        match self.package.insert(definition) {
            None => {
                debug!("Inserted module {} from {}", name, provenance);
                self.report.nb_inserted += 1;
            }
            Some(_) => {
                let discarded = self
                    .provenance
                    .get(&name)
                    .cloned()
                    .unwrap_or_else(|| provenance.clone());
                let w = MergeWarning {
                    name: name.clone(),
                    discarded,
                    replaced_by: provenance.clone(),
                };
                warn!("Duplicate definition: {}", w);
                self.report.warnings.push(w);
            }
        }
        self.provenance.insert(name, provenance);
    }

    /// Add a contribution only if its name is not defined yet
    ///
    /// Returns whether it was inserted.
    pub fn add_if_absent(&mut self, contribution: Contribution) -> bool {
        if self.package.get(contribution.definition.name()).is_some() {
            debug!(
                "Skipped module {} from {}: already defined",
                contribution.definition.name(),
                contribution.provenance
            );
            self.report.nb_skipped += 1;
            false
        } else {
            self.add(contribution);
            true
        }
    }

    /// Add several contributions in order
    pub fn extend(&mut self, contributions: impl IntoIterator<Item = Contribution>) {
        for c in contributions {
            self.add(c);
        }
    }

    /// Provenance of the current definition of a name
    pub fn provenance(&self, name: &QualifiedName) -> Option<&Provenance> {
        self.provenance.get(name)
    }

    /// Finish the merge
    pub fn finish(self) -> (Package, MergeReport) {
        info!(
            "Merged package {} with {} definitions: {}",
            self.package.name(),
            self.package.nb_definitions(),
            self.report
        );
        (self.package, self.report)
    }
}

/// Merge a sequence of contributions into a new package
pub fn merge(
    name: &str,
    contributions: impl IntoIterator<Item = Contribution>,
) -> (Package, MergeReport) {
    let mut merger = Merger::new(name);
    merger.extend(contributions);
    merger.finish()
}

/// Make every power and ground net a port of the modules that use it
///
/// Supply nets declared as internal signals are promoted to direction-less ports at the
/// front of the port list. Instances of modules with supply ports are then connected to the
/// net of the same name in their parent, which is promoted in turn if needed.
/// Returns the number of ports created.
pub fn promote_supply_nets(package: &mut Package, nets: &NetsConfig) -> usize {
    let mut nb_promoted = 0;
    for m in package.modules_mut() {
        let (supplies, others): (Vec<_>, Vec<_>) = std::mem::take(&mut m.signals)
            .into_iter()
            .partition(|s| nets.is_supply(&s.name));
        m.signals = others;
        nb_promoted += supplies.len();
        for s in &supplies {
            debug!("Promoted supply net {} of module {}", s.name, m.name);
        }
        m.ports.splice(
            0..0,
            supplies.into_iter().map(|signal| Port {
                signal,
                direction: Direction::None,
            }),
        );
    }

    loop {
        let supply_ports: FxHashMap<QualifiedName, Vec<String>> = package
            .definitions()
            .iter()
            .map(|d| {
                let ports = d
                    .as_module_ref()
                    .ports()
                    .iter()
                    .filter(|p| nets.is_supply(p.name()))
                    .map(|p| p.name().to_owned())
                    .collect();
                (d.name().clone(), ports)
            })
            .collect();
        let mut changed = false;
        for m in package.modules_mut() {
            let mut missing = Vec::new();
            for inst in m.instances.iter_mut() {
                let Some(ports) = supply_ports.get(&inst.module) else {
                    continue;
                };
                for p in ports {
                    if !inst.connections.contains_key(p) {
                        inst.connections.insert(p.clone(), Connection::signal(p));
                        changed = true;
                        if !missing.contains(p) {
                            missing.push(p.clone());
                        }
                    }
                }
            }
            for p in missing {
                if !m.has_signal(&p) {
                    debug!("Promoted supply net {} of module {}", p, m.name);
                    m.ports.insert(0, Port::new(&p, 1, Direction::None));
                    nb_promoted += 1;
                }
            }
        }
        if !changed {
            break;
        }
    }
    if nb_promoted != 0 {
        info!("Promoted {} supply nets to ports", nb_promoted);
    }
    nb_promoted
}
