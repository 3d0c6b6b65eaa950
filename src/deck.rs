//! Generate simulator decks from the circuit model
//!
//! Modules become `.SUBCKT` definitions; instances become subcircuit calls, or native
//! elements for the resistor, capacitor and inductor primitives. In flattened mode, the
//! hierarchy is inlined down to its external leaves.
//!
//! ```
//! # use parasol::circuit::generators::testcases;
//! # use parasol::circuit::QualifiedName;
//! use parasol::deck::{DeckMode, DeckWriter};
//! let package = testcases::rc_line(2);
//! let deck = DeckWriter::new(&package, DeckMode::Hierarchical)
//!     .module_deck(&QualifiedName::local("rc"))
//!     .unwrap();
//! assert!(deck.contains("Rr0 in n1 100"));
//! ```

mod flatten;

use std::collections::BTreeMap;
use std::io::Write;

use fxhash::FxHashSet;
use itertools::Itertools;
use tracing::{debug, warn};

pub use flatten::{flatten, FlatInstance};

use crate::circuit::{
    Bit, Instance, Module, ModuleRef, Package, Parameter, Port, Primitive, QualifiedName, Scope,
};
use crate::{Error, Result};

/// How instances of modules are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeckMode {
    /// One subcircuit per module, called by its instances
    #[default]
    Hierarchical,
    /// A single subcircuit with every module instance inlined
    Flattened,
}

/// Bits connected to the ports of an instance, in the positional order of `ports`
///
/// Every port must be connected exactly once with a connection of its width, and every
/// connection must name a declared port.
pub fn ordered_bits(parent: &Module, instance: &Instance, ports: &[Port]) -> Result<Vec<Bit>> {
    let mismatch = |reason: String| Error::PortMismatch {
        module: parent.name.to_string(),
        instance: instance.name.clone(),
        reason,
    };
    if let Some(extra) = instance
        .connections
        .keys()
        .find(|c| !ports.iter().any(|p| p.name() == c.as_str()))
    {
        return Err(mismatch(format!("no port named {extra}")));
    }
    let scope = Scope::new(parent);
    let mut ret = Vec::new();
    for port in ports {
        let connection = instance
            .connections
            .get(port.name())
            .ok_or_else(|| mismatch(format!("port {} is not connected", port.name())))?;
        let bits = scope.bits(connection)?;
        if bits.len() != port.width() as usize {
            return Err(Error::WidthMismatch {
                context: format!(
                    "port {} of instance {} in module {}",
                    port.name(),
                    instance.name,
                    parent.name
                ),
                expected: port.width(),
                actual: bits.len() as u32,
            });
        }
        ret.extend(bits);
    }
    Ok(ret)
}

/// Name of the subcircuit implementing a module
pub fn subckt_name(name: &QualifiedName) -> &str {
    &name.name
}

/// Name of the element emitted for an instance: its name prefixed with the element letter,
/// unless it already starts with it
pub(crate) fn instance_element_name(name: &str, reference: ModuleRef<'_>) -> String {
    let letter = reference.primitive().map(|p| p.letter()).unwrap_or('X');
    if name.starts_with(letter) {
        name.to_owned()
    } else {
        format!("{letter}{name}")
    }
}

/// Element names already used in a subcircuit; the simulator ignores case
#[derive(Default)]
struct ElementNames(FxHashSet<String>);

impl ElementNames {
    fn claim(&mut self, element: &str, module: &Module) -> Result<()> {
        if self.0.insert(element.to_ascii_lowercase()) {
            Ok(())
        } else {
            Err(Error::NameCollision(format!(
                "element {} appears twice in subcircuit {}",
                element,
                subckt_name(&module.name)
            )))
        }
    }
}

fn format_parameters(parameters: &BTreeMap<String, Parameter>) -> String {
    parameters
        .iter()
        .map(|(k, v)| format!("{}={}", k, v.to_deck_string()))
        .join(" ")
}

/// One element line for an instance with resolved nodes
///
/// `element` is the emitted name, with its letter.
pub(crate) fn element_line(
    element: &str,
    reference: ModuleRef<'_>,
    nodes: &[String],
    parameters: &BTreeMap<String, Parameter>,
) -> String {
    if let Some(primitive) = reference.primitive() {
        let mut params = parameters.clone();
        let value = params
            .remove(primitive.value_parameter())
            .unwrap_or_else(|| Parameter::float(0.0));
        let mut line = format!(
            "{} {} {}",
            element,
            nodes.join(" "),
            value.to_deck_string()
        );
        if !params.is_empty() {
            line.push(' ');
            line.push_str(&format_parameters(&params));
        }
        if primitive == Primitive::Capacitor && value.as_f64() == Some(0.0) {
            return format!("* {line} [skipped: zero capacitance]");
        }
        return line;
    }
    let mut params = BTreeMap::new();
    if let ModuleRef::External(m) = reference {
        params.extend(m.parameters.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    params.extend(parameters.iter().map(|(k, v)| (k.clone(), v.clone())));
    let mut line = element.to_owned();
    for n in nodes {
        line.push(' ');
        line.push_str(n);
    }
    line.push(' ');
    line.push_str(subckt_name(reference.name()));
    if !params.is_empty() {
        line.push(' ');
        line.push_str(&format_parameters(&params));
    }
    line
}

/// Serialize modules of a package into simulator decks
pub struct DeckWriter<'a> {
    package: &'a Package,
    mode: DeckMode,
}

impl<'a> DeckWriter<'a> {
    /// Create a writer for a package
    pub fn new(package: &'a Package, mode: DeckMode) -> DeckWriter<'a> {
        DeckWriter { package, mode }
    }

    fn subckt_header(&self, out: &mut String, module: &Module) {
        out.push_str(&format!(".SUBCKT {}\n", subckt_name(&module.name)));
        let ports = module
            .ports
            .iter()
            .flat_map(|p| p.signal.bits())
            .map(|b| b.to_string())
            .join(" ");
        if !ports.is_empty() {
            out.push_str(&format!("+ {ports}\n"));
        }
        if !module.parameters.is_empty() {
            out.push_str(&format!(
                "+ PARAMS: {}\n",
                format_parameters(&module.parameters)
            ));
        }
    }

    /// Subcircuit definition of a single module, calling its children by name
    pub fn subckt(&self, module: &Module) -> Result<String> {
        let mut out = String::new();
        self.subckt_header(&mut out, module);
        let mut names = ElementNames::default();
        for inst in &module.instances {
            let reference = self.package.resolve_instance(module, inst)?;
            let nodes: Vec<String> = ordered_bits(module, inst, reference.ports())?
                .iter()
                .map(|b| b.to_string())
                .collect();
            let element = instance_element_name(&inst.name, reference);
            names.claim(&element, module)?;
            out.push_str(&element_line(
                &element,
                reference,
                &nodes,
                &inst.parameters,
            ));
            out.push('\n');
        }
        out.push_str(".ENDS\n");
        Ok(out)
    }

    /// Flattened subcircuit definition of a module
    pub fn flat_subckt(&self, module: &Module) -> Result<String> {
        let mut out = String::new();
        self.subckt_header(&mut out, module);
        let mut names = ElementNames::default();
        for inst in flatten(self.package, &module.name)? {
            let reference = self
                .package
                .resolve(&inst.module)
                .ok_or_else(|| Error::ModuleNotFound(inst.module.to_string()))?;
            let element = instance_element_name(&inst.path, reference);
            names.claim(&element, module)?;
            out.push_str(&element_line(
                &element,
                reference,
                &inst.nodes,
                &inst.parameters,
            ));
            out.push('\n');
        }
        out.push_str(".ENDS\n");
        Ok(out)
    }

    /// Complete deck for a module
    ///
    /// In hierarchical mode, every module below it is defined first, children before
    /// parents. External modules are not defined: they come from included libraries.
    /// Any error in the hierarchy aborts the whole deck.
    pub fn module_deck(&self, name: &QualifiedName) -> Result<String> {
        let mut out = String::new();
        match self.mode {
            DeckMode::Hierarchical => {
                let modules = self.package.hierarchy(name)?;
                out.push_str(&format!(
                    "* {} ({} subcircuits)\n",
                    name,
                    modules.len()
                ));
                for m in modules {
                    out.push('\n');
                    out.push_str(&self.subckt(m)?);
                }
            }
            DeckMode::Flattened => {
                let module = self.package.expect_module(name)?;
                out.push_str(&format!("* {} (flattened)\n\n", name));
                out.push_str(&self.flat_subckt(module)?);
            }
        }
        debug!("Generated deck for module {}", name);
        Ok(out)
    }

    /// Write the deck of a module
    pub fn write_module<W: Write>(&self, w: &mut W, name: &QualifiedName) -> Result<()> {
        let deck = self.module_deck(name)?;
        w.write_all(deck.as_bytes())?;
        Ok(())
    }

    /// Deck defining every module of the package
    ///
    /// A module that fails to generate is left out and its error returned; the others are
    /// still generated.
    pub fn library_deck(&self) -> (String, Vec<Error>) {
        let mut out = format!("* library {}\n", self.package.name());
        let mut errors = Vec::new();
        for m in self.package.modules() {
            let res = match self.mode {
                DeckMode::Hierarchical => self.subckt(m),
                DeckMode::Flattened => self.flat_subckt(m),
            };
            match res {
                Ok(s) => {
                    out.push('\n');
                    out.push_str(&s);
                }
                Err(e) => {
                    warn!("Module {} left out of the deck: {}", m.name, e);
                    errors.push(e);
                }
            }
        }
        (out, errors)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::SmallRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::circuit::generators::{random, testcases};
    use crate::circuit::{Connection, Definition, Direction, ExternalModule, SiPrefix};

    #[test]
    fn test_rc_line_deck() {
        let p = testcases::rc_line(2);
        let deck = DeckWriter::new(&p, DeckMode::Hierarchical)
            .module_deck(&QualifiedName::local("rc"))
            .unwrap();
        let expected = "* rc (1 subcircuits)

.SUBCKT rc
+ in out gnd
Rr0 in n1 100
Cc0 n1 gnd 2e-15
Rr1 n1 out 100
Cc1 out gnd 2e-15
.ENDS
";
        assert_eq!(deck, expected);
    }

    #[test]
    fn test_hierarchical_chain() {
        let p = testcases::buffer_chain(2);
        let deck = DeckWriter::new(&p, DeckMode::Hierarchical)
            .module_deck(&QualifiedName::local("chain"))
            .unwrap();
        let buf = deck.find(".SUBCKT BUF").unwrap();
        let chain = deck.find(".SUBCKT chain").unwrap();
        assert!(buf < chain);
        assert!(!deck.contains(".SUBCKT INV"));
        assert!(deck.contains("Xx0 A VGND VPWR mid INV\n"));
        assert!(deck.contains("Xb1 n1 y VPWR VGND BUF\n"));
    }

    #[test]
    fn test_flattened_chain() {
        let p = testcases::buffer_chain(2);
        let deck = DeckWriter::new(&p, DeckMode::Flattened)
            .module_deck(&QualifiedName::local("chain"))
            .unwrap();
        assert!(!deck.contains("BUF"));
        assert!(deck.contains("Xb0.x1 b0.mid VGND VPWR n1 INV\n"));
        assert_eq!(deck.matches(".SUBCKT").count(), 1);
    }

    #[test]
    fn test_primitive_parameters() {
        let mut m = Module::new("top");
        m.add_port("a", 1, Direction::Inout);
        m.add_port("b", 1, Direction::Inout);
        m.add_instance(
            Instance::new("c_zero", "CAPACITOR")
                .connect("A", Connection::signal("a"))
                .connect("B", Connection::signal("b")),
        );
        m.add_instance(
            Instance::new("load", "CAPACITOR")
                .connect("A", Connection::signal("a"))
                .connect("B", Connection::signal("b"))
                .with_parameter("capacitance", Parameter::int(5).with_prefix(SiPrefix::Pico)),
        );
        let mut cell = ExternalModule::new("cells::nfet");
        cell.add_port("d", 1, Direction::Inout);
        cell.add_port("g", 1, Direction::Input);
        cell.parameters.insert("l".to_owned(), Parameter::float(0.15));
        cell.parameters.insert("w".to_owned(), Parameter::float(1.0));
        m.add_instance(
            Instance::new("m0", "cells::nfet")
                .connect("g", Connection::signal("b"))
                .connect("d", Connection::signal("a"))
                .with_parameter("w", Parameter::literal("{2*wmin}"))
                .with_parameter("model", Parameter::string("nch")),
        );
        let mut p = Package::new("lib");
        p.insert(Definition::External(cell));
        p.insert(Definition::Module(m));
        let deck = DeckWriter::new(&p, DeckMode::Hierarchical)
            .module_deck(&QualifiedName::local("top"))
            .unwrap();
        assert!(deck.contains("* Cc_zero a b 0 [skipped: zero capacitance]\n"));
        assert!(deck.contains("Cload a b 5e-12\n"));
        assert!(deck.contains("Xm0 a b nfet l=0.15 model=\"nch\" w={2*wmin}\n"));
    }

    #[test]
    fn test_element_name_collision() {
        let mut m = Module::new("top");
        m.add_port("a", 1, Direction::Inout);
        m.add_port("b", 1, Direction::Inout);
        for name in ["Rx", "x"] {
            m.add_instance(
                Instance::new(name, "RESISTOR")
                    .connect("A", Connection::signal("a"))
                    .connect("B", Connection::signal("b"))
                    .with_parameter("resistance", Parameter::int(1)),
            );
        }
        let mut p = Package::new("lib");
        p.insert(Definition::Module(m.clone()));
        let writer = DeckWriter::new(&p, DeckMode::Hierarchical);
        let res = writer.module_deck(&QualifiedName::local("top"));
        assert!(matches!(res, Err(Error::NameCollision(msg)) if msg.contains("Rx")));

        // Names differing only by case clash too
        m.instances[0].name = "rx".to_owned();
        p.insert(Definition::Module(m.clone()));
        let writer = DeckWriter::new(&p, DeckMode::Hierarchical);
        assert!(writer.module_deck(&QualifiedName::local("top")).is_err());

        // Same name for different element kinds is fine
        m.instances[0].module = QualifiedName::local("CAPACITOR");
        m.instances[0].parameters.clear();
        m.instances[0]
            .parameters
            .insert("capacitance".to_owned(), Parameter::float(1e-15));
        p.insert(Definition::Module(m));
        let deck = DeckWriter::new(&p, DeckMode::Hierarchical)
            .module_deck(&QualifiedName::local("top"))
            .unwrap();
        assert!(deck.contains("Crx a b 1e-15\n"));
        assert!(deck.contains("Rx a b 1\n"));
    }

    #[test]
    fn test_flattened_name_collision() {
        // Top-level resistor whose name is also the path of an inlined one
        let mut cell = Module::new("cell");
        cell.add_port("a", 1, Direction::Inout);
        cell.add_port("b", 1, Direction::Inout);
        cell.add_instance(
            Instance::new("r0", "RESISTOR")
                .connect("A", Connection::signal("a"))
                .connect("B", Connection::signal("b"))
                .with_parameter("resistance", Parameter::int(1)),
        );
        let mut top = Module::new("top");
        top.add_port("a", 1, Direction::Inout);
        top.add_port("b", 1, Direction::Inout);
        top.add_instance(
            Instance::new("u0", "cell")
                .connect("a", Connection::signal("a"))
                .connect("b", Connection::signal("b")),
        );
        top.add_instance(
            Instance::new("u0.r0", "RESISTOR")
                .connect("A", Connection::signal("a"))
                .connect("B", Connection::signal("b"))
                .with_parameter("resistance", Parameter::int(2)),
        );
        let mut p = Package::new("lib");
        p.insert(Definition::Module(cell));
        p.insert(Definition::Module(top));
        let top = QualifiedName::local("top");
        assert!(DeckWriter::new(&p, DeckMode::Hierarchical)
            .module_deck(&top)
            .is_ok());
        assert!(matches!(
            DeckWriter::new(&p, DeckMode::Flattened).module_deck(&top),
            Err(Error::NameCollision(_))
        ));
    }

    #[test]
    fn test_port_mismatch() {
        let p = testcases::buffer_chain(1);
        let mut top = p.module(&QualifiedName::local("chain")).unwrap().clone();
        top.instances[0].connections.remove("VPWR");
        let res = ordered_bits(&top, &top.instances[0], &testcases::buffer().ports);
        assert!(matches!(res, Err(Error::PortMismatch { .. })));

        let mut top = p.module(&QualifiedName::local("chain")).unwrap().clone();
        top.instances[0]
            .connections
            .insert("Z".to_owned(), Connection::signal("a"));
        let res = ordered_bits(&top, &top.instances[0], &testcases::buffer().ports);
        assert!(matches!(res, Err(Error::PortMismatch { reason, .. }) if reason.contains("Z")));

        let mut top = p.module(&QualifiedName::local("chain")).unwrap().clone();
        top.add_signal("wide", 2);
        top.instances[0]
            .connections
            .insert("A".to_owned(), Connection::signal("wide"));
        let res = ordered_bits(&top, &top.instances[0], &testcases::buffer().ports);
        assert!(matches!(
            res,
            Err(Error::WidthMismatch {
                expected: 1,
                actual: 2,
                ..
            })
        ));
    }

    #[test]
    fn test_library_deck_continues() {
        let mut p = testcases::buffer_chain(1);
        let mut broken = Module::new("broken");
        broken.add_instance(Instance::new("u0", "nowhere"));
        p.insert(Definition::Module(broken));
        let (deck, errors) = DeckWriter::new(&p, DeckMode::Hierarchical).library_deck();
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], Error::UnresolvedReference { .. }));
        assert!(deck.contains(".SUBCKT BUF"));
        assert!(deck.contains(".SUBCKT chain"));
        assert!(!deck.contains(".SUBCKT broken"));
    }

    #[test]
    fn test_port_order_preserved() {
        let mut rng = SmallRng::seed_from_u64(3);
        for _ in 0..20 {
            let nb_ports = rng.gen_range(1..8);
            let mut names: Vec<String> = (0..nb_ports).map(|i| format!("p{i}")).collect();
            names.shuffle(&mut rng);
            let mut child = ExternalModule::new("child");
            let mut parent = Module::new("parent");
            let mut inst = Instance::new("u0", "child");
            let mut expected = Vec::new();
            for name in &names {
                let width = rng.gen_range(1..4);
                child.add_port(name, width, Direction::Inout);
                let net = format!("n_{name}");
                parent.add_signal(&net, width + 1);
                let c = Connection::slice(&net, width, 1);
                expected.extend(parent.connection_bits(&c).unwrap());
                inst = inst.connect(name, c);
            }
            let bits = ordered_bits(&parent, &inst, &child.ports).unwrap();
            assert_eq!(bits, expected);
        }
    }

    /// Primitive instances below a module, as (type, value) pairs, resolved without flattening
    fn hierarchical_primitives(p: &Package, m: &Module, out: &mut Vec<(String, String)>) {
        for inst in &m.instances {
            match p.resolve_instance(m, inst).unwrap() {
                ModuleRef::Module(child) => hierarchical_primitives(p, child, out),
                r => {
                    if let Some(prim) = r.primitive() {
                        out.push((
                            prim.module_name().to_owned(),
                            inst.parameters[prim.value_parameter()].to_deck_string(),
                        ));
                    }
                }
            }
        }
    }

    #[test]
    fn test_flatten_preserves_primitives() {
        for seed in 0..10 {
            let p = random::two_level(seed, 3, 6);
            let top = QualifiedName::local("top");
            let mut expected = Vec::new();
            hierarchical_primitives(&p, p.module(&top).unwrap(), &mut expected);
            expected.sort();

            let mut flat: Vec<(String, String)> = flatten(&p, &top)
                .unwrap()
                .iter()
                .map(|f| {
                    let prim = Primitive::from_name(&f.module).unwrap();
                    (
                        prim.module_name().to_owned(),
                        f.parameters[prim.value_parameter()].to_deck_string(),
                    )
                })
                .collect();
            flat.sort();
            assert_eq!(flat, expected);

            let deck = DeckWriter::new(&p, DeckMode::Flattened)
                .module_deck(&top)
                .unwrap();
            let nb_elements = deck
                .lines()
                .filter(|l| l.starts_with('R') || l.starts_with('C'))
                .count();
            assert_eq!(nb_elements, expected.len());
        }
    }
}
