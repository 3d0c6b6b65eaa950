//! Inline a hierarchy down to its external leaves

use std::collections::BTreeMap;

use fxhash::FxHashMap;

use crate::circuit::{Bit, Module, ModuleRef, Package, Parameter, QualifiedName};
use crate::deck::ordered_bits;
use crate::{Error, Result};

/// A leaf instance of a flattened hierarchy
#[derive(Debug, Clone, PartialEq)]
pub struct FlatInstance {
    /// Hierarchical path, instance names joined by dots
    pub path: String,
    /// Instantiated external module or primitive
    pub module: QualifiedName,
    /// Nets connected to each port bit, in port order
    pub nodes: Vec<String>,
    /// Parameters given by the instance
    pub parameters: BTreeMap<String, Parameter>,
}

/// Flatten the hierarchy below `top` into its leaf instances
///
/// Nets of `top` keep their names; nets inside an instance `u0` are renamed `u0.net`, recursively.
/// Leaves are instances of external modules, including the primitives.
///
/// Parameters of inlined modules are not evaluated. A leaf that uses an expression inside a
/// module with parameter bindings, either defaults or instance overrides, cannot be inlined
/// faithfully and is an error.
pub fn flatten(package: &Package, top: &QualifiedName) -> Result<Vec<FlatInstance>> {
    // Reports unresolved references and recursion before anything is inlined
    package.hierarchy(top)?;
    let module = package.expect_module(top)?;
    let mut ret = Vec::new();
    let net_map = FxHashMap::default();
    inline(package, module, "", &net_map, false, &mut ret)?;
    Ok(ret)
}

fn inline(
    package: &Package,
    module: &Module,
    prefix: &str,
    net_map: &FxHashMap<Bit, String>,
    bound: bool,
    ret: &mut Vec<FlatInstance>,
) -> Result<()> {
    let net_name = |b: &Bit| -> String {
        match net_map.get(b) {
            Some(n) => n.clone(),
            None => format!("{prefix}{b}"),
        }
    };
    for inst in &module.instances {
        let reference = package.resolve_instance(module, inst)?;
        let bits = ordered_bits(module, inst, reference.ports())?;
        let nodes: Vec<String> = bits.iter().map(net_name).collect();
        let path = format!("{prefix}{}", inst.name);
        match reference {
            ModuleRef::Module(child) => {
                let child_map: FxHashMap<Bit, String> = child
                    .ports
                    .iter()
                    .flat_map(|p| p.signal.bits())
                    .zip(nodes)
                    .collect();
                let child_bound = !child.parameters.is_empty() || !inst.parameters.is_empty();
                inline(
                    package,
                    child,
                    &format!("{path}."),
                    &child_map,
                    child_bound,
                    ret,
                )?;
            }
            ModuleRef::External(_) => {
                if bound {
                    if let Some((name, value)) =
                        inst.parameters.iter().find(|(_, v)| v.is_literal())
                    {
                        return Err(Error::UnboundParameter {
                            module: module.name.to_string(),
                            instance: inst.name.clone(),
                            parameter: format!("{}={}", name, value.to_deck_string()),
                        });
                    }
                }
                ret.push(FlatInstance {
                    path,
                    module: inst.module.clone(),
                    nodes,
                    parameters: inst.parameters.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::generators::testcases;
    use crate::circuit::{Connection, Definition, Direction, Instance};

    #[test]
    fn test_flatten_chain() {
        let p = testcases::buffer_chain(2);
        let flat = flatten(&p, &QualifiedName::local("chain")).unwrap();
        let paths: Vec<&str> = flat.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["b0.x0", "b0.x1", "b1.x0", "b1.x1"]);
        // INV ports: A VGND VPWR Y
        assert_eq!(flat[0].nodes, vec!["a", "VGND", "VPWR", "b0.mid"]);
        assert_eq!(flat[1].nodes, vec!["b0.mid", "VGND", "VPWR", "n1"]);
        assert_eq!(flat[3].nodes, vec!["b1.mid", "VGND", "VPWR", "y"]);
    }

    fn parameterized_cell(value: Parameter) -> Module {
        let mut cell = Module::new("cell");
        cell.add_port("a", 1, Direction::Inout);
        cell.add_port("b", 1, Direction::Inout);
        cell.add_instance(
            Instance::new("r0", "RESISTOR")
                .connect("A", Connection::signal("a"))
                .connect("B", Connection::signal("b"))
                .with_parameter("resistance", value),
        );
        cell
    }

    fn wrapper(override_w: bool) -> Module {
        let mut top = Module::new("top");
        top.add_port("a", 1, Direction::Inout);
        top.add_port("b", 1, Direction::Inout);
        let mut inst = Instance::new("u0", "cell")
            .connect("a", Connection::signal("a"))
            .connect("b", Connection::signal("b"));
        if override_w {
            inst = inst.with_parameter("w", Parameter::int(2));
        }
        top.add_instance(inst);
        top
    }

    #[test]
    fn test_flatten_expressions() {
        let top = QualifiedName::local("top");

        // Expression over an overridden parameter
        let mut p = Package::new("lib");
        p.insert(Definition::Module(parameterized_cell(Parameter::literal("{100*w}"))));
        p.insert(Definition::Module(wrapper(true)));
        assert!(matches!(
            flatten(&p, &top),
            Err(Error::UnboundParameter { module, instance, .. }) if module == "cell" && instance == "r0"
        ));

        // Expression over a module default
        let mut cell = parameterized_cell(Parameter::literal("{100*w}"));
        cell.parameters.insert("w".to_owned(), Parameter::int(1));
        p.insert(Definition::Module(cell));
        p.insert(Definition::Module(wrapper(false)));
        assert!(flatten(&p, &top).is_err());

        // Without bindings, expressions refer to global parameters and pass through
        p.insert(Definition::Module(parameterized_cell(Parameter::literal("{rsheet}"))));
        let flat = flatten(&p, &top).unwrap();
        assert_eq!(flat[0].parameters["resistance"].to_deck_string(), "{rsheet}");

        // Plain values do not depend on the bindings
        p.insert(Definition::Module(parameterized_cell(Parameter::int(5))));
        p.insert(Definition::Module(wrapper(true)));
        assert_eq!(flatten(&p, &top).unwrap().len(), 1);
    }

    #[test]
    fn test_flatten_port_mismatch() {
        let mut p = testcases::buffer_chain(1);
        p.insert(crate::circuit::Definition::Module(Module::new("INV")));
        assert!(matches!(
            flatten(&p, &QualifiedName::local("chain")),
            Err(crate::Error::PortMismatch { .. })
        ));
    }
}
