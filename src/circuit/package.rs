use std::sync::OnceLock;

use fxhash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::circuit::{
    Direction, ExternalModule, Instance, Module, Parameter, Port, QualifiedName,
};
use crate::{Error, Result};

/// Either kind of module definition held by a package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Definition {
    /// Module with internal structure
    Module(Module),
    /// Black box with ordered ports
    External(ExternalModule),
}

impl Definition {
    /// Qualified name of the definition
    pub fn name(&self) -> &QualifiedName {
        match self {
            Definition::Module(m) => &m.name,
            Definition::External(m) => &m.name,
        }
    }

    /// Borrow as a resolved reference
    pub fn as_module_ref(&self) -> ModuleRef<'_> {
        match self {
            Definition::Module(m) => ModuleRef::Module(m),
            Definition::External(m) => ModuleRef::External(m),
        }
    }
}

/// Simulator primitives every package knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// Two-terminal resistor
    Resistor,
    /// Two-terminal capacitor
    Capacitor,
    /// Two-terminal inductor
    Inductor,
}

impl Primitive {
    /// All primitives
    pub const ALL: [Primitive; 3] = [Primitive::Resistor, Primitive::Capacitor, Primitive::Inductor];

    /// Name of the external module describing the primitive
    pub fn module_name(&self) -> &'static str {
        match self {
            Primitive::Resistor => "RESISTOR",
            Primitive::Capacitor => "CAPACITOR",
            Primitive::Inductor => "INDUCTOR",
        }
    }

    /// Name of the parameter holding the element value
    pub fn value_parameter(&self) -> &'static str {
        match self {
            Primitive::Resistor => "resistance",
            Primitive::Capacitor => "capacitance",
            Primitive::Inductor => "inductance",
        }
    }

    /// Leading letter of the element in a deck
    pub fn letter(&self) -> char {
        match self {
            Primitive::Resistor => 'R',
            Primitive::Capacitor => 'C',
            Primitive::Inductor => 'L',
        }
    }

    /// Find the primitive a qualified name refers to
    pub fn from_name(name: &QualifiedName) -> Option<Primitive> {
        if !name.domain.is_empty() {
            return None;
        }
        Primitive::ALL
            .into_iter()
            .find(|p| p.module_name() == name.name)
    }

    /// External module describing the primitive
    pub fn definition(&self) -> &'static ExternalModule {
        static DEFINITIONS: OnceLock<Vec<ExternalModule>> = OnceLock::new();
        let defs = DEFINITIONS.get_or_init(|| {
            Primitive::ALL
                .iter()
                .map(|p| {
                    let mut m = ExternalModule::new(QualifiedName::local(p.module_name()));
                    m.add_port("A", 1, Direction::Inout);
                    m.add_port("B", 1, Direction::Inout);
                    m.parameters
                        .insert(p.value_parameter().to_owned(), Parameter::float(0.0));
                    m
                })
                .collect()
        });
        let i = Primitive::ALL.iter().position(|p| p == self).unwrap_or(0);
        &defs[i]
    }
}

/// A resolved reference to a module or external module
#[derive(Debug, Clone, Copy)]
pub enum ModuleRef<'a> {
    /// Module with internal structure
    Module(&'a Module),
    /// Black box
    External(&'a ExternalModule),
}

impl<'a> ModuleRef<'a> {
    /// Qualified name
    pub fn name(&self) -> &'a QualifiedName {
        match self {
            ModuleRef::Module(m) => &m.name,
            ModuleRef::External(m) => &m.name,
        }
    }

    /// Ports in canonical order
    pub fn ports(&self) -> &'a [Port] {
        match self {
            ModuleRef::Module(m) => &m.ports,
            ModuleRef::External(m) => &m.ports,
        }
    }

    /// Primitive this reference stands for, if any
    pub fn primitive(&self) -> Option<Primitive> {
        match self {
            ModuleRef::Module(_) => None,
            ModuleRef::External(m) => Primitive::from_name(&m.name),
        }
    }
}

/// Named collection of module definitions; the unit of persistence
///
/// Each qualified name maps to exactly one definition. Definitions keep the order in which
/// their name first appeared.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "PackageData", into = "PackageData")]
pub struct Package {
    name: String,
    definitions: Vec<Definition>,
    index: FxHashMap<QualifiedName, usize>,
}

#[derive(Serialize, Deserialize)]
struct PackageData {
    name: String,
    definitions: Vec<Definition>,
}

impl From<PackageData> for Package {
    fn from(data: PackageData) -> Package {
        let mut ret = Package::new(&data.name);
        for d in data.definitions {
            ret.insert(d);
        }
        ret
    }
}

impl From<Package> for PackageData {
    fn from(p: Package) -> PackageData {
        PackageData {
            name: p.name,
            definitions: p.definitions,
        }
    }
}

impl PartialEq for Package {
    fn eq(&self, other: &Package) -> bool {
        self.name == other.name && self.definitions == other.definitions
    }
}

impl Package {
    /// Create an empty package
    pub fn new(name: &str) -> Package {
        Package {
            name: name.to_owned(),
            definitions: Vec::new(),
            index: FxHashMap::default(),
        }
    }

    /// Name of the package
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of definitions
    pub fn nb_definitions(&self) -> usize {
        self.definitions.len()
    }

    /// All definitions, in order
    pub fn definitions(&self) -> &[Definition] {
        &self.definitions
    }

    /// All modules with internal structure
    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.definitions.iter().filter_map(|d| match d {
            Definition::Module(m) => Some(m),
            Definition::External(_) => None,
        })
    }

    /// All external modules
    pub fn external_modules(&self) -> impl Iterator<Item = &ExternalModule> {
        self.definitions.iter().filter_map(|d| match d {
            Definition::Module(_) => None,
            Definition::External(m) => Some(m),
        })
    }

    /// Get a definition by name
    pub fn get(&self, name: &QualifiedName) -> Option<&Definition> {
        self.index.get(name).map(|i| &self.definitions[*i])
    }

    /// Get a module by name
    pub fn module(&self, name: &QualifiedName) -> Option<&Module> {
        match self.get(name) {
            Some(Definition::Module(m)) => Some(m),
            _ => None,
        }
    }

    /// Get a module by name, or fail
    pub fn expect_module(&self, name: &QualifiedName) -> Result<&Module> {
        self.module(name)
            .ok_or_else(|| Error::ModuleNotFound(name.to_string()))
    }

    /// Get a mutable module by name
    pub fn module_mut(&mut self, name: &QualifiedName) -> Option<&mut Module> {
        let i = *self.index.get(name)?;
        match &mut self.definitions[i] {
            Definition::Module(m) => Some(m),
            Definition::External(_) => None,
        }
    }

    /// Mutable access to all modules
    pub fn modules_mut(&mut self) -> impl Iterator<Item = &mut Module> {
        self.definitions.iter_mut().filter_map(|d| match d {
            Definition::Module(m) => Some(m),
            Definition::External(_) => None,
        })
    }

    /// Insert a definition, replacing and returning any previous one with the same name
    ///
    /// A replaced definition keeps its position.
    pub fn insert(&mut self, definition: Definition) -> Option<Definition> {
        match self.index.get(definition.name()) {
            Some(&i) => Some(std::mem::replace(&mut self.definitions[i], definition)),
            None => {
                self.index
                    .insert(definition.name().clone(), self.definitions.len());
                self.definitions.push(definition);
                None
            }
        }
    }

    /// Resolve a name, falling back to the simulator primitives
    pub fn resolve(&self, name: &QualifiedName) -> Option<ModuleRef<'_>> {
        match self.get(name) {
            Some(d) => Some(d.as_module_ref()),
            None => Primitive::from_name(name).map(|p| ModuleRef::External(p.definition())),
        }
    }

    /// Resolve the module an instance refers to
    pub fn resolve_instance(&self, parent: &Module, instance: &Instance) -> Result<ModuleRef<'_>> {
        self.resolve(&instance.module)
            .ok_or_else(|| Error::UnresolvedReference {
                module: parent.name.to_string(),
                instance: instance.name.clone(),
                reference: instance.module.to_string(),
            })
    }

    /// Every instance whose reference does not resolve, as unresolved-reference errors
    pub fn unresolved_references(&self) -> Vec<Error> {
        let mut ret = Vec::new();
        for m in self.modules() {
            for inst in &m.instances {
                if let Err(e) = self.resolve_instance(m, inst) {
                    ret.push(e);
                }
            }
        }
        ret
    }

    /// Check every module, returning the violations found
    pub fn check(&self) -> Vec<Error> {
        self.modules().filter_map(|m| m.check().err()).collect()
    }

    /// Modules in the hierarchy below `top`, children before parents, ending with `top`
    ///
    /// External modules are leaves and are not returned.
    pub fn hierarchy(&self, top: &QualifiedName) -> Result<Vec<&Module>> {
        let root = self.expect_module(top)?;
        let mut ret = Vec::new();
        let mut done = FxHashSet::default();
        let mut stack = Vec::new();
        self.visit_hierarchy(root, &mut ret, &mut done, &mut stack)?;
        Ok(ret)
    }

    /// External modules instantiated in the hierarchy below `top`, in order of first use
    ///
    /// The simulator primitives are not included.
    pub fn external_modules_used_by(&self, top: &QualifiedName) -> Result<Vec<&ExternalModule>> {
        let mut ret = Vec::new();
        let mut seen = FxHashSet::default();
        for m in self.hierarchy(top)? {
            for inst in &m.instances {
                let reference = self.resolve_instance(m, inst)?;
                if let ModuleRef::External(e) = reference {
                    if reference.primitive().is_none() && seen.insert(&e.name) {
                        ret.push(e);
                    }
                }
            }
        }
        Ok(ret)
    }

    fn visit_hierarchy<'a>(
        &'a self,
        module: &'a Module,
        ret: &mut Vec<&'a Module>,
        done: &mut FxHashSet<&'a QualifiedName>,
        stack: &mut Vec<&'a QualifiedName>,
    ) -> Result<()> {
        if done.contains(&module.name) {
            return Ok(());
        }
        if stack.contains(&&module.name) {
            return Err(Error::RecursiveHierarchy(module.name.to_string()));
        }
        stack.push(&module.name);
        for inst in &module.instances {
            if let ModuleRef::Module(child) = self.resolve_instance(module, inst)? {
                self.visit_hierarchy(child, ret, done, stack)?;
            }
        }
        stack.pop();
        done.insert(&module.name);
        ret.push(module);
        Ok(())
    }
}
