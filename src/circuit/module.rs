use std::collections::BTreeMap;
use std::fmt;

use fxhash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::circuit::{Bit, Connection, Direction, Parameter, Port, Signal};
use crate::{Error, Result};

/// Name of a module, optionally qualified by the domain (library) it comes from
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualifiedName {
    /// Library or domain; empty for local modules
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,
    /// Name within the domain
    pub name: String,
}

impl QualifiedName {
    /// A name without domain
    pub fn local(name: &str) -> QualifiedName {
        QualifiedName {
            domain: String::new(),
            name: name.to_owned(),
        }
    }

    /// A name within a domain
    pub fn new(domain: &str, name: &str) -> QualifiedName {
        QualifiedName {
            domain: domain.to_owned(),
            name: name.to_owned(),
        }
    }
}

impl From<&str> for QualifiedName {
    /// Parse `domain::name` or `name`
    fn from(s: &str) -> QualifiedName {
        match s.rsplit_once("::") {
            Some((d, n)) => QualifiedName::new(d, n),
            None => QualifiedName::local(s),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.domain.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}::{}", self.domain, self.name)
        }
    }
}

/// Use of a module inside another module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Name, unique within the parent module
    pub name: String,
    /// Instantiated module, resolved lazily through the package
    pub module: QualifiedName,
    /// Parameter overrides
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Parameter>,
    /// Connections, by port name of the instantiated module
    #[serde(default)]
    pub connections: BTreeMap<String, Connection>,
}

impl Instance {
    /// Create an unconnected instance
    pub fn new(name: &str, module: impl Into<QualifiedName>) -> Instance {
        Instance {
            name: name.to_owned(),
            module: module.into(),
            parameters: BTreeMap::new(),
            connections: BTreeMap::new(),
        }
    }

    /// Connect a port of the instance
    pub fn connect(mut self, port: &str, connection: Connection) -> Instance {
        self.connections.insert(port.to_owned(), connection);
        self
    }

    /// Override a parameter
    pub fn with_parameter(mut self, name: &str, value: Parameter) -> Instance {
        self.parameters.insert(name.to_owned(), value);
        self
    }
}

/// Module known only by its name and ordered ports, implemented outside the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalModule {
    /// Qualified name
    pub name: QualifiedName,
    /// Ports, in canonical positional order
    pub ports: Vec<Port>,
    /// Default parameter values
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Parameter>,
}

impl ExternalModule {
    /// Create an external module without ports
    pub fn new(name: impl Into<QualifiedName>) -> ExternalModule {
        ExternalModule {
            name: name.into(),
            ports: Vec::new(),
            parameters: BTreeMap::new(),
        }
    }

    /// Add a port at the end of the port list
    pub fn add_port(&mut self, name: &str, width: u32, direction: Direction) {
        self.ports.push(Port::new(name, width, direction));
    }
}

/// Reusable hardware unit with ordered ports, internal signals and sub-instances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Qualified name
    pub name: QualifiedName,
    /// Ports, in canonical positional order
    pub ports: Vec<Port>,
    /// Internal signals, not including ports
    #[serde(default)]
    pub signals: Vec<Signal>,
    /// Sub-component uses
    #[serde(default)]
    pub instances: Vec<Instance>,
    /// Default parameter values
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Parameter>,
}

impl Module {
    /// Create an empty module
    pub fn new(name: impl Into<QualifiedName>) -> Module {
        Module {
            name: name.into(),
            ports: Vec::new(),
            signals: Vec::new(),
            instances: Vec::new(),
            parameters: BTreeMap::new(),
        }
    }

    /// Add a port at the end of the port list
    pub fn add_port(&mut self, name: &str, width: u32, direction: Direction) {
        self.ports.push(Port::new(name, width, direction));
    }

    /// Add an internal signal
    pub fn add_signal(&mut self, name: &str, width: u32) {
        self.signals.push(Signal::new(name, width));
    }

    /// Add an instance
    pub fn add_instance(&mut self, instance: Instance) {
        self.instances.push(instance);
    }

    /// Get a port by name
    pub fn port(&self, name: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.name() == name)
    }

    /// Get a port or internal signal by name
    pub fn signal(&self, name: &str) -> Option<&Signal> {
        self.port(name)
            .map(|p| &p.signal)
            .or_else(|| self.signals.iter().find(|s| s.name == name))
    }

    /// Get an instance by name
    pub fn instance(&self, name: &str) -> Option<&Instance> {
        self.instances.iter().find(|i| i.name == name)
    }

    /// Return whether a port or signal has this name
    pub fn has_signal(&self, name: &str) -> bool {
        self.signal(name).is_some()
    }

    /// Expand a connection into its bits, most significant first
    pub fn connection_bits(&self, connection: &Connection) -> Result<Vec<Bit>> {
        Scope::new(self).bits(connection)
    }

    /// Check that the module is consistent
    ///
    /// Names must be unique, widths positive, and every signal referenced by a connection
    /// must be declared in this module's scope.
    pub fn check(&self) -> Result<()> {
        let mut names = FxHashSet::default();
        for s in self.ports.iter().map(|p| &p.signal).chain(self.signals.iter()) {
            if s.width == 0 {
                return Err(Error::Invalid(format!(
                    "signal {} of module {} has width 0",
                    s.name, self.name
                )));
            }
            if !names.insert(s.name.as_str()) {
                return Err(Error::Invalid(format!(
                    "signal {} is declared twice in module {}",
                    s.name, self.name
                )));
            }
        }
        let scope = Scope::new(self);
        let mut instance_names = FxHashSet::default();
        for inst in &self.instances {
            if !instance_names.insert(inst.name.as_str()) {
                return Err(Error::Invalid(format!(
                    "instance {} is declared twice in module {}",
                    inst.name, self.name
                )));
            }
            for c in inst.connections.values() {
                scope.bits(c)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Module {} with {} ports, {} signals, {} instances:",
            self.name,
            self.ports.len(),
            self.signals.len(),
            self.instances.len()
        )?;
        for p in &self.ports {
            writeln!(f, "\t{:?} {} [{}]", p.direction, p.name(), p.width())?;
        }
        for i in &self.instances {
            write!(f, "\t{}: {}", i.name, i.module)?;
            for (port, c) in &i.connections {
                write!(f, " .{}({})", port, c)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Name lookup table for the signals of one module
pub struct Scope<'a> {
    module: &'a QualifiedName,
    widths: FxHashMap<&'a str, u32>,
}

impl<'a> Scope<'a> {
    /// Build the lookup table of a module
    pub fn new(module: &'a Module) -> Scope<'a> {
        let widths = module
            .ports
            .iter()
            .map(|p| &p.signal)
            .chain(module.signals.iter())
            .map(|s| (s.name.as_str(), s.width))
            .collect();
        Scope {
            module: &module.name,
            widths,
        }
    }

    /// Width of a signal, if declared
    pub fn width(&self, name: &str) -> Option<u32> {
        self.widths.get(name).copied()
    }

    fn resolve(&self, name: &str) -> Result<u32> {
        self.width(name).ok_or_else(|| Error::UnknownSignal {
            module: self.module.to_string(),
            signal: name.to_owned(),
        })
    }

    /// Expand a connection into its bits, most significant first
    pub fn bits(&self, connection: &Connection) -> Result<Vec<Bit>> {
        match connection {
            Connection::Signal(name) => {
                let width = self.resolve(name)?;
                Ok(Signal::new(name, width).bits())
            }
            Connection::Slice(s) => {
                let width = self.resolve(&s.signal)?;
                if s.top < s.bottom || s.top >= width {
                    return Err(Error::InvalidSlice {
                        module: self.module.to_string(),
                        signal: s.signal.clone(),
                        top: s.top,
                        bottom: s.bottom,
                    });
                }
                if width == 1 {
                    Ok(vec![Bit::scalar(&s.signal)])
                } else {
                    Ok((s.bottom..=s.top)
                        .rev()
                        .map(|i| Bit::indexed(&s.signal, i))
                        .collect())
                }
            }
            Connection::Concat(c) => {
                let mut ret = Vec::new();
                for p in &c.parts {
                    ret.extend(self.bits(p)?);
                }
                Ok(ret)
            }
        }
    }
}
