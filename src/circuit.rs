//! Unified circuit model: packages of modules, their ports, signals, instances and parameters

pub mod generators;
mod module;
mod package;
mod parameter;
mod signal;
pub mod stats;

pub use module::{ExternalModule, Instance, Module, QualifiedName, Scope};
pub use package::{Definition, ModuleRef, Package, Primitive};
pub use parameter::{ParamValue, Parameter, SiPrefix};
pub use signal::{Bit, Concat, Connection, Direction, Port, Signal, Slice};
