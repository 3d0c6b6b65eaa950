//! Error types shared by every stage of the pipeline

use std::path::PathBuf;

use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while merging, refining, generating or reducing
///
/// Each variant names the entity it concerns, so that batch operations can report
/// it as a diagnostic and move on to sibling work.
#[derive(Debug, Error)]
pub enum Error {
    /// An instance refers to a module that is not in the package
    #[error("unresolved reference: instance {instance} in module {module} refers to unknown module {reference}")]
    UnresolvedReference {
        /// Module containing the instance
        module: String,
        /// Offending instance
        instance: String,
        /// Name that could not be resolved
        reference: String,
    },

    /// The named connections of an instance do not match the declared ports
    #[error("port mismatch: instance {instance} in module {module}: {reason}")]
    PortMismatch {
        /// Module containing the instance
        module: String,
        /// Offending instance
        instance: String,
        /// What is missing or superfluous
        reason: String,
    },

    /// A connection does not have the width of the port it connects to
    #[error("width mismatch: {context}: expected {expected} bits, got {actual}")]
    WidthMismatch {
        /// Where the mismatch was found
        context: String,
        /// Declared width
        expected: u32,
        /// Connected width
        actual: u32,
    },

    /// A signal name does not resolve in the scope of a module
    #[error("unknown signal {signal} in module {module}")]
    UnknownSignal {
        /// Module scope
        module: String,
        /// Name that did not resolve
        signal: String,
    },

    /// A slice is out of range or reversed
    #[error("invalid slice {signal}[{top}:{bottom}] in module {module}")]
    InvalidSlice {
        /// Module scope
        module: String,
        /// Sliced signal
        signal: String,
        /// Top bit
        top: u32,
        /// Bottom bit
        bottom: u32,
    },

    /// No module or external module with this name
    #[error("module not found: {0}")]
    ModuleNotFound(String),

    /// A module instantiates itself, directly or not
    #[error("recursive hierarchy through module {0}")]
    RecursiveHierarchy(String),

    /// Extracted network of a net is not connected through its resistors
    #[error("parasitic network of net {net} is disconnected: unreachable nodes {nodes:?}")]
    DisconnectedNet {
        /// Extracted net
        net: String,
        /// Nodes that cannot be reached from the first one
        nodes: Vec<String>,
    },

    /// A connection to the net has no matching node in the extracted network
    #[error("parasitic network of net {net} has no node for endpoint {endpoint}")]
    MissingEndpoint {
        /// Extracted net
        net: String,
        /// Endpoint of the original net
        endpoint: String,
    },

    /// An extracted node claims a location the original net does not connect to
    #[error("parasitic network of net {net} places node {node} at {endpoint}, which the net does not connect")]
    UnknownEndpoint {
        /// Extracted net
        net: String,
        /// Extracted node
        node: String,
        /// Claimed location
        endpoint: String,
    },

    /// A coupling capacitor refers to a node known nowhere
    #[error("parasitic network of net {net} couples to unknown node {node}")]
    UnresolvedCouplingNode {
        /// Extracted net
        net: String,
        /// Foreign node
        node: String,
    },

    /// Parasitic networks are only attached to scalar nets
    #[error("parasitic network given for bus {net} of width {width}")]
    UnsupportedBus {
        /// Extracted net
        net: String,
        /// Width of the net
        width: u32,
    },

    /// An expression inside an inlined module would lose the parameters it refers to
    #[error("cannot flatten instance {instance} in module {module}: expression {parameter} depends on module parameters")]
    UnboundParameter {
        /// Inlined module
        module: String,
        /// Offending instance
        instance: String,
        /// Parameter and its expression
        parameter: String,
    },

    /// Two generated files or elements would get the same name
    #[error("name collision: {0}")]
    NameCollision(String),

    /// A delay test needs at least one output to observe
    #[error("module {0} has no output port to observe")]
    NoObservableOutputs(String),

    /// The simulator did not produce the expected output
    #[error("missing simulator output {0}")]
    MissingOutput(PathBuf),

    /// The simulator output could not be interpreted
    #[error("malformed simulator output {file}: {reason}")]
    MalformedOutput {
        /// Output file
        file: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// The simulator output stops before its terminator
    #[error("truncated simulator output {0}")]
    TruncatedOutput(PathBuf),

    /// An observed output never switches
    #[error("no transition observed on {0}")]
    NoTransition(String),

    /// The model is inconsistent
    #[error("invalid model: {0}")]
    Invalid(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Toml(#[from] toml::de::Error),

    /// CSV writing error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}
