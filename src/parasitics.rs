//! Attach extracted resistance and capacitance networks to the nets of a module
//!
//! Each extracted net is split into one signal per extracted node, connected by resistor
//! and capacitor instances. Connections to the original net are repointed to the node at
//! their physical location. Nets are processed independently: a malformed network is
//! rejected and leaves its net untouched, without affecting the others.

use std::fmt;

use fxhash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::circuit::{Connection, Direction, Instance, Module, Parameter, Port, Primitive, Signal};
use crate::{Error, Result};

/// Physical location of an extracted node on the original net
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinLocation {
    /// The port of the module carrying the net
    Port,
    /// A port of an instance connected to the net
    Pin {
        /// Instance name
        instance: String,
        /// Port of the instance
        port: String,
    },
}

impl PinLocation {
    /// Location at an instance pin
    pub fn pin(instance: &str, port: &str) -> PinLocation {
        PinLocation::Pin {
            instance: instance.to_owned(),
            port: port.to_owned(),
        }
    }
}

impl fmt::Display for PinLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinLocation::Port => write!(f, "module port"),
            PinLocation::Pin { instance, port } => write!(f, "{}:{}", instance, port),
        }
    }
}

/// A node of an extracted network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParasiticNode {
    /// Name in the extraction, unique within the module
    pub name: String,
    /// Location on the original net, None for interior nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<PinLocation>,
}

/// Resistance between two nodes of the same net
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resistance {
    /// First node
    pub a: String,
    /// Second node
    pub b: String,
    /// Value in ohms
    pub value: Parameter,
}

/// Capacitance from a node to ground, or to another node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capacitance {
    /// First node
    pub a: String,
    /// Second node; None for a capacitance to ground
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b: Option<String>,
    /// Value in farads
    pub value: Parameter,
}

/// Extracted network of one net
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParasiticNet {
    /// Name of the original net
    pub net: String,
    /// Extracted nodes
    pub nodes: Vec<ParasiticNode>,
    /// Resistances between nodes of the net
    #[serde(default)]
    pub resistors: Vec<Resistance>,
    /// Capacitances from nodes of the net
    #[serde(default)]
    pub capacitors: Vec<Capacitance>,
}

impl ParasiticNet {
    /// Create an empty network for a net
    pub fn new(net: &str) -> ParasiticNet {
        ParasiticNet {
            net: net.to_owned(),
            nodes: Vec::new(),
            resistors: Vec::new(),
            capacitors: Vec::new(),
        }
    }

    /// Add a node
    pub fn add_node(&mut self, name: &str, location: Option<PinLocation>) {
        self.nodes.push(ParasiticNode {
            name: name.to_owned(),
            location,
        });
    }

    /// Add a resistance between two nodes
    pub fn add_resistor(&mut self, a: &str, b: &str, value: Parameter) {
        self.resistors.push(Resistance {
            a: a.to_owned(),
            b: b.to_owned(),
            value,
        });
    }

    /// Add a capacitance to ground
    pub fn add_ground_capacitor(&mut self, a: &str, value: Parameter) {
        self.capacitors.push(Capacitance {
            a: a.to_owned(),
            b: None,
            value,
        });
    }

    /// Add a coupling capacitance
    pub fn add_coupling_capacitor(&mut self, a: &str, b: &str, value: Parameter) {
        self.capacitors.push(Capacitance {
            a: a.to_owned(),
            b: Some(b.to_owned()),
            value,
        });
    }
}

/// Result of attaching parasitic networks to a module
#[derive(Debug)]
pub struct Attachment {
    /// Refined module
    pub module: Module,
    /// Nets that were refined
    pub attached: Vec<String>,
    /// Nets that were rejected, with the reason
    pub failures: Vec<(String, Error)>,
}

/// Locations where a module connects to a net
fn net_endpoints(module: &Module, net: &str) -> Vec<PinLocation> {
    let mut ret = Vec::new();
    if module.port(net).is_some() {
        ret.push(PinLocation::Port);
    }
    for inst in &module.instances {
        for (port, c) in &inst.connections {
            if c.referenced_signals().contains(&net) {
                ret.push(PinLocation::pin(&inst.name, port));
            }
        }
    }
    ret
}

/// Validated network of a net, with the signal name chosen for each node
struct NetPlan<'a> {
    position: usize,
    net: &'a ParasiticNet,
    index: FxHashMap<&'a str, usize>,
    names: Vec<String>,
}

impl<'a> NetPlan<'a> {
    fn node(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    fn local_node(&self, name: &str) -> Result<usize> {
        self.node(name).ok_or_else(|| {
            Error::Invalid(format!(
                "parasitic network of net {} refers to unknown node {}",
                self.net.net, name
            ))
        })
    }

    /// Resolve the terminals of every capacitor to signal names
    fn capacitor_terminals(
        &self,
        module: &Module,
        foreign: &FxHashMap<String, Option<String>>,
        ground: &str,
    ) -> Result<Vec<(String, String)>> {
        let resolve = |name: &str| -> Option<String> {
            if let Some(i) = self.node(name) {
                Some(self.names[i].clone())
            } else if name == ground {
                Some(ground.to_owned())
            } else if let Some(s) = foreign.get(name) {
                s.clone()
            } else if module.has_signal(name) {
                Some(name.to_owned())
            } else {
                None
            }
        };
        let mut ret = Vec::new();
        for c in &self.net.capacitors {
            let (local, other) = match &c.b {
                None => (c.a.as_str(), None),
                Some(b) => {
                    if self.node(&c.a).is_some() {
                        (c.a.as_str(), Some(b.as_str()))
                    } else {
                        (b.as_str(), Some(c.a.as_str()))
                    }
                }
            };
            let a = self.names[self.local_node(local)?].clone();
            let b = match other {
                None => ground.to_owned(),
                Some(o) => resolve(o).ok_or_else(|| Error::UnresolvedCouplingNode {
                    net: self.net.net.clone(),
                    node: o.to_owned(),
                })?,
            };
            ret.push((a, b));
        }
        Ok(ret)
    }
}

/// Check the network of a net against the module and name its nodes
fn plan_net<'a>(
    module: &Module,
    position: usize,
    net: &'a ParasiticNet,
    taken: &mut FxHashSet<String>,
) -> Result<NetPlan<'a>> {
    let signal = module.signal(&net.net).ok_or_else(|| Error::UnknownSignal {
        module: module.name.to_string(),
        signal: net.net.clone(),
    })?;
    if signal.width != 1 {
        return Err(Error::UnsupportedBus {
            net: net.net.clone(),
            width: signal.width,
        });
    }
    if net.nodes.is_empty() {
        return Err(Error::Invalid(format!(
            "parasitic network of net {} has no node",
            net.net
        )));
    }

    let mut index = FxHashMap::default();
    for (i, n) in net.nodes.iter().enumerate() {
        if index.insert(n.name.as_str(), i).is_some() {
            return Err(Error::Invalid(format!(
                "parasitic network of net {} declares node {} twice",
                net.net, n.name
            )));
        }
    }

    let endpoints = net_endpoints(module, &net.net);
    let mut located = FxHashSet::default();
    for n in &net.nodes {
        let Some(loc) = &n.location else {
            continue;
        };
        if !endpoints.contains(loc) {
            return Err(Error::UnknownEndpoint {
                net: net.net.clone(),
                node: n.name.clone(),
                endpoint: loc.to_string(),
            });
        }
        if !located.insert(loc) {
            return Err(Error::Invalid(format!(
                "parasitic network of net {} has several nodes at {}",
                net.net, loc
            )));
        }
    }
    for e in &endpoints {
        if !located.contains(e) {
            return Err(Error::MissingEndpoint {
                net: net.net.clone(),
                endpoint: e.to_string(),
            });
        }
    }

    let mut plan = NetPlan {
        position,
        net,
        index,
        names: Vec::new(),
    };

    // Connectivity through resistors only
    let mut adjacency = vec![Vec::new(); net.nodes.len()];
    for r in &net.resistors {
        let a = plan.local_node(&r.a)?;
        let b = plan.local_node(&r.b)?;
        adjacency[a].push(b);
        adjacency[b].push(a);
    }
    let mut visited = vec![false; net.nodes.len()];
    let mut stack = vec![0];
    visited[0] = true;
    while let Some(i) = stack.pop() {
        for &j in &adjacency[i] {
            if !visited[j] {
                visited[j] = true;
                stack.push(j);
            }
        }
    }
    let unreachable: Vec<String> = net
        .nodes
        .iter()
        .zip(visited.iter())
        .filter(|(_, v)| !**v)
        .map(|(n, _)| n.name.clone())
        .collect();
    if !unreachable.is_empty() {
        return Err(Error::DisconnectedNet {
            net: net.net.clone(),
            nodes: unreachable,
        });
    }

    let keeper = net
        .nodes
        .iter()
        .position(|n| n.location == Some(PinLocation::Port))
        .or_else(|| net.nodes.iter().position(|n| n.location.is_some()))
        .unwrap_or(0);
    let mut suffix = 1;
    for i in 0..net.nodes.len() {
        if i == keeper {
            plan.names.push(net.net.clone());
            continue;
        }
        loop {
            let candidate = format!("{}_p{}", net.net, suffix);
            suffix += 1;
            if taken.insert(candidate.clone()) {
                plan.names.push(candidate);
                break;
            }
        }
    }
    Ok(plan)
}

/// Generate instance names that do not clash with existing ones
struct InstanceNamer {
    taken: FxHashSet<String>,
}

impl InstanceNamer {
    fn fresh(&mut self, prefix: &str) -> String {
        let mut i = 0;
        loop {
            let candidate = format!("{prefix}{i}");
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            i += 1;
        }
    }
}

fn primitive_instance(
    name: String,
    primitive: Primitive,
    a: &str,
    b: &str,
    value: &Parameter,
) -> Instance {
    Instance::new(&name, primitive.module_name())
        .connect("A", Connection::signal(a))
        .connect("B", Connection::signal(b))
        .with_parameter(primitive.value_parameter(), value.clone())
}

/// Attach extracted networks to the nets of a module
///
/// `ground` is the signal single-node capacitances connect to; it is added as a port of the
/// module if it does not exist yet. The input module is not modified.
pub fn attach(module: &Module, nets: &[ParasiticNet], ground: &str) -> Attachment {
    let mut failures = Vec::new();
    let mut taken: FxHashSet<String> = module
        .ports
        .iter()
        .map(|p| p.name().to_owned())
        .chain(module.signals.iter().map(|s| s.name.clone()))
        .collect();
    taken.insert(ground.to_owned());

    let mut plans = Vec::new();
    let mut seen_nets = FxHashSet::default();
    for (position, net) in nets.iter().enumerate() {
        if !seen_nets.insert(net.net.as_str()) {
            failures.push((
                position,
                net.net.clone(),
                Error::Invalid(format!("several parasitic networks for net {}", net.net)),
            ));
            continue;
        }
        match plan_net(module, position, net, &mut taken) {
            Ok(plan) => plans.push(plan),
            Err(e) => failures.push((position, net.net.clone(), e)),
        }
    }

    // Coupling capacitors may refer to nodes of other nets: drop plans until they all resolve
    let resolved = loop {
        let mut foreign: FxHashMap<String, Option<String>> = FxHashMap::default();
        for plan in &plans {
            for (n, name) in plan.net.nodes.iter().zip(plan.names.iter()) {
                foreign
                    .entry(n.name.clone())
                    .and_modify(|e| *e = None)
                    .or_insert_with(|| Some(name.clone()));
            }
        }
        let mut kept = Vec::new();
        let mut dropped = false;
        for plan in plans {
            match plan.capacitor_terminals(module, &foreign, ground) {
                Ok(caps) => kept.push((plan, caps)),
                Err(e) => {
                    failures.push((plan.position, plan.net.net.clone(), e));
                    dropped = true;
                }
            }
        }
        if !dropped {
            break kept;
        }
        plans = kept.into_iter().map(|(p, _)| p).collect();
    };

    let mut ret = module.clone();
    let mut namer = InstanceNamer {
        taken: module.instances.iter().map(|i| i.name.clone()).collect(),
    };
    let mut attached = Vec::new();
    for (plan, caps) in &resolved {
        let net = &plan.net.net;
        for (n, name) in plan.net.nodes.iter().zip(plan.names.iter()) {
            if name != net {
                ret.signals.push(Signal::scalar(name));
            }
            if let Some(PinLocation::Pin { instance, port }) = &n.location {
                if let Some(inst) = ret.instances.iter_mut().find(|i| &i.name == instance) {
                    if let Some(c) = inst.connections.get_mut(port) {
                        c.rename_signal(net, name);
                    }
                }
            }
        }
        for r in &plan.net.resistors {
            let a = &plan.names[plan.index[r.a.as_str()]];
            let b = &plan.names[plan.index[r.b.as_str()]];
            let name = namer.fresh(&format!("rpar_{net}_"));
            ret.instances
                .push(primitive_instance(name, Primitive::Resistor, a, b, &r.value));
        }
        for (c, (a, b)) in plan.net.capacitors.iter().zip(caps.iter()) {
            let name = namer.fresh(&format!("cpar_{net}_"));
            ret.instances
                .push(primitive_instance(name, Primitive::Capacitor, a, b, &c.value));
        }
        debug!(
            "Attached {} nodes, {} resistors, {} capacitors to net {}",
            plan.net.nodes.len(),
            plan.net.resistors.len(),
            plan.net.capacitors.len(),
            net
        );
        attached.push(net.clone());
    }

    let uses_ground = resolved
        .iter()
        .flat_map(|(_, caps)| caps.iter())
        .any(|(a, b)| a == ground || b == ground);
    if uses_ground && !ret.has_signal(ground) {
        info!("Added ground port {} to module {}", ground, ret.name);
        ret.ports.insert(0, Port::new(ground, 1, Direction::None));
    }

    failures.sort_by_key(|(position, _, _)| *position);
    let failures: Vec<(String, Error)> = failures.into_iter().map(|(_, n, e)| (n, e)).collect();
    for (_, e) in &failures {
        warn!("Parasitics rejected: {}", e);
    }
    info!(
        "Attached parasitics to {} nets of module {}, {} rejected",
        attached.len(),
        module.name,
        failures.len()
    );
    Attachment {
        module: ret,
        attached,
        failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::SiPrefix;

    /// Two inverters in series through net n, with input `in` and output `out`
    fn example() -> Module {
        let mut m = Module::new("top");
        m.add_port("in", 1, Direction::Input);
        m.add_port("out", 1, Direction::Output);
        m.add_port("VSS", 1, Direction::None);
        m.add_signal("n", 1);
        m.add_signal("bus", 2);
        m.add_instance(
            Instance::new("u0", "INV")
                .connect("A", Connection::signal("in"))
                .connect("Y", Connection::signal("n")),
        );
        m.add_instance(
            Instance::new("u1", "INV")
                .connect("A", Connection::signal("n"))
                .connect("Y", Connection::signal("out")),
        );
        m
    }

    fn extracted_n() -> ParasiticNet {
        let mut net = ParasiticNet::new("n");
        net.add_node("n:1", Some(PinLocation::pin("u0", "Y")));
        net.add_node("n:2", None);
        net.add_node("n:3", Some(PinLocation::pin("u1", "A")));
        net.add_resistor("n:1", "n:2", Parameter::float(12.5));
        net.add_resistor("n:2", "n:3", Parameter::float(7.0));
        net.add_ground_capacitor("n:2", Parameter::float(0.3).with_prefix(SiPrefix::Femto));
        net.add_coupling_capacitor("n:3", "in", Parameter::float(0.1).with_prefix(SiPrefix::Femto));
        net
    }

    /// Signals reachable from `start` through resistor instances
    fn reachable(m: &Module, start: &str) -> FxHashSet<String> {
        let mut ret = FxHashSet::default();
        ret.insert(start.to_owned());
        loop {
            let before = ret.len();
            for inst in &m.instances {
                if inst.module.name != "RESISTOR" {
                    continue;
                }
                let a = inst.connections["A"].to_string();
                let b = inst.connections["B"].to_string();
                if ret.contains(&a) || ret.contains(&b) {
                    ret.insert(a);
                    ret.insert(b);
                }
            }
            if ret.len() == before {
                return ret;
            }
        }
    }

    #[test]
    fn test_attach() {
        let m = example();
        let res = attach(&m, &[extracted_n()], "VSS");
        assert!(res.failures.is_empty());
        assert_eq!(res.attached, vec!["n"]);
        let r = &res.module;
        r.check().unwrap();
        assert!(r.has_signal("n_p1"));
        assert!(r.has_signal("n_p2"));
        assert_eq!(
            r.instance("u0").unwrap().connections["Y"],
            Connection::signal("n")
        );
        assert_eq!(
            r.instance("u1").unwrap().connections["A"],
            Connection::signal("n_p2")
        );
        let nb_res = r.instances.iter().filter(|i| i.module.name == "RESISTOR").count();
        let nb_cap = r.instances.iter().filter(|i| i.module.name == "CAPACITOR").count();
        assert_eq!((nb_res, nb_cap), (2, 2));
        let coupling = r.instance("cpar_n_1").unwrap();
        assert_eq!(coupling.connections["B"], Connection::signal("in"));
        assert_eq!(
            coupling.parameters["capacitance"],
            Parameter::float(0.1).with_prefix(SiPrefix::Femto)
        );
        let nodes = reachable(r, "n");
        for name in ["n", "n_p1", "n_p2"] {
            assert!(nodes.contains(name));
        }
        // Input untouched
        assert_eq!(m, example());
    }

    #[test]
    fn test_disconnected_rejected() {
        let mut net = extracted_n();
        net.resistors.pop();
        let res = attach(&example(), &[net], "VSS");
        assert!(res.attached.is_empty());
        assert_eq!(res.failures.len(), 1);
        assert!(matches!(
            &res.failures[0].1,
            Error::DisconnectedNet { nodes, .. } if nodes == &vec!["n:3".to_owned()]
        ));
        assert_eq!(res.module, example());
    }

    #[test]
    fn test_endpoints() {
        let mut net = extracted_n();
        net.nodes[2].location = None;
        let res = attach(&example(), &[net], "VSS");
        assert!(matches!(
            &res.failures[0].1,
            Error::MissingEndpoint { endpoint, .. } if endpoint == "u1:A"
        ));

        let mut net = extracted_n();
        net.nodes[1].location = Some(PinLocation::pin("u1", "Y"));
        let res = attach(&example(), &[net], "VSS");
        assert!(matches!(&res.failures[0].1, Error::UnknownEndpoint { .. }));
    }

    #[test]
    fn test_bus_and_unknown_net() {
        let mut bus = ParasiticNet::new("bus");
        bus.add_node("b", None);
        let mut missing = ParasiticNet::new("nowhere");
        missing.add_node("x", None);
        let res = attach(&example(), &[bus, missing, extracted_n()], "VSS");
        assert_eq!(res.attached, vec!["n"]);
        assert_eq!(res.failures.len(), 2);
        assert!(matches!(&res.failures[0].1, Error::UnsupportedBus { width: 2, .. }));
        assert!(matches!(&res.failures[1].1, Error::UnknownSignal { .. }));
    }

    #[test]
    fn test_coupling_to_rejected_net() {
        // Net `out` is disconnected, so `n` cannot couple to its interior node
        let mut out = ParasiticNet::new("out");
        out.add_node("out:1", Some(PinLocation::Port));
        out.add_node("out:2", Some(PinLocation::pin("u1", "Y")));
        let mut n = extracted_n();
        n.add_coupling_capacitor("n:3", "out:2", Parameter::float(1e-16));
        let res = attach(&example(), &[n.clone(), out.clone()], "VSS");
        assert!(res.attached.is_empty());
        assert!(matches!(&res.failures[0].1, Error::UnresolvedCouplingNode { node, .. } if node == "out:2"));
        assert!(matches!(&res.failures[1].1, Error::DisconnectedNet { .. }));

        // Once connected, the coupling resolves to the node of the other net
        out.add_resistor("out:1", "out:2", Parameter::float(3.0));
        let res = attach(&example(), &[n, out], "VSS");
        assert!(res.failures.is_empty());
        let coupling = res.module.instance("cpar_n_2").unwrap();
        assert_eq!(coupling.connections["B"], Connection::signal("out_p1"));
        assert_eq!(
            res.module.instance("u1").unwrap().connections["Y"],
            Connection::signal("out_p1")
        );
    }

    #[test]
    fn test_ground_port_added() {
        let mut m = example();
        m.ports.retain(|p| p.name() != "VSS");
        let res = attach(&m, &[extracted_n()], "GND");
        assert_eq!(res.module.ports[0].name(), "GND");
        assert!(res.module.check().is_ok());
    }
}
