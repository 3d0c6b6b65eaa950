//! Circuit generators and templates

/// Simple generators to test functionality
pub mod testcases {
    use crate::circuit::{
        Connection, Definition, Direction, ExternalModule, Instance, Module, Package, Parameter,
        SiPrefix,
    };

    /// Connect the supply ports of a cell to the nets of the same name
    fn with_supplies(inst: Instance) -> Instance {
        inst.connect("VPWR", Connection::signal("VPWR"))
            .connect("VGND", Connection::signal("VGND"))
    }

    /// An inverter cell, known only by its ports
    pub fn inverter() -> ExternalModule {
        let mut ret = ExternalModule::new("INV");
        ret.add_port("A", 1, Direction::Input);
        ret.add_port("VGND", 1, Direction::None);
        ret.add_port("VPWR", 1, Direction::None);
        ret.add_port("Y", 1, Direction::Output);
        ret
    }

    /// A buffer made of two inverters
    pub fn buffer() -> Module {
        let mut ret = Module::new("BUF");
        ret.add_port("A", 1, Direction::Input);
        ret.add_port("Y", 1, Direction::Output);
        ret.add_port("VPWR", 1, Direction::None);
        ret.add_port("VGND", 1, Direction::None);
        ret.add_signal("mid", 1);
        ret.add_instance(with_supplies(
            Instance::new("x0", "INV")
                .connect("A", Connection::signal("A"))
                .connect("Y", Connection::signal("mid")),
        ));
        ret.add_instance(with_supplies(
            Instance::new("x1", "INV")
                .connect("A", Connection::signal("mid"))
                .connect("Y", Connection::signal("Y")),
        ));
        ret
    }

    /// A chain of `len` buffers between input `a` and output `y`: a two-level hierarchy
    pub fn buffer_chain(len: usize) -> Package {
        assert!(len > 0);
        let mut top = Module::new("chain");
        top.add_port("a", 1, Direction::Input);
        top.add_port("y", 1, Direction::Output);
        top.add_port("VPWR", 1, Direction::None);
        top.add_port("VGND", 1, Direction::None);
        let net = |i: usize| {
            if i == 0 {
                "a".to_owned()
            } else if i == len {
                "y".to_owned()
            } else {
                format!("n{i}")
            }
        };
        for i in 1..len {
            top.add_signal(&net(i), 1);
        }
        for i in 0..len {
            top.add_instance(with_supplies(
                Instance::new(&format!("b{i}"), "BUF")
                    .connect("A", Connection::signal(&net(i)))
                    .connect("Y", Connection::signal(&net(i + 1))),
            ));
        }
        let mut ret = Package::new("chain");
        ret.insert(Definition::External(inverter()));
        ret.insert(Definition::Module(buffer()));
        ret.insert(Definition::Module(top));
        ret
    }

    /// An RC line of `len` segments from `in` to `out`, each node loaded to `gnd`
    pub fn rc_line(len: usize) -> Package {
        assert!(len > 0);
        let mut m = Module::new("rc");
        m.add_port("in", 1, Direction::Input);
        m.add_port("out", 1, Direction::Output);
        m.add_port("gnd", 1, Direction::None);
        let node = |i: usize| {
            if i == 0 {
                "in".to_owned()
            } else if i == len {
                "out".to_owned()
            } else {
                format!("n{i}")
            }
        };
        for i in 1..len {
            m.add_signal(&node(i), 1);
        }
        for i in 0..len {
            m.add_instance(
                Instance::new(&format!("r{i}"), "RESISTOR")
                    .connect("A", Connection::signal(&node(i)))
                    .connect("B", Connection::signal(&node(i + 1)))
                    .with_parameter("resistance", Parameter::int(100)),
            );
            m.add_instance(
                Instance::new(&format!("c{i}"), "CAPACITOR")
                    .connect("A", Connection::signal(&node(i + 1)))
                    .connect("B", Connection::signal("gnd"))
                    .with_parameter(
                        "capacitance",
                        Parameter::int(2).with_prefix(SiPrefix::Femto),
                    ),
            );
        }
        let mut ret = Package::new("rc");
        ret.insert(Definition::Module(m));
        ret
    }
}

/// Seeded random circuits, used to check structural properties
pub mod random {
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    use crate::circuit::{
        Connection, Definition, Direction, Instance, Module, Package, Parameter, SiPrefix,
    };

    /// A random two-level hierarchy
    ///
    /// The package holds `nb_cells` leaf modules made of resistors and capacitors, each with
    /// a 2-bit bus port and a scalar port, and a `top` module using `nb_instances` of them.
    pub fn two_level(seed: u64, nb_cells: usize, nb_instances: usize) -> Package {
        assert!(nb_cells > 0);
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut ret = Package::new("random");
        for c in 0..nb_cells {
            let mut cell = Module::new(format!("cell{c}").as_str());
            cell.add_port("p", 2, Direction::Inout);
            cell.add_port("q", 1, Direction::Inout);
            cell.add_signal("int", 1);
            let nodes = [
                Connection::slice("p", 1, 1),
                Connection::slice("p", 0, 0),
                Connection::signal("q"),
                Connection::signal("int"),
            ];
            let nb_elements = rng.gen_range(1..5);
            for e in 0..nb_elements {
                let a = rng.gen_range(0..nodes.len());
                let b = (a + rng.gen_range(1..nodes.len())) % nodes.len();
                let value = rng.gen_range(1..1000);
                let inst = if rng.gen_bool(0.5) {
                    Instance::new(&format!("r{e}"), "RESISTOR")
                        .with_parameter("resistance", Parameter::int(value))
                } else {
                    Instance::new(&format!("c{e}"), "CAPACITOR").with_parameter(
                        "capacitance",
                        Parameter::int(value).with_prefix(SiPrefix::Femto),
                    )
                };
                cell.add_instance(
                    inst.connect("A", nodes[a].clone())
                        .connect("B", nodes[b].clone()),
                );
            }
            ret.insert(Definition::Module(cell));
        }

        let mut top = Module::new("top");
        top.add_port("bus", 4, Direction::Inout);
        top.add_port("s", 1, Direction::Inout);
        top.add_signal("w", 2);
        let bus_parts = [
            Connection::slice("bus", 3, 2),
            Connection::slice("bus", 1, 0),
            Connection::signal("w"),
            Connection::concat(vec![Connection::signal("s"), Connection::slice("w", 0, 0)]),
        ];
        let scalars = [
            Connection::signal("s"),
            Connection::slice("bus", 2, 2),
            Connection::slice("w", 1, 1),
        ];
        for i in 0..nb_instances {
            let cell = rng.gen_range(0..nb_cells);
            top.add_instance(
                Instance::new(&format!("u{i}"), format!("cell{cell}").as_str())
                    .connect("p", bus_parts[rng.gen_range(0..bus_parts.len())].clone())
                    .connect("q", scalars[rng.gen_range(0..scalars.len())].clone()),
            );
        }
        ret.insert(Definition::Module(top));
        ret
    }
}

#[cfg(test)]
mod tests {
    use super::{random, testcases};
    use crate::circuit::QualifiedName;

    #[test]
    fn test_generated_packages_check() {
        for p in [
            testcases::buffer_chain(3),
            testcases::rc_line(4),
            random::two_level(1, 3, 5),
        ] {
            assert!(p.check().is_empty());
            assert!(p.unresolved_references().is_empty());
        }
    }

    #[test]
    fn test_random_is_deterministic() {
        assert_eq!(random::two_level(7, 2, 4), random::two_level(7, 2, 4));
        let p = random::two_level(7, 2, 4);
        assert_eq!(
            p.expect_module(&QualifiedName::local("top"))
                .unwrap()
                .instances
                .len(),
            4
        );
    }
}
