use parasol::circuit::generators::testcases;
use parasol::circuit::{Definition, Package, Parameter, QualifiedName, SiPrefix};
use parasol::config::{NetsConfig, ReduceConfig, TestbenchConfig};
use parasol::deck::{DeckMode, DeckWriter};
use parasol::io::{read_manifest, read_package, write_manifest, write_package};
use parasol::merge::{Contribution, Merger};
use parasol::parasitics::{attach, ParasiticNet, PinLocation};
use parasol::reduce::{reduce, write_csv_file, Confidence, MeasurementKind};
use parasol::testbench::{write_tests, Manifest, Synthesizer, TestIntent};

/// Structural netlist and device headers of a buffer chain, as separate sources
fn sources() -> (Vec<Definition>, Vec<Definition>) {
    let chain = testcases::buffer_chain(2);
    let structural = chain
        .modules()
        .cloned()
        .map(Definition::Module)
        .collect::<Vec<_>>();
    let headers = vec![Definition::External(testcases::inverter())];
    (structural, headers)
}

fn extracted_n1() -> ParasiticNet {
    let mut net = ParasiticNet::new("n1");
    net.add_node("n1:1", Some(PinLocation::pin("b0", "Y")));
    net.add_node("n1:2", Some(PinLocation::pin("b1", "A")));
    net.add_node("n1:3", None);
    net.add_resistor("n1:1", "n1:3", Parameter::float(12.5));
    net.add_resistor("n1:3", "n1:2", Parameter::float(7.5));
    net.add_ground_capacitor("n1:3", Parameter::float(0.5).with_prefix(SiPrefix::Femto));
    net
}

#[test]
fn merge_attach_generate_reduce() {
    let dir = tempfile::tempdir().unwrap();
    let top = QualifiedName::from("chain");

    // Merge, then save and reload
    let (structural, headers) = sources();
    let mut merger = Merger::new("design");
    for d in structural {
        merger.add(Contribution::structural("chain.sp", d));
    }
    for d in headers {
        merger.add(Contribution::header("cells.hdr", d));
    }
    let (package, report) = merger.finish();
    assert!(report.warnings.is_empty());
    assert!(package.unresolved_references().is_empty());
    assert!(package.check().is_empty());
    let path = dir.path().join("merged.json");
    write_package(&path, &package).unwrap();
    let mut package: Package = read_package(&path).unwrap();

    // Refine the net between the two buffers
    let attachment = attach(package.expect_module(&top).unwrap(), &[extracted_n1()], "VGND");
    assert!(attachment.failures.is_empty());
    assert_eq!(attachment.attached, vec!["n1".to_owned()]);
    package.insert(Definition::Module(attachment.module));
    assert!(package.check().is_empty());

    let deck = DeckWriter::new(&package, DeckMode::Hierarchical)
        .module_deck(&top)
        .unwrap();
    assert!(deck.starts_with("* chain (2 subcircuits)\n"));
    let buf = deck.find(".SUBCKT BUF").unwrap();
    let chain = deck.find(".SUBCKT chain").unwrap();
    assert!(buf < chain);
    assert!(deck.contains("Rrpar_n1_"));
    assert!(deck.contains("Ccpar_n1_"));
    assert!(deck.contains("n1_p1"));
    assert!(!deck.contains(".SUBCKT INV"));

    let flat = DeckWriter::new(&package, DeckMode::Flattened)
        .module_deck(&top)
        .unwrap();
    assert_eq!(flat.matches(".SUBCKT").count(), 1);
    assert!(flat.contains("b0.mid"));

    // Generate both kinds of tests in one directory
    let nets = NetsConfig::default();
    let tb = TestbenchConfig::default();
    let synthesizer = Synthesizer::new(&package, &nets, &tb);
    let tests_dir = dir.path().join("tests");
    let mut manifest = Manifest::default();
    for intent in [TestIntent::InputCapacitance, TestIntent::Delay] {
        let decks = synthesizer.synthesize(&top, intent, &[]).unwrap();
        assert_eq!(decks.len(), 1);
        manifest
            .entries
            .extend(write_tests(&tests_dir, &decks).unwrap().entries);
    }
    let manifest_path = tests_dir.join("manifest.json");
    write_manifest(&manifest_path, &manifest).unwrap();
    let manifest = read_manifest(&manifest_path).unwrap();
    assert_eq!(manifest.len(), 2);
    for e in &manifest.entries {
        let text = std::fs::read_to_string(tests_dir.join(&e.file)).unwrap();
        assert!(text.contains("XDUT"));
        assert!(text.ends_with(".END\n"));
        assert_eq!(e.target, "a");
    }
    assert_eq!(manifest.entries[1].observed, vec!["y".to_owned()]);

    // Stand in for the simulator
    std::fs::write(
        tests_dir.join(&manifest.entries[0].output),
        "# Hz Y RI R 50\n[Network Data]\n\
         1000 0 1.2566370614359173e-11\n\
         10000 0 1.2566370614359173e-10\n\
         100000 0 1.2566370614359173e-09\n[End]\n",
    )
    .unwrap();
    std::fs::write(
        tests_dir.join(&manifest.entries[1].output),
        "TIME V(a) V(y)\n0 0 0\n1e-10 0 0\n1.1e-10 1.8 0\n1.5e-10 1.8 0.6\n2e-10 1.8 1.8\n3e-10 1.8 1.8\nEnd\n",
    )
    .unwrap();

    let reduction = reduce(&manifest, &tests_dir, &ReduceConfig::default()).unwrap();
    assert!(reduction.failures.is_empty());
    assert_eq!(reduction.measurements.len(), 2);
    let cap = &reduction.measurements[0];
    assert_eq!(cap.kind, MeasurementKind::Capacitance);
    assert_eq!(cap.confidence, Confidence::Nominal);
    assert!((cap.value - 2e-15).abs() < 1e-24);
    let delay = &reduction.measurements[1];
    assert_eq!(delay.kind, MeasurementKind::Delay);
    assert_eq!(delay.observed.as_deref(), Some("y"));
    // Input crosses at 105 ps, output at 162.5 ps
    assert!((delay.value - 57.5e-12).abs() < 1e-15);

    let csv_path = dir.path().join("results.csv");
    write_csv_file(&reduction, &csv_path).unwrap();
    let csv = std::fs::read_to_string(&csv_path).unwrap();
    assert_eq!(csv.lines().count(), 3);
    assert!(csv.contains("chain,a,y,delay,"));
}

#[test]
fn missing_outputs_are_failures() {
    let dir = tempfile::tempdir().unwrap();
    let package = testcases::buffer_chain(1);
    let nets = NetsConfig::default();
    let tb = TestbenchConfig::default();
    let decks = Synthesizer::new(&package, &nets, &tb)
        .synthesize(&QualifiedName::from("chain"), TestIntent::Delay, &[])
        .unwrap();
    let manifest = write_tests(dir.path(), &decks).unwrap();
    let reduction = reduce(&manifest, dir.path(), &ReduceConfig::default()).unwrap();
    assert!(reduction.measurements.is_empty());
    assert_eq!(reduction.failures.len(), 1);
    assert_eq!(reduction.failures[0].target, "a");
}
