//! Read and write packages, parasitic networks, manifests and simulator outputs
//!
//! The model files are JSON. Simulator outputs are read from Touchstone sweeps and from
//! column print files.

mod prn;
mod touchstone;

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use prn::{read_prn, Trace};
pub use touchstone::{read_touchstone, NetworkParameter, Sweep};

use crate::circuit::{Definition, Package};
use crate::parasitics::ParasiticNet;
use crate::testbench::Manifest;
use crate::{Error, Result};

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let f = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(f))?)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut w, value)?;
    w.write_all(b"\n")?;
    w.flush()?;
    Ok(())
}

/// Read a package
pub fn read_package(path: &Path) -> Result<Package> {
    read_json(path)
}

/// Write a package; reading it back gives an identical package
pub fn write_package(path: &Path, package: &Package) -> Result<()> {
    write_json(path, package)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DefinitionFile {
    Package(Package),
    Definitions(Vec<Definition>),
}

/// Read the definitions contributed by a source, given as a package or as a list of definitions
pub fn read_definitions(path: &Path) -> Result<Vec<Definition>> {
    match read_json(path)? {
        DefinitionFile::Package(p) => Ok(p.definitions().to_vec()),
        DefinitionFile::Definitions(d) => Ok(d),
    }
}

/// Read extracted parasitic networks
pub fn read_parasitics(path: &Path) -> Result<Vec<ParasiticNet>> {
    read_json(path)
}

/// Write extracted parasitic networks
pub fn write_parasitics(path: &Path, nets: &[ParasiticNet]) -> Result<()> {
    write_json(path, &nets)
}

/// Read a test manifest
pub fn read_manifest(path: &Path) -> Result<Manifest> {
    read_json(path)
}

/// Write a test manifest
pub fn write_manifest(path: &Path, manifest: &Manifest) -> Result<()> {
    write_json(path, manifest)
}

fn open_output(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::MissingOutput(path.to_owned()),
        _ => Error::Io(e),
    })
}

/// Read a Touchstone output file; a missing file is reported as a missing output
pub fn read_touchstone_file(path: &Path) -> Result<Sweep> {
    read_touchstone(open_output(path)?, path)
}

/// Read a print output file; a missing file is reported as a missing output
pub fn read_prn_file(path: &Path) -> Result<Trace> {
    read_prn(open_output(path)?, path)
}
