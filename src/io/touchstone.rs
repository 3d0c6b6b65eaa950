//! Read small-signal sweeps in Touchstone 2 format

use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use num_complex::Complex64;

use crate::{Error, Result};

/// Network parameters held by a Touchstone file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkParameter {
    /// Scattering
    S,
    /// Admittance
    Y,
    /// Impedance
    Z,
}

/// Number format of the data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataFormat {
    /// Real and imaginary parts
    RealImaginary,
    /// Magnitude and angle in degrees
    MagnitudeAngle,
    /// Magnitude in decibels and angle in degrees
    DecibelAngle,
}

/// Frequency sweep of the first parameter of a network (port 1 to port 1)
#[derive(Debug, Clone, PartialEq)]
pub struct Sweep {
    /// Kind of parameter
    pub parameter: NetworkParameter,
    /// Frequencies in hertz
    pub frequencies: Vec<f64>,
    /// Parameter value at each frequency
    pub values: Vec<Complex64>,
}

struct Options {
    frequency_scale: f64,
    parameter: NetworkParameter,
    format: DataFormat,
}

fn malformed(path: &Path, reason: String) -> Error {
    Error::MalformedOutput {
        file: path.to_owned(),
        reason,
    }
}

fn parse_options(line: &str, path: &Path) -> Result<Options> {
    let mut ret = Options {
        frequency_scale: 1e9,
        parameter: NetworkParameter::S,
        format: DataFormat::MagnitudeAngle,
    };
    let mut tokens = line.trim_start_matches('#').split_whitespace();
    while let Some(t) = tokens.next() {
        match t.to_ascii_uppercase().as_str() {
            "HZ" => ret.frequency_scale = 1.0,
            "KHZ" => ret.frequency_scale = 1e3,
            "MHZ" => ret.frequency_scale = 1e6,
            "GHZ" => ret.frequency_scale = 1e9,
            "S" => ret.parameter = NetworkParameter::S,
            "Y" => ret.parameter = NetworkParameter::Y,
            "Z" => ret.parameter = NetworkParameter::Z,
            "RI" => ret.format = DataFormat::RealImaginary,
            "MA" => ret.format = DataFormat::MagnitudeAngle,
            "DB" => ret.format = DataFormat::DecibelAngle,
            "R" => {
                tokens.next();
            }
            other => return Err(malformed(path, format!("unknown option {other}"))),
        }
    }
    Ok(ret)
}

fn to_complex(format: DataFormat, a: f64, b: f64) -> Complex64 {
    match format {
        DataFormat::RealImaginary => Complex64::new(a, b),
        DataFormat::MagnitudeAngle => Complex64::from_polar(a, b.to_radians()),
        DataFormat::DecibelAngle => Complex64::from_polar(10f64.powf(a / 20.0), b.to_radians()),
    }
}

/// Read a Touchstone 2 file
///
/// Only the first sweep is returned: a frequency that does not increase starts a new step of
/// a multi-step analysis, which is ignored. A file without its `[End]` keyword is truncated.
pub fn read_touchstone<R: Read>(r: R, path: &Path) -> Result<Sweep> {
    let mut options = None;
    let mut nb_ports = 1;
    let mut in_data = false;
    let mut ended = false;
    let mut tokens = Vec::new();
    for line in BufReader::new(r).lines() {
        let line = line?;
        let content = match line.split_once('!') {
            Some((before, _)) => before.trim(),
            None => line.trim(),
        };
        if content.is_empty() {
            continue;
        }
        if content.starts_with('#') {
            options = Some(parse_options(content, path)?);
        } else if content.starts_with('[') {
            let keyword = content.to_ascii_lowercase();
            if keyword.starts_with("[number of ports]") {
                nb_ports = content
                    .split(']')
                    .nth(1)
                    .and_then(|s| s.trim().parse::<usize>().ok())
                    .ok_or_else(|| malformed(path, "invalid number of ports".to_owned()))?;
            } else if keyword.starts_with("[network data]") {
                in_data = true;
            } else if keyword.starts_with("[end]") {
                ended = true;
                break;
            } else {
                in_data = false;
            }
        } else if in_data {
            for t in content.split_whitespace() {
                let v = t
                    .parse::<f64>()
                    .map_err(|_| malformed(path, format!("invalid number {t}")))?;
                tokens.push(v);
            }
        }
    }
    if !ended {
        return Err(Error::TruncatedOutput(path.to_owned()));
    }
    let options =
        options.ok_or_else(|| malformed(path, "missing option line".to_owned()))?;

    let record = 1 + 2 * nb_ports * nb_ports;
    if tokens.len() % record != 0 {
        return Err(malformed(
            path,
            format!("{} values do not make records of {}", tokens.len(), record),
        ));
    }
    let mut ret = Sweep {
        parameter: options.parameter,
        frequencies: Vec::new(),
        values: Vec::new(),
    };
    for chunk in tokens.chunks(record) {
        let f = chunk[0] * options.frequency_scale;
        if ret.frequencies.last().is_some_and(|last| f <= *last) {
            break;
        }
        ret.frequencies.push(f);
        ret.values.push(to_complex(options.format, chunk[1], chunk[2]));
    }
    if ret.frequencies.is_empty() {
        return Err(malformed(path, "no network data".to_owned()));
    }
    Ok(ret)
}
