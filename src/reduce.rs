//! Reduce simulator outputs to capacitance and delay measurements
//!
//! Each manifest entry is reduced on its own: a missing, truncated or unusable output is
//! recorded as a failure of that entry and the others proceed.

use std::f64::consts::PI;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use kdam::{tqdm, BarExt};
use num_complex::Complex64;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ReduceConfig;
use crate::io::{read_prn_file, read_touchstone_file, NetworkParameter, Sweep, Trace};
use crate::testbench::{Manifest, ManifestEntry, TestIntent};
use crate::{Error, Result};

/// Kind of a measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementKind {
    /// Input capacitance in farads
    Capacitance,
    /// Propagation delay in seconds
    Delay,
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasurementKind::Capacitance => write!(f, "capacitance"),
            MeasurementKind::Delay => write!(f, "delay"),
        }
    }
}

/// Confidence in a measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// The data behaves as expected
    Nominal,
    /// A value was extracted, but the data is noisy or inconsistent
    Degraded,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::Nominal => write!(f, "nominal"),
            Confidence::Degraded => write!(f, "degraded"),
        }
    }
}

/// A scalar extracted from one simulator output
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// Module under test
    pub module: String,
    /// Instrumented port bit
    pub target: String,
    /// Observed output bit, for delays
    pub observed: Option<String>,
    /// Kind of measurement
    pub kind: MeasurementKind,
    /// Value in SI units
    pub value: f64,
    /// Confidence in the value
    pub confidence: Confidence,
    /// Why the confidence is degraded
    pub note: String,
}

/// An entry, or one output of an entry, that could not be reduced
#[derive(Debug)]
pub struct Failure {
    /// Simulator output
    pub output: PathBuf,
    /// Module under test
    pub module: String,
    /// Instrumented port bit
    pub target: String,
    /// Observed output bit, when only this output failed
    pub observed: Option<String>,
    /// Kind of measurement that was expected
    pub kind: MeasurementKind,
    /// Cause
    pub error: Error,
}

/// Measurements and failures of a manifest
#[derive(Debug, Default)]
pub struct Reduction {
    /// Successful measurements, in manifest order
    pub measurements: Vec<Measurement>,
    /// Failures, in manifest order
    pub failures: Vec<Failure>,
}

impl Reduction {
    /// Number of degraded measurements
    pub fn nb_degraded(&self) -> usize {
        self.measurements
            .iter()
            .filter(|m| m.confidence == Confidence::Degraded)
            .count()
    }
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} measurements ({} degraded), {} failures",
            self.measurements.len(),
            self.nb_degraded(),
            self.failures.len()
        )
    }
}

/// Capacitance fitted on a sweep
#[derive(Debug, Clone, PartialEq)]
pub struct CapacitanceFit {
    /// Capacitance in farads
    pub value: f64,
    /// Confidence in the fit
    pub confidence: Confidence,
    /// Reasons for a degraded confidence
    pub note: String,
}

/// Admittance at each frequency of a sweep, with the points that cannot be used removed
fn admittances(sweep: &Sweep) -> Result<Vec<(f64, Complex64)>> {
    let invert = match sweep.parameter {
        NetworkParameter::Y => false,
        NetworkParameter::Z => true,
        NetworkParameter::S => {
            return Err(Error::Invalid(
                "scattering parameters cannot be reduced to a capacitance".to_owned(),
            ))
        }
    };
    Ok(sweep
        .frequencies
        .iter()
        .zip(sweep.values.iter())
        .map(|(f, v)| (2.0 * PI * f, if invert { v.inv() } else { *v }))
        .filter(|(w, y)| *w > 0.0 && y.is_finite())
        .collect())
}

/// Fit a capacitance through the origin of the imaginary admittance against the pulsation
///
/// The fit is degraded when it rests on a single point, when it is not positive, when the
/// imaginary admittance does not increase with frequency, or when the capacitances of the
/// individual points spread more than `tolerance` around their mean.
pub fn fit_capacitance(sweep: &Sweep, tolerance: f64) -> Result<CapacitanceFit> {
    let points = admittances(sweep)?;
    if points.is_empty() {
        return Err(Error::Invalid("no usable frequency point".to_owned()));
    }
    let num: f64 = points.iter().map(|(w, y)| w * y.im).sum();
    let den: f64 = points.iter().map(|(w, _)| w * w).sum();
    let value = num / den;

    let mut reasons = Vec::new();
    if points.len() == 1 {
        reasons.push("single frequency point".to_owned());
    }
    if value <= 0.0 {
        reasons.push("non-positive capacitance".to_owned());
    }
    if points.windows(2).any(|w| w[1].1.im < w[0].1.im) {
        reasons.push("admittance not monotonic in frequency".to_owned());
    }
    if points.len() > 1 && value != 0.0 {
        let per_point = points.iter().map(|(w, y)| y.im / w).collect::<Vec<_>>();
        let mean = per_point.iter().sum::<f64>() / per_point.len() as f64;
        let variance = per_point.iter().map(|c| (c - mean).powi(2)).sum::<f64>()
            / per_point.len() as f64;
        let spread = variance.sqrt() / mean.abs();
        if spread > tolerance {
            reasons.push(format!("spread {:.3} above tolerance {}", spread, tolerance));
        }
    }
    let confidence = if reasons.is_empty() {
        Confidence::Nominal
    } else {
        Confidence::Degraded
    };
    Ok(CapacitanceFit {
        value,
        confidence,
        note: reasons.join("; "),
    })
}

/// Time at which the samples first cross the threshold in the given direction
///
/// The crossing point is interpolated linearly between the samples around it.
pub fn find_crossing(times: &[f64], values: &[f64], threshold: f64, rising: bool) -> Option<f64> {
    for i in 1..values.len().min(times.len()) {
        let (v0, v1) = (values[i - 1], values[i]);
        let (t0, t1) = (times[i - 1], times[i]);
        let crossing = if rising {
            v0 < threshold && v1 >= threshold
        } else {
            v0 > threshold && v1 <= threshold
        };
        if crossing {
            if (v1 - v0).abs() < 1e-30 {
                return Some(t0);
            }
            let alpha = (threshold - v0) / (v1 - v0);
            return Some(t0 + alpha * (t1 - t0));
        }
    }
    None
}

/// Midpoint crossing of a trace in the direction of its swing
fn transition(times: &[f64], values: &[f64], name: &str, min_swing: f64) -> Result<f64> {
    let (first, last) = match (values.first(), values.last()) {
        (Some(f), Some(l)) => (*f, *l),
        _ => return Err(Error::NoTransition(name.to_owned())),
    };
    if (last - first).abs() < min_swing {
        return Err(Error::NoTransition(name.to_owned()));
    }
    find_crossing(times, values, 0.5 * (first + last), last > first)
        .ok_or_else(|| Error::NoTransition(name.to_owned()))
}

fn column(trace: &Trace, name: &str, output: &Path) -> Result<Vec<f64>> {
    trace.column(name).ok_or_else(|| Error::MalformedOutput {
        file: output.to_owned(),
        reason: format!("no trace for {name}"),
    })
}

/// Delay from the stimulus to each observed output
///
/// A failure of the stimulus fails every output; a failure of one output leaves the others.
pub fn measure_delays(
    trace: &Trace,
    target: &str,
    observed: &[String],
    min_swing: f64,
    output: &Path,
) -> Result<Vec<(String, Result<f64>)>> {
    let times = trace.time();
    let stimulus = column(trace, target, output)?;
    let start = transition(&times, &stimulus, target, min_swing)?;
    Ok(observed
        .iter()
        .map(|o| {
            let delay = column(trace, o, output)
                .and_then(|values| transition(&times, &values, o, min_swing))
                .map(|t| t - start);
            (o.clone(), delay)
        })
        .collect())
}

fn entry_kind(entry: &ManifestEntry) -> MeasurementKind {
    match entry.intent {
        TestIntent::InputCapacitance => MeasurementKind::Capacitance,
        TestIntent::Delay => MeasurementKind::Delay,
    }
}

fn failure(entry: &ManifestEntry, output: &Path, observed: Option<String>, error: Error) -> Failure {
    warn!(
        "Failed to reduce {} of {} ({}): {}",
        entry.intent, entry.target, entry.module, error
    );
    Failure {
        output: output.to_owned(),
        module: entry.module.clone(),
        target: entry.target.clone(),
        observed,
        kind: entry_kind(entry),
        error,
    }
}

fn reduce_entry(entry: &ManifestEntry, base_dir: &Path, config: &ReduceConfig, ret: &mut Reduction) {
    let output = base_dir.join(&entry.output);
    match entry.intent {
        TestIntent::InputCapacitance => {
            match read_touchstone_file(&output).and_then(|s| fit_capacitance(&s, config.tolerance)) {
                Ok(fit) => {
                    if fit.confidence == Confidence::Degraded {
                        warn!(
                            "Degraded capacitance of {} ({}): {}",
                            entry.target, entry.module, fit.note
                        );
                    }
                    ret.measurements.push(Measurement {
                        module: entry.module.clone(),
                        target: entry.target.clone(),
                        observed: None,
                        kind: MeasurementKind::Capacitance,
                        value: fit.value,
                        confidence: fit.confidence,
                        note: fit.note,
                    })
                }
                Err(e) => ret.failures.push(failure(entry, &output, None, e)),
            }
        }
        TestIntent::Delay => {
            let delays = read_prn_file(&output).and_then(|t| {
                measure_delays(&t, &entry.target, &entry.observed, config.min_swing, &output)
            });
            match delays {
                Ok(delays) => {
                    for (o, d) in delays {
                        match d {
                            Ok(value) => ret.measurements.push(Measurement {
                                module: entry.module.clone(),
                                target: entry.target.clone(),
                                observed: Some(o),
                                kind: MeasurementKind::Delay,
                                value,
                                confidence: Confidence::Nominal,
                                note: String::new(),
                            }),
                            Err(e) => ret.failures.push(failure(entry, &output, Some(o), e)),
                        }
                    }
                }
                Err(e) => ret.failures.push(failure(entry, &output, None, e)),
            }
        }
    }
}

/// Reduce every entry of a manifest; outputs are looked up relative to `base_dir`
pub fn reduce(manifest: &Manifest, base_dir: &Path, config: &ReduceConfig) -> Result<Reduction> {
    let mut ret = Reduction::default();
    let mut progress = tqdm!(total = manifest.len());
    progress.set_description("Reduction");
    for entry in &manifest.entries {
        reduce_entry(entry, base_dir, config, &mut ret);
        progress.update(1)?;
    }
    progress.refresh()?;
    info!("Reduced {} entries: {}", manifest.len(), ret);
    Ok(ret)
}

#[derive(Serialize)]
struct Row<'a> {
    module: &'a str,
    target: &'a str,
    observed: &'a str,
    kind: MeasurementKind,
    value: Option<f64>,
    confidence: &'a str,
    note: String,
}

/// Write a reduction as CSV, one row per measurement then one per failure
///
/// Failures have no value and a `failed` confidence; their note holds the error.
pub fn write_csv<W: Write>(reduction: &Reduction, w: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(w);
    for m in &reduction.measurements {
        writer.serialize(Row {
            module: &m.module,
            target: &m.target,
            observed: m.observed.as_deref().unwrap_or(""),
            kind: m.kind,
            value: Some(m.value),
            confidence: match m.confidence {
                Confidence::Nominal => "nominal",
                Confidence::Degraded => "degraded",
            },
            note: m.note.clone(),
        })?;
    }
    for f in &reduction.failures {
        writer.serialize(Row {
            module: &f.module,
            target: &f.target,
            observed: f.observed.as_deref().unwrap_or(""),
            kind: f.kind,
            value: None,
            confidence: "failed",
            note: f.error.to_string(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Write a reduction as a CSV file
pub fn write_csv_file(reduction: &Reduction, path: &Path) -> Result<()> {
    write_csv(reduction, std::fs::File::create(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sweep(parameter: NetworkParameter, points: &[(f64, Complex64)]) -> Sweep {
        Sweep {
            parameter,
            frequencies: points.iter().map(|p| p.0).collect(),
            values: points.iter().map(|p| p.1).collect(),
        }
    }

    fn ideal_admittance(c: f64, f: f64) -> Complex64 {
        Complex64::new(0.0, 2.0 * PI * f * c)
    }

    #[test]
    fn test_ideal_capacitance() {
        let c = 2e-15;
        let points = [1e3, 1e4, 1e5, 1e6]
            .iter()
            .map(|f| (*f, ideal_admittance(c, *f)))
            .collect::<Vec<_>>();
        let fit = fit_capacitance(&sweep(NetworkParameter::Y, &points), 0.05).unwrap();
        assert!((fit.value - c).abs() / c < 1e-9);
        assert_eq!(fit.confidence, Confidence::Nominal);
        assert!(fit.note.is_empty());

        let points = points
            .iter()
            .map(|(f, y)| (*f, y.inv()))
            .collect::<Vec<_>>();
        let fit = fit_capacitance(&sweep(NetworkParameter::Z, &points), 0.05).unwrap();
        assert!((fit.value - c).abs() / c < 1e-9);
        assert_eq!(fit.confidence, Confidence::Nominal);
    }

    #[test]
    fn test_degraded_capacitance() {
        let c = 1e-12;
        let single = [(1e6, ideal_admittance(c, 1e6))];
        let fit = fit_capacitance(&sweep(NetworkParameter::Y, &single), 0.05).unwrap();
        assert_eq!(fit.confidence, Confidence::Degraded);
        assert!((fit.value - c).abs() / c < 1e-9);

        let noisy = [
            (1e3, ideal_admittance(c, 1e3)),
            (1e4, ideal_admittance(3.0 * c, 1e4)),
            (1e5, ideal_admittance(c, 1e5)),
        ];
        let fit = fit_capacitance(&sweep(NetworkParameter::Y, &noisy), 0.05).unwrap();
        assert_eq!(fit.confidence, Confidence::Degraded);
        assert!(fit.value > 0.0);

        let non_monotonic = [
            (1e3, ideal_admittance(c, 1e3)),
            (1e4, ideal_admittance(c / 20.0, 1e4)),
        ];
        let fit = fit_capacitance(&sweep(NetworkParameter::Y, &non_monotonic), 10.0).unwrap();
        assert_eq!(fit.confidence, Confidence::Degraded);
        assert!(fit.note.contains("monotonic"));

        let inductive = [
            (1e3, ideal_admittance(-c, 1e3)),
            (1e4, ideal_admittance(-c, 1e4)),
        ];
        let fit = fit_capacitance(&sweep(NetworkParameter::Y, &inductive), 0.05).unwrap();
        assert_eq!(fit.confidence, Confidence::Degraded);
    }

    #[test]
    fn test_scattering_rejected() {
        let s = sweep(NetworkParameter::S, &[(1e3, Complex64::new(1.0, 0.0))]);
        assert!(fit_capacitance(&s, 0.05).is_err());
    }

    #[test]
    fn test_find_crossing() {
        let t = [0.0, 1.0, 2.0, 3.0];
        let v = [0.0, 0.0, 1.0, 1.0];
        assert_eq!(find_crossing(&t, &v, 0.5, true), Some(1.5));
        assert_eq!(find_crossing(&t, &v, 0.5, false), None);
        let v = [1.0, 0.5, 0.0, 0.0];
        assert_eq!(find_crossing(&t, &v, 0.25, false), Some(1.5));
    }

    /// Ramp on the input, first-order response on the outputs
    fn rc_trace(taus: &[f64], falling: bool) -> Trace {
        let mut columns = vec!["TIME".to_owned(), "V(a)".to_owned()];
        for i in 0..taus.len() {
            columns.push(format!("V(y{i})"));
        }
        let (t0, slew, vdd) = (100e-12, 10e-12, 1.8);
        let mut rows = Vec::new();
        for k in 0..=1000 {
            let t = k as f64 * 0.5e-12;
            let input = vdd * ((t - t0) / slew).clamp(0.0, 1.0);
            let mut row = vec![t, input];
            for tau in taus {
                let rise = if t > t0 {
                    vdd * (1.0 - (-(t - t0) / tau).exp())
                } else {
                    0.0
                };
                row.push(if falling { vdd - rise } else { rise });
            }
            rows.push(row);
        }
        Trace { columns, rows }
    }

    #[test]
    fn test_delay_increases_with_load() {
        let r = 1e3;
        let loads = (1..=10).map(|k| k as f64 * 1e-15).collect::<Vec<_>>();
        let taus = loads.iter().map(|c| r * c).collect::<Vec<_>>();
        let observed = (0..taus.len()).map(|i| format!("y{i}")).collect::<Vec<_>>();
        for falling in [false, true] {
            let trace = rc_trace(&taus, falling);
            let delays = measure_delays(&trace, "a", &observed, 0.05, Path::new("t.prn")).unwrap();
            let delays = delays
                .into_iter()
                .map(|(_, d)| d.unwrap())
                .collect::<Vec<_>>();
            for w in delays.windows(2) {
                assert!(w[1] >= w[0]);
            }
            // Delay from the input midpoint to tau ln 2 after the edge start
            let expected = taus[0] * 2f64.ln() - 5e-12;
            assert!((delays[0] - expected).abs() < 0.2e-12);
        }
    }

    #[test]
    fn test_output_without_swing() {
        let mut trace = rc_trace(&[1e-12], false);
        trace.columns.push("V(flat)".to_owned());
        for row in &mut trace.rows {
            row.push(1.8);
        }
        let observed = vec!["y0".to_owned(), "flat".to_owned(), "gone".to_owned()];
        let delays = measure_delays(&trace, "a", &observed, 0.05, Path::new("t.prn")).unwrap();
        assert!(delays[0].1.is_ok());
        assert!(matches!(delays[1].1, Err(Error::NoTransition(_))));
        assert!(matches!(delays[2].1, Err(Error::MalformedOutput { .. })));

        assert!(matches!(
            measure_delays(&trace, "flat", &observed, 0.05, Path::new("t.prn")),
            Err(Error::NoTransition(_))
        ));
    }

    fn entry(output: &str, intent: TestIntent, observed: &[&str]) -> ManifestEntry {
        ManifestEntry {
            file: PathBuf::from(format!("{output}.sp")),
            output: PathBuf::from(output),
            module: "top".to_owned(),
            target: "a".to_owned(),
            intent,
            observed: observed.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_reduce_continues_after_failures() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("cap.ts"),
            "# Hz Y RI R 50\n[Network Data]\n1000 0 6.283185307179586e-12\n10000 0 6.283185307179586e-11\n[End]\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("cut.ts"), "# Hz Y RI\n[Network Data]\n1000 0 1e-12\n")
            .unwrap();
        std::fs::write(
            dir.path().join("delay.prn"),
            "TIME V(a) V(y) V(z)\n0 0 0 0\n1e-10 1.8 0 0\n2e-10 1.8 1.8 0\nEnd\n",
        )
        .unwrap();
        let manifest = Manifest {
            entries: vec![
                entry("missing.ts", TestIntent::InputCapacitance, &[]),
                entry("cap.ts", TestIntent::InputCapacitance, &[]),
                entry("cut.ts", TestIntent::InputCapacitance, &[]),
                entry("delay.prn", TestIntent::Delay, &["y", "z"]),
            ],
        };
        let r = reduce(&manifest, dir.path(), &ReduceConfig::default()).unwrap();
        assert_eq!(r.measurements.len(), 2);
        assert_eq!(r.measurements[0].kind, MeasurementKind::Capacitance);
        assert!((r.measurements[0].value - 1e-15).abs() < 1e-24);
        assert_eq!(r.measurements[1].kind, MeasurementKind::Delay);
        assert_eq!(r.measurements[1].observed.as_deref(), Some("y"));
        assert!((r.measurements[1].value - 1e-10).abs() < 1e-20);

        assert_eq!(r.failures.len(), 3);
        assert!(matches!(r.failures[0].error, Error::MissingOutput(_)));
        assert!(matches!(r.failures[1].error, Error::TruncatedOutput(_)));
        assert!(matches!(r.failures[2].error, Error::NoTransition(_)));
        assert_eq!(r.failures[2].observed.as_deref(), Some("z"));

        let mut csv = Vec::new();
        write_csv(&r, &mut csv).unwrap();
        let csv = String::from_utf8(csv).unwrap();
        let lines = csv.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "module,target,observed,kind,value,confidence,note");
        assert!(lines[1].starts_with("top,a,,capacitance,"));
        assert!(lines[1].ends_with(",nominal,"));
        assert!(lines[2].starts_with("top,a,y,delay,"));
        assert!(lines[3].starts_with("top,a,,capacitance,,failed,missing simulator output"));
        assert!(lines[5].starts_with("top,a,z,delay,,failed,"));
    }
}
