//! Read transient traces in column print format

use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::{Error, Result};

/// Named columns of samples, one row per time point
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    /// Column names, as printed by the simulator
    pub columns: Vec<String>,
    /// Samples, one vector per row
    pub rows: Vec<Vec<f64>>,
}

impl Trace {
    /// Samples of a column
    ///
    /// The name is compared without regard to case, either exactly or as the node of a
    /// voltage column: `a` finds `V(A)`.
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let voltage = format!("v({name})");
        let i = self.columns.iter().position(|c| {
            let c = c.to_ascii_lowercase();
            c == name.to_ascii_lowercase() || c == voltage.to_ascii_lowercase()
        })?;
        Some(self.rows.iter().map(|r| r[i]).collect())
    }

    /// Time axis, the first column
    pub fn time(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r[0]).collect()
    }
}

/// Read a print file: a header row of column names, rows of numbers, and a line starting with `End`
///
/// A file without its terminating line is truncated.
pub fn read_prn<R: Read>(r: R, path: &Path) -> Result<Trace> {
    let malformed = |reason: String| Error::MalformedOutput {
        file: path.to_owned(),
        reason,
    };
    let mut columns: Option<Vec<String>> = None;
    let mut rows = Vec::new();
    let mut ended = false;
    for line in BufReader::new(r).lines() {
        let line = line?;
        let content = line.trim();
        if content.is_empty() {
            continue;
        }
        if content.starts_with("End") {
            ended = true;
            break;
        }
        match &columns {
            None => columns = Some(content.split_whitespace().map(|s| s.to_owned()).collect()),
            Some(c) => {
                let row = content
                    .split_whitespace()
                    .map(|t| {
                        t.parse::<f64>()
                            .map_err(|_| malformed(format!("invalid number {t}")))
                    })
                    .collect::<Result<Vec<f64>>>()?;
                if row.len() != c.len() {
                    return Err(malformed(format!(
                        "row of {} values for {} columns",
                        row.len(),
                        c.len()
                    )));
                }
                rows.push(row);
            }
        }
    }
    if !ended {
        return Err(Error::TruncatedOutput(path.to_owned()));
    }
    let columns = columns.ok_or_else(|| malformed("no header".to_owned()))?;
    if rows.is_empty() {
        return Err(malformed("no sample".to_owned()));
    }
    Ok(Trace { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read() {
        let text = "TIME V(A) V(Y.1)\n0 0 1.8\n1e-10 0.9 1.8\n2e-10 1.8 0\nEnd of simulation\n";
        let t = read_prn(text.as_bytes(), Path::new("t.prn")).unwrap();
        assert_eq!(t.columns, vec!["TIME", "V(A)", "V(Y.1)"]);
        assert_eq!(t.time(), vec![0.0, 1e-10, 2e-10]);
        assert_eq!(t.column("a"), Some(vec![0.0, 0.9, 1.8]));
        assert_eq!(t.column("y.1"), Some(vec![1.8, 1.8, 0.0]));
        assert_eq!(t.column("z"), None);
    }

    #[test]
    fn test_errors() {
        let text = "TIME V(A)\n0 0\n";
        assert!(matches!(
            read_prn(text.as_bytes(), Path::new("t.prn")),
            Err(Error::TruncatedOutput(_))
        ));
        let text = "TIME V(A)\n0 0 0\nEnd\n";
        assert!(matches!(
            read_prn(text.as_bytes(), Path::new("t.prn")),
            Err(Error::MalformedOutput { .. })
        ));
        let text = "TIME V(A)\nEnd\n";
        assert!(matches!(
            read_prn(text.as_bytes(), Path::new("t.prn")),
            Err(Error::MalformedOutput { .. })
        ));
    }
}
