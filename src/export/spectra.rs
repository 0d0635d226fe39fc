//! CSV export of derived spectra.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::ExportError;
use crate::session::SessionState;

/// CSV export options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvOptions {
    /// Add a `<label> std` column after each polygon mean
    pub include_std: bool,
    /// Start the file with `#` lines describing mode, flags and sources
    pub comments: bool,
}

struct Column<'a> {
    header: String,
    wavelengths: &'a [f64],
    values: &'a Array1<f32>,
}

/// Claims unique CSV headers, numbering repeats `label (2)`, `label (3)`, ...
#[derive(Debug, Default)]
struct HeaderSet {
    used: HashSet<String>,
    next_suffix: HashMap<String, usize>,
}

impl HeaderSet {
    fn claim(&mut self, label: &str) -> String {
        let mut header = label.to_string();
        if self.used.contains(&header) {
            let n = self.next_suffix.entry(label.to_string()).or_insert(2);
            loop {
                header = format!("{} ({})", label, n);
                *n += 1;
                if !self.used.contains(&header) {
                    break;
                }
            }
        }
        self.used.insert(header.clone());
        header
    }
}

/// Header labels with repeats renamed `label (2)`, `label (3)`, ...
///
/// A generated name never equals another label in the list.
pub fn disambiguate_labels<'a>(labels: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut headers = HeaderSet::default();
    labels.into_iter().map(|label| headers.claim(label)).collect()
}

/// Linear interpolation of `(xs, ys)` at `x`; `None` outside `xs`.
pub fn interpolate(x: f64, xs: &[f64], ys: &Array1<f32>) -> Option<f32> {
    let first = *xs.first()?;
    let last = *xs.last()?;
    if x.is_nan() || x < first || x > last || xs.len() != ys.len() {
        return None;
    }
    let upper = xs.partition_point(|&w| w < x);
    if xs[upper] == x {
        return Some(ys[upper]);
    }
    let (x0, x1) = (xs[upper - 1], xs[upper]);
    let (y0, y1) = (f64::from(ys[upper - 1]), f64::from(ys[upper]));
    if x1.is_nan() || x1 <= x0 {
        return Some(y0 as f32);
    }
    let t = (x - x0) / (x1 - x0);
    Some((y0 + t * (y1 - y0)) as f32)
}

fn write_comments<W: Write>(session: &SessionState, out: &mut W) -> std::io::Result<()> {
    writeln!(out, "# mode: {}", session.mode())?;
    let tags = session.flags().tags(session.preprocessing_config());
    let tags = if tags.is_empty() {
        "none".to_string()
    } else {
        tags.join(", ")
    };
    writeln!(out, "# preprocessing: {}", tags)?;
    if let Some(range) = session.wavelength_range() {
        writeln!(out, "# wavelength range: {}", range)?;
    }
    for slot in session.sources() {
        writeln!(out, "# source {}: {}", slot.id, slot.path.display())?;
    }
    Ok(())
}

/// Write every visible derived spectrum as CSV.
///
/// The first exported annotation defines the wavelength axis; the others are
/// interpolated onto it. Returns the number of data columns.
pub fn write_spectra<W: Write>(
    session: &SessionState,
    mut out: W,
    options: &CsvOptions,
) -> Result<usize, ExportError> {
    let exported: Vec<_> = session
        .annotations()
        .iter()
        .filter(|a| a.visible)
        .filter_map(|a| a.derived.spectrum().map(|s| (a, s)))
        .collect();
    if exported.is_empty() {
        return Err(ExportError::NothingToExport);
    }

    let mut headers = HeaderSet::default();
    headers.claim("wavelength");
    let mut columns = Vec::new();
    for (annotation, (wavelengths, values)) in &exported {
        let label = headers.claim(annotation.display_label());
        let std = annotation.derived.std().filter(|_| options.include_std);
        columns.push(Column {
            header: label.clone(),
            wavelengths,
            values,
        });
        if let Some(std) = std {
            columns.push(Column {
                header: headers.claim(&format!("{} std", label)),
                wavelengths,
                values: std,
            });
        }
    }

    if options.comments {
        write_comments(session, &mut out)?;
    }

    let axis = columns[0].wavelengths;
    let mut writer = csv::Writer::from_writer(out);
    let mut header = vec!["wavelength".to_string()];
    header.extend(columns.iter().map(|c| c.header.clone()));
    writer.write_record(&header)?;

    for (i, &wavelength) in axis.iter().enumerate() {
        let mut record = Vec::with_capacity(columns.len() + 1);
        record.push(wavelength.to_string());
        for column in &columns {
            let value = if column.wavelengths == axis {
                Some(column.values[i])
            } else {
                interpolate(wavelength, column.wavelengths, column.values)
            };
            record.push(value.map(|v| v.to_string()).unwrap_or_default());
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(columns.len())
}

/// Export spectra to a CSV file.
pub fn export_csv(
    session: &SessionState,
    path: &Path,
    options: &CsvOptions,
) -> Result<usize, ExportError> {
    let file = BufWriter::new(File::create(path)?);
    let columns = write_spectra(session, file, options)?;
    log::info!("Exported {} spectra columns to {:?}", columns, path);
    Ok(columns)
}
