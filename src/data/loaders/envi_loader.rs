//! Loader for ENVI header + raw payload cubes.
//!
//! The `.hdr` file is a text header of `key = value` lines, with
//! `{ ... }` values allowed to span lines. The payload is a flat binary file
//! in band-sequential (BSQ), band-interleaved-by-line (BIL) or
//! band-interleaved-by-pixel (BIP) order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ndarray::Array3;

use super::Sample;
use crate::data::loader::{CubeLoader, RawCube};
use crate::error::SourceError;

/// Loader for ENVI `.hdr` files.
pub struct EnviLoader;

/// Extensions tried for the payload when the header names none.
const PAYLOAD_EXTENSIONS: &[&str] = &["raw", "img", "dat", "bsq", "bil", "bip"];

/// ENVI `data type` codes supported by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataType {
    U8,
    I16,
    I32,
    F32,
    F64,
    U16,
}

impl DataType {
    fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::U8),
            2 => Some(Self::I16),
            3 => Some(Self::I32),
            4 => Some(Self::F32),
            5 => Some(Self::F64),
            12 => Some(Self::U16),
            _ => None,
        }
    }

    fn size(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interleave {
    Bsq,
    Bil,
    Bip,
}

/// Parsed ENVI header fields.
#[derive(Debug)]
struct EnviHeader {
    samples: usize,
    lines: usize,
    bands: usize,
    data_type: DataType,
    interleave: Interleave,
    big_endian: bool,
    header_offset: u64,
    wavelengths: Option<Vec<f64>>,
    data_file: Option<String>,
}

impl EnviHeader {
    fn parse(text: &str, path: &Path) -> Result<Self, SourceError> {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
        match lines.next() {
            Some(first) if first.starts_with("ENVI") => {}
            _ => return Err(SourceError::malformed(path, "missing ENVI signature")),
        }

        let mut fields: HashMap<String, String> = HashMap::new();
        let mut pending: Option<(String, String)> = None;

        for line in lines {
            if let Some((key, mut value)) = pending.take() {
                value.push(' ');
                value.push_str(line);
                if line.contains('}') {
                    fields.insert(key, value);
                } else {
                    pending = Some((key, value));
                }
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                log::trace!("Ignoring header line without '=': {}", line);
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim().to_string();
            if value.starts_with('{') && !value.contains('}') {
                pending = Some((key, value));
            } else {
                fields.insert(key, value);
            }
        }
        if let Some((key, _)) = pending {
            return Err(SourceError::malformed(
                path,
                format!("unterminated '{{' in field '{}'", key),
            ));
        }

        let required = |key: &str| -> Result<usize, SourceError> {
            let value = fields
                .get(key)
                .ok_or_else(|| SourceError::malformed(path, format!("missing '{}'", key)))?;
            value.parse::<usize>().map_err(|_| {
                SourceError::malformed(path, format!("invalid value '{}' for '{}'", value, key))
            })
        };

        let samples = required("samples")?;
        let lines = required("lines")?;
        let bands = required("bands")?;
        let type_code = required("data type")?;

        if bands == 0 {
            return Err(SourceError::ZeroBands {
                path: path.to_path_buf(),
            });
        }
        if samples == 0 || lines == 0 {
            return Err(SourceError::malformed(path, "image has zero samples or lines"));
        }

        let data_type = u32::try_from(type_code)
            .ok()
            .and_then(DataType::from_code)
            .ok_or_else(|| {
                SourceError::malformed(path, format!("unsupported data type {}", type_code))
            })?;

        let interleave = match fields
            .get("interleave")
            .map(|v| v.to_lowercase())
            .as_deref()
        {
            None | Some("bsq") => Interleave::Bsq,
            Some("bil") => Interleave::Bil,
            Some("bip") => Interleave::Bip,
            Some(other) => {
                return Err(SourceError::malformed(
                    path,
                    format!("unknown interleave '{}'", other),
                ));
            }
        };

        let big_endian = match fields.get("byte order").map(String::as_str) {
            None | Some("0") => false,
            Some("1") => true,
            Some(other) => {
                return Err(SourceError::malformed(
                    path,
                    format!("invalid byte order '{}'", other),
                ));
            }
        };

        let header_offset = match fields.get("header offset") {
            Some(v) => v.parse::<u64>().map_err(|_| {
                SourceError::malformed(path, format!("invalid header offset '{}'", v))
            })?,
            None => 0,
        };

        let wavelengths = fields
            .get("wavelength")
            .map(|v| parse_list(v, path))
            .transpose()?;

        let data_file = fields.get("data file").map(|v| v.trim().to_string());

        Ok(Self {
            samples,
            lines,
            bands,
            data_type,
            interleave,
            big_endian,
            header_offset,
            wavelengths,
            data_file,
        })
    }

    /// Payload size in bytes after the header offset, or `None` on overflow.
    fn payload_bytes(&self) -> Option<u64> {
        let count = self
            .samples
            .checked_mul(self.lines)?
            .checked_mul(self.bands)?
            .checked_mul(self.data_type.size())?;
        u64::try_from(count).ok()?.checked_add(self.header_offset)
    }
}

/// Parse a `{ a, b, c }` list of floats.
fn parse_list(value: &str, path: &Path) -> Result<Vec<f64>, SourceError> {
    value
        .trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .map_err(|_| SourceError::malformed(path, format!("invalid wavelength '{}'", s)))
        })
        .collect()
}

/// Locate the binary payload that belongs to a header.
fn payload_path(header_path: &Path, header: &EnviHeader) -> Result<PathBuf, SourceError> {
    let dir = header_path.parent().unwrap_or_else(|| Path::new(""));
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(name) = &header.data_file {
        let named = PathBuf::from(name);
        candidates.push(if named.is_absolute() {
            named
        } else {
            dir.join(named)
        });
    }
    candidates.push(header_path.with_extension(""));
    candidates.extend(
        PAYLOAD_EXTENSIONS
            .iter()
            .map(|ext| header_path.with_extension(ext)),
    );

    candidates
        .iter()
        .find(|c| c.is_file())
        .cloned()
        .ok_or_else(|| SourceError::NotFound {
            path: candidates
                .into_iter()
                .next()
                .unwrap_or_else(|| header_path.to_path_buf()),
        })
}

fn decode<T: Sample, const N: usize>(
    bytes: &[u8],
    big_endian: bool,
    convert: fn([u8; N], bool) -> T,
) -> Vec<f32> {
    bytes
        .chunks_exact(N)
        .map(|chunk| {
            let mut buf = [0u8; N];
            buf.copy_from_slice(chunk);
            convert(buf, big_endian).to_f32()
        })
        .collect()
}

fn decode_samples(bytes: &[u8], data_type: DataType, big_endian: bool) -> Vec<f32> {
    match data_type {
        DataType::U8 => bytes.iter().map(|&b| b.to_f32()).collect(),
        DataType::I16 => decode::<i16, 2>(bytes, big_endian, |b, be| {
            if be { i16::from_be_bytes(b) } else { i16::from_le_bytes(b) }
        }),
        DataType::U16 => decode::<u16, 2>(bytes, big_endian, |b, be| {
            if be { u16::from_be_bytes(b) } else { u16::from_le_bytes(b) }
        }),
        DataType::I32 => decode::<i32, 4>(bytes, big_endian, |b, be| {
            if be { i32::from_be_bytes(b) } else { i32::from_le_bytes(b) }
        }),
        DataType::F32 => decode::<f32, 4>(bytes, big_endian, |b, be| {
            if be { f32::from_be_bytes(b) } else { f32::from_le_bytes(b) }
        }),
        DataType::F64 => decode::<f64, 8>(bytes, big_endian, |b, be| {
            if be { f64::from_be_bytes(b) } else { f64::from_le_bytes(b) }
        }),
    }
}

/// Arrange samples in file order into a `(rows, cols, bands)` cube.
fn arrange(
    samples: Vec<f32>,
    header: &EnviHeader,
    path: &Path,
) -> Result<Array3<f32>, SourceError> {
    let (rows, cols, bands) = (header.lines, header.samples, header.bands);
    let decode_err = |e: ndarray::ShapeError| SourceError::Decode {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let cube = match header.interleave {
        Interleave::Bip => Array3::from_shape_vec((rows, cols, bands), samples).map_err(decode_err)?,
        Interleave::Bsq => Array3::from_shape_vec((bands, rows, cols), samples)
            .map_err(decode_err)?
            .permuted_axes([1, 2, 0])
            .as_standard_layout()
            .into_owned(),
        Interleave::Bil => Array3::from_shape_vec((rows, bands, cols), samples)
            .map_err(decode_err)?
            .permuted_axes([0, 2, 1])
            .as_standard_layout()
            .into_owned(),
    };
    Ok(cube)
}

impl CubeLoader for EnviLoader {
    fn id(&self) -> &'static str {
        "envi"
    }

    fn display_name(&self) -> &'static str {
        "ENVI Header + Raw (.hdr)"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["hdr"]
    }

    fn can_load(&self, head: &[u8]) -> bool {
        head.starts_with(b"ENVI")
    }

    fn load(&self, path: &Path) -> Result<RawCube, SourceError> {
        let text = std::fs::read_to_string(path).map_err(|e| SourceError::io(path, e))?;
        let header = EnviHeader::parse(&text, path)?;
        log::debug!(
            "EnviLoader: {}x{}x{} {:?} {:?}",
            header.lines,
            header.samples,
            header.bands,
            header.data_type,
            header.interleave
        );

        let payload = payload_path(path, &header)?;
        let expected = header.payload_bytes().ok_or_else(|| {
            SourceError::malformed(
                path,
                format!(
                    "{}x{}x{} cube is too large",
                    header.lines, header.samples, header.bands
                ),
            )
        })?;
        let found = std::fs::metadata(&payload)
            .map_err(|e| SourceError::io(&payload, e))?
            .len();
        if found != expected {
            return Err(SourceError::PayloadSize {
                path: payload,
                expected,
                found,
            });
        }

        let bytes = std::fs::read(&payload).map_err(|e| SourceError::io(&payload, e))?;
        let offset = usize::try_from(header.header_offset).map_err(|_| {
            SourceError::malformed(path, "header offset does not fit in memory")
        })?;
        let samples = decode_samples(&bytes[offset..], header.data_type, header.big_endian);
        let data = arrange(samples, &header, &payload)?;

        log::info!(
            "EnviLoader: loaded {}x{} with {} bands from {:?}",
            header.lines,
            header.samples,
            header.bands,
            payload
        );

        Ok(RawCube {
            data,
            wavelengths: header.wavelengths,
        })
    }

    fn priority(&self) -> i32 {
        10
    }
}
