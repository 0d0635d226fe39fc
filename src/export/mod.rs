//! Exporters: CSV spectra and PNG image snapshots.

pub mod render;
pub mod spectra;

use std::path::Path;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::data::SourceId;
use crate::error::Result;
use crate::session::SessionState;

pub use render::{draw_overlay, render_band, render_rgb, save_png, stretch};
pub use spectra::{CsvOptions, export_csv, write_spectra};

/// Which bands an image snapshot shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bands {
    Gray(usize),
    Rgb([usize; 3]),
}

/// Render a source of the session in the current mode.
pub fn snapshot_image(
    session: &SessionState,
    source_id: &SourceId,
    bands: Bands,
    overlay: bool,
) -> Result<RgbImage> {
    let source = session.require_source(source_id)?;
    let cache = session.cache();
    let mut img = match bands {
        Bands::Gray(band) => render_band(source, cache, band, session.mode())?,
        Bands::Rgb(rgb) => render_rgb(source, cache, rgb, session.mode())?,
    };
    if overlay {
        draw_overlay(
            &mut img,
            session
                .annotations()
                .iter()
                .filter(|a| &a.source_id == source_id),
        );
    }
    Ok(img)
}

/// Render and save a PNG snapshot.
pub fn export_png(
    session: &SessionState,
    source_id: &SourceId,
    bands: Bands,
    overlay: bool,
    path: &Path,
) -> Result<()> {
    let img = snapshot_image(session, source_id, bands, overlay)?;
    save_png(&img, path)?;
    Ok(())
}
