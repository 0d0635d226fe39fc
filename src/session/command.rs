//! Command interface over [`SessionState`].
//!
//! Every user-level action is a [`Command`] value, so sessions can be driven
//! from JSON scripts as well as from code:
//!
//! ```json
//! {"command": "open_source", "path": "scene.hdr"}
//! {"command": "add_point", "source_id": "src1", "pixel": [10, 20], "label": "leaf"}
//! {"command": "set_mode", "mode": "absorbance"}
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::annotation::AnnotationId;
use crate::cache::Mode;
use crate::data::{Pixel, SourceId, WavelengthRange};
use crate::error::Result;
use crate::export::{self, Bands, CsvOptions};
use crate::preprocess::{PreprocessingConfig, PreprocessingFlags, Stage};
use crate::session::{ClickOutcome, InputMode, LoadReport, MergeReport, SessionState};

/// A session action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    OpenSource {
        path: PathBuf,
    },
    ReloadSource {
        source_id: SourceId,
    },
    CloseSource {
        source_id: SourceId,
    },
    SetMode {
        mode: Mode,
    },
    ToggleMode,
    SetFlags {
        flags: PreprocessingFlags,
    },
    ToggleStage {
        stage: Stage,
    },
    SetPreprocessing {
        config: PreprocessingConfig,
    },
    SetWavelengthRange {
        range: WavelengthRange,
    },
    ResetWavelengthRange,
    SetInputMode {
        mode: InputMode,
    },
    ToggleInputMode,
    Click {
        source_id: SourceId,
        pixel: Pixel,
    },
    ClosePolygon,
    CancelPolygon,
    AddPoint {
        source_id: SourceId,
        pixel: Pixel,
        #[serde(default)]
        label: String,
    },
    AddPolygon {
        source_id: SourceId,
        vertices: Vec<Pixel>,
        #[serde(default)]
        label: String,
    },
    DeleteNear {
        source_id: SourceId,
        pixel: Pixel,
    },
    Remove {
        id: AnnotationId,
    },
    RemoveLast,
    SetLabel {
        id: AnnotationId,
        label: String,
    },
    SetVisibility {
        id: AnnotationId,
        visible: bool,
    },
    ToggleAllVisibility,
    ClearAll,
    Refresh,
    SaveSnapshot {
        path: PathBuf,
    },
    LoadSnapshot {
        path: PathBuf,
    },
    MergeImport {
        path: PathBuf,
    },
    ExportCsv {
        path: PathBuf,
        #[serde(default)]
        options: CsvOptions,
    },
    ExportPng {
        source_id: SourceId,
        bands: Bands,
        #[serde(default)]
        overlay: bool,
        path: PathBuf,
    },
}

/// What a command produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutput {
    Done,
    Source(SourceId),
    Annotation(AnnotationId),
    Removed(Option<AnnotationId>),
    Mode(Mode),
    Flags(PreprocessingFlags),
    InputMode(InputMode),
    Click(ClickOutcome),
    Visible(bool),
    Refreshed(usize),
    Loaded(LoadReport),
    Merged(MergeReport),
    Exported(PathBuf),
}

impl SessionState {
    /// Run one command against the session.
    pub fn execute(&mut self, command: Command) -> Result<CommandOutput> {
        log::debug!("Executing {:?}", command);
        let output = match command {
            Command::OpenSource { path } => CommandOutput::Source(self.open_source(path)?),
            Command::ReloadSource { source_id } => {
                self.reload_source(&source_id)?;
                CommandOutput::Done
            }
            Command::CloseSource { source_id } => {
                self.close_source(&source_id)?;
                CommandOutput::Done
            }
            Command::SetMode { mode } => {
                self.set_mode(mode);
                CommandOutput::Mode(mode)
            }
            Command::ToggleMode => CommandOutput::Mode(self.toggle_mode()),
            Command::SetFlags { flags } => {
                self.set_flags(flags);
                CommandOutput::Flags(flags)
            }
            Command::ToggleStage { stage } => CommandOutput::Flags(self.toggle_stage(stage)),
            Command::SetPreprocessing { config } => {
                self.set_preprocessing_config(config)?;
                CommandOutput::Done
            }
            Command::SetWavelengthRange { range } => {
                self.set_wavelength_range(range);
                CommandOutput::Done
            }
            Command::ResetWavelengthRange => {
                self.reset_wavelength_range();
                CommandOutput::Done
            }
            Command::SetInputMode { mode } => {
                self.set_input_mode(mode);
                CommandOutput::InputMode(mode)
            }
            Command::ToggleInputMode => CommandOutput::InputMode(self.toggle_input_mode()),
            Command::Click { source_id, pixel } => {
                CommandOutput::Click(self.click(&source_id, pixel)?)
            }
            Command::ClosePolygon => CommandOutput::Annotation(self.close_polygon()?),
            Command::CancelPolygon => CommandOutput::Removed(self.cancel_polygon().map(|a| a.id)),
            Command::AddPoint {
                source_id,
                pixel,
                label,
            } => CommandOutput::Annotation(self.add_point(&source_id, pixel, label)?),
            Command::AddPolygon {
                source_id,
                vertices,
                label,
            } => CommandOutput::Annotation(self.add_polygon(&source_id, vertices, label)?),
            Command::DeleteNear { source_id, pixel } => {
                CommandOutput::Removed(self.delete_near(&source_id, pixel).map(|a| a.id))
            }
            Command::Remove { id } => CommandOutput::Removed(Some(self.remove(&id)?.id)),
            Command::RemoveLast => CommandOutput::Removed(self.remove_last().map(|a| a.id)),
            Command::SetLabel { id, label } => {
                self.set_label(&id, label)?;
                CommandOutput::Done
            }
            Command::SetVisibility { id, visible } => {
                self.set_visibility(&id, visible)?;
                CommandOutput::Visible(visible)
            }
            Command::ToggleAllVisibility => CommandOutput::Visible(self.toggle_all_visibility()),
            Command::ClearAll => {
                self.clear_all();
                CommandOutput::Done
            }
            Command::Refresh => CommandOutput::Refreshed(self.refresh()),
            Command::SaveSnapshot { path } => {
                self.save_snapshot(&path)?;
                CommandOutput::Exported(path)
            }
            Command::LoadSnapshot { path } => CommandOutput::Loaded(self.load_snapshot(&path)?),
            Command::MergeImport { path } => CommandOutput::Merged(self.merge_import_file(&path)?),
            Command::ExportCsv { path, options } => {
                self.refresh();
                export::export_csv(self, &path, &options)?;
                CommandOutput::Exported(path)
            }
            Command::ExportPng {
                source_id,
                bands,
                overlay,
                path,
            } => {
                export::export_png(self, &source_id, bands, overlay, &path)?;
                CommandOutput::Exported(path)
            }
        };
        Ok(output)
    }

    /// Run commands in order, stopping at the first failure.
    pub fn execute_all(
        &mut self,
        commands: impl IntoIterator<Item = Command>,
    ) -> Result<Vec<CommandOutput>> {
        commands.into_iter().map(|c| self.execute(c)).collect()
    }
}

/// Parse a script: a JSON array of commands, or one command per line.
pub fn parse_script(text: &str) -> Result<Vec<Command>, serde_json::Error> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed);
    }
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("//"))
        .map(serde_json::from_str)
        .collect()
}
