//! Writing the generated units to disk.

use crate::program::GeneratedUnits;
use crate::target::CodegenTarget;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("cannot write {shown}: {source}", shown = .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub header: PathBuf,
    pub body: PathBuf,
}

impl OutputPaths {
    /// File name of the declarations unit, as the body includes it.
    pub fn header_file_name(&self) -> String {
        self.header
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Paths of both units derived from `output`; any extension it carries is replaced.
pub fn output_paths(output: &Path, target: &dyn CodegenTarget) -> OutputPaths {
    OutputPaths {
        header: output.with_extension(target.header_extension()),
        body: output.with_extension(target.source_extension()),
    }
}

/// Write both units. Called only after generation succeeded, so a failed run leaves no files.
pub fn write_units(paths: &OutputPaths, units: &GeneratedUnits) -> Result<(), OutputError> {
    for (path, text) in [(&paths.header, &units.header), (&paths.body, &units.body)] {
        std::fs::write(path, text).map_err(|source| OutputError::Write {
            path: path.clone(),
            source,
        })?;
        tracing::info!(path = %path.display(), bytes = text.len(), "wrote");
    }
    Ok(())
}
