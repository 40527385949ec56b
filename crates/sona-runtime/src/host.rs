use std::fs;
use std::io::Write;

use sona_core::SonaScriptError;

use crate::variables::ScopedVariables;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormulaKind {
    Numeric,
    Str,
    Matrix,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormulaResult {
    Numeric(f64),
    Str(String),
    Matrix(Vec<Vec<f64>>),
}

/// Expression compiler/evaluator consumed by the engine. Variable references
/// resolve against the engine's own store through the scoped view.
pub trait FormulaService {
    fn evaluate(
        &self,
        variables: &ScopedVariables<'_>,
        expression: &str,
        kind: FormulaKind,
    ) -> Result<FormulaResult, SonaScriptError>;
}

/// Host command executor. When `capture` is given, anything the command would
/// print goes into that buffer instead of the host's info channel. `Ok(false)`
/// means the command ran but produced no completion status; capturing callers
/// treat that as an undefined/empty result.
pub trait CommandExecutor {
    fn execute(
        &mut self,
        line: &str,
        capture: Option<&mut String>,
    ) -> Result<bool, SonaScriptError>;

    /// Identifier of the single currently selected host object. Errors when
    /// zero or more than one object is selected.
    fn sole_selected_id(&self) -> Result<f64, SonaScriptError>;
}

/// A completed dialog built from the declared parameters. Interactive only;
/// batch invocations bind arguments from a string or a value list instead.
pub trait DialogForm {
    fn real(&self, field: &str) -> Result<f64, SonaScriptError>;
    fn integer(&self, field: &str) -> Result<i64, SonaScriptError>;
    fn string(&self, field: &str) -> Result<String, SonaScriptError>;
}

pub trait TextFiles {
    fn read_text(&self, path: &str) -> Result<String, SonaScriptError>;
    fn write_text(&self, path: &str, text: &str) -> Result<(), SonaScriptError>;
    fn append_text(&self, path: &str, text: &str) -> Result<(), SonaScriptError>;
}

#[derive(Debug, Default)]
pub struct FsTextFiles;

impl TextFiles for FsTextFiles {
    fn read_text(&self, path: &str) -> Result<String, SonaScriptError> {
        fs::read_to_string(path).map_err(|error| {
            SonaScriptError::new("FILE_READ", format!("File \"{}\" not read: {}.", path, error))
        })
    }

    fn write_text(&self, path: &str, text: &str) -> Result<(), SonaScriptError> {
        fs::write(path, text).map_err(|error| {
            SonaScriptError::new(
                "FILE_WRITE",
                format!("File \"{}\" not written: {}.", path, error),
            )
        })
    }

    fn append_text(&self, path: &str, text: &str) -> Result<(), SonaScriptError> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|error| {
                SonaScriptError::new(
                    "FILE_APPEND",
                    format!("File \"{}\" not opened for appending: {}.", path, error),
                )
            })?;
        file.write_all(text.as_bytes()).map_err(|error| {
            SonaScriptError::new(
                "FILE_APPEND",
                format!("File \"{}\" not appended: {}.", path, error),
            )
        })
    }
}

/// Heuristic separating host commands from formulas on an assignment's right
/// hand side: `nowarn`/`noprogress`/`nocheck`/`demo` prefixes are commands,
/// lower-case starts are formulas, and an upper-case first word is a command
/// unless it ends in an underscore (an object name).
pub(crate) fn looks_like_command(text: &str) -> bool {
    if let Some(rest) = text.strip_prefix("no") {
        if rest.starts_with("warn ") || rest.starts_with("progress ") || rest.starts_with("check ")
        {
            return true;
        }
    }
    if text.starts_with("demo ") {
        return true;
    }
    let bytes = text.as_bytes();
    let Some(first) = bytes.first() else {
        return false;
    };
    if !first.is_ascii_uppercase() {
        return false;
    }
    let mut i = 0usize;
    while i < bytes.len() && bytes[i].is_ascii_alphanumeric() {
        i += 1;
    }
    !(i < bytes.len() && bytes[i] == b'_')
}
