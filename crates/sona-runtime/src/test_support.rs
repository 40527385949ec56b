use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use sona_core::SonaScriptError;

use crate::host::{CommandExecutor, DialogForm, TextFiles};
use crate::interpreter::{Interpreter, InterpreterOptions, RunOutcome};

/// Recording command executor: understands the info-channel commands the
/// tests rely on, replies to scripted queries, and fails on request.
#[derive(Debug, Default)]
pub(crate) struct FakeExecutor {
    pub(crate) executed: Vec<String>,
    pub(crate) info: String,
    pub(crate) replies: HashMap<String, String>,
    pub(crate) failures: HashMap<String, String>,
    pub(crate) selected_id: Option<f64>,
}

impl CommandExecutor for FakeExecutor {
    fn execute(
        &mut self,
        line: &str,
        capture: Option<&mut String>,
    ) -> Result<bool, SonaScriptError> {
        self.executed.push(line.to_string());
        if let Some(message) = self.failures.get(line) {
            return Err(SonaScriptError::new("HOST_COMMAND", message.clone()));
        }
        let printed = if let Some(reply) = self.replies.get(line) {
            reply.clone()
        } else if let Some(rest) = line.strip_prefix("echo ") {
            format!("{}\n", rest)
        } else if let Some(rest) = line.strip_prefix("printline ") {
            format!("{}\n", rest)
        } else if let Some(rest) = line.strip_prefix("print ") {
            rest.to_string()
        } else {
            String::new()
        };
        match capture {
            Some(buffer) => buffer.push_str(&printed),
            None => self.info.push_str(&printed),
        }
        Ok(true)
    }

    fn sole_selected_id(&self) -> Result<f64, SonaScriptError> {
        self.selected_id.ok_or_else(|| {
            SonaScriptError::new(
                "HOST_SELECTION",
                "No objects selected. Cannot assign ID to variable.",
            )
        })
    }
}

#[derive(Debug, Default)]
pub(crate) struct FakeDialog {
    pub(crate) reals: HashMap<String, f64>,
    pub(crate) integers: HashMap<String, i64>,
    pub(crate) strings: HashMap<String, String>,
}

impl DialogForm for FakeDialog {
    fn real(&self, field: &str) -> Result<f64, SonaScriptError> {
        self.reals.get(field).copied().ok_or_else(|| missing(field))
    }

    fn integer(&self, field: &str) -> Result<i64, SonaScriptError> {
        self.integers
            .get(field)
            .copied()
            .ok_or_else(|| missing(field))
    }

    fn string(&self, field: &str) -> Result<String, SonaScriptError> {
        self.strings
            .get(field)
            .cloned()
            .ok_or_else(|| missing(field))
    }
}

fn missing(field: &str) -> SonaScriptError {
    SonaScriptError::new("HOST_DIALOG", format!("Field \"{}\" not in form.", field))
}

/// In-memory text files, shared by handle so tests can inspect writes.
#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryFiles {
    files: Rc<RefCell<HashMap<String, String>>>,
}

impl MemoryFiles {
    pub(crate) fn put(&self, path: &str, text: &str) {
        self.files
            .borrow_mut()
            .insert(path.to_string(), text.to_string());
    }

    pub(crate) fn get(&self, path: &str) -> Option<String> {
        self.files.borrow().get(path).cloned()
    }
}

impl TextFiles for MemoryFiles {
    fn read_text(&self, path: &str) -> Result<String, SonaScriptError> {
        self.get(path).ok_or_else(|| {
            SonaScriptError::new("FILE_READ", format!("File \"{}\" not read.", path))
        })
    }

    fn write_text(&self, path: &str, text: &str) -> Result<(), SonaScriptError> {
        self.put(path, text);
        Ok(())
    }

    fn append_text(&self, path: &str, text: &str) -> Result<(), SonaScriptError> {
        let mut files = self.files.borrow_mut();
        files.entry(path.to_string()).or_default().push_str(text);
        Ok(())
    }
}

pub(crate) fn run_script(
    text: &str,
) -> (
    Result<RunOutcome, SonaScriptError>,
    FakeExecutor,
    Interpreter,
) {
    let mut interpreter = Interpreter::new(InterpreterOptions::default());
    let mut executor = FakeExecutor::default();
    let result = interpreter.run(text, &mut executor);
    (result, executor, interpreter)
}

pub(crate) fn run_script_with_files(
    text: &str,
    files: MemoryFiles,
) -> (
    Result<RunOutcome, SonaScriptError>,
    FakeExecutor,
    Interpreter,
) {
    let mut interpreter = Interpreter::new(InterpreterOptions {
        files: Some(Box::new(files)),
        ..InterpreterOptions::default()
    });
    let mut executor = FakeExecutor::default();
    let result = interpreter.run(text, &mut executor);
    (result, executor, interpreter)
}
