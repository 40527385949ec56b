use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use sona_core::{
    parse_numeric, FormSpec, ParameterDeclaration, ParameterKind, SonaScriptError,
};

use crate::form;
use crate::host::{
    CommandExecutor, FormulaKind, FormulaResult, FormulaService, FsTextFiles, TextFiles,
};
use crate::preprocess::{expand_includes, ScriptLines};
use crate::substitute::substitute_variables;
use crate::variables::{ScopedVariables, VariableStore};

#[derive(Default)]
pub struct InterpreterOptions {
    pub environment_name: Option<String>,
    pub preferences_directory: Option<String>,
    pub formula: Option<Box<dyn FormulaService>>,
    pub files: Option<Box<dyn TextFiles>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Stopped,
}

/// Cloneable handle that requests a stop; the engine polls it once per line.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

pub(crate) struct ArmedAssertion {
    pub(crate) line: usize,
    pub(crate) expected: String,
}

/// Per-run state: the indexed lines plus the control-flow registers of the
/// executing loop.
pub(crate) struct RunState {
    pub(crate) lines: ScriptLines,
    pub(crate) line_number: usize,
    pub(crate) from_if: bool,
    pub(crate) from_endfor: bool,
    pub(crate) return_lines: Vec<usize>,
    pub(crate) for_bounds: HashMap<usize, f64>,
    pub(crate) armed_assertion: Option<ArmedAssertion>,
    pub(crate) assertion_failed: bool,
}

pub(crate) enum LineDisposition {
    Executed,
    Blank,
}

pub struct Interpreter {
    pub(crate) environment_name: Option<String>,
    pub(crate) preferences_directory: Option<String>,
    pub(crate) form: FormSpec,
    pub(crate) variables: VariableStore,
    pub(crate) procedure_names: Vec<String>,
    pub(crate) formula: Box<dyn FormulaService>,
    pub(crate) files: Box<dyn TextFiles>,
    pub(crate) stop: Arc<AtomicBool>,
    pub(crate) running: bool,
    pub(crate) stopwatch: Instant,
}

impl Interpreter {
    pub fn new(options: InterpreterOptions) -> Self {
        Self {
            environment_name: options.environment_name,
            preferences_directory: options.preferences_directory,
            form: FormSpec::default(),
            variables: VariableStore::new(),
            procedure_names: Vec::new(),
            formula: options
                .formula
                .unwrap_or_else(|| Box::new(crate::formula::RhaiFormula)),
            files: options.files.unwrap_or_else(|| Box::new(FsTextFiles)),
            stop: Arc::new(AtomicBool::new(false)),
            running: false,
            stopwatch: Instant::now(),
        }
    }

    pub fn environment_name(&self) -> Option<&str> {
        self.environment_name.as_deref()
    }

    pub fn form_spec(&self) -> &FormSpec {
        &self.form
    }

    pub fn dialog_title(&self) -> &str {
        &self.form.title
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn variables(&self) -> &VariableStore {
        &self.variables
    }

    pub fn numeric_variable(&self, name: &str) -> Option<f64> {
        self.variables.numeric(name)
    }

    pub fn string_variable(&self, name: &str) -> Option<&str> {
        self.variables.string(name)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.stop))
    }

    /// Seconds since the last `stopwatch` statement (or engine creation).
    pub fn elapsed(&self) -> f64 {
        self.stopwatch.elapsed().as_secs_f64()
    }

    /// Parse the script's form block into this engine's parameter
    /// declarations. Returns the number of variable-binding parameters.
    pub fn read_parameters(&mut self, text: &str) -> Result<usize, SonaScriptError> {
        self.form = form::read_parameters(text)?;
        Ok(self
            .form
            .parameters
            .iter()
            .filter(|parameter| !parameter.name.is_empty())
            .count())
    }

    pub fn run(
        &mut self,
        text: &str,
        executor: &mut dyn CommandExecutor,
    ) -> Result<RunOutcome, SonaScriptError> {
        let expanded = expand_includes(text, self.files.as_ref())?;
        let lines = ScriptLines::prepare(&expanded)?;
        let mut state = RunState {
            lines,
            line_number: 0,
            from_if: false,
            from_endfor: false,
            return_lines: Vec::new(),
            for_bounds: HashMap::new(),
            armed_assertion: None,
            assertion_failed: false,
        };
        self.variables = VariableStore::new();
        self.procedure_names.clear();
        self.running = true;

        let result = self.run_lines(&mut state, executor);

        self.running = false;
        self.stop.store(false, Ordering::Relaxed);
        match result {
            Ok(outcome) => Ok(outcome),
            Err(error) => Err(self.annotate_failure(&state, error)),
        }
    }

    fn run_lines(
        &mut self,
        state: &mut RunState,
        executor: &mut dyn CommandExecutor,
    ) -> Result<RunOutcome, SonaScriptError> {
        self.seed_builtin_variables()?;
        self.seed_parameter_variables()?;
        let total = state.lines.len();
        state.line_number = 1;
        while state.line_number <= total {
            if self.stop.load(Ordering::Relaxed) {
                return Ok(RunOutcome::Stopped);
            }
            match self.execute_line(state, executor) {
                Ok(LineDisposition::Blank) => {}
                Ok(LineDisposition::Executed) => {
                    if let Some(armed) = &state.armed_assertion {
                        if armed.line != state.line_number {
                            let armed = state.armed_assertion.take().expect("armed assertion");
                            state.assertion_failed = true;
                            return Err(SonaScriptError::at_line(
                                "ENGINE_ASSERTION",
                                format!(
                                    "Script assertion fails in line {}: error « {} » not raised. Instead: no error.",
                                    armed.line, armed.expected
                                ),
                                armed.line,
                            ));
                        }
                    }
                }
                Err(error) => match state.armed_assertion.take() {
                    None => return Err(error),
                    Some(armed) if armed.line == state.line_number => return Err(error),
                    Some(armed) => {
                        if error.message.contains(&armed.expected) {
                            // the expected error: absorb it and continue
                        } else {
                            state.assertion_failed = true;
                            return Err(SonaScriptError::at_line(
                                "ENGINE_ASSERTION",
                                format!(
                                    "Script assertion fails in line {}: error « {} » not raised. Instead:\n{}",
                                    armed.line, armed.expected, error.message
                                ),
                                armed.line,
                            ));
                        }
                    }
                },
            }
            state.line_number += 1;
        }
        Ok(RunOutcome::Completed)
    }

    fn execute_line(
        &mut self,
        state: &mut RunState,
        executor: &mut dyn CommandExecutor,
    ) -> Result<LineDisposition, SonaScriptError> {
        let line = {
            let raw = state.lines.line(state.line_number);
            if raw.is_empty() {
                return Ok(LineDisposition::Blank);
            }
            substitute_variables(raw, &self.scoped())
        };
        let Some(first) = line.chars().next() else {
            return Ok(LineDisposition::Blank);
        };
        let statement_like = first.is_ascii_lowercase()
            || first == '@'
            || (first == '.' && line.chars().nth(1).is_some_and(|c| c.is_ascii_lowercase()));
        if !statement_like {
            executor.execute(&line, None)?;
            return Ok(LineDisposition::Executed);
        }
        self.dispatch_statement(state, executor, &line)?;
        Ok(LineDisposition::Executed)
    }

    fn annotate_failure(&self, state: &RunState, error: SonaScriptError) -> SonaScriptError {
        if state.line_number == 0
            || state.lines.is_empty()
            || state.line_number > state.lines.len()
        {
            return error;
        }
        if error.code == "ENGINE_EXIT" || state.assertion_failed {
            return error;
        }
        let mut line_number = state.line_number;
        while line_number > 1 && state.lines.line(line_number).is_empty() {
            line_number -= 1; // originally a continuation line
        }
        SonaScriptError {
            code: "ENGINE_LINE_FAILED".to_string(),
            message: format!(
                "{}\nScript line {} not performed or completed:\n« {} »",
                error.message,
                line_number,
                state.lines.line(line_number)
            ),
            line: Some(line_number),
        }
    }

    pub(crate) fn current_procedure(&self) -> &str {
        self.procedure_names.last().map(String::as_str).unwrap_or("")
    }

    pub(crate) fn scoped(&self) -> ScopedVariables<'_> {
        ScopedVariables::new(&self.variables, self.current_procedure())
    }

    pub(crate) fn caller_scoped(&self) -> ScopedVariables<'_> {
        let depth = self.procedure_names.len();
        let procedure = if depth >= 2 {
            self.procedure_names[depth - 2].as_str()
        } else {
            ""
        };
        ScopedVariables::new(&self.variables, procedure)
    }

    pub(crate) fn qualify(&self, name: &str) -> String {
        self.scoped().qualify(name)
    }

    pub fn numeric_expression(&self, expression: &str) -> Result<f64, SonaScriptError> {
        // Form defaults like "3.14 (= pi)" are literal numbers, not formulas.
        if expression.contains("(=") {
            return Ok(parse_numeric(expression));
        }
        match self
            .formula
            .evaluate(&self.scoped(), expression, FormulaKind::Numeric)?
        {
            FormulaResult::Numeric(value) => Ok(value),
            _ => Err(formula_kind_error(expression)),
        }
    }

    pub fn string_expression(&self, expression: &str) -> Result<String, SonaScriptError> {
        match self
            .formula
            .evaluate(&self.scoped(), expression, FormulaKind::Str)?
        {
            FormulaResult::Str(value) => Ok(value),
            _ => Err(formula_kind_error(expression)),
        }
    }

    pub fn matrix_expression(&self, expression: &str) -> Result<Vec<Vec<f64>>, SonaScriptError> {
        match self
            .formula
            .evaluate(&self.scoped(), expression, FormulaKind::Matrix)?
        {
            FormulaResult::Matrix(value) => Ok(value),
            _ => Err(formula_kind_error(expression)),
        }
    }

    pub(crate) fn numeric_expression_in_caller(
        &self,
        expression: &str,
    ) -> Result<f64, SonaScriptError> {
        if expression.contains("(=") {
            return Ok(parse_numeric(expression));
        }
        match self
            .formula
            .evaluate(&self.caller_scoped(), expression, FormulaKind::Numeric)?
        {
            FormulaResult::Numeric(value) => Ok(value),
            _ => Err(formula_kind_error(expression)),
        }
    }

    pub(crate) fn string_expression_in_caller(
        &self,
        expression: &str,
    ) -> Result<String, SonaScriptError> {
        match self
            .formula
            .evaluate(&self.caller_scoped(), expression, FormulaKind::Str)?
        {
            FormulaResult::Str(value) => Ok(value),
            _ => Err(formula_kind_error(expression)),
        }
    }

    fn seed_builtin_variables(&mut self) -> Result<(), SonaScriptError> {
        let store = &mut self.variables;
        store.set_string("newline$", "\n".to_string())?;
        store.set_string("tab$", "\t".to_string())?;
        let current_dir = std::env::current_dir()
            .map(|path| path.display().to_string())
            .unwrap_or_default();
        store.set_string("shellDirectory$", current_dir.clone())?;
        store.set_string("defaultDirectory$", current_dir)?;
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_default();
        store.set_string("homeDirectory$", home.clone())?;
        store.set_string(
            "preferencesDirectory$",
            self.preferences_directory.clone().unwrap_or(home),
        )?;
        store.set_string(
            "temporaryDirectory$",
            std::env::temp_dir().display().to_string(),
        )?;
        store.set_numeric("macintosh", bool_flag(cfg!(target_os = "macos")))?;
        store.set_numeric("windows", bool_flag(cfg!(target_os = "windows")))?;
        store.set_numeric(
            "unix",
            bool_flag(cfg!(all(unix, not(target_os = "macos")))),
        )?;
        // numeric aliases kept for older scripts
        store.set_numeric("left", 1.0)?;
        store.set_numeric("right", 2.0)?;
        store.set_numeric("mono", 1.0)?;
        store.set_numeric("stereo", 2.0)?;
        store.set_numeric("all", 0.0)?;
        store.set_numeric("average", 0.0)?;
        store.set_string("version$", env!("CARGO_PKG_VERSION").to_string())?;
        store.set_numeric("version", version_number())?;
        Ok(())
    }

    fn seed_parameter_variables(&mut self) -> Result<(), SonaScriptError> {
        for index in 0..self.form.parameters.len() {
            let declaration = self.form.parameters[index].clone();
            self.seed_one_parameter(&declaration)?;
            // also reachable with a lower-case initial
            if declaration
                .name
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_uppercase())
            {
                let mut lowered = declaration.clone();
                lowered.name = lower_first(&declaration.name);
                self.seed_one_parameter(&lowered)?;
            }
        }
        Ok(())
    }

    fn seed_one_parameter(
        &mut self,
        declaration: &ParameterDeclaration,
    ) -> Result<(), SonaScriptError> {
        match declaration.kind {
            kind if kind.is_numeric() => self
                .variables
                .set_numeric(&declaration.name, parse_numeric(&declaration.argument)),
            ParameterKind::Choice | ParameterKind::OptionMenu => {
                self.variables
                    .set_numeric(&declaration.name, parse_numeric(&declaration.argument))?;
                self.variables.set_string(
                    &format!("{}$", declaration.name),
                    declaration.choice_label.clone(),
                )
            }
            ParameterKind::Button | ParameterKind::Option | ParameterKind::Comment => Ok(()),
            _ => self.variables.set_string(
                &format!("{}$", declaration.name),
                declaration.argument.clone(),
            ),
        }
    }
}

fn formula_kind_error(expression: &str) -> SonaScriptError {
    SonaScriptError::new(
        "EVAL_RESULT_KIND",
        format!(
            "Formula service returned the wrong result kind for \"{}\".",
            expression.trim()
        ),
    )
}

fn bool_flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

fn lower_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

fn version_number() -> f64 {
    let mut parts = env!("CARGO_PKG_VERSION")
        .split('.')
        .map(|part| part.parse::<u32>().unwrap_or(0));
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    let patch = parts.next().unwrap_or(0);
    (major * 10_000 + minor * 100 + patch) as f64
}
