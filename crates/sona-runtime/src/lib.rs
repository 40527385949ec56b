pub mod arguments;
pub mod form;
pub mod formula;
pub mod host;
pub mod preprocess;
pub mod variables;

mod assign;
mod control;
mod interpreter;
mod procedures;
mod substitute;

#[cfg(test)]
pub(crate) mod test_support;

pub use arguments::ArgValue;
pub use form::read_parameters;
pub use formula::RhaiFormula;
pub use host::{
    CommandExecutor, DialogForm, FormulaKind, FormulaResult, FormulaService, FsTextFiles,
    TextFiles,
};
pub use interpreter::{Interpreter, InterpreterOptions, RunOutcome, StopHandle};
pub use preprocess::{expand_includes, ScriptLines};
pub use variables::{ScopedVariables, VariableStore};
