use std::fs;

use anyhow::{Context, Result};
use clap::Parser;
use sona_core::SonaScriptError;
use sona_runtime::{CommandExecutor, Interpreter, InterpreterOptions};

#[derive(Debug, Parser)]
#[command(name = "sona")]
#[command(about = "SonaScript batch interpreter")]
struct Cli {
    /// Script file to run
    script: String,
    /// Arguments for the script's form, as one quoted string
    #[arg(long = "arguments")]
    arguments: Option<String>,
    /// Environment (editor window) name the script runs against
    #[arg(long = "environment")]
    environment: Option<String>,
}

/// Batch executor: only the info-channel commands are available; anything
/// else is an error naming the line.
#[derive(Debug, Default)]
struct ShellExecutor;

impl CommandExecutor for ShellExecutor {
    fn execute(
        &mut self,
        line: &str,
        capture: Option<&mut String>,
    ) -> Result<bool, SonaScriptError> {
        let printed = if let Some(rest) = line.strip_prefix("echo ") {
            format!("{}\n", rest)
        } else if let Some(rest) = line.strip_prefix("printline ") {
            format!("{}\n", rest)
        } else if line == "printline" {
            "\n".to_string()
        } else if let Some(rest) = line.strip_prefix("print ") {
            rest.to_string()
        } else if line == "clearinfo" {
            String::new()
        } else {
            return Err(SonaScriptError::new(
                "HOST_COMMAND_UNKNOWN",
                format!("Command \"{}\" not available in batch mode.", line),
            ));
        };
        match capture {
            Some(buffer) => buffer.push_str(&printed),
            None => print!("{}", printed),
        }
        Ok(true)
    }

    fn sole_selected_id(&self) -> Result<f64, SonaScriptError> {
        Err(SonaScriptError::new(
            "HOST_SELECTION",
            "No objects selected. Cannot assign ID to variable.",
        ))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let text = fs::read_to_string(&cli.script)
        .with_context(|| format!("cannot read script \"{}\"", cli.script))?;
    let mut interpreter = Interpreter::new(InterpreterOptions {
        environment_name: cli.environment,
        ..InterpreterOptions::default()
    });
    interpreter.read_parameters(&text)?;
    if let Some(arguments) = &cli.arguments {
        interpreter.set_arguments_from_string(arguments)?;
    }
    let mut executor = ShellExecutor;
    interpreter.run(&text, &mut executor)?;
    Ok(())
}
