use sona_core::{is_undefined, SonaScriptError, MAX_LABEL_LENGTH};

use crate::host::CommandExecutor;
use crate::interpreter::{ArmedAssertion, Interpreter, RunState};
use crate::preprocess::BranchKind;

fn is_word_end(line: &str, len: usize) -> bool {
    matches!(line.as_bytes().get(len), None | Some(b' ') | Some(b'\t'))
}

fn unmatched(state: &RunState, keyword: &str) -> SonaScriptError {
    SonaScriptError::at_line(
        "ENGINE_UNMATCHED",
        format!("Unmatched '{}'.", keyword),
        state.line_number,
    )
}

impl Interpreter {
    /// Dispatch one substituted line on its leading keyword. Lines that match
    /// no statement fall through to assignment parsing, and failing that are
    /// tried as a bare command.
    pub(crate) fn dispatch_statement(
        &mut self,
        state: &mut RunState,
        executor: &mut dyn CommandExecutor,
        line: &str,
    ) -> Result<(), SonaScriptError> {
        let handled = match line.as_bytes()[0] {
            b'@' => {
                self.handle_at_call(state, line)?;
                true
            }
            b'.' => false,
            b'a' => self.handle_assertions(state, line)?,
            b'c' => {
                if line.starts_with("call ") {
                    self.handle_call_statement(state, line)?;
                    true
                } else {
                    false
                }
            }
            b'd' => {
                if let Some(rest) = line.strip_prefix("dec ") {
                    self.step_variable(rest, -1.0)?;
                    true
                } else {
                    false
                }
            }
            b'e' => self.handle_e_keywords(state, executor, line)?,
            b'f' => {
                if line.starts_with("for ") {
                    self.handle_for(state, line)?;
                    true
                } else if line.starts_with("form ") {
                    let target = state
                        .lines
                        .control
                        .form_to_endform
                        .get(&state.line_number)
                        .copied()
                        .ok_or_else(|| unmatched(state, "form"))?;
                    state.line_number = target;
                    true
                } else {
                    false
                }
            }
            b'g' => {
                if line.starts_with("goto ") {
                    self.handle_goto(state, line)?;
                    true
                } else {
                    false
                }
            }
            b'i' => {
                if line.starts_with("if ") {
                    self.handle_if(state, line)?;
                    true
                } else if let Some(rest) = line.strip_prefix("inc ") {
                    self.step_variable(rest, 1.0)?;
                    true
                } else {
                    false
                }
            }
            b'l' => line.starts_with("label "), // already indexed; no effect at run time
            b'p' => {
                if line.starts_with("procedure ") {
                    let target = state
                        .lines
                        .control
                        .procedure_to_endproc
                        .get(&state.line_number)
                        .copied()
                        .ok_or_else(|| unmatched(state, "proc"))?;
                    state.line_number = target;
                    true
                } else if let Some(rest) = line.strip_prefix("print") {
                    // "print …" and "printline …" are commands, never
                    // assignments, even though they start like variable names.
                    if rest.starts_with(' ')
                        || rest == "line"
                        || rest.starts_with("line ")
                    {
                        executor.execute(line, None)?;
                        true
                    } else {
                        false
                    }
                } else {
                    false
                }
            }
            b'r' => line.starts_with("repeat") && is_word_end(line, 6),
            b's' => {
                if line.starts_with("stopwatch") && is_word_end(line, 9) {
                    self.stopwatch = std::time::Instant::now();
                    true
                } else {
                    false
                }
            }
            b'u' => {
                if let Some(rest) = line.strip_prefix("until ") {
                    let value = self.numeric_expression(rest)?;
                    if value == 0.0 {
                        let target = state
                            .lines
                            .control
                            .until_to_repeat
                            .get(&state.line_number)
                            .copied()
                            .ok_or_else(|| unmatched(state, "until"))?;
                        state.line_number = target; // resumes after 'repeat'
                    }
                    true
                } else {
                    false
                }
            }
            b'w' => {
                if let Some(rest) = line.strip_prefix("while ") {
                    let value = self.numeric_expression(rest)?;
                    if value == 0.0 {
                        let target = state
                            .lines
                            .control
                            .while_to_endwhile
                            .get(&state.line_number)
                            .copied()
                            .ok_or_else(|| unmatched(state, "while"))?;
                        state.line_number = target; // resumes after 'endwhile'
                    }
                    true
                } else {
                    false
                }
            }
            _ => false,
        };
        if handled {
            return Ok(());
        }
        self.execute_assignment_or_command(state, executor, line)
    }

    fn handle_assertions(
        &mut self,
        state: &mut RunState,
        line: &str,
    ) -> Result<bool, SonaScriptError> {
        if let Some(expression) = line.strip_prefix("assert ") {
            let value = self.numeric_expression(expression)?;
            if value == 0.0 || is_undefined(value) {
                state.assertion_failed = true;
                return Err(SonaScriptError::at_line(
                    "ENGINE_ASSERTION",
                    format!(
                        "Script assertion fails in line {} ({}):\n   {}",
                        state.line_number,
                        if value == 0.0 { "false" } else { "undefined" },
                        expression
                    ),
                    state.line_number,
                ));
            }
            Ok(true)
        } else if let Some(expected) = line.strip_prefix("asserterror ") {
            state.armed_assertion = Some(ArmedAssertion {
                line: state.line_number,
                expected: expected.to_string(),
            });
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn handle_e_keywords(
        &mut self,
        state: &mut RunState,
        executor: &mut dyn CommandExecutor,
        line: &str,
    ) -> Result<bool, SonaScriptError> {
        if line.starts_with("end") {
            if line.starts_with("endif") && is_word_end(line, 5) {
                return Ok(true);
            }
            if line.starts_with("endfor") && is_word_end(line, 6) {
                let target = state
                    .lines
                    .control
                    .endfor_to_for
                    .get(&state.line_number)
                    .copied()
                    .ok_or_else(|| unmatched(state, "endfor"))?;
                state.line_number = target - 1; // re-enter the 'for' line
                state.from_endfor = true;
                return Ok(true);
            }
            if line.starts_with("endwhile") && is_word_end(line, 8) {
                let target = state
                    .lines
                    .control
                    .endwhile_to_while
                    .get(&state.line_number)
                    .copied()
                    .ok_or_else(|| unmatched(state, "endwhile"))?;
                state.line_number = target - 1; // re-evaluate the 'while' line
                return Ok(true);
            }
            if line.starts_with("endproc") && is_word_end(line, 7) {
                let Some(return_line) = state.return_lines.pop() else {
                    return Err(unmatched(state, "endproc"));
                };
                self.procedure_names.pop();
                state.line_number = return_line;
                return Ok(true);
            }
            return Ok(false);
        }
        if line.starts_with("else") && is_word_end(line, 4) {
            let target = state
                .lines
                .control
                .endif_of
                .get(&state.line_number)
                .copied()
                .ok_or_else(|| unmatched(state, "else"))?;
            state.line_number = target;
            return Ok(true);
        }
        if line.starts_with("elsif ") || line.starts_with("elif ") {
            let expression = line.split_once(' ').map(|(_, rest)| rest).unwrap_or("");
            if state.from_if {
                state.from_if = false;
                let value = self.numeric_expression(expression)?;
                if value == 0.0 {
                    self.branch_on_false(state, "elsif")?;
                }
            } else {
                // the chain already ran a branch: skip to its endif
                let target = state
                    .lines
                    .control
                    .endif_of
                    .get(&state.line_number)
                    .copied()
                    .ok_or_else(|| {
                        SonaScriptError::at_line(
                            "ENGINE_UNMATCHED",
                            "'elsif' not matched with 'endif'.",
                            state.line_number,
                        )
                    })?;
                state.line_number = target;
            }
            return Ok(true);
        }
        if line == "exit" {
            state.line_number = state.lines.len(); // jump past the last line
            return Ok(true);
        }
        if let Some(message) = line.strip_prefix("exit ") {
            return Err(SonaScriptError::at_line(
                "ENGINE_EXIT",
                message.to_string(),
                state.line_number,
            ));
        }
        if line.starts_with("echo ") {
            // "echo = 3" stays a command, never an assignment
            executor.execute(line, None)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn handle_if(&mut self, state: &mut RunState, line: &str) -> Result<(), SonaScriptError> {
        let value = self.numeric_expression(&line[3..])?;
        if value == 0.0 {
            self.branch_on_false(state, "if")?;
        } else if is_undefined(value) {
            return Err(SonaScriptError::at_line(
                "ENGINE_CONDITION_UNDEFINED",
                "The value of the 'if' condition is undefined.",
                state.line_number,
            ));
        }
        Ok(())
    }

    fn branch_on_false(
        &self,
        state: &mut RunState,
        keyword: &str,
    ) -> Result<(), SonaScriptError> {
        match state.lines.control.next_branch.get(&state.line_number) {
            Some((target, BranchKind::Elsif)) => {
                state.line_number = target - 1; // evaluate the elsif itself
                state.from_if = true;
            }
            Some((target, _)) => {
                // else: fall into its body; endif: continue after it
                state.line_number = *target;
            }
            None => return Err(unmatched(state, keyword)),
        }
        Ok(())
    }

    fn handle_for(&mut self, state: &mut RunState, line: &str) -> Result<(), SonaScriptError> {
        let number = state.line_number;
        let from_pos = line.find(" from ");
        let Some(to_pos) = line.find(" to ") else {
            return Err(SonaScriptError::at_line(
                "ENGINE_FOR",
                "Missing 'to' in 'for' loop.",
                number,
            ));
        };
        let name_end = from_pos.unwrap_or(to_pos);
        let variable = line[4..name_end].trim();
        if variable.is_empty() {
            return Err(SonaScriptError::at_line(
                "ENGINE_FOR",
                "Missing loop variable after 'for'.",
                number,
            ));
        }
        let key = self.qualify(variable);
        let to_text = &line[to_pos + 4..];

        let (loop_value, to_value) = if state.from_endfor {
            state.from_endfor = false;
            let current = self.variables.numeric(&key).unwrap_or(0.0);
            let to_value = match state.for_bounds.get(&number) {
                Some(value) => *value,
                None => {
                    // entered by goto: the bound was never cached
                    let value = self.numeric_expression(to_text)?;
                    state.for_bounds.insert(number, value);
                    value
                }
            };
            (current + 1.0, to_value)
        } else {
            // bounds are evaluated once, on entry
            let to_value = self.numeric_expression(to_text)?;
            let start = match from_pos {
                Some(position) => self.numeric_expression(&line[position + 6..to_pos])?,
                None => 1.0,
            };
            state.for_bounds.insert(number, to_value);
            (start, to_value)
        };
        self.variables.set_numeric(&key, loop_value)?;
        if loop_value > to_value {
            state.for_bounds.remove(&number);
            let target = state
                .lines
                .control
                .for_to_endfor
                .get(&number)
                .copied()
                .ok_or_else(|| unmatched(state, "for"))?;
            state.line_number = target; // resumes after 'endfor'
        }
        Ok(())
    }

    fn handle_goto(&mut self, state: &mut RunState, line: &str) -> Result<(), SonaScriptError> {
        let rest = &line[5..];
        let (name, condition) = match rest.split_once(' ') {
            Some((name, condition)) => (name, Some(condition)),
            None => (rest, None),
        };
        if name.is_empty() {
            return Err(SonaScriptError::at_line(
                "ENGINE_GOTO",
                "Missing label name after 'goto'.",
                state.line_number,
            ));
        }
        let name: String = name.chars().take(MAX_LABEL_LENGTH).collect();
        if let Some(condition) = condition {
            if self.numeric_expression(condition)? == 0.0 {
                return Ok(());
            }
        }
        let target = state
            .lines
            .label_line(&name)
            .map_err(|error| error.with_line(state.line_number))?;
        state.line_number = target; // resumes after the label line
        Ok(())
    }

    fn step_variable(&mut self, name: &str, delta: f64) -> Result<(), SonaScriptError> {
        let key = self.qualify(name);
        let current = self.variables.numeric(&key).unwrap_or(0.0);
        self.variables.set_numeric(&key, current + delta)
    }
}
