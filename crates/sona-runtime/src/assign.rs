use sona_core::{format_numeric, is_undefined, parse_numeric, undefined, SonaScriptError, Value};

use crate::host::{looks_like_command, CommandExecutor};
use crate::interpreter::{Interpreter, RunState};

fn skip_ws(line: &str, mut position: usize) -> usize {
    let bytes = line.as_bytes();
    while position < bytes.len() && (bytes[position] == b' ' || bytes[position] == b'\t') {
        position += 1;
    }
    position
}

fn is_assignment_operator(bytes: &[u8], position: usize) -> Option<Option<u8>> {
    match bytes.get(position) {
        Some(b'=') => Some(None),
        Some(op @ (b'+' | b'-' | b'*' | b'/')) if bytes.get(position + 1) == Some(&b'=') => {
            Some(Some(*op))
        }
        _ => None,
    }
}

impl Interpreter {
    /// A line that matched no statement keyword: the leading word is a
    /// variable name, its suffix selects the assignment form, and a line with
    /// no assignment at all goes to the executor as a command.
    pub(crate) fn execute_assignment_or_command(
        &mut self,
        state: &mut RunState,
        executor: &mut dyn CommandExecutor,
        line: &str,
    ) -> Result<(), SonaScriptError> {
        let bytes = line.as_bytes();
        let mut index = 0usize;
        if bytes.first() == Some(&b'.') {
            index = 1;
        }
        while index < bytes.len()
            && (bytes[index].is_ascii_alphanumeric() || bytes[index] == b'_' || bytes[index] == b'.')
        {
            index += 1;
        }
        match bytes.get(index) {
            Some(b'$') => self.assign_string(state, executor, line, index),
            Some(b'#') => self.assign_matrix(state, line, index),
            _ => self.assign_numeric(state, executor, line, index),
        }
    }

    // name$ = expr | name$ < file | name$ > file | name$ >> file,
    // optionally with an index bracket after the name.
    fn assign_string(
        &mut self,
        state: &mut RunState,
        executor: &mut dyn CommandExecutor,
        line: &str,
        dollar: usize,
    ) -> Result<(), SonaScriptError> {
        let number = state.line_number;
        let bytes = line.as_bytes();
        let mut variable_name = line[..dollar + 1].to_string();
        let mut position = skip_ws(line, dollar + 1);
        if bytes.get(position) == Some(&b'[') {
            let (key, after) = self.indexed_variable_name(&line[..dollar + 1], line, position)?;
            variable_name = key;
            position = skip_ws(line, after);
        }

        #[derive(PartialEq)]
        enum Target {
            Assign,
            ReadFile,
            AppendFile,
            WriteFile,
        }
        let target = match bytes.get(position) {
            Some(b'=') => {
                position += 1;
                Target::Assign
            }
            Some(b'<') => {
                position += 1;
                Target::ReadFile
            }
            Some(b'>') => {
                if bytes.get(position + 1) == Some(&b'>') {
                    position += 2;
                    Target::AppendFile
                } else {
                    position += 1;
                    Target::WriteFile
                }
            }
            _ => {
                return Err(SonaScriptError::at_line(
                    "ENGINE_ASSIGN",
                    format!("Missing '=', '<', or '>' after variable {}.", variable_name),
                    number,
                ))
            }
        };
        let position = skip_ws(line, position);
        let rest = &line[position..];
        if rest.is_empty() {
            let what = if target == Target::Assign {
                "expression"
            } else {
                "file name"
            };
            return Err(SonaScriptError::at_line(
                "ENGINE_ASSIGN",
                format!("Missing {} after variable {}.", what, variable_name),
                number,
            ));
        }
        let key = self.qualify(&variable_name);
        match target {
            Target::ReadFile => {
                let text = self.files.read_text(rest)?;
                self.variables.set_string(&key, text)?;
            }
            Target::AppendFile | Target::WriteFile => {
                let Some(Value::Str(text)) = self.variables.get(&key) else {
                    return Err(SonaScriptError::at_line(
                        "ENGINE_VAR_UNDEFINED",
                        format!("Variable {} undefined.", variable_name),
                        number,
                    ));
                };
                let text = text.clone();
                if target == Target::AppendFile {
                    self.files.append_text(rest, &text)?;
                } else {
                    self.files.write_text(rest, &text)?;
                }
            }
            Target::Assign => {
                if looks_like_command(rest) {
                    // e.g. name$ = Get name — capture the printed output
                    let mut captured = String::new();
                    let status = executor.execute(rest, Some(&mut captured))?;
                    let value = if status { captured } else { String::new() };
                    self.variables.set_string(&key, value)?;
                } else {
                    let value = self.string_expression(rest)?;
                    self.variables.set_string(&key, value)?;
                }
            }
        }
        Ok(())
    }

    // name# = matrix-expression; replaces any previous storage.
    fn assign_matrix(
        &mut self,
        state: &mut RunState,
        line: &str,
        hash: usize,
    ) -> Result<(), SonaScriptError> {
        let number = state.line_number;
        let variable_name = &line[..hash + 1];
        let position = skip_ws(line, hash + 1);
        if line.as_bytes().get(position) != Some(&b'=') {
            return Err(SonaScriptError::at_line(
                "ENGINE_ASSIGN",
                format!("Missing '=' after variable {}.", variable_name),
                number,
            ));
        }
        let position = skip_ws(line, position + 1);
        let rest = &line[position..];
        if rest.is_empty() {
            return Err(SonaScriptError::at_line(
                "ENGINE_ASSIGN",
                format!("Missing expression after variable {}.", variable_name),
                number,
            ));
        }
        let value = self.matrix_expression(rest)?;
        let key = self.qualify(variable_name);
        self.variables.set_matrix(&key, value)
    }

    fn assign_numeric(
        &mut self,
        state: &mut RunState,
        executor: &mut dyn CommandExecutor,
        line: &str,
        name_end: usize,
    ) -> Result<(), SonaScriptError> {
        let number = state.line_number;
        let bytes = line.as_bytes();
        if name_end == line.len() {
            // the word is the whole line: a shell-style command after all
            executor.execute(line, None)?;
            return Ok(());
        }
        let mut variable_name = line[..name_end].to_string();
        let mut position = skip_ws(line, name_end);
        let compound: Option<u8>;
        match is_assignment_operator(bytes, position) {
            Some(operator) => compound = operator,
            None => {
                if bytes.get(position) == Some(&b'[') {
                    let (key, after) =
                        self.indexed_variable_name(&line[..name_end], line, position)?;
                    variable_name = key;
                    position = skip_ws(line, after);
                    match is_assignment_operator(bytes, position) {
                        Some(operator) => compound = operator,
                        None => {
                            return Err(SonaScriptError::at_line(
                                "ENGINE_ASSIGN",
                                format!("Missing '=' after variable {}.", variable_name),
                                number,
                            ))
                        }
                    }
                } else {
                    // not an assignment: a shell-style command (select, pause, …)
                    executor.execute(line, None)?;
                    return Ok(());
                }
            }
        }
        position += if compound.is_some() { 2 } else { 1 };
        let position = skip_ws(line, position);
        let rest = &line[position..];
        if rest.is_empty() {
            return Err(SonaScriptError::at_line(
                "ENGINE_ASSIGN",
                format!("Missing expression after variable {}.", variable_name),
                number,
            ));
        }

        let value = if looks_like_command(rest) {
            // a query: capture its output; a bare selection becomes the id
            let mut captured = String::new();
            let status = executor.execute(rest, Some(&mut captured))?;
            if !status {
                undefined()
            } else if captured.is_empty() {
                executor.sole_selected_id()?
            } else {
                parse_numeric(&captured)
            }
        } else {
            self.numeric_expression(rest)?
        };

        let key = self.qualify(&variable_name);
        match compound {
            None => self.variables.set_numeric(&key, value)?,
            Some(operator) => {
                let Some(current) = self.variables.numeric(&key) else {
                    return Err(SonaScriptError::at_line(
                        "ENGINE_VAR_UNKNOWN",
                        format!("Unknown variable {}.", variable_name),
                        number,
                    ));
                };
                if is_undefined(current) {
                    // undefined contaminates: the variable stays undefined
                } else {
                    let next = match operator {
                        b'+' => current + value,
                        b'-' => current - value,
                        b'*' => current * value,
                        _ => {
                            if value == 0.0 {
                                undefined()
                            } else {
                                current / value
                            }
                        }
                    };
                    self.variables.set_numeric(&key, next)?;
                }
            }
        }
        Ok(())
    }

    // Builds the storage key of an indexed variable: the evaluated indices are
    // formatted into the name itself, so arr[3] and arr[3.5] are distinct
    // variables.
    fn indexed_variable_name(
        &self,
        base: &str,
        line: &str,
        open_bracket: usize,
    ) -> Result<(String, usize), SonaScriptError> {
        let bytes = line.as_bytes();
        let mut key = String::from(base);
        key.push('[');
        let mut position = open_bracket;
        loop {
            position += 1; // over '[' or ','
            let start = position;
            let mut depth = 0usize;
            while position < bytes.len() {
                let byte = bytes[position];
                if depth == 0 && (byte == b',' || byte == b']') {
                    break;
                }
                if byte == b'[' {
                    depth += 1;
                } else if byte == b']' {
                    depth -= 1;
                }
                position += 1;
            }
            if position >= bytes.len() {
                return Err(SonaScriptError::new(
                    "ENGINE_INDEX",
                    "Missing closing bracket (]) in indexed variable.",
                ));
            }
            let index_value = self.numeric_expression(&line[start..position])?;
            key.push_str(&format_numeric(index_value));
            key.push(bytes[position] as char);
            if bytes[position] == b']' {
                return Ok((key, position + 1));
            }
        }
    }
}

#[cfg(test)]
mod assign_tests {
    use crate::test_support::{run_script, run_script_with_files, MemoryFiles};
    use sona_core::{is_undefined, Value};

    #[test]
    fn plain_and_compound_numeric_assignment() {
        let text = "x = 10\nx += 5\nx -= 3\nx *= 4\nx /= 2";
        let (result, _, interpreter) = run_script(text);
        result.expect("run");
        assert_eq!(interpreter.numeric_variable("x"), Some(24.0));
    }

    #[test]
    fn compound_assignment_on_undefined_stays_undefined() {
        let (result, _, interpreter) = run_script("y = undefined\ny += 5");
        result.expect("run");
        assert!(is_undefined(interpreter.numeric_variable("y").expect("y")));
    }

    #[test]
    fn compound_assignment_on_unknown_variable_is_fatal() {
        let (result, _, _) = run_script("z += 5");
        let error = result.expect_err("unknown variable");
        assert!(error.message.contains("Unknown variable z."));
    }

    #[test]
    fn division_by_zero_makes_the_variable_undefined() {
        let (result, _, interpreter) = run_script("x = 4\nx /= 0");
        result.expect("run");
        assert!(is_undefined(interpreter.numeric_variable("x").expect("x")));
    }

    #[test]
    fn string_assignment_evaluates_string_expressions() {
        let text = "a$ = \"Hello\"\nb$ = a$ + \" World\"";
        let (result, _, interpreter) = run_script(text);
        result.expect("run");
        assert_eq!(interpreter.string_variable("b$"), Some("Hello World"));
    }

    #[test]
    fn string_assignment_captures_command_output() {
        let text = "name$ = Get name";
        let (result, executor, interpreter) = run_script_with_replies(
            text,
            &[("Get name", "tone")],
        );
        result.expect("run");
        assert_eq!(interpreter.string_variable("name$"), Some("tone"));
        assert_eq!(executor.executed, vec!["Get name".to_string()]);
    }

    fn run_script_with_replies(
        text: &str,
        replies: &[(&str, &str)],
    ) -> (
        Result<crate::RunOutcome, sona_core::SonaScriptError>,
        crate::test_support::FakeExecutor,
        crate::Interpreter,
    ) {
        use crate::test_support::FakeExecutor;
        let mut interpreter = crate::Interpreter::new(crate::InterpreterOptions::default());
        let mut executor = FakeExecutor::default();
        for (command, reply) in replies {
            executor
                .replies
                .insert((*command).to_string(), (*reply).to_string());
        }
        let result = interpreter.run(text, &mut executor);
        (result, executor, interpreter)
    }

    #[test]
    fn numeric_assignment_converts_captured_output() {
        let (result, _, interpreter) =
            run_script_with_replies("t = Get duration", &[("Get duration", "2.5 seconds")]);
        result.expect("run");
        assert_eq!(interpreter.numeric_variable("t"), Some(2.5));
    }

    #[test]
    fn silent_query_assigns_the_selected_object_id() {
        let text = "id = Create Sound";
        let mut interpreter = crate::Interpreter::new(crate::InterpreterOptions::default());
        let mut executor = crate::test_support::FakeExecutor::default();
        executor.replies.insert("Create Sound".to_string(), String::new());
        executor.selected_id = Some(7.0);
        interpreter.run(text, &mut executor).expect("run");
        assert_eq!(interpreter.numeric_variable("id"), Some(7.0));
    }

    #[test]
    fn string_variables_read_write_and_append_files() {
        let files = MemoryFiles::default();
        files.put("in.txt", "from file");
        let text = "\
a$ < in.txt
b$ = a$ + \"!\"
b$ > out.txt
b$ >> out.txt";
        let (result, _, _) = run_script_with_files(text, files.clone());
        result.expect("run");
        assert_eq!(files.get("out.txt").as_deref(), Some("from file!from file!"));
    }

    #[test]
    fn writing_an_unknown_string_variable_is_fatal() {
        let (result, _, _) = run_script("ghost$ > out.txt");
        let error = result.expect_err("undefined variable");
        assert!(error.message.contains("Variable ghost$ undefined."));
    }

    #[test]
    fn indexed_variables_embed_the_formatted_index() {
        let text = "i = 3\narr[i] = 99\narr[1, 2] = 5";
        let (result, _, interpreter) = run_script(text);
        result.expect("run");
        assert_eq!(interpreter.numeric_variable("arr[3]"), Some(99.0));
        assert_eq!(interpreter.numeric_variable("arr[1,2]"), Some(5.0));
    }

    #[test]
    fn indexed_string_variables_work_the_same_way() {
        let text = "w$[2] = \"two\"";
        let (result, _, interpreter) = run_script(text);
        result.expect("run");
        assert_eq!(interpreter.string_variable("w$[2]"), Some("two"));
    }

    #[test]
    fn matrix_assignment_replaces_previous_storage() {
        let text = "m# = {{1, 2}, {3, 4}}\nm# = {{9}}";
        let (result, _, interpreter) = run_script(text);
        result.expect("run");
        assert_eq!(
            interpreter.variables().get("m#"),
            Some(&Value::Matrix(vec![vec![9.0]]))
        );
    }

    #[test]
    fn missing_operator_after_string_variable_is_fatal() {
        let (result, _, _) = run_script("a$ \"oops\"");
        let error = result.expect_err("missing operator");
        assert!(error
            .message
            .contains("Missing '=', '<', or '>' after variable a$."));
    }

    #[test]
    fn unrecognized_word_lines_are_tried_as_commands() {
        let (result, executor, _) = run_script("select all");
        result.expect("run");
        assert_eq!(executor.executed, vec!["select all".to_string()]);
    }
}
