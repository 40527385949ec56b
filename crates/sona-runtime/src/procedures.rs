use sona_core::{SonaScriptError, MAX_CALL_DEPTH};

use crate::interpreter::{Interpreter, RunState};

// Formal parameter names from a procedure header, which may be written
// space-separated, parenthesized or after a colon. `closed` records whether
// the header ended with ')'.
fn parse_formal_names(header: &str) -> (Vec<String>, bool) {
    let mut names = Vec::new();
    let mut current = String::new();
    let mut closed = false;
    for ch in header.chars() {
        match ch {
            ')' => {
                closed = true;
                break;
            }
            ' ' | '\t' | ',' | '(' | ':' => {
                if !current.is_empty() {
                    names.push(std::mem::take(&mut current));
                }
            }
            other => current.push(other),
        }
    }
    if !current.is_empty() {
        names.push(current);
    }
    (names, closed)
}

// Split "@name(...)" argument text into expression strings at depth-0 commas,
// stopping at a depth-0 ')'. String literals may contain anything, with a
// doubled quote escaping a literal quote.
fn split_call_arguments(text: &str) -> Result<Vec<String>, SonaScriptError> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut any_comma = false;
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            ',' if depth == 0 => {
                out.push(std::mem::take(&mut current));
                any_comma = true;
            }
            ')' if depth == 0 => break,
            ')' => {
                depth -= 1;
                current.push(')');
            }
            '(' => {
                depth += 1;
                current.push('(');
            }
            '"' => {
                current.push('"');
                loop {
                    match chars.next() {
                        None => {
                            return Err(SonaScriptError::new(
                                "ENGINE_CALL_QUOTE",
                                "Incomplete string literal: the quotes don't match.",
                            ))
                        }
                        Some('"') => {
                            current.push('"');
                            if chars.peek() == Some(&'"') {
                                chars.next();
                                current.push('"');
                            } else {
                                break;
                            }
                        }
                        Some(other) => current.push(other),
                    }
                }
            }
            other => current.push(other),
        }
    }
    if any_comma || !current.trim().is_empty() {
        out.push(current);
    }
    Ok(out.into_iter().map(|arg| arg.trim().to_string()).collect())
}

impl Interpreter {
    fn find_procedure(
        &self,
        state: &RunState,
        call_name: &str,
    ) -> Result<(usize, String), SonaScriptError> {
        for number in 1..=state.lines.len() {
            let line = state.lines.line(number);
            let Some(rest) = line.strip_prefix("procedure ") else {
                continue;
            };
            let rest = rest.trim_start_matches([' ', '\t']);
            let name_end = rest.find([' ', '\t', '(', ':']).unwrap_or(rest.len());
            let name = &rest[..name_end];
            if name.is_empty() {
                return Err(SonaScriptError::at_line(
                    "ENGINE_PROCEDURE_NAME",
                    "Missing procedure name after 'procedure'.",
                    number,
                ));
            }
            if name == call_name {
                return Ok((number, rest[name_end..].to_string()));
            }
        }
        Err(SonaScriptError::new(
            "ENGINE_PROCEDURE_MISSING",
            format!("Procedure \"{}\" not found.", call_name),
        ))
    }

    fn enter_procedure(
        &mut self,
        state: &mut RunState,
        name: &str,
        declaration_line: usize,
    ) -> Result<(), SonaScriptError> {
        if self.procedure_names.len() >= MAX_CALL_DEPTH {
            return Err(SonaScriptError::at_line(
                "ENGINE_CALL_DEPTH",
                format!("Call depth greater than {}.", MAX_CALL_DEPTH),
                state.line_number,
            ));
        }
        self.procedure_names.push(name.to_string());
        state.return_lines.push(state.line_number);
        state.line_number = declaration_line; // resumes on the first body line
        Ok(())
    }

    /// `call <name> <args…>`: whitespace-separated arguments with the doubled
    /// quote rule; the final formal takes the rest of the line when the
    /// header is not parenthesized. String formals are bound verbatim,
    /// numeric formals evaluate in the caller's scope.
    pub(crate) fn handle_call_statement(
        &mut self,
        state: &mut RunState,
        line: &str,
    ) -> Result<(), SonaScriptError> {
        let rest = line[5..].trim_start_matches([' ', '\t']);
        let name_end = rest
            .find([' ', '\t', '(', ':'])
            .unwrap_or(rest.len());
        let call_name = rest[..name_end].to_string();
        if call_name.is_empty() {
            return Err(SonaScriptError::at_line(
                "ENGINE_CALL",
                "Missing procedure name after 'call'.",
                state.line_number,
            ));
        }
        let args_text = if name_end < rest.len() {
            rest[name_end + 1..].to_string()
        } else {
            String::new()
        };

        let (declaration_line, header) = self.find_procedure(state, &call_name)?;
        let (formals, closed) = parse_formal_names(&header);
        let has_arguments = !args_text.trim().is_empty();
        if has_arguments && formals.is_empty() {
            return Err(SonaScriptError::at_line(
                "ENGINE_CALL_ARITY",
                format!("Call to procedure \"{}\" has too many arguments.", call_name),
                state.line_number,
            ));
        }
        if !formals.is_empty() && !has_arguments {
            return Err(SonaScriptError::at_line(
                "ENGINE_CALL_ARITY",
                format!("Call to procedure \"{}\" has too few arguments.", call_name),
                state.line_number,
            ));
        }

        let return_line = state.line_number;
        self.enter_procedure(state, &call_name, declaration_line)?;
        if let Err(error) = self.bind_call_tokens(&formals, closed, &args_text) {
            // unwind the half-entered frame so the failure reports cleanly
            self.procedure_names.pop();
            state.return_lines.pop();
            state.line_number = return_line;
            return Err(error);
        }
        Ok(())
    }

    fn bind_call_tokens(
        &mut self,
        formals: &[String],
        header_closed: bool,
        args_text: &str,
    ) -> Result<(), SonaScriptError> {
        let mut rest = args_text;
        for (index, formal) in formals.iter().enumerate() {
            let last = index + 1 == formals.len() && !header_closed;
            rest = rest.trim_start_matches([' ', '\t']);
            let token = if last {
                let token = rest.to_string();
                rest = "";
                token
            } else {
                let (token, remainder) = crate::arguments::take_token(rest)?;
                rest = remainder;
                token
            };
            if formal.ends_with('$') {
                let key = self.qualify(formal);
                self.variables.set_string(&key, token)?;
            } else {
                let value = self.numeric_expression_in_caller(&token)?;
                let key = self.qualify(formal);
                self.variables.set_numeric(&key, value)?;
            }
        }
        Ok(())
    }

    /// `@name(args)` / `@name: args` / `@name`: comma- and paren-respecting
    /// argument expressions; string formals go through the string-expression
    /// path, and every argument evaluates in the caller's scope.
    pub(crate) fn handle_at_call(
        &mut self,
        state: &mut RunState,
        line: &str,
    ) -> Result<(), SonaScriptError> {
        let rest = line[1..].trim_start_matches([' ', '\t']);
        let name_end = rest.find([' ', '\t', '(', ':']).unwrap_or(rest.len());
        let call_name = rest[..name_end].to_string();
        if call_name.is_empty() {
            return Err(SonaScriptError::at_line(
                "ENGINE_CALL",
                "Missing procedure name after \"@\".",
                state.line_number,
            ));
        }
        let mut args_text = &rest[name_end..];
        if let Some(first) = args_text.chars().next() {
            if first == '(' || first == ':' {
                args_text = &args_text[1..];
            } else {
                let trimmed = args_text.trim_start_matches([' ', '\t']);
                if trimmed.is_empty() {
                    args_text = trimmed;
                } else if trimmed.starts_with(['(', ':']) {
                    args_text = &trimmed[1..];
                } else {
                    return Err(SonaScriptError::at_line(
                        "ENGINE_CALL",
                        format!(
                            "Missing parenthesis or colon after procedure name \"{}\".",
                            call_name
                        ),
                        state.line_number,
                    ));
                }
            }
        }

        let (declaration_line, header) = self.find_procedure(state, &call_name)?;
        let (formals, _closed) = parse_formal_names(&header);
        let arguments = split_call_arguments(args_text)?;
        if arguments.len() > formals.len() {
            return Err(SonaScriptError::at_line(
                "ENGINE_CALL_ARITY",
                format!("Call to procedure \"{}\" has too many arguments.", call_name),
                state.line_number,
            ));
        }
        if arguments.len() < formals.len() {
            return Err(SonaScriptError::at_line(
                "ENGINE_CALL_ARITY",
                format!("Call to procedure \"{}\" has too few arguments.", call_name),
                state.line_number,
            ));
        }

        let return_line = state.line_number;
        self.enter_procedure(state, &call_name, declaration_line)?;
        for (formal, argument) in formals.iter().zip(&arguments) {
            let bound = if formal.ends_with('$') {
                self.string_expression_in_caller(argument)
                    .and_then(|value| {
                        let key = self.qualify(formal);
                        self.variables.set_string(&key, value)
                    })
            } else {
                self.numeric_expression_in_caller(argument)
                    .and_then(|value| {
                        let key = self.qualify(formal);
                        self.variables.set_numeric(&key, value)
                    })
            };
            if let Err(error) = bound {
                self.procedure_names.pop();
                state.return_lines.pop();
                state.line_number = return_line;
                return Err(error);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod procedures_tests {
    use crate::test_support::run_script;

    #[test]
    fn at_call_binds_scoped_string_parameters() {
        let text = "\
@greet: \"World\"
echo done
procedure greet (.name$)
  name$ = .name$
endproc";
        let (result, executor, interpreter) = run_script(text);
        result.expect("run");
        assert_eq!(executor.info, "done\n");
        // the formal is scoped to the procedure, the body copied it globally
        assert_eq!(interpreter.string_variable("greet.name$"), Some("World"));
        assert_eq!(interpreter.string_variable("name$"), Some("World"));
        assert_eq!(interpreter.string_variable(".name$"), None);
    }

    #[test]
    fn at_call_with_parentheses_evaluates_arguments_in_caller_scope() {
        let text = "\
x = 10
@double(x + 2)
echo r='r'
procedure double (.n)
  r = 2 * .n
endproc";
        let (result, executor, _) = run_script(text);
        result.expect("run");
        assert_eq!(executor.info, "r=24\n");
    }

    #[test]
    fn call_statement_binds_whitespace_tokens() {
        let text = "\
call greet World 3
procedure greet .who$ .times
  echo 'who$' is not visible; .who$ is '.who$' times '.times'
endproc";
        // ".who$" substitutes inside the procedure only
        let (result, executor, _) = run_script(text);
        result.expect("run");
        assert_eq!(
            executor.info,
            "'who$' is not visible; .who$ is World times 3\n"
        );
    }

    #[test]
    fn procedure_declarations_are_skipped_on_fall_through() {
        let text = "\
procedure helper
  echo never
endproc
echo main";
        let (result, executor, _) = run_script(text);
        result.expect("run");
        assert_eq!(executor.info, "main\n");
    }

    #[test]
    fn procedures_may_recurse_within_the_depth_bound() {
        let text = "\
@countdown(3)
procedure countdown (.n)
  if .n > 0
    total += 1
    @countdown(.n - 1)
  endif
endproc
";
        let text = format!("total = 0\n{}", text);
        let (result, _, interpreter) = run_script(&text);
        result.expect("run");
        assert_eq!(interpreter.numeric_variable("total"), Some(3.0));
    }

    #[test]
    fn runaway_recursion_hits_the_depth_limit() {
        let text = "\
@loop
procedure loop
  @loop
endproc";
        let (result, _, _) = run_script(text);
        let error = result.expect_err("depth limit");
        assert!(error.message.contains("Call depth greater than 50."));
    }

    #[test]
    fn missing_procedure_is_fatal() {
        let (result, _, _) = run_script("@nothing");
        let error = result.expect_err("missing procedure");
        assert!(error.message.contains("Procedure \"nothing\" not found."));
    }

    #[test]
    fn arity_mismatches_are_fatal() {
        let text = "@greet(1, 2)\nprocedure greet (.a)\nendproc";
        let (result, _, _) = run_script(text);
        let error = result.expect_err("too many");
        assert!(error.message.contains("too many arguments"));

        let text = "@greet\nprocedure greet (.a)\nendproc";
        let (result, _, _) = run_script(text);
        let error = result.expect_err("too few");
        assert!(error.message.contains("too few arguments"));
    }

    #[test]
    fn endproc_without_a_call_is_fatal() {
        let (result, _, _) = run_script("endproc");
        let error = result.expect_err("unmatched endproc");
        assert!(error.message.contains("Unmatched 'endproc'."));
    }

    #[test]
    fn nested_procedure_locals_do_not_collide() {
        let text = "\
@outer
echo o='outer.x' i='inner.x'
procedure outer
  .x = 1
  @inner
endproc
procedure inner
  .x = 2
endproc";
        let (result, executor, _) = run_script(text);
        result.expect("run");
        assert_eq!(executor.info, "o=1 i=2\n");
    }
}
