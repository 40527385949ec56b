use sona_core::{format_numeric, ParameterKind, SonaScriptError};

use crate::host::DialogForm;
use crate::interpreter::Interpreter;

/// Positional argument for the value-list binder.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Numeric(f64),
    Str(String),
}

/// The binding identifier: decorative parenthetical help text (with a
/// preceding underscore) and a trailing colon are stripped.
/// "Time_(s):" binds as "Time".
pub(crate) fn strip_parameter_name(name: &str) -> String {
    let mut base = match name.find('(') {
        Some(position) => {
            let mut head = &name[..position];
            if head.ends_with('_') {
                head = &head[..head.len() - 1];
            }
            head.to_string()
        }
        None => name.to_string(),
    };
    if base.ends_with(':') {
        base.pop();
    }
    base
}

/// One argument token: unquoted tokens end at whitespace; a token starting
/// with '"' ends at a quote not doubled, and a doubled quote stands for one
/// literal quote. Returns the token and the remaining text.
pub(crate) fn take_token(text: &str) -> Result<(String, &str), SonaScriptError> {
    if let Some(inner) = text.strip_prefix('"') {
        let mut token = String::new();
        let mut chars = inner.char_indices().peekable();
        loop {
            let Some((offset, ch)) = chars.next() else {
                return Err(SonaScriptError::new(
                    "ARGS_UNMATCHED_QUOTE",
                    "Missing matching quote.",
                ));
            };
            if ch == '"' {
                if matches!(chars.peek(), Some((_, '"'))) {
                    chars.next();
                    token.push('"');
                } else {
                    return Ok((token, &inner[offset + 1..]));
                }
            } else {
                token.push(ch);
            }
        }
    } else {
        let end = text.find([' ', '\t']).unwrap_or(text.len());
        Ok((text[..end].to_string(), &text[end..]))
    }
}

impl Interpreter {
    /// Pull every parameter's value out of a completed dialog, by its
    /// stripped name with underscores shown as spaces.
    pub fn set_arguments_from_dialog(
        &mut self,
        dialog: &dyn DialogForm,
    ) -> Result<(), SonaScriptError> {
        for index in 0..self.form.parameters.len() {
            let stripped = strip_parameter_name(&self.form.parameters[index].name);
            self.form.parameters[index].name = stripped.clone();
            let field = stripped.replace('_', " ");
            let parameter = &mut self.form.parameters[index];
            match parameter.kind {
                ParameterKind::Real | ParameterKind::Positive => {
                    parameter.argument = format_numeric(dialog.real(&field)?);
                }
                ParameterKind::Integer | ParameterKind::Natural | ParameterKind::Boolean => {
                    parameter.argument = dialog.integer(&field)?.to_string();
                }
                ParameterKind::Choice | ParameterKind::OptionMenu => {
                    let offset = dialog.integer(&field)?;
                    let label = dialog.string(&field)?;
                    parameter.argument = offset.to_string();
                    parameter.choice_label = label;
                }
                ParameterKind::Button | ParameterKind::Option | ParameterKind::Comment => {}
                _ => {
                    parameter.argument = dialog.string(&field)?;
                }
            }
        }
        self.normalize_bound_arguments()
    }

    /// Bind all named parameters from one delimited string. Every parameter
    /// but the last takes one token; the last consumes the rest of the string
    /// (leading whitespace trimmed, trailing preserved).
    pub fn set_arguments_from_string(&mut self, arguments: &str) -> Result<(), SonaScriptError> {
        let size = self.form.bindable_len();
        for index in 0..size {
            if self.form.parameters[index].name.is_empty() {
                continue;
            }
            self.form.parameters[index].name =
                strip_parameter_name(&self.form.parameters[index].name);
        }
        let mut rest = arguments;
        for index in 0..size.saturating_sub(1) {
            if self.form.parameters[index].name.is_empty() {
                continue; // buttons and comments keep their labels
            }
            rest = rest.trim_start_matches([' ', '\t']);
            let (token, remainder) = take_token(rest)?;
            self.form.parameters[index].argument = token;
            rest = remainder;
        }
        if size > 0 {
            let rest = rest.trim_start_matches([' ', '\t']);
            self.form.parameters[size - 1].argument = rest.to_string();
        }
        self.normalize_bound_arguments()
    }

    /// Bind from an already-typed positional list; the count must match the
    /// named parameters exactly.
    pub fn set_arguments_from_values(
        &mut self,
        values: &[ArgValue],
    ) -> Result<(), SonaScriptError> {
        let size = self.form.bindable_len();
        for index in 0..size {
            if self.form.parameters[index].name.is_empty() {
                continue;
            }
            self.form.parameters[index].name =
                strip_parameter_name(&self.form.parameters[index].name);
        }
        let mut next = 0usize;
        for index in 0..size {
            if self.form.parameters[index].name.is_empty() {
                continue;
            }
            let Some(value) = values.get(next) else {
                return Err(SonaScriptError::new(
                    "ARGS_COUNT",
                    format!("Found {} arguments but expected more.", values.len()),
                ));
            };
            next += 1;
            self.form.parameters[index].argument = match value {
                ArgValue::Numeric(value) => format_numeric(*value),
                ArgValue::Str(value) => value.clone(),
            };
        }
        if next < values.len() {
            return Err(SonaScriptError::new(
                "ARGS_COUNT",
                format!(
                    "Found {} arguments but expected only {}.",
                    values.len(),
                    next
                ),
            ));
        }
        self.normalize_bound_arguments()
    }

    // Booleans normalize to "1"/"0"; choice and optionmenu arguments resolve
    // to a 1-based offset by scanning forward through their button/option
    // fields, recording the matched label.
    fn normalize_bound_arguments(&mut self) -> Result<(), SonaScriptError> {
        let total = self.form.parameters.len();
        let size = self.form.bindable_len();
        for index in 0..size {
            let kind = self.form.parameters[index].kind;
            match kind {
                ParameterKind::Boolean => {
                    let argument = self.form.parameters[index].argument.clone();
                    let normalized = if argument == "1"
                        || argument.eq_ignore_ascii_case("yes")
                        || argument.eq_ignore_ascii_case("on")
                    {
                        "1"
                    } else if argument == "0"
                        || argument.eq_ignore_ascii_case("no")
                        || argument.eq_ignore_ascii_case("off")
                    {
                        "0"
                    } else {
                        return Err(SonaScriptError::new(
                            "ARGS_BOOLEAN",
                            format!(
                                "Unknown value \"{}\" for boolean \"{}\".",
                                argument, self.form.parameters[index].name
                            ),
                        ));
                    };
                    self.form.parameters[index].argument = normalized.to_string();
                }
                ParameterKind::Choice | ParameterKind::OptionMenu => {
                    let argument = self.form.parameters[index].argument.clone();
                    let mut resolved: Option<(usize, String)> = None;
                    for other in index + 1..total {
                        let entry = &self.form.parameters[other];
                        if !matches!(entry.kind, ParameterKind::Button | ParameterKind::Option) {
                            break;
                        }
                        if entry.argument == argument {
                            resolved = Some((other - index, entry.argument.clone()));
                            break;
                        }
                    }
                    if resolved.is_none() {
                        // a 1-based offset is accepted in place of a label
                        if let Ok(offset) = argument.trim().parse::<usize>() {
                            let target = index + offset;
                            if offset >= 1
                                && target < total
                                && (index + 1..=target).all(|other| {
                                    matches!(
                                        self.form.parameters[other].kind,
                                        ParameterKind::Button | ParameterKind::Option
                                    )
                                })
                            {
                                resolved = Some((
                                    offset,
                                    self.form.parameters[target].argument.clone(),
                                ));
                            }
                        }
                    }
                    let Some((offset, label)) = resolved else {
                        let noun = if kind == ParameterKind::Choice {
                            "choice"
                        } else {
                            "option menu"
                        };
                        return Err(SonaScriptError::new(
                            "ARGS_CHOICE",
                            format!(
                                "Unknown value \"{}\" for {} \"{}\".",
                                argument, noun, self.form.parameters[index].name
                            ),
                        ));
                    };
                    self.form.parameters[index].argument = offset.to_string();
                    self.form.parameters[index].choice_label = label;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod arguments_tests {
    use super::*;
    use crate::interpreter::InterpreterOptions;
    use crate::test_support::FakeDialog;

    const FORM: &str = "\
form Test
    word Name xx
    real Time_(s): 3.14
    boolean Play: no
    choice Colour: 1
        button Red
        button Green
    comment Just a note
endform
";

    fn interpreter_with_form() -> Interpreter {
        let mut interpreter = Interpreter::new(InterpreterOptions::default());
        interpreter.read_parameters(FORM).expect("read parameters");
        interpreter
    }

    fn argument(interpreter: &Interpreter, index: usize) -> &str {
        &interpreter.form_spec().parameters[index].argument
    }

    #[test]
    fn name_stripping_removes_help_text_and_colon() {
        assert_eq!(strip_parameter_name("Time_(s):"), "Time");
        assert_eq!(strip_parameter_name("Play:"), "Play");
        assert_eq!(strip_parameter_name("Name"), "Name");
        assert_eq!(strip_parameter_name("Pitch_floor_(Hz)"), "Pitch_floor");
    }

    #[test]
    fn quoted_tokens_use_the_doubled_quote_escape() {
        let (token, rest) = take_token("\"I said \"\"hello\"\"\" next").expect("token");
        assert_eq!(token, "I said \"hello\"");
        assert_eq!(rest, " next");
        let error = take_token("\"unterminated").expect_err("missing quote");
        assert_eq!(error.code, "ARGS_UNMATCHED_QUOTE");
    }

    #[test]
    fn string_binder_takes_tokens_then_the_rest_of_the_line() {
        let mut interpreter = interpreter_with_form();
        interpreter
            .set_arguments_from_string("\"van Gogh\" 2.5 yes Green")
            .expect("bind");
        assert_eq!(argument(&interpreter, 0), "van Gogh");
        assert_eq!(argument(&interpreter, 1), "2.5");
        assert_eq!(argument(&interpreter, 2), "1");
        assert_eq!(argument(&interpreter, 3), "2");
        assert_eq!(
            interpreter.form_spec().parameters[3].choice_label,
            "Green"
        );
    }

    #[test]
    fn boolean_normalization_accepts_the_word_forms() {
        for yes in ["1", "yes", "Yes", "YES", "on", "On", "ON"] {
            let mut interpreter = interpreter_with_form();
            interpreter
                .set_arguments_from_string(&format!("x 1 {} Red", yes))
                .expect("bind");
            assert_eq!(argument(&interpreter, 2), "1", "for input {}", yes);
        }
        for no in ["0", "no", "No", "NO", "off", "Off", "OFF"] {
            let mut interpreter = interpreter_with_form();
            interpreter
                .set_arguments_from_string(&format!("x 1 {} Red", no))
                .expect("bind");
            assert_eq!(argument(&interpreter, 2), "0", "for input {}", no);
        }
        let mut interpreter = interpreter_with_form();
        let error = interpreter
            .set_arguments_from_string("x 1 maybe Red")
            .expect_err("bad boolean");
        assert_eq!(error.code, "ARGS_BOOLEAN");
    }

    #[test]
    fn choice_accepts_a_label_or_a_one_based_offset() {
        let mut interpreter = interpreter_with_form();
        interpreter
            .set_arguments_from_string("x 1 yes 2")
            .expect("bind by offset");
        assert_eq!(argument(&interpreter, 3), "2");
        assert_eq!(interpreter.form_spec().parameters[3].choice_label, "Green");

        let mut interpreter = interpreter_with_form();
        let error = interpreter
            .set_arguments_from_string("x 1 yes Blue")
            .expect_err("unknown label");
        assert_eq!(error.code, "ARGS_CHOICE");
        assert!(error.message.contains("Unknown value \"Blue\" for choice"));
    }

    #[test]
    fn value_binder_checks_the_count_both_ways() {
        let mut interpreter = interpreter_with_form();
        let error = interpreter
            .set_arguments_from_values(&[ArgValue::Str("x".to_string())])
            .expect_err("too few");
        assert!(error.message.contains("expected more"));

        let mut interpreter = interpreter_with_form();
        let error = interpreter
            .set_arguments_from_values(&[
                ArgValue::Str("x".to_string()),
                ArgValue::Numeric(1.0),
                ArgValue::Str("yes".to_string()),
                ArgValue::Str("Red".to_string()),
                ArgValue::Numeric(9.0),
            ])
            .expect_err("too many");
        assert!(error.message.contains("expected only 4"));
    }

    #[test]
    fn string_binder_round_trips_its_own_serialization() {
        let mut interpreter = interpreter_with_form();
        interpreter
            .set_arguments_from_values(&[
                ArgValue::Str("hello".to_string()),
                ArgValue::Numeric(2.5),
                ArgValue::Str("yes".to_string()),
                ArgValue::Str("Green".to_string()),
            ])
            .expect("bind values");
        let serialized: Vec<String> = (0..4)
            .map(|index| interpreter.form_spec().parameters[index].argument.clone())
            .collect();
        let rebound_input = serialized.join(" ");

        let mut second = interpreter_with_form();
        second
            .set_arguments_from_string(&rebound_input)
            .expect("rebind");
        for index in 0..4 {
            assert_eq!(
                second.form_spec().parameters[index].argument,
                interpreter.form_spec().parameters[index].argument,
                "parameter {}",
                index
            );
        }
    }

    #[test]
    fn dialog_binder_reads_typed_values_by_field_name() {
        let mut interpreter = interpreter_with_form();
        let mut dialog = FakeDialog::default();
        dialog.strings.insert("Name".to_string(), "spoken".to_string());
        dialog.reals.insert("Time".to_string(), 1.5);
        dialog.integers.insert("Play".to_string(), 1);
        dialog.integers.insert("Colour".to_string(), 2);
        dialog
            .strings
            .insert("Colour".to_string(), "Green".to_string());
        interpreter.set_arguments_from_dialog(&dialog).expect("bind");
        assert_eq!(argument(&interpreter, 0), "spoken");
        assert_eq!(argument(&interpreter, 1), "1.5");
        assert_eq!(argument(&interpreter, 2), "1");
        assert_eq!(argument(&interpreter, 3), "2");
        assert_eq!(interpreter.form_spec().parameters[3].choice_label, "Green");
    }

    #[test]
    fn dialog_binder_reports_missing_fields() {
        let mut interpreter = interpreter_with_form();
        let dialog = FakeDialog::default();
        let error = interpreter
            .set_arguments_from_dialog(&dialog)
            .expect_err("missing field");
        assert_eq!(error.code, "HOST_DIALOG");
    }
}
