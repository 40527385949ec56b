use std::cmp::Reverse;

use regex::Regex;
use rhai::{Array, Dynamic, Engine, ImmutableString, Scope, FLOAT, INT};
use sona_core::{SonaScriptError, Value};

use crate::host::{FormulaKind, FormulaResult, FormulaService};
use crate::variables::ScopedVariables;

/// Expression evaluator backed by an embedded rhai engine. Script variables
/// are pushed into the evaluation scope under sanitized symbols and the
/// expression text is rewritten to rhai syntax before it runs.
#[derive(Debug, Default)]
pub struct RhaiFormula;

enum Segment {
    Code(String),
    Literal(String),
}

// Split on string literals first; all rewriting applies to code only.
// Literals use the script language's doubled-quote escape.
fn parse_segments(source: &str) -> Result<Vec<Segment>, SonaScriptError> {
    let mut segments = Vec::new();
    let mut code = String::new();
    let mut chars = source.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '"' {
            code.push(ch);
            continue;
        }
        segments.push(Segment::Code(std::mem::take(&mut code)));
        let mut literal = String::new();
        loop {
            match chars.next() {
                None => {
                    return Err(SonaScriptError::new(
                        "EVAL_STRING_LITERAL",
                        "Incomplete string literal: the quotes don't match.",
                    ))
                }
                Some('"') => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        literal.push('"');
                    } else {
                        break;
                    }
                }
                Some(other) => literal.push(other),
            }
        }
        segments.push(Segment::Literal(literal));
    }
    if !code.is_empty() {
        segments.push(Segment::Code(code));
    }
    Ok(segments)
}

fn variable_symbol(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    out.push_str("__v_");
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    out
}

fn is_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '$' | '#' | '.')
}

// Boundary-checked literal replacement, so "x" never rewrites inside "x2",
// "x$" or "max(".
fn replace_symbol(source: &str, name: &str, replacement: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut cursor = 0usize;
    while let Some(found) = source[cursor..].find(name) {
        let start = cursor + found;
        let end = start + name.len();
        let left = source[..start].chars().next_back();
        let right = source[end..].chars().next();
        let left_ok = left.map_or(true, |ch| !is_name_char(ch));
        let right_ok = right.map_or(true, |ch| !is_name_char(ch) && ch != '[' && ch != '(');
        if left_ok && right_ok {
            out.push_str(&source[cursor..start]);
            out.push_str(replacement);
            cursor = end;
            continue;
        }
        let ch = source[start..].chars().next().expect("non-empty suffix");
        let next = start + ch.len_utf8();
        out.push_str(&source[cursor..next]);
        cursor = next;
    }
    out.push_str(&source[cursor..]);
    out
}

// The script language writes equality as '=' and inequality as '<>'.
fn translate_comparisons(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    let mut out = String::with_capacity(code.len());
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '<' && chars.get(i + 1) == Some(&'>') {
            out.push_str("!=");
            i += 2;
            continue;
        }
        if ch == '=' {
            if chars.get(i + 1) == Some(&'=') {
                out.push_str("==");
                i += 2;
                continue;
            }
            let previous = if i > 0 { Some(chars[i - 1]) } else { None };
            if matches!(previous, Some('<' | '>' | '!')) {
                out.push('=');
            } else {
                out.push_str("==");
            }
            i += 1;
            continue;
        }
        out.push(ch);
        i += 1;
    }
    out
}

// rhai's '/' is integer division on two integer literals; the script language
// is double-valued throughout, so standalone integer literals are promoted.
fn promote_integer_literals(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    let mut out = String::with_capacity(code.len() * 2);
    let mut i = 0usize;
    while i < chars.len() {
        if !chars[i].is_ascii_digit() {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        let glued = |ch: Option<&char>| {
            ch.map_or(false, |c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.')
        };
        let before = if start == 0 { None } else { Some(&chars[start - 1]) };
        out.extend(&chars[start..i]);
        if !glued(before) && !glued(chars.get(i)) {
            out.push_str(".0");
        }
    }
    out
}

fn translate_word_operators(code: &str) -> String {
    let pattern = Regex::new(r"\b(and|or|not)\b").expect("word operator regex must compile");
    pattern
        .replace_all(code, |captures: &regex::Captures<'_>| match &captures[1] {
            "and" => "&&",
            "or" => "||",
            _ => "!",
        })
        .to_string()
}

fn escape_rhai_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

fn numeric_item(value: &Dynamic) -> Option<f64> {
    if value.is::<bool>() {
        return Some(if value.clone_cast::<bool>() { 1.0 } else { 0.0 });
    }
    if value.is::<INT>() {
        return Some(value.clone_cast::<INT>() as f64);
    }
    if value.is::<FLOAT>() {
        return Some(value.clone_cast::<FLOAT>());
    }
    None
}

fn matrix_to_dynamic(rows: &[Vec<f64>]) -> Dynamic {
    let mut outer = Array::new();
    for row in rows {
        let mut inner = Array::new();
        for value in row {
            inner.push(Dynamic::from_float(*value as FLOAT));
        }
        outer.push(Dynamic::from_array(inner));
    }
    Dynamic::from_array(outer)
}

fn dynamic_to_matrix(value: Dynamic, expression: &str) -> Result<Vec<Vec<f64>>, SonaScriptError> {
    let bad = || {
        SonaScriptError::new(
            "EVAL_MATRIX_EXPECTED",
            format!("Expression \"{}\" is not a numeric matrix.", expression.trim()),
        )
    };
    if !value.is::<Array>() {
        return Err(bad());
    }
    let array = value.cast::<Array>();
    if !array.is_empty() && array.iter().all(|item| item.is::<Array>()) {
        let mut rows = Vec::with_capacity(array.len());
        for item in array {
            let inner = item.cast::<Array>();
            let mut row = Vec::with_capacity(inner.len());
            for cell in &inner {
                row.push(numeric_item(cell).ok_or_else(bad)?);
            }
            rows.push(row);
        }
        Ok(rows)
    } else {
        let mut row = Vec::with_capacity(array.len());
        for cell in &array {
            row.push(numeric_item(cell).ok_or_else(bad)?);
        }
        Ok(vec![row])
    }
}

impl FormulaService for RhaiFormula {
    fn evaluate(
        &self,
        variables: &ScopedVariables<'_>,
        expression: &str,
        kind: FormulaKind,
    ) -> Result<FormulaResult, SonaScriptError> {
        let mut names = variables.visible();
        names.sort_by_key(|(name, _)| Reverse(name.len()));

        let segments = parse_segments(expression)?;
        let mut used: Vec<(String, &Value)> = Vec::new();
        let mut rewritten = String::with_capacity(expression.len());
        for segment in segments {
            match segment {
                Segment::Literal(text) => rewritten.push_str(&escape_rhai_literal(&text)),
                Segment::Code(mut code) => {
                    for (name, value) in &names {
                        let symbol = variable_symbol(name);
                        let replaced = replace_symbol(&code, name, &symbol);
                        if replaced != code {
                            code = replaced;
                            if !used.iter().any(|(existing, _)| *existing == symbol) {
                                used.push((symbol, *value));
                            }
                        }
                    }
                    let code = translate_comparisons(&code);
                    let code = translate_word_operators(&code);
                    let mut code = promote_integer_literals(&code);
                    if kind == FormulaKind::Matrix {
                        code = code.replace('{', "[").replace('}', "]");
                    }
                    rewritten.push_str(&code);
                }
            }
        }

        let mut scope = Scope::new();
        scope.push_constant("undefined", f64::NAN as FLOAT);
        scope.push_constant("pi", std::f64::consts::PI as FLOAT);
        scope.push_constant("e", std::f64::consts::E as FLOAT);
        for (symbol, value) in used {
            match value {
                Value::Numeric(v) => scope.push_dynamic(symbol, Dynamic::from_float(*v as FLOAT)),
                Value::Str(s) => scope.push_dynamic(symbol, Dynamic::from(s.clone())),
                Value::Matrix(rows) => scope.push_dynamic(symbol, matrix_to_dynamic(rows)),
            };
        }

        let mut engine = Engine::new();
        engine.set_strict_variables(true);
        let source = format!("({})", rewritten);
        let result = engine
            .eval_with_scope::<Dynamic>(&mut scope, &source)
            .map_err(|error| {
                SonaScriptError::new(
                    "EVAL_EXPRESSION",
                    format!("Expression \"{}\" not evaluated: {}", expression.trim(), error),
                )
            })?;

        match kind {
            FormulaKind::Numeric => numeric_item(&result)
                .map(FormulaResult::Numeric)
                .ok_or_else(|| {
                    SonaScriptError::new(
                        "EVAL_NUMERIC_EXPECTED",
                        format!("Expression \"{}\" is not numeric.", expression.trim()),
                    )
                }),
            FormulaKind::Str => {
                if result.is::<ImmutableString>() {
                    Ok(FormulaResult::Str(
                        result.cast::<ImmutableString>().to_string(),
                    ))
                } else {
                    Err(SonaScriptError::new(
                        "EVAL_STRING_EXPECTED",
                        format!("Expression \"{}\" is not a string.", expression.trim()),
                    ))
                }
            }
            FormulaKind::Matrix => {
                dynamic_to_matrix(result, expression).map(FormulaResult::Matrix)
            }
        }
    }
}
