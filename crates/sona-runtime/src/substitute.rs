use sona_core::{format_fixed, format_numeric, format_percent, Value};

use crate::variables::ScopedVariables;

// Quoted spans longer than this are never variable candidates.
const MAX_CANDIDATE_LENGTH: usize = 299;

/// Single left-to-right substitution pass over one line: each 'name' span
/// whose name is a known variable is replaced by its formatted value, with an
/// optional ':precision' format spec ('%' for percentage). Replaced text is
/// not re-scanned; unknown names leave the span untouched.
pub(crate) fn substitute_variables(line: &str, variables: &ScopedVariables<'_>) -> String {
    let chars: Vec<char> = line.chars().collect();
    let mut out = String::with_capacity(line.len());
    let mut i = 0usize;
    while i < chars.len() {
        if chars[i] != '\'' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        let mut j = i + 1;
        while j < chars.len() && chars[j] != '\'' && j - i < MAX_CANDIDATE_LENGTH {
            j += 1;
        }
        if j >= chars.len() {
            // no matching right quote: the rest of the line stands as-is
            out.extend(&chars[i..]);
            break;
        }
        if chars[j] != '\'' || j - i == 1 {
            // too long or empty between the quotes
            out.push('\'');
            i += 1;
            continue;
        }
        let candidate: String = chars[i + 1..j].iter().collect();
        let (name, precision, percent) = match candidate.split_once(':') {
            Some((head, spec)) => {
                let digits: String = spec.chars().take_while(char::is_ascii_digit).collect();
                (
                    head.to_string(),
                    Some(digits.parse::<usize>().unwrap_or(0)),
                    spec.contains('%'),
                )
            }
            None => (candidate, None, false),
        };
        match variables.get(&name) {
            Some(Value::Str(text)) => {
                out.push_str(text);
                i = j + 1;
            }
            Some(Value::Numeric(value)) => {
                let text = if percent {
                    format_percent(*value, precision.unwrap_or(0))
                } else if let Some(precision) = precision {
                    format_fixed(*value, precision)
                } else {
                    format_numeric(*value)
                };
                out.push_str(&text);
                i = j + 1;
            }
            _ => {
                // not a variable (or a matrix): skip past this quote pair unchanged
                out.extend(&chars[i..=j]);
                i = j + 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod substitute_tests {
    use super::*;
    use crate::variables::VariableStore;

    fn store() -> VariableStore {
        let mut store = VariableStore::new();
        store.set_numeric("x", 3.14159).expect("set");
        store.set_numeric("share", 0.156).expect("set");
        store.set_string("name$", "World".to_string()).expect("set");
        store.set_numeric("greet.count", 4.0).expect("set");
        store
    }

    #[test]
    fn numeric_substitution_honours_the_precision_spec() {
        let store = store();
        let scoped = ScopedVariables::new(&store, "");
        assert_eq!(
            substitute_variables("echo The value is 'x:2'", &scoped),
            "echo The value is 3.14"
        );
        assert_eq!(substitute_variables("echo 'x'", &scoped), "echo 3.14159");
        assert_eq!(
            substitute_variables("echo 'share:1%'", &scoped),
            "echo 15.6%"
        );
    }

    #[test]
    fn string_variables_substitute_verbatim() {
        let store = store();
        let scoped = ScopedVariables::new(&store, "");
        assert_eq!(
            substitute_variables("echo Hello 'name$'!", &scoped),
            "echo Hello World!"
        );
    }

    #[test]
    fn unknown_names_leave_the_span_untouched() {
        let store = store();
        let scoped = ScopedVariables::new(&store, "");
        assert_eq!(
            substitute_variables("echo 'nope' and 'x:0'", &scoped),
            "echo 'nope' and 3"
        );
    }

    #[test]
    fn unmatched_left_quote_ends_the_scan() {
        let store = store();
        let scoped = ScopedVariables::new(&store, "");
        assert_eq!(substitute_variables("echo it's fine", &scoped), "echo it's fine");
    }

    #[test]
    fn dotted_names_resolve_in_the_current_procedure() {
        let store = store();
        let inside = ScopedVariables::new(&store, "greet");
        assert_eq!(substitute_variables("echo '.count'", &inside), "echo 4");
        let outside = ScopedVariables::new(&store, "");
        assert_eq!(substitute_variables("echo '.count'", &outside), "echo '.count'");
    }

    #[test]
    fn substituted_text_is_not_rescanned() {
        let mut store = VariableStore::new();
        store.set_string("a$", "'b$'".to_string()).expect("set");
        store.set_string("b$", "nope".to_string()).expect("set");
        let scoped = ScopedVariables::new(&store, "");
        assert_eq!(substitute_variables("echo 'a$'", &scoped), "echo 'b$'");
    }
}
