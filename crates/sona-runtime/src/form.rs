use sona_core::{
    FormSpec, ParameterDeclaration, ParameterKind, SonaScriptError, MAX_PARAMETERS,
};

fn match_parameter_keyword(line: &str) -> Option<(ParameterKind, &str)> {
    const KEYWORDS: [(&str, ParameterKind); 13] = [
        ("word ", ParameterKind::Word),
        ("real ", ParameterKind::Real),
        ("positive ", ParameterKind::Positive),
        ("integer ", ParameterKind::Integer),
        ("natural ", ParameterKind::Natural),
        ("boolean ", ParameterKind::Boolean),
        ("sentence ", ParameterKind::Sentence),
        ("text ", ParameterKind::Text),
        ("choice ", ParameterKind::Choice),
        ("optionmenu ", ParameterKind::OptionMenu),
        ("button ", ParameterKind::Button),
        ("option ", ParameterKind::Option),
        ("comment ", ParameterKind::Comment),
    ];
    KEYWORDS
        .iter()
        .find_map(|(keyword, kind)| line.strip_prefix(keyword).map(|rest| (*kind, rest)))
}

/// Scan the script's leading form block into parameter declarations. A script
/// without a form line has no parameters.
///
/// ```text
/// form Something
///     real Time_(s) 3.14 (= pi)
///     choice Colour 2
///         button Red
///         button Green
///         button Blue
/// endform
/// ```
pub fn read_parameters(text: &str) -> Result<FormSpec, SonaScriptError> {
    let mut lines = text
        .split('\n')
        .map(|raw| raw.trim_start_matches([' ', '\t', '\u{00A0}']).trim_end_matches('\r'));

    let mut title = None;
    for line in lines.by_ref() {
        if let Some(rest) = line.strip_prefix("form ") {
            title = Some(rest.trim_start_matches([' ', '\t']).to_string());
            break;
        }
    }
    let Some(title) = title else {
        return Ok(FormSpec::default());
    };

    let mut spec = FormSpec {
        title,
        parameters: Vec::new(),
    };
    loop {
        let Some(line) = lines.next() else {
            return Err(SonaScriptError::new("FORM_UNFINISHED", "Unfinished form."));
        };
        if line.is_empty() || line.starts_with(['#', ';', '!']) {
            continue;
        }
        if line.starts_with("endform") {
            break;
        }
        let Some((kind, rest)) = match_parameter_keyword(line) else {
            return Err(SonaScriptError::new(
                "FORM_UNKNOWN_TYPE",
                format!("Unknown parameter type:\n\"{}\".", line),
            ));
        };
        if spec.parameters.len() >= MAX_PARAMETERS {
            return Err(SonaScriptError::new(
                "FORM_PARAMETER_OVERFLOW",
                "Too many form parameters.",
            ));
        }
        let rest = rest.trim_start_matches([' ', '\t']);
        let declaration = if kind.binds_variable() {
            if rest.is_empty() {
                return Err(SonaScriptError::new(
                    "FORM_MISSING_NAME",
                    format!("Missing parameter:\n\"{}\".", line),
                ));
            }
            let name_end = rest.find([' ', '\t']).unwrap_or(rest.len());
            let name = &rest[..name_end];
            let argument = rest[name_end..].trim_start_matches([' ', '\t']);
            ParameterDeclaration::new(kind, name, argument)
        } else {
            // The remaining text is the button label or comment, verbatim.
            ParameterDeclaration::new(kind, "", rest)
        };
        spec.parameters.push(declaration);
    }
    Ok(spec)
}

#[cfg(test)]
mod form_tests {
    use super::*;

    const EXAMPLE: &str = "\
# preamble comment
form Something
    real Time_(s) 3.14 (= pi)
    choice Colour 2
        button Red
        button Green
        button Blue
    ; a comment inside the form
    boolean Play 1
endform
echo body
";

    #[test]
    fn parameters_come_out_in_declaration_order() {
        let spec = read_parameters(EXAMPLE).expect("parse");
        assert_eq!(spec.title, "Something");
        let kinds: Vec<ParameterKind> = spec.parameters.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ParameterKind::Real,
                ParameterKind::Choice,
                ParameterKind::Button,
                ParameterKind::Button,
                ParameterKind::Button,
                ParameterKind::Boolean,
            ]
        );
        assert_eq!(spec.parameters[0].name, "Time_(s)");
        assert_eq!(spec.parameters[0].argument, "3.14 (= pi)");
        assert_eq!(spec.parameters[1].argument, "2");
        // button labels are stored as arguments, with empty names
        assert_eq!(spec.parameters[2].name, "");
        assert_eq!(spec.parameters[2].argument, "Red");
    }

    #[test]
    fn script_without_form_has_no_parameters() {
        let spec = read_parameters("echo hello\nx = 1").expect("parse");
        assert!(spec.parameters.is_empty());
        assert!(spec.title.is_empty());
    }

    #[test]
    fn unknown_parameter_type_quotes_the_line() {
        let error = read_parameters("form T\nflag Play 1\nendform").expect_err("unknown type");
        assert_eq!(error.code, "FORM_UNKNOWN_TYPE");
        assert!(error.message.contains("flag Play 1"));
    }

    #[test]
    fn missing_name_after_type_keyword_is_fatal() {
        let error = read_parameters("form T\nreal \nendform").expect_err("missing name");
        assert_eq!(error.code, "FORM_MISSING_NAME");
    }

    #[test]
    fn form_without_endform_is_fatal() {
        let error = read_parameters("form T\nreal Time 1.0").expect_err("unfinished");
        assert_eq!(error.code, "FORM_UNFINISHED");
    }
}
