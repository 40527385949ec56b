use serde::{Deserialize, Serialize};

pub const MAX_PARAMETERS: usize = 400;
pub const MAX_LABELS: usize = 1000;
pub const MAX_CALL_DEPTH: usize = 50;
pub const MAX_LABEL_LENGTH: usize = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParameterKind {
    Word,
    Real,
    Positive,
    Integer,
    Natural,
    Boolean,
    Sentence,
    Text,
    Choice,
    OptionMenu,
    Button,
    Option,
    Comment,
}

impl ParameterKind {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Word => "word",
            Self::Real => "real",
            Self::Positive => "positive",
            Self::Integer => "integer",
            Self::Natural => "natural",
            Self::Boolean => "boolean",
            Self::Sentence => "sentence",
            Self::Text => "text",
            Self::Choice => "choice",
            Self::OptionMenu => "optionmenu",
            Self::Button => "button",
            Self::Option => "option",
            Self::Comment => "comment",
        }
    }

    /// Button, option and comment fields are structural: they never bind a
    /// script variable and keep an empty name.
    pub fn binds_variable(self) -> bool {
        !matches!(self, Self::Button | Self::Option | Self::Comment)
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Real | Self::Positive | Self::Integer | Self::Natural | Self::Boolean
        )
    }

    pub fn is_choice(self) -> bool {
        matches!(self, Self::Choice | Self::OptionMenu)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDeclaration {
    pub kind: ParameterKind,
    pub name: String,
    pub argument: String,
    /// For choice/optionmenu parameters: the label of the selected button,
    /// recorded when the argument is normalized to a 1-based offset.
    pub choice_label: String,
}

impl ParameterDeclaration {
    pub fn new(kind: ParameterKind, name: impl Into<String>, argument: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            argument: argument.into(),
            choice_label: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormSpec {
    pub title: String,
    pub parameters: Vec<ParameterDeclaration>,
}

impl FormSpec {
    /// Number of fields that take a positional value: trailing fields without
    /// a variable name (button, option, comment) are ignored.
    pub fn bindable_len(&self) -> usize {
        let mut size = self.parameters.len();
        while size >= 1 && self.parameters[size - 1].name.is_empty() {
            size -= 1;
        }
        size
    }
}

#[cfg(test)]
mod types_tests {
    use super::*;

    #[test]
    fn bindable_len_ignores_trailing_unnamed_fields() {
        let spec = FormSpec {
            title: "Test".to_string(),
            parameters: vec![
                ParameterDeclaration::new(ParameterKind::Word, "name", "x"),
                ParameterDeclaration::new(ParameterKind::Choice, "colour", "1"),
                ParameterDeclaration::new(ParameterKind::Button, "", "Red"),
                ParameterDeclaration::new(ParameterKind::Button, "", "Green"),
            ],
        };
        assert_eq!(spec.bindable_len(), 2);
    }

    #[test]
    fn form_spec_round_trips_through_json() {
        let spec = FormSpec {
            title: "Sound settings".to_string(),
            parameters: vec![
                ParameterDeclaration::new(ParameterKind::Real, "Time_(s)", "3.14 (= pi)"),
                ParameterDeclaration::new(ParameterKind::OptionMenu, "Shape", "2"),
                ParameterDeclaration::new(ParameterKind::Option, "", "Sine"),
                ParameterDeclaration::new(ParameterKind::Option, "", "Cosine"),
            ],
        };
        let text = serde_json::to_string(&spec).expect("serialize");
        let back: FormSpec = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(back, spec);
    }

    #[test]
    fn parameter_kind_keywords_are_stable() {
        assert_eq!(ParameterKind::OptionMenu.keyword(), "optionmenu");
        assert!(ParameterKind::Boolean.is_numeric());
        assert!(!ParameterKind::Comment.binds_variable());
        assert!(ParameterKind::Choice.is_choice());
    }
}
