use std::collections::HashMap;

use sona_core::{SonaScriptError, MAX_LABELS, MAX_LABEL_LENGTH};

use crate::host::TextFiles;

const MAX_INCLUDE_ROUNDS: usize = 10;

/// Splice `include <file>` lines in repeatedly until none are left. Each round
/// resolves the includes present at its start, so nested includes cost one
/// round each; more than MAX_INCLUDE_ROUNDS rounds means a cycle.
pub fn expand_includes(text: &str, files: &dyn TextFiles) -> Result<String, SonaScriptError> {
    let mut current = text.to_string();
    for _round in 0..=MAX_INCLUDE_ROUNDS {
        let mut replaced = false;
        let mut out = String::with_capacity(current.len());
        for (index, line) in current.split('\n').enumerate() {
            if index > 0 {
                out.push('\n');
            }
            if let Some(rest) = line.strip_prefix("include ") {
                let name = rest.trim_start_matches([' ', '\t']).trim_end_matches('\r');
                let included = files.read_text(name).map_err(|error| {
                    SonaScriptError::new(
                        "ENGINE_INCLUDE_READ",
                        format!("Include file \"{}\" not read: {}", name, error.message),
                    )
                })?;
                out.push_str(&included);
                replaced = true;
            } else {
                out.push_str(line);
            }
        }
        if !replaced {
            return Ok(out);
        }
        current = out;
    }
    Err(SonaScriptError::new(
        "ENGINE_INCLUDE_DEPTH",
        "Include files nested too deep. Probably cyclic.",
    ))
}

#[derive(Debug, Clone)]
pub struct Label {
    pub name: String,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BranchKind {
    Elsif,
    Else,
    Endif,
}

/// Structured-control partners resolved ahead of execution over the raw
/// lines. A construct with no partner simply has no entry; the engine reports
/// "Unmatched '…'." only when a jump actually needs the missing line.
#[derive(Debug, Default)]
pub(crate) struct ControlIndex {
    pub(crate) for_to_endfor: HashMap<usize, usize>,
    pub(crate) endfor_to_for: HashMap<usize, usize>,
    pub(crate) while_to_endwhile: HashMap<usize, usize>,
    pub(crate) endwhile_to_while: HashMap<usize, usize>,
    pub(crate) until_to_repeat: HashMap<usize, usize>,
    pub(crate) next_branch: HashMap<usize, (usize, BranchKind)>,
    pub(crate) endif_of: HashMap<usize, usize>,
    pub(crate) form_to_endform: HashMap<usize, usize>,
    pub(crate) procedure_to_endproc: HashMap<usize, usize>,
}

fn is_word_end(line: &str, len: usize) -> bool {
    matches!(line.as_bytes().get(len), None | Some(b' ') | Some(b'\t'))
}

fn is_bare_keyword(line: &str, keyword: &str) -> bool {
    line.starts_with(keyword) && is_word_end(line, keyword.len())
}

enum LineShape {
    If,
    Elsif,
    Else,
    Endif,
    For,
    Endfor,
    While,
    Endwhile,
    Repeat,
    Until,
    Procedure,
    Endproc,
    Form,
    Endform,
    Other,
}

fn classify(line: &str) -> LineShape {
    if line.starts_with("if ") {
        LineShape::If
    } else if line.starts_with("elsif ") || line.starts_with("elif ") {
        LineShape::Elsif
    } else if is_bare_keyword(line, "else") {
        LineShape::Else
    } else if is_bare_keyword(line, "endif") {
        LineShape::Endif
    } else if line.starts_with("for ") {
        LineShape::For
    } else if is_bare_keyword(line, "endfor") {
        LineShape::Endfor
    } else if line.starts_with("while ") {
        LineShape::While
    } else if is_bare_keyword(line, "endwhile") {
        LineShape::Endwhile
    } else if is_bare_keyword(line, "repeat") {
        LineShape::Repeat
    } else if line.starts_with("until ") {
        LineShape::Until
    } else if line.starts_with("procedure ") {
        LineShape::Procedure
    } else if is_bare_keyword(line, "endproc") {
        LineShape::Endproc
    } else if line.starts_with("form ") {
        LineShape::Form
    } else if is_bare_keyword(line, "endform") {
        LineShape::Endform
    } else {
        LineShape::Other
    }
}

struct IfChain {
    last: usize,
    branches: Vec<usize>,
}

impl ControlIndex {
    fn build(lines: &[String]) -> Self {
        let mut index = Self::default();
        let mut if_stack: Vec<IfChain> = Vec::new();
        let mut for_stack: Vec<usize> = Vec::new();
        let mut while_stack: Vec<usize> = Vec::new();
        let mut repeat_stack: Vec<usize> = Vec::new();
        let mut procedure_stack: Vec<usize> = Vec::new();
        let mut form_stack: Vec<usize> = Vec::new();

        for (offset, line) in lines.iter().enumerate() {
            let number = offset + 1;
            match classify(line) {
                LineShape::If => if_stack.push(IfChain {
                    last: number,
                    branches: vec![number],
                }),
                LineShape::Elsif => {
                    if let Some(chain) = if_stack.last_mut() {
                        index.next_branch.insert(chain.last, (number, BranchKind::Elsif));
                        chain.last = number;
                        chain.branches.push(number);
                    }
                }
                LineShape::Else => {
                    if let Some(chain) = if_stack.last_mut() {
                        index.next_branch.insert(chain.last, (number, BranchKind::Else));
                        chain.last = number;
                        chain.branches.push(number);
                    }
                }
                LineShape::Endif => {
                    if let Some(chain) = if_stack.pop() {
                        index.next_branch.insert(chain.last, (number, BranchKind::Endif));
                        for branch in chain.branches {
                            index.endif_of.insert(branch, number);
                        }
                    }
                }
                LineShape::For => for_stack.push(number),
                LineShape::Endfor => {
                    if let Some(opening) = for_stack.pop() {
                        index.for_to_endfor.insert(opening, number);
                        index.endfor_to_for.insert(number, opening);
                    }
                }
                LineShape::While => while_stack.push(number),
                LineShape::Endwhile => {
                    if let Some(opening) = while_stack.pop() {
                        index.while_to_endwhile.insert(opening, number);
                        index.endwhile_to_while.insert(number, opening);
                    }
                }
                LineShape::Repeat => repeat_stack.push(number),
                LineShape::Until => {
                    if let Some(opening) = repeat_stack.pop() {
                        index.until_to_repeat.insert(number, opening);
                    }
                }
                LineShape::Procedure => procedure_stack.push(number),
                LineShape::Endproc => {
                    if let Some(opening) = procedure_stack.pop() {
                        index.procedure_to_endproc.insert(opening, number);
                    }
                }
                LineShape::Form => form_stack.push(number),
                LineShape::Endform => {
                    if let Some(opening) = form_stack.pop() {
                        index.form_to_endform.insert(opening, number);
                    }
                }
                LineShape::Other => {}
            }
        }
        index
    }
}

#[derive(Debug)]
pub struct ScriptLines {
    lines: Vec<String>,
    labels: Vec<Label>,
    pub(crate) control: ControlIndex,
}

impl ScriptLines {
    pub fn prepare(text: &str) -> Result<Self, SonaScriptError> {
        let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
        let mut lines: Vec<String> = normalized
            .split('\n')
            .map(|raw| raw.trim_start_matches([' ', '\t', '\u{00A0}']).to_string())
            .collect();

        // Labels are indexed before continuation lines are merged.
        let mut labels: Vec<Label> = Vec::new();
        for (offset, line) in lines.iter().enumerate() {
            if let Some(rest) = line.strip_prefix("label ") {
                let name: String = rest.chars().take(MAX_LABEL_LENGTH).collect();
                if labels.iter().any(|label| label.name == name) {
                    return Err(SonaScriptError::at_line(
                        "ENGINE_LABEL_DUPLICATE",
                        format!("Duplicate label \"{}\".", name),
                        offset + 1,
                    ));
                }
                if labels.len() >= MAX_LABELS {
                    return Err(SonaScriptError::at_line(
                        "ENGINE_LABEL_OVERFLOW",
                        "Too many labels.",
                        offset + 1,
                    ));
                }
                labels.push(Label {
                    name,
                    line: offset + 1,
                });
            }
        }

        // Continuation lines chain upward, so resolve them tail to head.
        for offset in (1..lines.len()).rev() {
            if let Some(rest) = lines[offset].strip_prefix("...") {
                let rest = rest.to_string();
                lines[offset - 1].push_str(&rest);
                lines[offset].clear();
            }
        }

        let control = ControlIndex::build(&lines);
        Ok(Self {
            lines,
            labels,
            control,
        })
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// 1-based access, matching the line numbers used in error reports.
    pub fn line(&self, number: usize) -> &str {
        &self.lines[number - 1]
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn label_line(&self, name: &str) -> Result<usize, SonaScriptError> {
        self.labels
            .iter()
            .find(|label| label.name == name)
            .map(|label| label.line)
            .ok_or_else(|| {
                SonaScriptError::new("ENGINE_LABEL_UNKNOWN", format!("Unknown label \"{}\".", name))
            })
    }
}
