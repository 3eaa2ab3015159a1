// src/gcode/template.rs - G-code script templates
//
// Templates are plain G-code with `{ name }` placeholders. `{{` and `}}`
// produce literal braces. Syntax is checked when the template is loaded;
// unknown variables are only detected when rendering.

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateError {
    #[error("Template '{template}' syntax error: {reason}")]
    Syntax { template: String, reason: String },
    #[error("Template '{template}' references undefined variable '{variable}'")]
    UndefinedVariable { template: String, variable: String },
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Var(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptTemplate {
    name: String,
    source: String,
    segments: Vec<Segment>,
}

/// Variables available while rendering a template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateContext {
    vars: BTreeMap<String, String>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl ToString) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl ToString) {
        self.vars.insert(name.to_string(), value.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

impl ScriptTemplate {
    pub fn new(name: &str, source: &str) -> Result<Self, TemplateError> {
        let segments = parse_segments(name, source)?;
        Ok(Self {
            name: name.to_string(),
            source: source.to_string(),
            segments,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// A template with nothing but whitespace never runs.
    pub fn is_empty(&self) -> bool {
        self.source.trim().is_empty()
    }

    pub fn render(&self, context: &TemplateContext) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Var(var) => {
                    let value = context.get(var).ok_or_else(|| TemplateError::UndefinedVariable {
                        template: self.name.clone(),
                        variable: var.clone(),
                    })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

fn parse_segments(name: &str, source: &str) -> Result<Vec<Segment>, TemplateError> {
    let syntax = |reason: String| TemplateError::Syntax {
        template: name.to_string(),
        reason,
    };
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut chars = source.char_indices().peekable();
    while let Some((pos, c)) = chars.next() {
        match c {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                text.push('{');
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                text.push('}');
            }
            '{' => {
                let mut var = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    var.push(c);
                }
                if !closed {
                    return Err(syntax(format!("unclosed '{{' at offset {}", pos)));
                }
                let var = var.trim();
                if var.is_empty() || !var.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(syntax(format!("invalid variable name '{}'", var)));
                }
                if !text.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut text)));
                }
                segments.push(Segment::Var(var.to_string()));
            }
            '}' => return Err(syntax(format!("unmatched '}}' at offset {}", pos))),
            other => text.push(other),
        }
    }
    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }
    Ok(segments)
}
