//! Template error types

use std::fmt;

/// Errors that can occur while turning a template into documents
///
/// All three are attributable to the template author and do not resolve
/// without a spec change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// Template source is not valid syntax
    Parse(String),
    /// Template failed while rendering, e.g. an unknown name was referenced
    Execute(String),
    /// Rendered output is not a stream of YAML or JSON mappings
    Decode(String),
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(msg) => write!(f, "template syntax error: {}", msg),
            Self::Execute(msg) => write!(f, "template execution error: {}", msg),
            Self::Decode(msg) => write!(f, "unable to decode rendered template: {}", msg),
        }
    }
}

impl std::error::Error for TemplateError {}

impl From<minijinja::Error> for TemplateError {
    fn from(err: minijinja::Error) -> Self {
        match err.kind() {
            minijinja::ErrorKind::SyntaxError => Self::Parse(err.to_string()),
            _ => Self::Execute(err.to_string()),
        }
    }
}
