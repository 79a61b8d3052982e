//! Template engine for NatPMP templates
//!
//! Uses minijinja with its default delimiters:
//! - Variables: `{{ ... }}`
//! - Blocks: `{% ... %}` (`if`, `for`, `set`)
//! - Comments: `{# ... #}`
//!
//! Undefined names are errors. A Go-style leading dot on a field path
//! (`{{ .Spec.ExternalPort }}`) is accepted and stripped before rendering.

use minijinja::{Environment, UndefinedBehavior};
use tracing::debug;

use super::context::TemplateContext;
use super::decode::{decode, DerivedDocument};
use super::error::TemplateError;
use crate::Error;

/// Renders NatPMP templates and decodes their output
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine").finish_non_exhaustive()
    }
}

impl TemplateEngine {
    /// Create an engine with strict undefined handling
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        Self { env }
    }

    /// Render one template source to text
    pub fn render(&self, template: &str, ctx: &TemplateContext) -> Result<String, TemplateError> {
        let normalized = normalize_leading_dots(template);
        self.env
            .render_str(&normalized, ctx.to_value())
            .map_err(TemplateError::from)
    }

    /// Render one template and decode its output into documents
    ///
    /// Fails as a whole if any document in the output is malformed.
    pub fn process_template(
        &self,
        template: &str,
        ctx: &TemplateContext,
    ) -> Result<Vec<DerivedDocument>, TemplateError> {
        let rendered = self.render(template, ctx)?;
        decode(&rendered)
    }

    /// Process every template in order and concatenate the documents
    ///
    /// The error names the index of the first template that failed.
    pub fn process_templates<S: AsRef<str>>(
        &self,
        templates: &[S],
        ctx: &TemplateContext,
    ) -> Result<Vec<DerivedDocument>, Error> {
        let mut documents = Vec::new();
        for (index, template) in templates.iter().enumerate() {
            let docs = self
                .process_template(template.as_ref(), ctx)
                .map_err(|source| Error::Template { index, source })?;
            debug!(index, documents = docs.len(), "rendered template");
            documents.extend(docs);
        }
        Ok(documents)
    }
}

/// Strip Go-style leading dots from field paths inside `{{ }}` and `{% %}`
///
/// `{{ .Spec.ExternalPort }}` becomes `{{ Spec.ExternalPort }}`. Dots used
/// for attribute access (`Spec.ExternalPort`, `foo().bar`) and dots inside
/// string literals are left alone.
fn normalize_leading_dots(template: &str) -> String {
    let mut result = String::with_capacity(template.len());
    let mut remaining = template;

    while let Some((start, close)) = next_tag(remaining) {
        result.push_str(&remaining[..start + 2]);
        remaining = &remaining[start + 2..];

        if let Some(end) = remaining.find(close) {
            result.push_str(&strip_expression_dots(&remaining[..end]));
            result.push_str(close);
            remaining = &remaining[end + close.len()..];
        } else {
            result.push_str(remaining);
            remaining = "";
        }
    }

    result.push_str(remaining);
    result
}

/// Find the next `{{` or `{%` and the delimiter that closes it
fn next_tag(s: &str) -> Option<(usize, &'static str)> {
    let var = s.find("{{").map(|i| (i, "}}"));
    let block = s.find("{%").map(|i| (i, "%}"));
    match (var, block) {
        (Some(v), Some(b)) => Some(if v.0 <= b.0 { v } else { b }),
        (v, b) => v.or(b),
    }
}

fn strip_expression_dots(expr: &str) -> String {
    let mut result = String::with_capacity(expr.len());
    let mut chars = expr.chars().peekable();
    let mut in_single_quote = false;
    let mut in_double_quote = false;

    while let Some(ch) = chars.next() {
        match ch {
            '\'' if !in_double_quote => {
                in_single_quote = !in_single_quote;
                result.push(ch);
            }
            '"' if !in_single_quote => {
                in_double_quote = !in_double_quote;
                result.push(ch);
            }
            '.' if !in_single_quote && !in_double_quote => {
                let prev_continues_path = result
                    .chars()
                    .last()
                    .is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | ')' | ']'));
                let next_is_ident = chars
                    .peek()
                    .is_some_and(|c| c.is_alphabetic() || *c == '_');
                if prev_continues_path || !next_is_ident {
                    result.push('.');
                }
            }
            _ => result.push(ch),
        }
    }

    result
}
