//! Decoding rendered template output into documents
//!
//! Output whose first non-whitespace character is `{` or `[` is read as a
//! concatenated JSON stream. Anything else is read as multi-document YAML.
//! Empty documents are skipped. Every remaining document must be a mapping
//! carrying `apiVersion`, `kind` and `metadata.name`.

use serde::Deserialize;
use serde_json::Value;

use super::error::TemplateError;

/// A generic object produced by rendering a template
#[derive(Clone, Debug, PartialEq)]
pub struct DerivedDocument(Value);

impl DerivedDocument {
    /// Wrap a JSON object
    ///
    /// Returns the value back if it is not a mapping.
    pub fn from_value(value: Value) -> Result<Self, Value> {
        if value.is_object() {
            Ok(Self(value))
        } else {
            Err(value)
        }
    }

    /// `apiVersion`, if present
    pub fn api_version(&self) -> Option<&str> {
        self.0.get("apiVersion").and_then(Value::as_str)
    }

    /// `kind`, if present
    pub fn kind(&self) -> Option<&str> {
        self.0.get("kind").and_then(Value::as_str)
    }

    /// `metadata.name`, if present
    pub fn name(&self) -> Option<&str> {
        self.0.pointer("/metadata/name").and_then(Value::as_str)
    }

    /// `metadata.namespace`, if present
    pub fn namespace(&self) -> Option<&str> {
        self.0.pointer("/metadata/namespace").and_then(Value::as_str)
    }

    /// Borrow the underlying tree
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// First identity field the document lacks, if any
    pub fn missing_identity(&self) -> Option<&'static str> {
        if self.api_version().is_none() {
            Some("apiVersion")
        } else if self.kind().is_none() {
            Some("kind")
        } else if self.name().is_none() {
            Some("metadata.name")
        } else {
            None
        }
    }

    /// Mutable access to `metadata`, created if missing
    ///
    /// Returns `None` if `metadata` exists but is not a mapping.
    pub fn metadata_mut(&mut self) -> Option<&mut serde_json::Map<String, Value>> {
        let root = self.0.as_object_mut()?;
        root.entry("metadata")
            .or_insert_with(|| Value::Object(Default::default()))
            .as_object_mut()
    }
}

/// Lazy iterator over the documents in rendered output
///
/// Yields each document in order. The first error ends the stream.
pub struct DocumentStream<'a> {
    inner: Inner<'a>,
    position: usize,
    done: bool,
}

enum Inner<'a> {
    Json(serde_json::StreamDeserializer<'a, serde_json::de::StrRead<'a>, Value>),
    Yaml(serde_yaml::Deserializer<'a>),
}

impl<'a> DocumentStream<'a> {
    /// Start decoding `text`
    pub fn new(text: &'a str) -> Self {
        let inner = if looks_like_json(text) {
            Inner::Json(serde_json::Deserializer::from_str(text).into_iter::<Value>())
        } else {
            Inner::Yaml(serde_yaml::Deserializer::from_str(text))
        };
        Self {
            inner,
            position: 0,
            done: false,
        }
    }

    fn identified(&self, value: Value) -> Result<DerivedDocument, TemplateError> {
        let document = DerivedDocument::from_value(value).map_err(|_| {
            TemplateError::Decode(format!("document {} is not a mapping", self.position))
        })?;
        match document.missing_identity() {
            Some(field) => Err(TemplateError::Decode(format!(
                "document {}: missing {}",
                self.position, field
            ))),
            None => Ok(document),
        }
    }

    fn next_value(&mut self) -> Option<Result<Value, String>> {
        match &mut self.inner {
            Inner::Json(stream) => stream.next().map(|r| r.map_err(|e| e.to_string())),
            Inner::Yaml(stream) => stream
                .next()
                .map(|doc| Value::deserialize(doc).map_err(|e| e.to_string())),
        }
    }
}

impl Iterator for DocumentStream<'_> {
    type Item = Result<DerivedDocument, TemplateError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let value = match self.next_value() {
                None => {
                    self.done = true;
                    return None;
                }
                Some(value) => value,
            };
            self.position += 1;

            let result = match value {
                Ok(Value::Null) => continue,
                Ok(value) => self.identified(value),
                Err(e) => Err(TemplateError::Decode(format!(
                    "document {}: {}",
                    self.position, e
                ))),
            };

            if result.is_err() {
                self.done = true;
            }
            return Some(result);
        }
    }
}

/// Decode every document in `text`, failing if any one is malformed
pub fn decode(text: &str) -> Result<Vec<DerivedDocument>, TemplateError> {
    DocumentStream::new(text).collect()
}

fn looks_like_json(text: &str) -> bool {
    matches!(text.trim_start().chars().next(), Some('{') | Some('['))
}
