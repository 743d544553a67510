//! Raw manifest content and its parsing into a value tree

use serde_json::Value;

use crate::{Error, Result};

/// Serialization format of textual manifest content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json,
}

impl Format {
    /// Guess the format from the URI extension
    ///
    /// Unknown extensions are treated as YAML, which also accepts JSON.
    pub fn from_uri(uri: &str) -> Self {
        let path = uri.split(['?', '#']).next().unwrap_or(uri);
        let ext = path
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "json" => Format::Json,
            _ => Format::Yaml,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Format::Yaml => "YAML",
            Format::Json => "JSON",
        }
    }
}

/// Data returned by a [`SourceLoader`](crate::SourceLoader)
#[derive(Debug, Clone, PartialEq)]
pub enum SourceData {
    /// Content that is already a value tree
    Structured(Value),
    /// Text to be parsed; `None` format means "guess from the URI"
    Text { body: String, format: Option<Format> },
    /// The source exists but is empty
    Empty,
}

impl SourceData {
    pub fn text(body: impl Into<String>) -> Self {
        SourceData::Text {
            body: body.into(),
            format: None,
        }
    }

    /// Turn the raw data into manifest content.
    ///
    /// Returns `Ok(None)` for empty content (blank text or a `null`
    /// document); a non-mapping root is a syntax error.
    pub fn into_content(self, uri: &str) -> Result<Option<Value>> {
        let value = match self {
            SourceData::Empty => return Ok(None),
            SourceData::Structured(value) => value,
            SourceData::Text { body, format } => {
                if body.trim().is_empty() {
                    return Ok(None);
                }
                let format = format.unwrap_or_else(|| Format::from_uri(uri));
                parse_text(uri, &body, format)?
            }
        };

        match value {
            Value::Null => Ok(None),
            Value::Object(_) => Ok(Some(value)),
            other => Err(Error::syntax(
                uri,
                format!("manifest root must be a mapping, found {}", type_name(&other)),
            )),
        }
    }
}

fn parse_text(uri: &str, body: &str, format: Format) -> Result<Value> {
    match format {
        Format::Json => serde_json::from_str(body)
            .map_err(|e| Error::syntax(uri, format!("{}: {e}", format.name()))),
        Format::Yaml => serde_yaml::from_str(body)
            .map_err(|e| Error::syntax(uri, format!("{}: {e}", format.name()))),
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("docs/root.yaml", Format::Yaml)]
    #[case("docs/root.YML", Format::Yaml)]
    #[case("https://host/a/b.json?ref=main", Format::Json)]
    #[case("no-extension", Format::Yaml)]
    fn format_from_uri(#[case] uri: &str, #[case] expected: Format) {
        assert_eq!(Format::from_uri(uri), expected);
    }

    #[test]
    fn yaml_text_parses_to_mapping() {
        let data = SourceData::text("title: A\nimports:\n  - b.yaml\n");
        let content = data.into_content("a.yaml").unwrap().unwrap();
        assert_eq!(content, json!({"title": "A", "imports": ["b.yaml"]}));
    }

    #[test]
    fn yaml_keeps_key_order() {
        let data = SourceData::text("zeta: 1\nalpha: 2\n");
        let content = data.into_content("a.yaml").unwrap().unwrap();
        let keys: Vec<_> = content.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
    }

    #[test]
    fn json_text_parses_with_explicit_format() {
        let data = SourceData::Text {
            body: r#"{"title": "J"}"#.into(),
            format: Some(Format::Json),
        };
        let content = data.into_content("whatever").unwrap().unwrap();
        assert_eq!(content, json!({"title": "J"}));
    }

    #[rstest]
    #[case(SourceData::Empty)]
    #[case(SourceData::text("   \n"))]
    #[case(SourceData::text("~"))]
    #[case(SourceData::Structured(Value::Null))]
    fn empty_sources_yield_no_content(#[case] data: SourceData) {
        assert_eq!(data.into_content("a.yaml").unwrap(), None);
    }

    #[test]
    fn malformed_yaml_is_syntax_error() {
        let data = SourceData::text("title: [unclosed\n");
        let err = data.into_content("bad.yaml").unwrap_err();
        assert!(matches!(err, Error::Syntax { ref uri, .. } if uri == "bad.yaml"));
    }

    #[test]
    fn sequence_root_is_rejected() {
        let data = SourceData::Structured(json!(["a", "b"]));
        let err = data.into_content("list.yaml").unwrap_err();
        assert!(err.to_string().contains("sequence"), "got: {err}");
    }
}
