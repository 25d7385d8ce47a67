//! Head fragments and groups

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Elements that never carry content or a closing tag
const VOID_TAGS: &[&str] = &["base", "link", "meta"];

/// One declared head element, e.g. a `title` or `meta` tag
///
/// Serialized as `{"type": tag, "props": {...}}`. The `children` prop, when
/// present, is the element's text content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadFragment {
    #[serde(rename = "type")]
    pub tag: String,
    #[serde(default)]
    pub props: BTreeMap<String, Value>,
}

impl HeadFragment {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            props: BTreeMap::new(),
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(name.into(), value.into());
        self
    }

    pub fn title(text: impl Into<String>) -> Self {
        Self::new("title").attr("children", text.into())
    }

    pub fn meta(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new("meta").attr("name", name.into()).attr("content", content.into())
    }

    /// Render as markup
    ///
    /// `true` renders a bare attribute; `false` and `null` are omitted, as is
    /// any prop whose name is not a valid attribute name.
    pub fn to_html(&self) -> String {
        let mut html = format!("<{}", self.tag);
        let attrs = self
            .props
            .iter()
            .filter(|(name, _)| name.as_str() != "children" && is_attr_name(name));
        for (name, value) in attrs {
            match value {
                Value::Bool(true) => {
                    html.push(' ');
                    html.push_str(name);
                }
                Value::Bool(false) | Value::Null => {}
                other => {
                    html.push_str(&format!(r#" {}="{}""#, name, escape_html(&text_of(other))));
                }
            }
        }

        if VOID_TAGS.contains(&self.tag.as_str()) {
            html.push_str(" />");
            return html;
        }

        html.push('>');
        if let Some(children) = self.props.get("children") {
            html.push_str(&escape_html(&text_of(children)));
        }
        html.push_str(&format!("</{}>", self.tag));
        html
    }
}

/// Attribute names may not contain whitespace, quotes, `<`, `>`, `/`, `=`
/// or control characters
fn is_attr_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| !c.is_whitespace() && !c.is_control() && !matches!(c, '"' | '\'' | '<' | '>' | '/' | '='))
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Fragments declared together by one component instance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeadGroup {
    fragments: Vec<HeadFragment>,
}

impl HeadGroup {
    pub fn new(fragments: Vec<HeadFragment>) -> Self {
        Self { fragments }
    }

    pub fn fragments(&self) -> &[HeadFragment] {
        &self.fragments
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

impl From<Vec<HeadFragment>> for HeadGroup {
    fn from(fragments: Vec<HeadFragment>) -> Self {
        Self::new(fragments)
    }
}
