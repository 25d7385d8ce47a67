//! Payload inspection of a rendered document

use std::fs;
use std::path::Path;

use eyre::{Context, Result};
use ssrdata::hydration::decode;
use ssrdata::{DataPayload, Document, HtmlDocument};
use tracing::debug;

use crate::config::Config;
use crate::head::{HeadFragment, decode_head};

/// Both payloads as a client would read them
#[derive(Debug, Clone, Default)]
pub struct Inspection {
    pub data: Option<DataPayload>,
    pub head: Option<Vec<HeadFragment>>,
}

pub fn inspect_html(html: &str, config: &Config) -> Inspection {
    let document = HtmlDocument::new(html);
    Inspection {
        data: document
            .payload(&config.hydration.data_anchor)
            .and_then(|text| decode(&text)),
        head: document
            .payload(&config.hydration.head_anchor)
            .and_then(|text| decode_head(&text)),
    }
}

pub fn inspect_file(path: &Path, config: &Config) -> Result<Inspection> {
    debug!(path = %path.display(), "inspect_file: called");
    let html = fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
    Ok(inspect_html(&html, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inspect_html() {
        let html = r#"<script id="__REMIX_HEAD_VALUE__" type="application/json">[{"type":"title","props":{"children":"t"}}]</script><script id="__NEXT_DATA_PROMISE__" type="application/json">{"A":{"data":1,"isLoading":false}}</script>"#;
        let found = inspect_html(html, &Config::default());
        assert_eq!(found.data.unwrap()["A"].data, Some(json!(1)));
        assert_eq!(found.head.unwrap(), vec![HeadFragment::title("t")]);
    }

    #[test]
    fn test_inspect_plain_page() {
        let found = inspect_html("<html></html>", &Config::default());
        assert!(found.data.is_none());
        assert!(found.head.is_none());
    }

    #[test]
    fn test_inspect_missing_file() {
        assert!(inspect_file(Path::new("/nonexistent/page.html"), &Config::default()).is_err());
    }
}
