//! Template/data separation and diffing for marker-delimited documents.
//!
//! A document is split on paired markers
//! `<!--sonicdiff-NAME-->...<!--sonicdiff-NAME-end-->`. Each matched
//! region (markers included) becomes a data block keyed by the
//! placeholder token `{NAME}`, and the template keeps the token where
//! the region was. The `<title>...</title>` element is always lifted
//! into an implicit `{title}` block even when unmarked, so page titles
//! participate in data-only updates.
//!
//! All functions here are pure: no I/O, no shared state.

pub mod hash;

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::Error;

/// Map of placeholder token (`{name}`) to data block content.
pub type DataBlocks = BTreeMap<String, String>;

static BLOCK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--sonicdiff-?(\w*)-->[\s\S]+?<!--sonicdiff-?\w*-end-->").expect("block pattern")
});

const TITLE_OPEN: &str = "<title>";
const TITLE_CLOSE: &str = "</title>";
const TITLE_KEY: &str = "{title}";

/// A document separated into its template skeleton and data blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Separated {
    pub template: String,
    pub blocks: DataBlocks,
}

impl Separated {
    /// The implicit title block, when the document had a `<title>`.
    pub fn title(&self) -> Option<&str> {
        self.blocks.get(TITLE_KEY).map(String::as_str)
    }
}

/// Split `document` into a template plus named data blocks.
///
/// Blocks with no name in the marker are auto-named `auto0`, `auto1`, ...
/// in document order. A document without any markers is all template,
/// with no blocks apart from the implicit title.
pub fn separate(document: &str) -> Result<Separated, Error> {
    let mut template = String::with_capacity(document.len());
    let mut blocks = DataBlocks::new();
    let mut last_end = 0usize;
    let mut auto_index = 0usize;

    for caps in BLOCK_PATTERN.captures_iter(document) {
        let whole = caps.get(0).expect("match");
        let name = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let key = if name.is_empty() {
            let key = format!("{{auto{auto_index}}}");
            auto_index += 1;
            key
        } else {
            format!("{{{name}}}")
        };

        if blocks.contains_key(&key) {
            return Err(Error::SeparateFail(format!("duplicate block name {key}")));
        }

        blocks.insert(key.clone(), whole.as_str().to_string());
        template.push_str(&document[last_end..whole.start()]);
        template.push_str(&key);
        last_end = whole.end();
    }

    if blocks.is_empty() {
        // No markers: the whole document is template, title is still data.
        template.push_str(document);
    } else if last_end < document.len() {
        template.push_str(&document[last_end..]);
    }

    // Title is data even when the page carries no diff markers.
    if let Some(title_start) = template.find(TITLE_OPEN) {
        if let Some(close) = template[title_start..].find(TITLE_CLOSE) {
            let title_end = title_start + close + TITLE_CLOSE.len();
            blocks.insert(TITLE_KEY.to_string(), template[title_start..title_end].to_string());
            template.replace_range(title_start..title_end, TITLE_KEY);
        }
    }

    Ok(Separated { template, blocks })
}

/// Rebuild a document by substituting each block token in `template`.
///
/// Unmatched tokens are left as-is; the server's authoritative block set
/// may lag a template revision and a literal token renders more safely
/// than an error here.
pub fn rebuild(template: &str, blocks: &DataBlocks) -> String {
    let mut html = template.to_string();
    for (key, value) in blocks {
        if let Some(index) = html.find(key.as_str()) {
            html.replace_range(index..index + key.len(), value);
        }
    }
    html
}

/// Forward-only diff: every key of `new_blocks` that is absent from
/// `old_blocks` or textually different. Keys present only locally are
/// not reported; the server's set is authoritative.
pub fn diff(old_blocks: &DataBlocks, new_blocks: &DataBlocks) -> DataBlocks {
    let mut changed = DataBlocks::new();
    for (key, new_value) in new_blocks {
        match old_blocks.get(key) {
            Some(old_value) if old_value == new_value => {}
            _ => {
                tracing::debug!(key, len = new_value.len(), "diff: changed block");
                changed.insert(key.clone(), new_value.clone());
            }
        }
    }
    changed
}

/// Parse a persisted or wire-format data blob (JSON object of
/// token -> content) into [`DataBlocks`].
pub fn parse_blocks(json: &str) -> Result<DataBlocks, Error> {
    serde_json::from_str::<BTreeMap<String, String>>(json)
        .map_err(|e| Error::MalformedPayload(format!("data blocks: {e}")))
}

/// Serialize [`DataBlocks`] to the JSON object form used on disk and on
/// the wire.
pub fn blocks_to_json(blocks: &DataBlocks) -> String {
    serde_json::to_string(blocks).unwrap_or_else(|_| "{}".to_string())
}
