//! Pulls embedded output blocks out of a content record's HTML fragment.
//!
//! The server renders each cell's outputs as
//! `<script type="application/x.voila-lab-output+json">{"outputs": [...]}</script>`.
//! Blocks are returned in document order; scripts of any other type are
//! ignored.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::ExtractError;
use crate::outputs::OutputArea;

/// Script type marking an embedded output block.
pub const DEFAULT_OUTPUT_MIME_TYPE: &str = "application/x.voila-lab-output+json";

fn script_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<script\b([^>]*)>(.*?)</script\s*>").expect("script regex is valid")
    })
}

fn type_attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(?:^|\s)type\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
            .expect("type attribute regex is valid")
    })
}

fn script_type(attrs: &str) -> Option<&str> {
    let caps = type_attr_regex().captures(attrs)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str().trim())
}

/// Bodies of every script block of type `mime_type`, in document order.
pub fn output_blocks<'a>(source: &'a str, mime_type: &str) -> Vec<&'a str> {
    script_regex()
        .captures_iter(source)
        .filter(|caps| {
            caps.get(1)
                .and_then(|attrs| script_type(attrs.as_str()))
                .is_some_and(|ty| ty == mime_type)
        })
        .filter_map(|caps| caps.get(2).map(|body| body.as_str()))
        .collect()
}

/// Parse every output block in `source`. One malformed block fails the whole
/// record so that the resulting list stays aligned with the server's cells.
pub fn extract_output_areas(source: &str, mime_type: &str) -> Result<Vec<OutputArea>, ExtractError> {
    output_blocks(source, mime_type)
        .into_iter()
        .enumerate()
        .map(|(index, body)| OutputArea::from_block(index, body))
        .collect()
}
