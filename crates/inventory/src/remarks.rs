//! Legacy remarks hints.
//!
//! Older records embed their source as free text ("FROM WAREHOUSE: Main").
//! New records carry `from_location` instead; this parser only exists to
//! display those hints and is never consulted for stock math.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use stockledger_core::LocationKind;

static SOURCE_HINT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\bfrom\s+(warehouse|branch)\s*:\s*([^\r\n,;|]+)").ok()
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceHint {
    pub kind: LocationKind,
    pub name: String,
}

/// Extract a source-location hint. Returns `None` for anything unexpected.
pub fn parse_source_hint(remarks: &str) -> Option<SourceHint> {
    let captures = SOURCE_HINT.as_ref()?.captures(remarks)?;
    let kind = match captures.get(1)?.as_str().to_ascii_lowercase().as_str() {
        "warehouse" => LocationKind::Warehouse,
        "branch" => LocationKind::Branch,
        _ => return None,
    };
    let name = captures.get(2)?.as_str().trim();
    if name.is_empty() {
        return None;
    }
    Some(SourceHint {
        kind,
        name: name.to_string(),
    })
}
