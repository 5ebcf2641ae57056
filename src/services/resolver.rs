//! Chapter list extraction from a book page's inline scripts.
//!
//! The page embeds its playlist as `tracks = [ ... ]`. Extraction is split in
//! three steps that can be used on their own: locate the array literal, repair
//! the known malformed placeholder entry, then parse the repaired text.

use regex::Regex;
use serde::Deserialize;
use std::borrow::Cow;
use std::sync::LazyLock;

use crate::core::error::HelperError;
use crate::core::state::{ChapterMap, ChapterRecord};
use crate::utils::names::encode_uri_component;

/// Track number of the "welcome" placeholder that every page carries.
pub const PLACEHOLDER_TRACK: u32 = 1;

static TRACKS_ASSIGNMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"tracks\s*=\s*(\[[^\]]+\])\s*").expect("valid regex"));

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*\}").expect("valid regex"));

/// One element of the embedded `tracks` array.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Track {
    pub track: u32,
    pub name: String,
    pub chapter_link_dropbox: String,
}

/// Returns the `[...]` literal assigned to `tracks` in `script`, if any.
pub fn extract_tracks_literal(script: &str) -> Option<&str> {
    TRACKS_ASSIGNMENT
        .captures(script)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Drops the first `,` that directly precedes a `}` (whitespace allowed).
pub fn repair_placeholder(literal: &str) -> Cow<'_, str> {
    TRAILING_COMMA.replace(literal, "}")
}

pub fn parse_tracks(json: &str) -> Result<Vec<Track>, HelperError> {
    Ok(serde_json::from_str(json)?)
}

/// Builds the chapter map from the first script that assigns `tracks`.
///
/// `Ok(None)` means the page carries no chapter data at all. Track numbers that
/// repeat keep their first position and the last record. The placeholder track
/// is always dropped.
pub fn resolve<'a, I>(scripts: I) -> Result<Option<ChapterMap>, HelperError>
where
    I: IntoIterator<Item = &'a str>,
{
    let Some(literal) = scripts.into_iter().find_map(extract_tracks_literal) else {
        return Ok(None);
    };

    let repaired = repair_placeholder(literal);
    let tracks = parse_tracks(&repaired)?;

    let mut map: ChapterMap = tracks
        .into_iter()
        .map(|t| ChapterRecord {
            index: t.track,
            name: t.name,
            media_path: encode_uri_component(&t.chapter_link_dropbox),
        })
        .collect();
    map.remove(PLACEHOLDER_TRACK);

    log::debug!("Resolved {} chapters", map.len());
    Ok(Some(map))
}
