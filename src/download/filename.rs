//! File naming, sanitization, and path resolution for saved works.
//!
//! Saved files are laid out as `{user_id}/{work_id}_p{index}.{ext}` (novels:
//! `{user_id}/{work_id}.txt`). Every component is sanitized before it touches
//! the filesystem.

use std::path::{Path, PathBuf};

use url::Url;

use crate::config::UgoiraFormat;
use crate::model::{WorkFile, WorkKind};

/// Extension used when nothing better is known.
const FALLBACK_EXTENSION: &str = "bin";

/// Characters no common filesystem accepts in a name.
const RESERVED: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Name used when nothing usable is left after cleaning.
const FALLBACK_NAME: &str = "download.bin";

/// Highest numeric suffix tried before falling back to a timestamp.
const MAX_SUFFIX: u32 = 1000;

/// Builds the relative file name handed to the sink.
#[must_use]
pub fn build_file_name(file: &WorkFile, extension: &str) -> String {
    let user = sanitize_filename_component(&file.user_id);
    let user = if user.is_empty() {
        "unknown".to_string()
    } else {
        user
    };
    let stem = sanitize_filename_component(&file.file_id());
    format!("{user}/{stem}.{extension}")
}

/// Picks the extension of the saved file.
///
/// Novels are text; converted animations take the target format; everything
/// else keeps the extension of the URL it was fetched from.
#[must_use]
pub fn file_extension(file: &WorkFile, url: Option<&str>, converted_to: UgoiraFormat) -> String {
    if file.kind == WorkKind::Novel {
        return "txt".to_string();
    }
    if file.kind == WorkKind::Ugoira
        && let Some(ext) = converted_to.extension()
    {
        return ext.to_string();
    }
    url.and_then(extension_from_url)
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
}

/// Lowercase extension of the last URL path segment, without the dot.
pub(crate) fn extension_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last_segment = parsed.path_segments()?.next_back()?;
    let dot_index = last_segment.rfind('.')?;
    let ext = &last_segment[dot_index + 1..];
    if ext.is_empty() || ext.len() > 11 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_lowercase())
}

/// Reduces an id to a single portable name component.
///
/// Anything other than alphanumerics, `-`, `_`, and `.` splits the value;
/// the pieces are joined with `_`.
pub(crate) fn sanitize_filename_component(value: &str) -> String {
    value
        .split(|c: char| !(c.is_alphanumeric() || matches!(c, '-' | '_' | '.')))
        .filter(|piece| !piece.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Cleans one path segment so it can neither escape its directory nor
/// carry reserved characters.
pub(crate) fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if RESERVED.contains(&c) || c.is_control() { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" => "_".to_string(),
        "." | ".." => cleaned.replace('.', "_"),
        _ => cleaned,
    }
}

/// Splits a `/`-separated relative name into cleaned directory segments
/// and a leaf file name.
pub(crate) fn split_relative_name(name: &str) -> (PathBuf, String) {
    let mut segments: Vec<String> = name
        .split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .map(sanitize_filename)
        .collect();
    let leaf = segments.pop().unwrap_or_else(|| FALLBACK_NAME.to_string());
    (segments.iter().collect(), leaf)
}

/// Paths to try for `leaf` in `dir`, in order: `a.png`, `a_1.png`, `a_2.png`, ...
/// and finally a timestamped name.
///
/// Nothing here touches the filesystem; the sink claims the first candidate
/// it can create exclusively.
pub(crate) fn candidate_paths(dir: &Path, leaf: &str) -> impl Iterator<Item = PathBuf> {
    let leaf = sanitize_filename(leaf);
    let leaf = if leaf.trim_matches('_').is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        leaf
    };
    let (stem, ext) = match leaf.rsplit_once('.') {
        Some((stem, ext)) => (stem.to_string(), format!(".{ext}")),
        None => (leaf.clone(), String::new()),
    };
    let stamp = std::time::UNIX_EPOCH.elapsed().map_or(0, |d| d.as_secs());
    let stamped = dir.join(format!("{stem}_{stamp}{ext}"));
    let numbered_dir = dir.to_path_buf();

    std::iter::once(dir.join(&leaf))
        .chain((1..MAX_SUFFIX).map(move |n| numbered_dir.join(format!("{stem}_{n}{ext}"))))
        .chain(std::iter::once(stamped))
}
