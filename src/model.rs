//! Data model shared by the crawler, the filters, and the download engine.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::config::ImageSize;

/// Kind of work on the source platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkKind {
    /// Single or multi-page illustration.
    Illustration,
    /// Multi-page comic.
    Manga,
    /// Animated frame sequence.
    Ugoira,
    /// Text work, compiled to a file locally.
    Novel,
}

impl WorkKind {
    /// Whether the work is delivered as raster images.
    #[must_use]
    pub fn is_image(self) -> bool {
        matches!(self, Self::Illustration | Self::Manga)
    }

    /// Whether the file is synthesized locally instead of fetched.
    #[must_use]
    pub fn is_synthesized(self) -> bool {
        matches!(self, Self::Novel)
    }
}

impl fmt::Display for WorkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Illustration => "illustration",
            Self::Manga => "manga",
            Self::Ugoira => "ugoira",
            Self::Novel => "novel",
        };
        f.write_str(label)
    }
}

/// Pixel dimensions of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Creates a dimension pair.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether either side is zero, which the source uses for "unknown".
    #[must_use]
    pub fn is_unknown(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// One entry of a list page, before filtering.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawItem {
    /// Work identifier.
    pub id: String,
    /// Work kind.
    pub kind: WorkKind,
    /// Tags attached to the work.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Bookmark count at list time.
    #[serde(default)]
    pub bookmark_count: u32,
    /// Age-restricted flag.
    #[serde(default)]
    pub restricted: bool,
    /// Author identifier.
    #[serde(default)]
    pub user_id: String,
}

/// One fetched list page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListPageResult {
    /// Total number of items the list advertised when this page was served.
    pub total_count: u64,
    /// Items on this page in source order.
    pub items: Vec<RawItem>,
}

/// An item admitted by the list-time filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateItem {
    /// Work identifier.
    pub id: String,
    /// Page the item was found on.
    pub page_number: u32,
    /// Work kind.
    pub kind: WorkKind,
}

/// Append-only, page-indexed store of admitted candidates.
///
/// Pages may be added in any order; within a page the source order is kept.
#[derive(Debug, Default)]
pub struct CandidateCollection {
    pages: Mutex<BTreeMap<u32, Vec<CandidateItem>>>,
}

impl CandidateCollection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the admitted items of one page.
    pub fn add_page(&self, page: u32, items: Vec<CandidateItem>) {
        let mut pages = self
            .pages
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        pages.entry(page).or_default().extend(items);
    }

    /// Number of stored candidates, duplicates included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pages
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Whether no candidate was stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns candidates ordered by page, then source order.
    ///
    /// An id seen on an earlier page (or earlier in the same page) wins; later
    /// repeats caused by a shifting live list are dropped.
    #[must_use]
    pub fn ordered(&self) -> Vec<CandidateItem> {
        let pages = self
            .pages
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut seen = HashSet::new();
        pages
            .values()
            .flatten()
            .filter(|item| seen.insert(item.id.as_str()))
            .cloned()
            .collect()
    }
}

/// One animation frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UgoiraFrame {
    /// File name inside the frame archive.
    pub file: String,
    /// Display duration in milliseconds.
    pub delay: u32,
}

/// Frame metadata needed to convert an animated work.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UgoiraMeta {
    /// Frames in playback order.
    pub frames: Vec<UgoiraFrame>,
    /// MIME type of the frame images.
    #[serde(default)]
    pub mime_type: String,
}

/// Text content of a novel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NovelMeta {
    /// Title.
    pub title: String,
    /// Author display name.
    #[serde(default)]
    pub author: String,
    /// Caption shown above the body.
    #[serde(default)]
    pub description: String,
    /// Body text.
    pub content: String,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A single file to download, derived from a candidate work.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkFile {
    /// Work identifier.
    pub work_id: String,
    /// Zero-based page index within the work.
    pub index: u32,
    /// Work kind.
    pub kind: WorkKind,
    /// Author identifier.
    pub user_id: String,
    /// Size variant URLs.
    pub source_variants: HashMap<ImageSize, String>,
    /// Dimensions of the first page's original, when the list/detail data had them.
    pub full_dimensions: Option<Dimensions>,
    /// Frame metadata for animated works.
    pub ugoira: Option<UgoiraMeta>,
    /// Content for novels.
    pub novel: Option<NovelMeta>,
}

impl WorkFile {
    /// Identifier of this file: `{work_id}_p{index}`, or the bare work id for novels.
    #[must_use]
    pub fn file_id(&self) -> String {
        if self.kind.is_synthesized() {
            self.work_id.clone()
        } else {
            format!("{}_p{}", self.work_id, self.index)
        }
    }

    /// URL for the requested size variant, falling back to the original.
    #[must_use]
    pub fn select_url(&self, size: ImageSize) -> Option<&str> {
        self.source_variants
            .get(&size)
            .or_else(|| self.source_variants.get(&ImageSize::Original))
            .map(String::as_str)
    }

    /// Dimensions known without a network request.
    ///
    /// Only the first page's dimensions are known from metadata; later pages
    /// need an out-of-band fetch.
    #[must_use]
    pub fn known_dimensions(&self) -> Option<Dimensions> {
        if self.index == 0 {
            self.full_dimensions.filter(|d| !d.is_unknown())
        } else {
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn candidate(id: &str, page: u32) -> CandidateItem {
        CandidateItem {
            id: id.to_string(),
            page_number: page,
            kind: WorkKind::Illustration,
        }
    }

    #[test]
    fn test_candidates_ordered_by_page_then_source_order() {
        let collection = CandidateCollection::new();
        collection.add_page(2, vec![candidate("c", 2), candidate("d", 2)]);
        collection.add_page(1, vec![candidate("b", 1), candidate("a", 1)]);

        let ids: Vec<String> = collection.ordered().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["b", "a", "c", "d"]);
    }

    #[test]
    fn test_candidates_keep_first_occurrence_of_repeated_id() {
        let collection = CandidateCollection::new();
        collection.add_page(2, vec![candidate("x", 2)]);
        collection.add_page(1, vec![candidate("x", 1), candidate("y", 1)]);
        assert_eq!(collection.len(), 3);

        let ordered = collection.ordered();
        assert_eq!(ordered.len(), 2);
        assert_eq!(ordered[0].id, "x");
        assert_eq!(ordered[0].page_number, 1);
    }

    #[test]
    fn test_select_url_falls_back_to_original() {
        let mut variants = HashMap::new();
        variants.insert(ImageSize::Original, "https://img/o.png".to_string());
        let file = WorkFile {
            work_id: "1".into(),
            index: 0,
            kind: WorkKind::Illustration,
            user_id: "9".into(),
            source_variants: variants,
            full_dimensions: None,
            ugoira: None,
            novel: None,
        };
        assert_eq!(file.select_url(ImageSize::Regular), Some("https://img/o.png"));
        assert_eq!(file.file_id(), "1_p0");
    }

    #[test]
    fn test_known_dimensions_only_for_first_page() {
        let mut file = WorkFile {
            work_id: "1".into(),
            index: 0,
            kind: WorkKind::Manga,
            user_id: String::new(),
            source_variants: HashMap::new(),
            full_dimensions: Some(Dimensions::new(800, 600)),
            ugoira: None,
            novel: None,
        };
        assert_eq!(file.known_dimensions(), Some(Dimensions::new(800, 600)));
        file.index = 1;
        assert_eq!(file.known_dimensions(), None);
    }

    #[test]
    fn test_raw_item_deserialize_defaults() {
        let item: RawItem = serde_json::from_str(r#"{ "id": "5", "kind": "novel" }"#).unwrap();
        assert_eq!(item.kind, WorkKind::Novel);
        assert!(item.tags.is_empty());
        assert!(!item.restricted);
    }
}
