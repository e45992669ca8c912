//! Composable item filters.
//!
//! A [`FilterGate`] is an AND over independent [`Predicate`]s. It is called
//! with whatever metadata is known at the time: tags and bookmark counts at
//! list time, then dimensions, byte size, and a color sample as the download
//! progresses. A predicate whose input is absent from the metadata admits the
//! item, so each call only judges what it can see, and a stricter later call
//! is never short-circuited by an earlier pass.
//!
//! # Example
//!
//! ```
//! use artwork_downloader::config::{FilterSettings, SizeRule};
//! use artwork_downloader::filter::{FilterGate, ItemMetadata};
//!
//! let settings = FilterSettings {
//!     size: Some(SizeRule { min_bytes: 0, max_bytes: Some(10_000_000) }),
//!     ..FilterSettings::default()
//! };
//! let gate = FilterGate::from_settings(&settings);
//!
//! assert!(gate.admit(&ItemMetadata::default()));
//! assert!(!gate.admit(&ItemMetadata::with_size(15_000_000)));
//! ```

mod color;
mod predicates;

pub use color::{ColorSample, ContentProbe, ImageContentProbe};
pub use predicates::{
    BookmarkPredicate, ColorPredicate, DimensionPredicate, KindPredicate, RatioPredicate,
    RestrictedPredicate, SizePredicate, TagPredicate,
};

use tracing::trace;

use crate::config::FilterSettings;
use crate::model::{Dimensions, RawItem, WorkKind};

/// Partial metadata about one item.
///
/// Every field is optional; callers fill in what they know.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemMetadata {
    /// Work identifier.
    pub id: Option<String>,
    /// Work kind.
    pub kind: Option<WorkKind>,
    /// Tags.
    pub tags: Option<Vec<String>>,
    /// Bookmark count.
    pub bookmark_count: Option<u32>,
    /// Age-restricted flag.
    pub restricted: Option<bool>,
    /// Pixel dimensions.
    pub dimensions: Option<Dimensions>,
    /// Total byte size.
    pub size: Option<u64>,
    /// Sampled pixel colors.
    pub color: Option<ColorSample>,
}

impl ItemMetadata {
    /// Coarse metadata available on a list page.
    #[must_use]
    pub fn from_raw(item: &RawItem) -> Self {
        Self {
            id: Some(item.id.clone()),
            kind: Some(item.kind),
            tags: Some(item.tags.clone()),
            bookmark_count: Some(item.bookmark_count),
            restricted: Some(item.restricted),
            ..Self::default()
        }
    }

    /// Metadata carrying only dimensions.
    #[must_use]
    pub fn with_dimensions(dimensions: Dimensions) -> Self {
        Self {
            dimensions: Some(dimensions),
            ..Self::default()
        }
    }

    /// Metadata carrying only the byte size.
    #[must_use]
    pub fn with_size(size: u64) -> Self {
        Self {
            size: Some(size),
            ..Self::default()
        }
    }

    /// Metadata carrying only a color sample.
    #[must_use]
    pub fn with_color(sample: ColorSample) -> Self {
        Self {
            color: Some(sample),
            ..Self::default()
        }
    }
}

/// A single admit/reject rule.
///
/// Implementations must be pure: the same metadata always yields the same
/// answer, and absent inputs admit.
pub trait Predicate: Send + Sync + std::fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Returns `true` when the item is admitted.
    fn admit(&self, meta: &ItemMetadata) -> bool;
}

/// AND-composition of predicates.
#[derive(Debug, Default)]
pub struct FilterGate {
    predicates: Vec<Box<dyn Predicate>>,
}

impl FilterGate {
    /// Creates a gate that admits everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the gate for the configured filters.
    #[must_use]
    pub fn from_settings(settings: &FilterSettings) -> Self {
        let mut gate = Self::new();
        if !settings.excluded_kinds.is_empty() {
            gate.push(KindPredicate::new(settings.excluded_kinds.clone()));
        }
        if !settings.excluded_tags.is_empty() {
            gate.push(TagPredicate::new(&settings.excluded_tags));
        }
        if let Some(min) = settings.min_bookmarks {
            gate.push(BookmarkPredicate::new(min));
        }
        if settings.exclude_restricted {
            gate.push(RestrictedPredicate);
        }
        if let Some(rule) = settings.dimensions {
            gate.push(DimensionPredicate::new(rule));
        }
        if let Some(rule) = settings.ratio {
            gate.push(RatioPredicate::new(rule));
        }
        if let Some(rule) = settings.size {
            gate.push(SizePredicate::new(rule));
        }
        if let Some(rule) = settings.color {
            gate.push(ColorPredicate::new(rule));
        }
        gate
    }

    /// Adds a predicate.
    pub fn push(&mut self, predicate: impl Predicate + 'static) {
        self.predicates.push(Box::new(predicate));
    }

    /// Adds a predicate, builder style.
    #[must_use]
    pub fn with(mut self, predicate: impl Predicate + 'static) -> Self {
        self.push(predicate);
        self
    }

    /// Number of active predicates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    /// Whether the gate has no predicates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Returns `true` when every predicate admits the item.
    #[must_use]
    pub fn admit(&self, meta: &ItemMetadata) -> bool {
        self.rejected_by(meta).is_none()
    }

    /// Name of the first rejecting predicate, if any.
    #[must_use]
    pub fn rejected_by(&self, meta: &ItemMetadata) -> Option<&'static str> {
        let rejecting = self
            .predicates
            .iter()
            .find(|predicate| !predicate.admit(meta))
            .map(|predicate| predicate.name());
        if let Some(name) = rejecting {
            trace!(predicate = name, id = ?meta.id, "filter rejected item");
        }
        rejecting
    }
}
