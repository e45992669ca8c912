//! Built-in predicates for the list-time and download-time filters.

use std::collections::HashSet;

use crate::config::{ColorRule, DimensionRule, RatioRule, SizeRule};
use crate::model::WorkKind;

use super::{ItemMetadata, Predicate};

/// Rejects excluded work kinds.
#[derive(Debug, Clone)]
pub struct KindPredicate {
    excluded: Vec<WorkKind>,
}

impl KindPredicate {
    /// Creates the predicate.
    #[must_use]
    pub fn new(excluded: Vec<WorkKind>) -> Self {
        Self { excluded }
    }
}

impl Predicate for KindPredicate {
    fn name(&self) -> &'static str {
        "kind"
    }

    fn admit(&self, meta: &ItemMetadata) -> bool {
        meta.kind.is_none_or(|kind| !self.excluded.contains(&kind))
    }
}

/// Rejects items carrying an excluded tag. Matching is case-insensitive.
#[derive(Debug, Clone)]
pub struct TagPredicate {
    excluded: HashSet<String>,
}

impl TagPredicate {
    /// Creates the predicate.
    #[must_use]
    pub fn new(excluded: &[String]) -> Self {
        Self {
            excluded: excluded.iter().map(|t| t.to_lowercase()).collect(),
        }
    }
}

impl Predicate for TagPredicate {
    fn name(&self) -> &'static str {
        "tags"
    }

    fn admit(&self, meta: &ItemMetadata) -> bool {
        meta.tags.as_ref().is_none_or(|tags| {
            !tags
                .iter()
                .any(|tag| self.excluded.contains(&tag.to_lowercase()))
        })
    }
}

/// Requires a minimum bookmark count.
#[derive(Debug, Clone, Copy)]
pub struct BookmarkPredicate {
    min: u32,
}

impl BookmarkPredicate {
    /// Creates the predicate.
    #[must_use]
    pub fn new(min: u32) -> Self {
        Self { min }
    }
}

impl Predicate for BookmarkPredicate {
    fn name(&self) -> &'static str {
        "bookmarks"
    }

    fn admit(&self, meta: &ItemMetadata) -> bool {
        meta.bookmark_count.is_none_or(|count| count >= self.min)
    }
}

/// Rejects age-restricted works.
#[derive(Debug, Clone, Copy)]
pub struct RestrictedPredicate;

impl Predicate for RestrictedPredicate {
    fn name(&self) -> &'static str {
        "restricted"
    }

    fn admit(&self, meta: &ItemMetadata) -> bool {
        meta.restricted != Some(true)
    }
}

/// Minimum width/height.
#[derive(Debug, Clone, Copy)]
pub struct DimensionPredicate {
    rule: DimensionRule,
}

impl DimensionPredicate {
    /// Creates the predicate.
    #[must_use]
    pub fn new(rule: DimensionRule) -> Self {
        Self { rule }
    }
}

impl Predicate for DimensionPredicate {
    fn name(&self) -> &'static str {
        "width_height"
    }

    fn admit(&self, meta: &ItemMetadata) -> bool {
        // Unknown (0x0) dimensions pass; the fetch already failed open.
        let Some(dim) = meta.dimensions.filter(|d| !d.is_unknown()) else {
            return true;
        };
        let wide_enough = dim.width >= self.rule.min_width;
        let tall_enough = dim.height >= self.rule.min_height;
        if self.rule.require_both {
            wide_enough && tall_enough
        } else {
            wide_enough || tall_enough
        }
    }
}

/// Aspect-ratio constraint.
#[derive(Debug, Clone, Copy)]
pub struct RatioPredicate {
    rule: RatioRule,
}

impl RatioPredicate {
    /// Creates the predicate.
    #[must_use]
    pub fn new(rule: RatioRule) -> Self {
        Self { rule }
    }
}

impl Predicate for RatioPredicate {
    fn name(&self) -> &'static str {
        "ratio"
    }

    fn admit(&self, meta: &ItemMetadata) -> bool {
        let Some(dim) = meta.dimensions.filter(|d| !d.is_unknown()) else {
            return true;
        };
        let ratio = f64::from(dim.width) / f64::from(dim.height);
        match self.rule {
            RatioRule::Landscape => dim.width > dim.height,
            RatioRule::Portrait => dim.height > dim.width,
            RatioRule::Square => dim.width == dim.height,
            RatioRule::AtLeast(min) => ratio >= min,
            RatioRule::AtMost(max) => ratio <= max,
        }
    }
}

/// Byte-size range.
#[derive(Debug, Clone, Copy)]
pub struct SizePredicate {
    rule: SizeRule,
}

impl SizePredicate {
    /// Creates the predicate.
    #[must_use]
    pub fn new(rule: SizeRule) -> Self {
        Self { rule }
    }
}

impl Predicate for SizePredicate {
    fn name(&self) -> &'static str {
        "size"
    }

    fn admit(&self, meta: &ItemMetadata) -> bool {
        meta.size.is_none_or(|size| {
            size >= self.rule.min_bytes && self.rule.max_bytes.is_none_or(|max| size <= max)
        })
    }
}

/// Color constraint over a sampled image.
#[derive(Debug, Clone, Copy)]
pub struct ColorPredicate {
    rule: ColorRule,
}

impl ColorPredicate {
    /// Creates the predicate.
    #[must_use]
    pub fn new(rule: ColorRule) -> Self {
        Self { rule }
    }
}

impl Predicate for ColorPredicate {
    fn name(&self) -> &'static str {
        "color"
    }

    fn admit(&self, meta: &ItemMetadata) -> bool {
        let Some(sample) = meta.color.as_ref().filter(|s| !s.is_empty()) else {
            return true;
        };
        match self.rule {
            ColorRule::RejectGrayscale => !sample.is_grayscale(),
            ColorRule::RejectBlackWhite => !sample.is_black_white(),
            ColorRule::OnlyGrayscale => sample.is_grayscale(),
        }
    }
}
