//! Pipeline selection.
//!
//! A pure decision function from input metadata to a pipeline variant.
//! Threshold rules carry inclusive lower/upper bounds and are validated
//! mutually exclusive at startup, so evaluation order only affects which
//! rule's reason string is reported, never which variant wins.

use std::ops::RangeInclusive;

use audesc_models::{InputDescriptor, MediaKind, PipelineVariant, Selection};

use crate::error::{EngineError, EngineResult};

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Reason reported when an explicit override wins.
pub const REASON_OVERRIDE: &str = "override";
/// Reason reported when no rule matched.
pub const REASON_FALLBACK_DEFAULT: &str = "fallback-default";
/// Reason reported for the one-hop failover selection.
pub const REASON_FAILOVER: &str = "failover";

/// One selection rule: a variant claims a box of (size, duration) space
/// for one media kind. Bounds are inclusive; durations are whole seconds
/// (inputs are rounded up before matching).
#[derive(Debug, Clone)]
pub struct ThresholdRule {
    pub name: &'static str,
    pub media_kind: MediaKind,
    pub variant: PipelineVariant,
    pub size_bytes: RangeInclusive<u64>,
    pub duration_secs: RangeInclusive<u64>,
}

impl ThresholdRule {
    fn matches(&self, input: &InputDescriptor) -> bool {
        if input.media_kind != self.media_kind {
            return false;
        }
        let Some(size) = input.size_bytes else {
            // Unknown size never satisfies a bounded rule.
            return false;
        };
        if !self.size_bytes.contains(&size) {
            return false;
        }
        match self.media_kind {
            MediaKind::Image => true,
            MediaKind::Video => match input.duration_secs {
                Some(d) if d.is_finite() && d >= 0.0 => {
                    self.duration_secs.contains(&(d.ceil() as u64))
                }
                _ => false,
            },
        }
    }

    fn overlaps(&self, other: &ThresholdRule) -> bool {
        if self.media_kind != other.media_kind {
            return false;
        }
        let size_overlap = ranges_intersect(&self.size_bytes, &other.size_bytes);
        if self.media_kind == MediaKind::Image {
            return size_overlap;
        }
        size_overlap && ranges_intersect(&self.duration_secs, &other.duration_secs)
    }
}

fn ranges_intersect(a: &RangeInclusive<u64>, b: &RangeInclusive<u64>) -> bool {
    a.start() <= b.end() && b.start() <= a.end()
}

/// Maps job input metadata to a pipeline variant.
#[derive(Debug, Clone)]
pub struct PipelineSelector {
    rules: Vec<ThresholdRule>,
    default_variant: PipelineVariant,
}

impl PipelineSelector {
    /// Build a selector, validating that rules are mutually exclusive.
    pub fn new(
        rules: Vec<ThresholdRule>,
        default_variant: PipelineVariant,
    ) -> EngineResult<Self> {
        for (i, a) in rules.iter().enumerate() {
            for b in rules.iter().skip(i + 1) {
                if a.overlaps(b) {
                    return Err(EngineError::config(format!(
                        "selection rules '{}' and '{}' overlap",
                        a.name, b.name
                    )));
                }
            }
        }
        Ok(Self {
            rules,
            default_variant,
        })
    }

    /// Selector with the built-in rule set.
    ///
    /// Images take the blended single-unit pipeline; videos up to five
    /// minutes and 200 MiB take the primary pipeline; anything longer or
    /// heavier takes bulk. The default (unknown metadata, out of all
    /// bounds) is bulk, the large-content variant.
    pub fn with_default_rules() -> EngineResult<Self> {
        Self::new(
            vec![
                ThresholdRule {
                    name: "image-content",
                    media_kind: MediaKind::Image,
                    variant: PipelineVariant::Blended,
                    size_bytes: 1..=4 * GIB,
                    duration_secs: 0..=0,
                },
                ThresholdRule {
                    name: "small-content",
                    media_kind: MediaKind::Video,
                    variant: PipelineVariant::Primary,
                    size_bytes: 1..=200 * MIB,
                    duration_secs: 0..=300,
                },
                ThresholdRule {
                    name: "large-duration",
                    media_kind: MediaKind::Video,
                    variant: PipelineVariant::Bulk,
                    size_bytes: 1..=4 * GIB,
                    duration_secs: 301..=14_400,
                },
                ThresholdRule {
                    name: "large-size",
                    media_kind: MediaKind::Video,
                    variant: PipelineVariant::Bulk,
                    size_bytes: 200 * MIB + 1..=4 * GIB,
                    duration_secs: 0..=300,
                },
            ],
            PipelineVariant::Bulk,
        )
    }

    /// Select a variant for the given input.
    ///
    /// Pure: no I/O, deterministic for identical input and rule set.
    pub fn select(
        &self,
        input: &InputDescriptor,
        variant_override: Option<PipelineVariant>,
    ) -> Selection {
        // Explicit user intent always wins.
        if let Some(variant) = variant_override {
            return Selection::new(variant, REASON_OVERRIDE);
        }

        for rule in &self.rules {
            if rule.matches(input) {
                return Selection::new(rule.variant, rule.name);
            }
        }

        Selection::new(self.default_variant, REASON_FALLBACK_DEFAULT)
    }

    /// Second selection decision, made only after a stage-fatal failure
    /// of the initially selected variant. At most one hop; returns `None`
    /// when no compatible alternative exists.
    pub fn select_fallback(
        &self,
        input: &InputDescriptor,
        failed: PipelineVariant,
    ) -> Option<Selection> {
        if input.media_kind == MediaKind::Image {
            // The segmented pipelines cannot process a still image.
            return None;
        }
        let alternative = match failed {
            PipelineVariant::Primary => PipelineVariant::Bulk,
            PipelineVariant::Bulk => PipelineVariant::Primary,
            PipelineVariant::Blended => PipelineVariant::Bulk,
        };
        Some(Selection::new(alternative, REASON_FAILOVER))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector() -> PipelineSelector {
        PipelineSelector::with_default_rules().unwrap()
    }

    #[test]
    fn test_selection_is_deterministic() {
        let selector = selector();
        let input = InputDescriptor::video("uploads/a.mp4", 10 * MIB, 120.0);
        let first = selector.select(&input, None);
        for _ in 0..10 {
            assert_eq!(selector.select(&input, None), first);
        }
    }

    #[test]
    fn test_override_always_wins() {
        let selector = selector();
        let input = InputDescriptor::video("uploads/a.mp4", 3 * GIB, 7_000.0);
        let selection = selector.select(&input, Some(PipelineVariant::Primary));
        assert_eq!(selection.variant, PipelineVariant::Primary);
        assert_eq!(selection.reason, REASON_OVERRIDE);
    }

    #[test]
    fn test_small_video_takes_primary() {
        let selection = selector().select(&InputDescriptor::video("a.mp4", 50 * MIB, 180.0), None);
        assert_eq!(selection.variant, PipelineVariant::Primary);
        assert_eq!(selection.reason, "small-content");
    }

    #[test]
    fn test_long_video_takes_bulk_not_primary() {
        // 600s / 300MB must select the large-content variant.
        let selection =
            selector().select(&InputDescriptor::video("a.mp4", 300 * MIB, 600.0), None);
        assert_eq!(selection.variant, PipelineVariant::Bulk);
        assert_eq!(selection.reason, "large-duration");
    }

    #[test]
    fn test_heavy_short_video_takes_bulk() {
        let selection = selector().select(&InputDescriptor::video("a.mp4", GIB, 240.0), None);
        assert_eq!(selection.variant, PipelineVariant::Bulk);
        assert_eq!(selection.reason, "large-size");
    }

    #[test]
    fn test_image_takes_blended() {
        let selection = selector().select(&InputDescriptor::image("a.png", 2 * MIB), None);
        assert_eq!(selection.variant, PipelineVariant::Blended);
        assert_eq!(selection.reason, "image-content");
    }

    #[test]
    fn test_unknown_metadata_falls_back_to_default() {
        let input = InputDescriptor {
            source: "uploads/a.mp4".into(),
            media_kind: MediaKind::Video,
            size_bytes: None,
            duration_secs: None,
        };
        let selection = selector().select(&input, None);
        assert_eq!(selection.variant, PipelineVariant::Bulk);
        assert_eq!(selection.reason, REASON_FALLBACK_DEFAULT);
    }

    #[test]
    fn test_boundary_durations_are_exclusive_between_rules() {
        let selector = selector();
        let at_bound = selector.select(&InputDescriptor::video("a.mp4", MIB, 300.0), None);
        assert_eq!(at_bound.reason, "small-content");
        let past_bound = selector.select(&InputDescriptor::video("a.mp4", MIB, 300.5), None);
        assert_eq!(past_bound.reason, "large-duration");
    }

    #[test]
    fn test_overlapping_rules_rejected_at_startup() {
        let result = PipelineSelector::new(
            vec![
                ThresholdRule {
                    name: "a",
                    media_kind: MediaKind::Video,
                    variant: PipelineVariant::Primary,
                    size_bytes: 0..=100,
                    duration_secs: 0..=100,
                },
                ThresholdRule {
                    name: "b",
                    media_kind: MediaKind::Video,
                    variant: PipelineVariant::Bulk,
                    size_bytes: 50..=200,
                    duration_secs: 50..=200,
                },
            ],
            PipelineVariant::Bulk,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_fallback_is_single_alternative() {
        let selector = selector();
        let video = InputDescriptor::video("a.mp4", 10 * MIB, 60.0);

        let hop = selector
            .select_fallback(&video, PipelineVariant::Primary)
            .unwrap();
        assert_eq!(hop.variant, PipelineVariant::Bulk);
        assert_eq!(hop.reason, REASON_FAILOVER);

        // No segmented fallback exists for a still image.
        let image = InputDescriptor::image("a.png", MIB);
        assert!(selector
            .select_fallback(&image, PipelineVariant::Blended)
            .is_none());
    }
}
