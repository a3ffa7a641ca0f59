//! Confidence filtering of recognized regions

use super::Region;

/// Keep the regions whose confidence is strictly above `min_confidence`.
///
/// A threshold of zero or below only drops negative confidences, so blocks the
/// engine reports at exactly 0 survive. Order is preserved and the input is left untouched. Only the geometry overlay
/// is affected; the page transcription is never derived from the filtered set.
pub fn filter_regions(regions: &[Region], min_confidence: f32) -> Vec<Region> {
    let keep = |confidence: f32| {
        if min_confidence <= 0.0 {
            confidence >= 0.0
        } else {
            confidence > min_confidence
        }
    };
    regions
        .iter()
        .filter(|r| keep(r.confidence))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::BoundingBox;

    fn region(confidence: f32) -> Region {
        Region {
            bbox: BoundingBox::new(0, 0, 10, 10),
            confidence,
            text: format!("conf {}", confidence),
        }
    }

    fn confidences(regions: &[Region]) -> Vec<f32> {
        regions.iter().map(|r| r.confidence).collect()
    }

    #[test]
    fn test_drops_low_confidence_regions() {
        let regions = vec![region(80.0), region(2.0)];
        let kept = filter_regions(&regions, 5.0);
        assert_eq!(confidences(&kept), vec![80.0]);
        // Input untouched
        assert_eq!(regions.len(), 2);
    }

    #[test]
    fn test_threshold_is_strict() {
        let regions = vec![region(5.0), region(5.1)];
        assert_eq!(confidences(&filter_regions(&regions, 5.0)), vec![5.1]);
    }

    #[test]
    fn test_preserves_order() {
        let regions = vec![region(90.0), region(1.0), region(40.0), region(70.0)];
        assert_eq!(
            confidences(&filter_regions(&regions, 5.0)),
            vec![90.0, 40.0, 70.0]
        );
    }

    #[test]
    fn test_is_idempotent() {
        let regions = vec![region(12.0), region(3.0), region(99.0), region(0.0)];
        let once = filter_regions(&regions, 10.0);
        let twice = filter_regions(&once, 10.0);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_zero_threshold_only_excludes_negative() {
        let regions = vec![region(-1.0), region(0.0), region(0.5), region(100.0)];
        assert_eq!(
            confidences(&filter_regions(&regions, 0.0)),
            vec![0.0, 0.5, 100.0]
        );
    }

    #[test]
    fn test_negative_threshold_behaves_like_zero() {
        let regions = vec![region(-5.0), region(0.0), region(42.0)];
        assert_eq!(
            confidences(&filter_regions(&regions, -10.0)),
            vec![0.0, 42.0]
        );
    }
}
