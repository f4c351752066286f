//! Duplicate engine (spec.md §4.8): ranks candidate designs by the
//! strongest of four independent similarity signals.

use strsim::jaro_winkler;

pub const AUTO_MERGE_THRESHOLD: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DuplicateSignal {
    IdenticalContentHash,
    IdenticalExternalId,
    FuzzyTitleAndDesigner,
    SimilarFilenameAndSize,
}

impl DuplicateSignal {
    pub fn confidence(self) -> f64 {
        match self {
            DuplicateSignal::IdenticalContentHash => 1.0,
            DuplicateSignal::IdenticalExternalId => 1.0,
            DuplicateSignal::FuzzyTitleAndDesigner => 0.7,
            DuplicateSignal::SimilarFilenameAndSize => 0.5,
        }
    }
}

pub struct CandidateInput<'a> {
    pub design_id: &'a str,
    pub shared_content_hash: bool,
    pub shared_external_id: bool,
    pub title: &'a str,
    pub designer: Option<&'a str>,
    pub other_title: &'a str,
    pub other_designer: Option<&'a str>,
    pub filename: Option<&'a str>,
    pub size_bytes: Option<u64>,
    pub other_filename: Option<&'a str>,
    pub other_size_bytes: Option<u64>,
}

pub struct DuplicateMatch {
    pub design_id: String,
    pub signal: DuplicateSignal,
    pub confidence: f64,
}

const FUZZY_THRESHOLD: f64 = 0.8;
const SIZE_TOLERANCE: f64 = 0.01;

/// Evaluates every signal for one candidate pair and returns the single
/// strongest match (spec.md §4.8: "no duplicates across signals").
pub fn best_signal(input: &CandidateInput) -> Option<DuplicateMatch> {
    if input.shared_content_hash {
        return Some(make_match(input.design_id, DuplicateSignal::IdenticalContentHash));
    }
    if input.shared_external_id {
        return Some(make_match(input.design_id, DuplicateSignal::IdenticalExternalId));
    }

    let title_similar = jaro_winkler(&input.title.to_lowercase(), &input.other_title.to_lowercase()) >= FUZZY_THRESHOLD;
    let designer_similar = match (input.designer, input.other_designer) {
        (Some(a), Some(b)) => jaro_winkler(&a.to_lowercase(), &b.to_lowercase()) >= FUZZY_THRESHOLD,
        _ => false,
    };
    if title_similar && designer_similar {
        return Some(make_match(input.design_id, DuplicateSignal::FuzzyTitleAndDesigner));
    }

    if let (Some(a), Some(b), Some(size_a), Some(size_b)) =
        (input.filename, input.other_filename, input.size_bytes, input.other_size_bytes)
    {
        if a.eq_ignore_ascii_case(b) && within_tolerance(size_a, size_b) {
            return Some(make_match(input.design_id, DuplicateSignal::SimilarFilenameAndSize));
        }
    }

    None
}

fn within_tolerance(a: u64, b: u64) -> bool {
    if a == 0 && b == 0 {
        return true;
    }
    let diff = (a as f64 - b as f64).abs();
    let base = a.max(b) as f64;
    diff / base <= SIZE_TOLERANCE
}

fn make_match(design_id: &str, signal: DuplicateSignal) -> DuplicateMatch {
    DuplicateMatch {
        design_id: design_id.to_string(),
        signal,
        confidence: signal.confidence(),
    }
}

/// Ranks every candidate's best signal and returns them sorted by
/// descending confidence, as `find_duplicates` does.
pub fn find_duplicates(candidates: &[CandidateInput]) -> Vec<DuplicateMatch> {
    let mut matches: Vec<DuplicateMatch> = candidates.iter().filter_map(best_signal).collect();
    matches.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
    matches
}

pub fn should_auto_merge(matches: &[DuplicateMatch]) -> bool {
    matches.first().is_some_and(|m| m.confidence >= AUTO_MERGE_THRESHOLD)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base<'a>() -> CandidateInput<'a> {
        CandidateInput {
            design_id: "d2",
            shared_content_hash: false,
            shared_external_id: false,
            title: "Cool Goblin",
            designer: Some("Jane"),
            other_title: "Cool Goblin",
            other_designer: Some("Jane"),
            filename: None,
            size_bytes: None,
            other_filename: None,
            other_size_bytes: None,
        }
    }

    #[test]
    fn identical_content_hash_wins_at_full_confidence() {
        let mut input = base();
        input.shared_content_hash = true;
        let m = best_signal(&input).unwrap();
        assert_eq!(m.signal, DuplicateSignal::IdenticalContentHash);
        assert_eq!(m.confidence, 1.0);
    }

    #[test]
    fn fuzzy_title_and_designer_both_required() {
        let mut input = base();
        input.other_designer = Some("Someone Else Entirely");
        assert!(best_signal(&input).is_none());
    }

    #[test]
    fn filename_and_size_within_tolerance_matches() {
        let mut input = base();
        input.other_title = "Totally Different";
        input.other_designer = None;
        input.filename = Some("goblin.stl");
        input.other_filename = Some("GOBLIN.STL");
        input.size_bytes = Some(1_000_000);
        input.other_size_bytes = Some(1_005_000);
        let m = best_signal(&input).unwrap();
        assert_eq!(m.signal, DuplicateSignal::SimilarFilenameAndSize);
    }

    #[test]
    fn auto_merge_threshold_is_point_nine() {
        let matches = vec![DuplicateMatch {
            design_id: "d".into(),
            signal: DuplicateSignal::FuzzyTitleAndDesigner,
            confidence: 0.7,
        }];
        assert!(!should_auto_merge(&matches));
    }
}
