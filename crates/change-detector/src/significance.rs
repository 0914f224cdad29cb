//! Deciding whether two snapshots describe different pages.
//!
//! [`is_significant_change`] gates the live pipeline. [`score_change`] is a weighted
//! alternative exposed through [`SignificancePolicy::Weighted`]; it is off by default.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::model::DomSnapshot;

pub const PATH_WEIGHT: u32 = 5;
pub const QUERY_WEIGHT: u32 = 3;
pub const TITLE_WEIGHT: u32 = 3;
pub const META_WEIGHT: u32 = 2;
pub const H1_WEIGHT: u32 = 2;
pub const CONTENT_WEIGHT: u32 = 3;
pub const LINK_WEIGHT: u32 = 1;

pub const DEFAULT_WEIGHTED_THRESHOLD: u32 = 5;
/// Content samples less similar than this count as changed.
pub const CONTENT_SIMILARITY_FLOOR: f64 = 0.7;
/// Relative link-count change that counts as a structural change.
pub const LINK_DELTA_RATIO: f64 = 0.2;

/// Path, query, title or meta description differ. Fragments never count.
pub fn is_significant_change(previous: &DomSnapshot, current: &DomSnapshot) -> bool {
    previous.path != current.path
        || previous.search_params != current.search_params
        || previous.title != current.title
        || previous.meta_description != current.meta_description
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SignificancePolicy {
    Boolean,
    Weighted {
        #[serde(default = "default_threshold")]
        threshold: u32,
    },
}

fn default_threshold() -> u32 {
    DEFAULT_WEIGHTED_THRESHOLD
}

impl Default for SignificancePolicy {
    fn default() -> Self {
        SignificancePolicy::Boolean
    }
}

impl SignificancePolicy {
    pub fn evaluate(&self, previous: &DomSnapshot, current: &DomSnapshot) -> bool {
        match self {
            SignificancePolicy::Boolean => is_significant_change(previous, current),
            SignificancePolicy::Weighted { threshold } => {
                score_change(previous, current).total >= *threshold
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeScore {
    pub total: u32,
    pub components: Vec<(&'static str, u32)>,
}

impl ChangeScore {
    fn add(&mut self, label: &'static str, points: u32) {
        self.total += points;
        self.components.push((label, points));
    }
}

pub fn score_change(previous: &DomSnapshot, current: &DomSnapshot) -> ChangeScore {
    let mut score = ChangeScore::default();
    if previous.path != current.path {
        score.add("path", PATH_WEIGHT);
    }
    if previous.search_params != current.search_params {
        score.add("query", QUERY_WEIGHT);
    }
    if previous.title != current.title {
        score.add("title", TITLE_WEIGHT);
    }
    if previous.meta_description != current.meta_description {
        score.add("meta_description", META_WEIGHT);
    }
    if previous.h1_texts != current.h1_texts {
        score.add("h1", H1_WEIGHT);
    }
    if content_similarity(&previous.content_sample, &current.content_sample)
        < CONTENT_SIMILARITY_FLOOR
    {
        score.add("content", CONTENT_WEIGHT);
    }
    let base = previous.link_count.max(1) as f64;
    let delta = previous.link_count.abs_diff(current.link_count) as f64;
    if delta / base > LINK_DELTA_RATIO {
        score.add("links", LINK_WEIGHT);
    }
    score
}

/// Jaccard similarity of the lowercase word sets. Two empty samples are identical.
pub fn content_similarity(a: &str, b: &str) -> f64 {
    let left: HashSet<String> = a.split_whitespace().map(str::to_lowercase).collect();
    let right: HashSet<String> = b.split_whitespace().map(str::to_lowercase).collect();
    if left.is_empty() && right.is_empty() {
        return 1.0;
    }
    let shared = left.intersection(&right).count() as f64;
    let union = left.union(&right).count() as f64;
    shared / union
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(path: &str, hash: &str, title: &str) -> DomSnapshot {
        DomSnapshot {
            path: path.into(),
            search_params: String::new(),
            hash_fragment: hash.into(),
            title: title.into(),
            meta_description: "desc".into(),
            h1_texts: vec!["Heading".into()],
            h1_count: 1,
            h2_texts: Vec::new(),
            content_sample: "the quick brown fox jumps".into(),
            visible_element_count: 40,
            link_count: 10,
            taken_at: 0,
        }
    }

    #[test]
    fn hash_only_change_is_not_significant() {
        let before = snapshot("/docs", "#intro", "Docs");
        let after = snapshot("/docs", "#install", "Docs");
        assert!(!is_significant_change(&before, &after));
        assert_eq!(score_change(&before, &after).total, 0);
        let weighted = SignificancePolicy::Weighted { threshold: 1 };
        assert!(!weighted.evaluate(&before, &after));
    }

    #[test]
    fn any_of_the_four_fields_is_significant() {
        let base = snapshot("/a", "", "A");
        assert!(is_significant_change(&base, &snapshot("/b", "", "A")));
        assert!(is_significant_change(&base, &snapshot("/a", "", "B")));

        let mut query = base.clone();
        query.search_params = "?page=2".into();
        assert!(is_significant_change(&base, &query));

        let mut meta = base.clone();
        meta.meta_description = "other".into();
        assert!(is_significant_change(&base, &meta));

        let mut content_only = base.clone();
        content_only.content_sample = "entirely different words here".into();
        assert!(!is_significant_change(&base, &content_only));
    }

    #[test]
    fn weighted_policy_sums_components() {
        let base = snapshot("/a", "", "A");
        let mut retitled = base.clone();
        retitled.title = "B".into();
        let score = score_change(&base, &retitled);
        assert_eq!(score.total, TITLE_WEIGHT);
        assert!(!SignificancePolicy::Weighted { threshold: 5 }.evaluate(&base, &retitled));

        retitled.content_sample = "nothing in common".into();
        let score = score_change(&base, &retitled);
        assert_eq!(score.total, TITLE_WEIGHT + CONTENT_WEIGHT);
        assert!(SignificancePolicy::Weighted { threshold: 5 }.evaluate(&base, &retitled));
    }

    #[test]
    fn similarity_of_empty_samples_is_one() {
        assert_eq!(content_similarity("", "  "), 1.0);
        assert_eq!(content_similarity("a b", "A B"), 1.0);
        assert!(content_similarity("a b c d", "a x y z") < 0.2);
    }
}
