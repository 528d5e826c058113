// src/resolver.rs

use crate::catalog::{Branch, BranchCatalog};
use std::collections::BTreeSet;
use tracing::debug;

/// Minimum normalized similarity (0–100) for an approximate match.
pub const MATCH_THRESHOLD: u8 = 80;

/// Outcome of resolving one raw branch token.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<'a> {
    Matched {
        branch: &'a Branch,
        score: u8,
        /// The token equals one of the branch's literal spellings.
        exact: bool,
    },
    Rejected {
        best_score: u8,
    },
}

impl<'a> Resolution<'a> {
    pub fn branch(&self) -> Option<&'a Branch> {
        match self {
            Self::Matched { branch, .. } => Some(*branch),
            Self::Rejected { .. } => None,
        }
    }
}

/// Maps noisy branch tokens onto a catalog.
pub struct BranchResolver<'a> {
    catalog: &'a BranchCatalog,
    threshold: u8,
}

impl<'a> BranchResolver<'a> {
    pub fn new(catalog: &'a BranchCatalog) -> Self {
        Self {
            catalog,
            threshold: MATCH_THRESHOLD,
        }
    }

    /// Exact spelling wins outright; otherwise the highest similarity at or
    /// above the threshold. Ties keep the branch declared first.
    pub fn resolve(&self, token: &str) -> Resolution<'a> {
        let needle = normalize(token);
        if needle.is_empty() {
            return Resolution::Rejected { best_score: 0 };
        }

        if let Some(branch) = self
            .catalog
            .branches
            .iter()
            .find(|b| b.spellings().any(|s| normalize(s) == needle))
        {
            return Resolution::Matched {
                branch,
                score: 100,
                exact: true,
            };
        }

        let mut best: Option<(&'a Branch, u8)> = None;
        for branch in &self.catalog.branches {
            let score = branch
                .spellings()
                .map(|s| similarity(&needle, &normalize(s)))
                .max()
                .unwrap_or(0);
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((branch, score));
            }
        }

        match best {
            Some((branch, score)) if score >= self.threshold => {
                debug!(token, branch = %branch.id, score, "Approximate branch match");
                Resolution::Matched {
                    branch,
                    score,
                    exact: false,
                }
            }
            Some((_, score)) => Resolution::Rejected { best_score: score },
            None => Resolution::Rejected { best_score: 0 },
        }
    }
}

/// Lowercase, treat punctuation/underscores as separators, collapse whitespace.
fn normalize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Weighted best of plain, token and substring similarity, scaled to 0–100.
///
/// Token scores count at 0.95. When one side is at least 1.5 times longer,
/// the shorter side is also scored against same-length windows of the longer
/// one at 0.9 (0.6 past 8 times).
fn similarity(a: &str, b: &str) -> u8 {
    let base = f64::from(ratio(a, b));
    let (len_a, len_b) = (a.chars().count(), b.chars().count());
    let (short, long) = (len_a.min(len_b), len_a.max(len_b));
    if short == 0 {
        return base as u8;
    }

    let length_ratio = long as f64 / short as f64;
    let best = if length_ratio < 1.5 {
        let token = ratio(&sorted_words(a), &sorted_words(b)).max(token_set_ratio(a, b));
        base.max(f64::from(token) * 0.95)
    } else {
        let scale = if length_ratio > 8.0 { 0.6 } else { 0.9 };
        let partial = f64::from(partial_ratio(a, b)) * scale;
        let partial_sorted =
            f64::from(partial_ratio(&sorted_words(a), &sorted_words(b))) * 0.95 * scale;
        base.max(partial).max(partial_sorted)
    };
    best.round().clamp(0.0, 100.0) as u8
}

fn sorted_words(s: &str) -> String {
    let mut words: Vec<&str> = s.split_whitespace().collect();
    words.sort_unstable();
    words.join(" ")
}

/// Compares the shared words against each side's full word set, so a token
/// whose words are all contained in the other scores 100.
fn token_set_ratio(a: &str, b: &str) -> u8 {
    let words_a: BTreeSet<&str> = a.split_whitespace().collect();
    let words_b: BTreeSet<&str> = b.split_whitespace().collect();
    let join = |words: Vec<&str>| words.join(" ");

    let shared = join(words_a.intersection(&words_b).copied().collect());
    let with = |only: Vec<&str>| {
        let rest = join(only);
        format!("{shared} {rest}").trim().to_string()
    };
    let full_a = with(words_a.difference(&words_b).copied().collect());
    let full_b = with(words_b.difference(&words_a).copied().collect());

    ratio(&shared, &full_a)
        .max(ratio(&shared, &full_b))
        .max(ratio(&full_a, &full_b))
}

/// Best ratio of the shorter string against every same-length window of the
/// longer one.
fn partial_ratio(a: &str, b: &str) -> u8 {
    let (short, long) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    let long: Vec<char> = long.chars().collect();
    let width = short.chars().count();
    if width == 0 || width >= long.len() {
        return ratio(short, &long.iter().collect::<String>());
    }

    long.windows(width)
        .map(|window| ratio(short, &window.iter().collect::<String>()))
        .max()
        .unwrap_or(0)
}

fn ratio(a: &str, b: &str) -> u8 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 100;
    }
    let distance = levenshtein(a, b);
    let score = 100.0 * (1.0 - distance as f64 / max_len as f64);
    score.round().clamp(0.0, 100.0) as u8
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{BranchCatalog, BranchId};

    fn catalog() -> BranchCatalog {
        BranchCatalog::new(
            vec![
                Branch {
                    id: BranchId::new("sidi-bishr"),
                    display: "سيدي بشر".to_string(),
                    aliases: vec!["EG_Alex East_DS_ Sidi".to_string()],
                    region: Some("alexandria".to_string()),
                },
                Branch {
                    id: BranchId::new("maadi"),
                    display: "المعادي".to_string(),
                    aliases: vec!["EG_Maadi_DS".to_string()],
                    region: None,
                },
            ],
            Vec::new(),
        )
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("سموحة", "سموحه"), 1);
    }

    #[test]
    fn test_exact_alias_short_circuits() {
        let catalog = catalog();
        let resolver = BranchResolver::new(&catalog);
        let resolved = resolver.resolve("EG_Maadi_DS");
        assert!(matches!(
            resolved,
            Resolution::Matched { exact: true, score: 100, .. }
        ));
        assert_eq!(resolved.branch().unwrap().id, BranchId::new("maadi"));
    }

    #[test]
    fn test_approximate_match_above_threshold() {
        let catalog = catalog();
        let resolver = BranchResolver::new(&catalog);
        let resolved = resolver.resolve("EG_Alex East_DS_ Sidl");
        match resolved {
            Resolution::Matched { branch, score, exact } => {
                assert_eq!(branch.id, BranchId::new("sidi-bishr"));
                assert!(!exact);
                assert!(score >= MATCH_THRESHOLD);
            }
            Resolution::Rejected { .. } => panic!("expected a match"),
        }
    }

    #[test]
    fn test_warehouse_code_prefix_matches_full_alias() {
        let catalog = catalog();
        let resolver = BranchResolver::new(&catalog);
        let resolved = resolver.resolve("EG_Alex East_DS_");
        match resolved {
            Resolution::Matched { branch, score, exact } => {
                assert_eq!(branch.id, BranchId::new("sidi-bishr"));
                assert!(!exact);
                assert_eq!(score, 95);
            }
            Resolution::Rejected { best_score } => panic!("rejected with {best_score}"),
        }
    }

    #[test]
    fn test_partial_ratio_scores_substring_windows() {
        assert_eq!(partial_ratio("eg maadi ds", "talabat eg maadi ds warehouse"), 100);
        assert_eq!(partial_ratio("abc", "abc"), 100);
        // 11 vs 29 chars: substring score scaled by 0.9
        assert_eq!(similarity("eg maadi ds", "talabat eg maadi ds warehouse"), 90);
        assert!(similarity("eg sheikh zayed", "eg alex east ds sidi") < MATCH_THRESHOLD);
    }

    #[test]
    fn test_token_set_ratio_ignores_extra_words() {
        assert_eq!(token_set_ratio("eg alex east ds", "eg alex east ds sidi"), 100);
        assert!(token_set_ratio("eg faisal haram", "eg maadi ds") < 50);
    }

    #[test]
    fn test_rejects_below_threshold() {
        let catalog = catalog();
        let resolver = BranchResolver::new(&catalog);
        let resolved = resolver.resolve("EG_Sheikh Zayed");
        assert!(matches!(resolved, Resolution::Rejected { best_score } if best_score < MATCH_THRESHOLD));
        assert!(matches!(resolver.resolve("  "), Resolution::Rejected { best_score: 0 }));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let catalog = catalog();
        let resolver = BranchResolver::new(&catalog);
        let first = resolver.resolve("eg maadi ds");
        for _ in 0..5 {
            assert_eq!(resolver.resolve("eg maadi ds"), first);
        }
    }
}
