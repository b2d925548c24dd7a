use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::clangd::ClangdMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;

use crate::config::{Algorithm, CaseMode, MatcherConfig};
use crate::model::MatchResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Substring,
    Fuzzy,
}

/// A fuzzy scoring strategy.
///
/// `score` returns `Some` only when every character of `query` occurs in
/// `line` in order. Higher is better.
pub trait Scorer {
    fn name(&self) -> &'static str;
    fn score(&self, line: &str, query: &str) -> Option<i64>;
}

pub struct SkimScorer {
    matcher: SkimMatcherV2,
}

impl SkimScorer {
    pub fn new(case: CaseMode) -> Self {
        let matcher = SkimMatcherV2::default();
        let matcher = match case {
            CaseMode::Smart => matcher.smart_case(),
            CaseMode::Ignore => matcher.ignore_case(),
            CaseMode::Respect => matcher.respect_case(),
        };
        Self { matcher }
    }
}

impl Scorer for SkimScorer {
    fn name(&self) -> &'static str {
        "skim"
    }

    fn score(&self, line: &str, query: &str) -> Option<i64> {
        self.matcher.fuzzy_match(line, query)
    }
}

pub struct ClangdScorer {
    matcher: ClangdMatcher,
}

impl ClangdScorer {
    pub fn new(case: CaseMode) -> Self {
        let matcher = ClangdMatcher::default();
        let matcher = match case {
            CaseMode::Smart => matcher.smart_case(),
            CaseMode::Ignore => matcher.ignore_case(),
            CaseMode::Respect => matcher.respect_case(),
        };
        Self { matcher }
    }
}

impl Scorer for ClangdScorer {
    fn name(&self) -> &'static str {
        "clangd"
    }

    fn score(&self, line: &str, query: &str) -> Option<i64> {
        self.matcher.fuzzy_match(line, query)
    }
}

/// Greedy leftmost subsequence match.
///
/// Each matched character scores 1, plus 2 when it directly follows the
/// previous match and 3 when it starts a word.
pub struct SubsequenceScorer {
    case: CaseMode,
}

const MATCH_SCORE: i64 = 1;
const CONSECUTIVE_BONUS: i64 = 2;
const WORD_START_BONUS: i64 = 3;

impl SubsequenceScorer {
    pub fn new(case: CaseMode) -> Self {
        Self { case }
    }

    fn ignores_case(&self, query: &str) -> bool {
        match self.case {
            CaseMode::Ignore => true,
            CaseMode::Respect => false,
            CaseMode::Smart => !query.chars().any(char::is_uppercase),
        }
    }
}

impl Scorer for SubsequenceScorer {
    fn name(&self) -> &'static str {
        "subsequence"
    }

    fn score(&self, line: &str, query: &str) -> Option<i64> {
        let ignore_case = self.ignores_case(query);
        let same = |a: char, b: char| {
            if ignore_case {
                a.to_lowercase().eq(b.to_lowercase())
            } else {
                a == b
            }
        };

        let mut wanted = query.chars().peekable();
        let mut score = 0;
        let mut prev: Option<char> = None;
        let mut prev_matched = false;

        for ch in line.chars() {
            let Some(&next) = wanted.peek() else {
                break;
            };
            if same(ch, next) {
                score += MATCH_SCORE;
                if prev_matched {
                    score += CONSECUTIVE_BONUS;
                }
                if prev.is_none_or(|p| !p.is_alphanumeric()) {
                    score += WORD_START_BONUS;
                }
                wanted.next();
                prev_matched = true;
            } else {
                prev_matched = false;
            }
            prev = Some(ch);
        }

        wanted.peek().is_none().then_some(score)
    }
}

pub fn scorer_for(config: &MatcherConfig) -> Box<dyn Scorer> {
    match config.algorithm {
        Algorithm::Skim => Box::new(SkimScorer::new(config.case)),
        Algorithm::Clangd => Box::new(ClangdScorer::new(config.case)),
        Algorithm::Subsequence => Box::new(SubsequenceScorer::new(config.case)),
    }
}

pub struct MatchEngine {
    scorer: Box<dyn Scorer>,
}

impl MatchEngine {
    pub fn new(scorer: Box<dyn Scorer>) -> Self {
        Self { scorer }
    }

    pub fn from_config(config: &MatcherConfig) -> Self {
        Self::new(scorer_for(config))
    }

    pub fn scorer_name(&self) -> &'static str {
        self.scorer.name()
    }

    /// Lines to display for `query`.
    ///
    /// Substring keeps input order. Fuzzy is best first, ties in input
    /// order. An empty query returns every line in input order for both
    /// modes.
    pub fn filter(&self, lines: &[String], query: &str, mode: MatchMode) -> Vec<String> {
        match mode {
            MatchMode::Substring => lines
                .iter()
                .filter(|line| line.contains(query))
                .cloned()
                .collect(),
            MatchMode::Fuzzy if query.is_empty() => lines.to_vec(),
            MatchMode::Fuzzy => self
                .rank(lines, query)
                .into_iter()
                .map(|result| result.line)
                .collect(),
        }
    }

    /// Scores every line, drops non-positive scores and sorts by descending
    /// score. The sort is stable.
    pub fn rank(&self, lines: &[String], query: &str) -> Vec<MatchResult> {
        let mut results: Vec<MatchResult> = lines
            .iter()
            .filter_map(|line| {
                let score = self.scorer.score(line, query)?;
                (score > 0).then(|| MatchResult {
                    line: line.clone(),
                    score,
                })
            })
            .collect();
        results.sort_by(|a, b| b.score.cmp(&a.score));
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|line| line.to_string()).collect()
    }

    fn engine(algorithm: Algorithm) -> MatchEngine {
        MatchEngine::from_config(&MatcherConfig {
            algorithm,
            case: CaseMode::Smart,
        })
    }

    fn is_subsequence(query: &str, line: &str) -> bool {
        let line = line.to_lowercase();
        let mut chars = line.chars();
        query.to_lowercase().chars().all(|q| chars.any(|c| c == q))
    }

    #[test]
    fn substring_keeps_order_and_is_idempotent() {
        let input = lines(&["banana", "apple", "cabana", "grape"]);
        let engine = engine(Algorithm::Skim);

        let first = engine.filter(&input, "an", MatchMode::Substring);
        assert_eq!(first, vec!["banana", "cabana"]);
        assert_eq!(engine.filter(&input, "an", MatchMode::Substring), first);
    }

    #[test]
    fn substring_is_case_sensitive() {
        let input = lines(&["Apple", "apple"]);
        let found = engine(Algorithm::Skim).filter(&input, "app", MatchMode::Substring);
        assert_eq!(found, vec!["apple"]);
    }

    #[test]
    fn empty_query_returns_everything() {
        let input = lines(&["b", "a", "c"]);
        for algorithm in [Algorithm::Skim, Algorithm::Clangd, Algorithm::Subsequence] {
            let engine = engine(algorithm);
            assert_eq!(engine.filter(&input, "", MatchMode::Fuzzy), input);
            assert_eq!(engine.filter(&input, "", MatchMode::Substring), input);
        }
    }

    #[test]
    fn empty_lines_return_empty() {
        for algorithm in [Algorithm::Skim, Algorithm::Clangd, Algorithm::Subsequence] {
            assert!(engine(algorithm).filter(&[], "a", MatchMode::Fuzzy).is_empty());
        }
        assert!(engine(Algorithm::Skim)
            .filter(&[], "a", MatchMode::Substring)
            .is_empty());
    }

    #[test]
    fn unknown_characters_match_nothing() {
        let input = lines(&["apple", "banana"]);
        for algorithm in [Algorithm::Skim, Algorithm::Clangd, Algorithm::Subsequence] {
            assert!(engine(algorithm).filter(&input, "zq", MatchMode::Fuzzy).is_empty());
        }
    }

    #[test]
    fn every_scorer_only_keeps_subsequences() {
        let input = lines(&[
            "apple",
            "banana",
            "grape",
            "src/main.rs",
            "Cargo.toml",
            "README",
            "maple syrup",
        ]);
        for algorithm in [Algorithm::Skim, Algorithm::Clangd, Algorithm::Subsequence] {
            let engine = engine(algorithm);
            for query in ["ae", "mn", "ar", "rs", "pl"] {
                for line in engine.filter(&input, query, MatchMode::Fuzzy) {
                    assert!(input.contains(&line));
                    assert!(
                        is_subsequence(query, &line),
                        "{} kept {line:?} for {query:?}",
                        engine.scorer_name()
                    );
                }
            }
        }
    }

    #[test]
    fn subsequence_scorer_finds_apple_and_grape() {
        let input = lines(&["apple", "banana", "grape", ""]);
        let found = engine(Algorithm::Subsequence).filter(&input, "ae", MatchMode::Fuzzy);
        assert_eq!(found.len(), 2);
        assert!(found.contains(&"apple".to_string()));
        assert!(found.contains(&"grape".to_string()));
    }

    #[test]
    fn subsequence_scores_are_documented_weights() {
        let scorer = SubsequenceScorer::new(CaseMode::Smart);
        // a: 1 + word start 3, p: 1 + consecutive 2
        assert_eq!(scorer.score("apple", "ap"), Some(7));
        // a: 1, e: 1 (neither at a word start nor adjacent)
        assert_eq!(scorer.score("grape", "ae"), Some(2));
        assert_eq!(scorer.score("grape", "ea"), None);
    }

    #[test]
    fn subsequence_case_modes() {
        assert!(SubsequenceScorer::new(CaseMode::Smart).score("Apple", "ap").is_some());
        assert!(SubsequenceScorer::new(CaseMode::Smart).score("apple", "Ap").is_none());
        assert!(SubsequenceScorer::new(CaseMode::Respect).score("Apple", "ap").is_none());
        assert!(SubsequenceScorer::new(CaseMode::Ignore).score("apple", "AP").is_some());
    }

    #[test]
    fn fuzzy_ranks_best_first_with_stable_ties() {
        let input = lines(&["xaxbx", "ab", "zz", "xaxbx again", "ab again"]);
        let ranked = engine(Algorithm::Subsequence).rank(&input, "ab");
        let names: Vec<&str> = ranked.iter().map(|r| r.line.as_str()).collect();
        assert_eq!(names, vec!["ab", "ab again", "xaxbx", "xaxbx again"]);
        assert!(ranked.windows(2).all(|pair| pair[0].score >= pair[1].score));
    }

    #[test]
    fn filter_leaves_input_untouched() {
        let input = lines(&["b", "a"]);
        let before = input.clone();
        let _ = engine(Algorithm::Skim).filter(&input, "a", MatchMode::Fuzzy);
        assert_eq!(input, before);
    }
}
