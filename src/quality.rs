//! OCR quality assessment.
//!
//! Scores extracted text for trustworthiness so the deduplicator can pick
//! the best of several copies of the same document. Three independent
//! sub-scores are combined with fixed weights:
//!
//! | Metric | Weight | Signal |
//! |--------|--------|--------|
//! | `word_score` | 0.5 | share of tokens that look like real words |
//! | `corruption_score` | 0.3 | absence of U+FFFD and of Cc/Co/Cs/Cn code points |
//! | `line_score` | 0.2 | plausible line lengths and sentence-aligned line breaks |
//!
//! The reference word set is an immutable [`Lexicon`] handed to
//! [`QualityAssessor::new`]; there is no global dictionary state.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use unicode_general_category::{get_general_category, GeneralCategory};
use unicode_segmentation::UnicodeSegmentation;

use crate::error::{DedupError, Result};

const BUILTIN_LEXICON: &str = include_str!("../assets/lexicon.txt");

const WORD_WEIGHT: f64 = 0.5;
const CORRUPTION_WEIGHT: f64 = 0.3;
const LINE_WEIGHT: f64 = 0.2;

/// Lines shorter than this look like OCR fragments.
const MIN_PLAUSIBLE_LINE: usize = 20;
/// All-caps tokens up to this length are accepted as abbreviations.
const MAX_ABBREVIATION: usize = 5;

/// Immutable reference word set.
#[derive(Debug, Clone, Default)]
pub struct Lexicon {
    words: HashSet<String>,
}

impl Lexicon {
    /// The built-in English/legal correspondence word list.
    pub fn builtin() -> Self {
        Self::parse(BUILTIN_LEXICON)
    }

    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            words: words
                .into_iter()
                .map(|w| w.as_ref().trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
        }
    }

    fn parse(content: &str) -> Self {
        Self::from_words(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#')),
        )
    }

    /// Add every word from a newline-separated file.
    pub fn extend_from_file(mut self, path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| DedupError::io(path, e))?;
        self.words.extend(Self::parse(&content).words);
        Ok(self)
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(word)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Sub-scores and combined score, all in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityScore {
    pub word_score: f64,
    pub corruption_score: f64,
    pub line_score: f64,
    pub overall_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityCategory {
    Low,
    Medium,
    High,
}

impl QualityCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityCategory::Low => "low",
            QualityCategory::Medium => "medium",
            QualityCategory::High => "high",
        }
    }
}

/// Bucket a score: high ≥ 0.9, medium ≥ 0.7, low otherwise.
pub fn categorize(score: f64) -> QualityCategory {
    if score >= 0.9 {
        QualityCategory::High
    } else if score >= 0.7 {
        QualityCategory::Medium
    } else {
        QualityCategory::Low
    }
}

/// Scores OCR text against a fixed lexicon. Cheap to clone.
#[derive(Debug, Clone)]
pub struct QualityAssessor {
    lexicon: Arc<Lexicon>,
}

impl QualityAssessor {
    pub fn new(lexicon: Lexicon) -> Self {
        Self {
            lexicon: Arc::new(lexicon),
        }
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    pub fn assess(&self, text: &str) -> QualityScore {
        let word_score = self.word_score(text);
        let corruption_score = corruption_score(text);
        let line_score = line_score(text);
        let overall = WORD_WEIGHT * word_score
            + CORRUPTION_WEIGHT * corruption_score
            + LINE_WEIGHT * line_score;

        QualityScore {
            word_score,
            corruption_score,
            line_score,
            overall_score: overall.clamp(0.0, 1.0),
        }
    }

    /// Tokens are UAX #29 words, except that a whitespace-delimited chunk
    /// containing `@` is kept whole so addresses score as one token.
    fn word_score(&self, text: &str) -> f64 {
        let mut total = 0usize;
        let mut valid = 0usize;
        let mut tally = |token: &str| {
            if token.chars().count() < 2 || !token.chars().any(char::is_alphabetic) {
                return;
            }
            total += 1;
            if self.is_plausible_token(token) {
                valid += 1;
            }
        };

        for chunk in text.split_whitespace() {
            if chunk.contains('@') {
                tally(chunk.trim_matches(|c: char| !c.is_alphanumeric() && c != '@'));
            } else {
                chunk.unicode_words().for_each(&mut tally);
            }
        }

        if total == 0 {
            0.0
        } else {
            valid as f64 / total as f64
        }
    }

    fn is_plausible_token(&self, token: &str) -> bool {
        let lower = token.to_lowercase();
        let stem = lower
            .strip_suffix("'s")
            .or_else(|| lower.strip_suffix("\u{2019}s"))
            .unwrap_or(&lower);
        if self.lexicon.contains(stem) {
            return true;
        }

        let has_digit = token.chars().any(|c| c.is_ascii_digit());
        let has_alpha = token.chars().any(char::is_alphabetic);
        if has_digit && has_alpha {
            return true;
        }

        if token.chars().count() <= MAX_ABBREVIATION
            && token.chars().all(|c| c.is_uppercase() || !c.is_alphabetic())
        {
            return true;
        }

        token.contains('@') || token.contains('.')
    }
}

impl Default for QualityAssessor {
    fn default() -> Self {
        Self::new(Lexicon::builtin())
    }
}

fn is_corrupt(c: char) -> bool {
    match c {
        '\u{FFFD}' => true,
        '\n' | '\r' | '\t' | '\x0C' => false,
        c => matches!(
            get_general_category(c),
            GeneralCategory::Control
                | GeneralCategory::PrivateUse
                | GeneralCategory::Surrogate
                | GeneralCategory::Unassigned
        ),
    }
}

fn corruption_score(text: &str) -> f64 {
    let total = text.chars().count();
    if total == 0 {
        return 1.0;
    }
    let bad = text.chars().filter(|&c| is_corrupt(c)).count();
    let rate = bad as f64 / total as f64;
    1.0 - (rate * 10.0).min(1.0)
}

fn ends_sentence(line: &str) -> bool {
    matches!(
        line.trim_end().chars().last(),
        Some('.' | '!' | '?' | ':' | ';' | '"' | ')' | '\u{201D}')
    )
}

fn line_score(text: &str) -> f64 {
    let lines: Vec<&str> = text.lines().collect();
    let content: Vec<&str> = lines.iter().map(|l| l.trim()).filter(|l| !l.is_empty()).collect();
    if content.is_empty() {
        return 0.0;
    }

    let long = content
        .iter()
        .filter(|l| l.chars().count() >= MIN_PLAUSIBLE_LINE)
        .count();
    let long_fraction = long as f64 / content.len() as f64;

    let mut breaks = 0usize;
    let mut aligned = 0usize;
    for (i, line) in lines.iter().enumerate().take(lines.len().saturating_sub(1)) {
        if line.trim().is_empty() {
            continue;
        }
        breaks += 1;
        if ends_sentence(line) || lines[i + 1].trim().is_empty() {
            aligned += 1;
        }
    }
    let aligned_fraction = if breaks == 0 {
        1.0
    } else {
        aligned as f64 / breaks as f64
    };

    0.5 * long_fraction + 0.5 * aligned_fraction
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assessor() -> QualityAssessor {
        QualityAssessor::default()
    }

    #[test]
    fn builtin_lexicon_loads() {
        let lex = Lexicon::builtin();
        assert!(lex.len() > 300);
        assert!(lex.contains("deposition"));
        assert!(!lex.contains("# built-in reference lexicon for ocr word-quality scoring."));
    }

    #[test]
    fn clean_text_scores_high() {
        let text = "Dear Mr. Smith,\n\
                    Please find attached the original letter regarding the matter.\n\
                    The court will review the motion at the hearing on March 3.\n\
                    Thank you for your response.";
        let score = assessor().assess(text);
        assert!(score.word_score > 0.8, "word score {}", score.word_score);
        assert_eq!(score.corruption_score, 1.0);
        assert!(score.overall_score >= 0.9, "overall {}", score.overall_score);
        assert_eq!(categorize(score.overall_score), QualityCategory::High);
    }

    #[test]
    fn garbled_text_scores_low() {
        let text = "Tlie qnick brnwn f\u{FFFD}x jnmps ovcr\u{0007} tbe lazv d\u{FFFD}g\nxq\nzz\nrn";
        let score = assessor().assess(text);
        assert!(score.word_score < 0.5);
        assert!(score.corruption_score < 1.0);
        assert!(score.line_score < 0.5);
        assert_eq!(categorize(score.overall_score), QualityCategory::Low);
    }

    #[test]
    fn special_tokens_are_plausible() {
        let a = assessor();
        assert!(a.is_plausible_token("2004-03-11a"));
        assert!(a.is_plausible_token("EFTA00012"));
        assert!(a.is_plausible_token("FBI"));
        assert!(a.is_plausible_token("jdoe@example.com"));
        assert!(a.is_plausible_token("court's"));
        assert!(!a.is_plausible_token("xqzvt"));
    }

    #[test]
    fn corruption_penalty_saturates() {
        assert_eq!(corruption_score(""), 1.0);
        assert_eq!(corruption_score("\u{FFFD}\u{FFFD}\u{FFFD}"), 0.0);
        // One bad char in 20 = 5% rate, penalty 0.5.
        let text = format!("{}\u{E000}", "a".repeat(19));
        assert!((corruption_score(&text) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn unassigned_code_points_are_corruption() {
        // U+0378 and U+FDD0 are both in general category Cn.
        let text = format!("{}\u{0378}\u{FDD0}", "a".repeat(38));
        assert!((corruption_score(&text) - 0.5).abs() < 1e-9);
        assert!(is_corrupt('\u{10FFFF}'));
        assert!(!is_corrupt('\u{00E9}'));
        assert!(!is_corrupt('\x0C'));
    }

    #[test]
    fn tokens_split_on_word_boundaries() {
        let a = assessor();
        // Punctuation glued between words no longer hides them.
        let score = a.word_score("court/hearing--motion;letter");
        assert_eq!(score, 1.0);
        assert_eq!(a.word_score("contact jdoe@example.com today"), 1.0);
    }

    #[test]
    fn line_score_rewards_sentence_breaks() {
        let good = "This line ends a complete sentence.\nAnd this one also ends properly here.";
        let bad = "This line is broken in the\nmiddle of a sentence and then\ncontinues on";
        assert!(line_score(good) > line_score(bad));
        assert_eq!(line_score(""), 0.0);
    }

    #[test]
    fn empty_text() {
        let score = assessor().assess("");
        assert_eq!(score.word_score, 0.0);
        assert_eq!(score.line_score, 0.0);
        assert!((score.overall_score - 0.3).abs() < 1e-9);
    }

    #[test]
    fn categories() {
        assert_eq!(categorize(0.95), QualityCategory::High);
        assert_eq!(categorize(0.9), QualityCategory::High);
        assert_eq!(categorize(0.7), QualityCategory::Medium);
        assert_eq!(categorize(0.69), QualityCategory::Low);
        assert!(QualityCategory::High > QualityCategory::Medium);
    }

    #[test]
    fn lexicon_extends_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extra.txt");
        std::fs::write(&path, "# extra\nEpstein\nmaxwell\n").unwrap();
        let lex = Lexicon::builtin().extend_from_file(&path).unwrap();
        assert!(lex.contains("epstein"));
        assert!(lex.contains("maxwell"));
    }
}
