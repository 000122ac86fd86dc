//! Pairwise duplicate matching over client candidates.
//!
//! # Responsibility
//! - Decide whether two clients look like the same relationship and why.
//! - Derive blocking keys so large candidate sets avoid a full O(n²) pass.
//!
//! # Invariants
//! - Rules are checked in precedence order; the first hit is the reason.
//! - Scoring is symmetric and deterministic: `score(a, b) == score(b, a)`.
//! - Empty inputs never match (two blank companies are not "the same").

use crate::model::client::MatchCandidate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use strsim::jaro_winkler;

static NON_ALNUM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{N}\s]+").expect("valid punctuation regex"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

/// Default Jaro-Winkler threshold for the similar-name rule.
pub const DEFAULT_NAME_THRESHOLD: f64 = 0.85;

/// Default legal-entity suffixes stripped before name comparison.
pub const DEFAULT_LEGAL_SUFFIXES: &[&str] = &[
    "inc", "incorporated", "ltd", "limited", "llc", "llp", "corp", "corporation", "co",
    "company", "pt", "cv", "tbk", "gmbh", "ag", "sa", "srl", "bv", "plc", "pty", "lp",
];

/// Shortest stripped name allowed to satisfy the substring rule.
const MIN_SUBSTRING_LEN: usize = 3;
/// Phones shorter than this (in digits) never match.
const MIN_PHONE_DIGITS: usize = 8;
/// Phones compare on at most this many trailing digits.
const PHONE_TAIL_DIGITS: usize = 10;

/// Why two clients were considered duplicates, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MatchReason {
    #[serde(rename = "Same email")]
    SameEmail,
    #[serde(rename = "Same phone")]
    SamePhone,
    #[serde(rename = "Same company")]
    SameCompany,
    #[serde(rename = "Similar name")]
    SimilarName,
}

impl MatchReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SameEmail => "Same email",
            Self::SamePhone => "Same phone",
            Self::SameCompany => "Same company",
            Self::SimilarName => "Similar name",
        }
    }

    /// Returns the stronger of two reasons.
    pub fn strongest(self, other: Self) -> Self {
        self.min(other)
    }
}

impl Display for MatchReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunables for the name rule.
#[derive(Debug, Clone, PartialEq)]
pub struct ScorerConfig {
    pub name_threshold: f64,
    pub legal_suffixes: Vec<String>,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            name_threshold: DEFAULT_NAME_THRESHOLD,
            legal_suffixes: DEFAULT_LEGAL_SUFFIXES
                .iter()
                .map(|suffix| suffix.to_string())
                .collect(),
        }
    }
}

/// Deterministic multi-signal comparator.
#[derive(Debug, Clone, Default)]
pub struct SimilarityScorer {
    config: ScorerConfig,
}

impl SimilarityScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Compares two candidates and returns the first matching rule.
    pub fn score(&self, a: &MatchCandidate, b: &MatchCandidate) -> Option<MatchReason> {
        if let (Some(left), Some(right)) = (
            a.primary_email.as_deref().and_then(normalize_email),
            b.primary_email.as_deref().and_then(normalize_email),
        ) {
            if left == right {
                return Some(MatchReason::SameEmail);
            }
        }

        if let (Some(left), Some(right)) = (
            a.primary_phone.as_deref(),
            b.primary_phone.as_deref(),
        ) {
            if phones_match(left, right) {
                return Some(MatchReason::SamePhone);
            }
        }

        let left_company = normalize_company(&a.company_name);
        if !left_company.is_empty() && left_company == normalize_company(&b.company_name) {
            return Some(MatchReason::SameCompany);
        }

        if self.names_similar(&a.name, &b.name) {
            return Some(MatchReason::SimilarName);
        }
        None
    }

    /// Token-sorted Jaro-Winkler at or above the threshold, or containment
    /// of one suffix-stripped name in the other.
    pub fn names_similar(&self, left: &str, right: &str) -> bool {
        let left_tokens = self.name_tokens(left);
        let right_tokens = self.name_tokens(right);
        if left_tokens.is_empty() || right_tokens.is_empty() {
            return false;
        }

        let left_joined = sorted_joined(&left_tokens);
        let right_joined = sorted_joined(&right_tokens);
        if jaro_winkler(&left_joined, &right_joined) >= self.config.name_threshold {
            return true;
        }

        let left_plain = left_tokens.join(" ");
        let right_plain = right_tokens.join(" ");
        let (shorter, longer) = if left_plain.len() <= right_plain.len() {
            (&left_plain, &right_plain)
        } else {
            (&right_plain, &left_plain)
        };
        shorter.chars().count() >= MIN_SUBSTRING_LEN && longer.contains(shorter.as_str())
    }

    /// Normalized name tokens with legal suffixes removed.
    ///
    /// Falls back to the unstripped tokens when the name is only suffixes
    /// ("Company Ltd").
    pub fn name_tokens(&self, name: &str) -> Vec<String> {
        let tokens = tokenize(name);
        let stripped: Vec<String> = tokens
            .iter()
            .filter(|token| !self.is_legal_suffix(token))
            .cloned()
            .collect();
        if stripped.is_empty() {
            tokens
        } else {
            stripped
        }
    }

    /// Bucket keys for the blocking pass. Two candidates are only scored
    /// when they share at least one key.
    ///
    /// Names that share no whole token (single-word typos such as
    /// "Globex"/"Glibex") are not paired once blocking is active.
    pub fn blocking_keys(&self, candidate: &MatchCandidate) -> Vec<String> {
        let mut name_tokens = self.name_tokens(&candidate.name);
        name_tokens.sort();
        name_tokens.dedup();
        let mut keys = Vec::with_capacity(name_tokens.len() + 3);
        // Every token, so reordered names and containment share a bucket.
        keys.extend(name_tokens.iter().map(|token| format!("name:{token}")));
        if let Some(local) = candidate
            .primary_email
            .as_deref()
            .and_then(normalize_email)
            .and_then(|email| email.split('@').next().map(str::to_string))
            .filter(|local| !local.is_empty())
        {
            keys.push(format!("email:{local}"));
        }
        if let Some(tail) = candidate.primary_phone.as_deref().and_then(phone_tail) {
            keys.push(format!("phone:{tail}"));
        }
        let company = normalize_company(&candidate.company_name);
        if !company.is_empty() {
            keys.push(format!("company:{company}"));
        }
        keys
    }

    fn is_legal_suffix(&self, token: &str) -> bool {
        self.config
            .legal_suffixes
            .iter()
            .any(|suffix| suffix.eq_ignore_ascii_case(token))
    }
}

/// Trim + case-fold; `None` for blank input.
pub fn normalize_email(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_lowercase())
}

/// Digits-only view of a phone number.
pub fn phone_digits(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

/// True when both numbers have enough digits and agree on their shared tail.
pub fn phones_match(left: &str, right: &str) -> bool {
    let left = phone_digits(left);
    let right = phone_digits(right);
    if left.len() < MIN_PHONE_DIGITS || right.len() < MIN_PHONE_DIGITS {
        return false;
    }
    let tail = PHONE_TAIL_DIGITS.min(left.len()).min(right.len());
    left[left.len() - tail..] == right[right.len() - tail..]
}

/// Case-folded, punctuation-free, whitespace-collapsed company name.
pub fn normalize_company(value: &str) -> String {
    tokenize(value).join(" ")
}

fn phone_tail(value: &str) -> Option<String> {
    let digits = phone_digits(value);
    if digits.len() < MIN_PHONE_DIGITS {
        return None;
    }
    // Bucket on the shortest tail any match can agree on.
    Some(digits[digits.len() - MIN_PHONE_DIGITS..].to_string())
}

fn tokenize(value: &str) -> Vec<String> {
    let lowered = value.to_lowercase();
    let without_punct = NON_ALNUM_RE.replace_all(&lowered, " ");
    WHITESPACE_RE
        .split(without_punct.trim())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn sorted_joined(tokens: &[String]) -> String {
    let mut sorted = tokens.to_vec();
    sorted.sort();
    sorted.join(" ")
}

#[cfg(test)]
mod tests {
    use super::{
        normalize_company, phones_match, MatchReason, ScorerConfig, SimilarityScorer,
    };
    use crate::model::client::MatchCandidate;
    use uuid::Uuid;

    fn candidate(name: &str) -> MatchCandidate {
        MatchCandidate::named(Uuid::new_v4(), name, 0)
    }

    #[test]
    fn emails_match_after_trim_and_case_fold() {
        let scorer = SimilarityScorer::default();
        let mut a = candidate("First Person");
        let mut b = candidate("Someone Else");
        a.primary_email = Some("a@x.com".to_string());
        b.primary_email = Some("A@X.com ".to_string());
        assert_eq!(scorer.score(&a, &b), Some(MatchReason::SameEmail));
    }

    #[test]
    fn legal_suffix_names_match_as_similar() {
        let scorer = SimilarityScorer::default();
        assert_eq!(
            scorer.score(&candidate("Acme Inc"), &candidate("ACME")),
            Some(MatchReason::SimilarName)
        );
        assert_eq!(
            scorer.score(&candidate("PT Maju Jaya Tbk"), &candidate("Maju Jaya")),
            Some(MatchReason::SimilarName)
        );
    }

    #[test]
    fn unrelated_names_do_not_match() {
        let scorer = SimilarityScorer::default();
        assert_eq!(
            scorer.score(&candidate("John Doe"), &candidate("Jane Smith")),
            None
        );
    }

    #[test]
    fn email_outranks_company_and_name() {
        let scorer = SimilarityScorer::default();
        let mut a = candidate("Acme");
        let mut b = candidate("Acme");
        a.company_name = "Acme".to_string();
        b.company_name = "acme.".to_string();
        a.primary_email = Some("ops@acme.io".to_string());
        b.primary_email = Some("OPS@acme.io".to_string());
        assert_eq!(scorer.score(&a, &b), Some(MatchReason::SameEmail));
        b.primary_email = None;
        assert_eq!(scorer.score(&a, &b), Some(MatchReason::SameCompany));
    }

    #[test]
    fn phone_rule_uses_trailing_digits_and_minimum_length() {
        assert!(phones_match("+62 812-3456-7890", "0812 3456 7890"));
        assert!(!phones_match("1234567", "1234567"));
        assert!(!phones_match("+1 555 010 0001", "+1 555 010 0002"));
    }

    #[test]
    fn blank_companies_never_match() {
        let scorer = SimilarityScorer::default();
        let mut a = candidate("Zed");
        let mut b = candidate("Quill");
        a.company_name = "  ".to_string();
        b.company_name = "".to_string();
        assert_eq!(scorer.score(&a, &b), None);
        assert_eq!(normalize_company(" Foo,  Bar! "), "foo bar");
    }

    #[test]
    fn short_names_do_not_match_by_containment() {
        let scorer = SimilarityScorer::new(ScorerConfig {
            name_threshold: 0.99,
            ..ScorerConfig::default()
        });
        assert!(!scorer.names_similar("Al", "Alphabet Holdings"));
        assert!(scorer.names_similar("Globex", "Globex Holdings"));
    }

    #[test]
    fn score_is_symmetric() {
        let scorer = SimilarityScorer::default();
        let pairs = [("Acme Inc", "ACME"), ("John Doe", "Jane Smith"), ("Initech", "Initech LLC")];
        for (left, right) in pairs {
            assert_eq!(
                scorer.score(&candidate(left), &candidate(right)),
                scorer.score(&candidate(right), &candidate(left))
            );
        }
    }

    #[test]
    fn blocking_keys_cover_each_signal() {
        let scorer = SimilarityScorer::default();
        let mut a = candidate("Acme Inc");
        a.company_name = "Acme".to_string();
        a.primary_email = Some("Sales@acme.io".to_string());
        a.primary_phone = Some("+1 (555) 010-0001".to_string());
        let keys = scorer.blocking_keys(&a);
        assert!(keys.contains(&"name:acme".to_string()));
        assert!(keys.contains(&"email:sales".to_string()));
        assert!(keys.contains(&"phone:50100001".to_string()));
        assert!(keys.contains(&"company:acme".to_string()));
    }
}
