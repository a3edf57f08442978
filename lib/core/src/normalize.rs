//! Value normalization for exact matching
//!
//! Normalized values are comparison keys only; the raw value is what gets
//! embedded and written to the output.

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// Trailing tokens dropped when `strip_common_suffixes` is enabled
pub const COMMON_SUFFIXES: &[&str] = &[
    "inc", "llc", "l.l.c", "ltd", "co", "corp", "corporation", "company", "limited", "plc",
];

/// Normalization switches, applied in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeOptions {
    pub unicode_nfkc: bool,
    pub trim: bool,
    pub collapse_whitespace: bool,
    pub case_fold: bool,
    pub ampersand_to_and: bool,
    pub remove_punctuation: bool,
    pub strip_common_suffixes: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            unicode_nfkc: true,
            trim: true,
            collapse_whitespace: true,
            case_fold: true,
            ampersand_to_and: false,
            remove_punctuation: true,
            strip_common_suffixes: false,
        }
    }
}

impl NormalizeOptions {
    /// Only trim and case-fold
    pub fn minimal() -> Self {
        Self {
            unicode_nfkc: false,
            trim: true,
            collapse_whitespace: false,
            case_fold: true,
            ampersand_to_and: false,
            remove_punctuation: false,
            strip_common_suffixes: false,
        }
    }
}

/// Comparison key derived from a row's raw value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NormalizedValue(String);

impl NormalizedValue {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub fn normalize(raw: &str, opts: &NormalizeOptions) -> NormalizedValue {
    let mut out: String = if opts.unicode_nfkc {
        raw.nfkc().collect()
    } else {
        raw.to_string()
    };

    if opts.trim {
        out = out.trim().to_string();
    }
    if opts.collapse_whitespace {
        out = collapse_whitespace(&out);
    }
    if opts.case_fold {
        out = out.to_lowercase();
    }
    if opts.ampersand_to_and {
        out = out.replace('&', " and ");
    }
    if opts.remove_punctuation {
        out = out
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '_' || c.is_whitespace() { c } else { ' ' })
            .collect();
        if opts.collapse_whitespace {
            out = collapse_whitespace(&out).trim().to_string();
        }
    }
    if opts.strip_common_suffixes {
        let mut tokens: Vec<&str> = out.split_whitespace().collect();
        while tokens
            .last()
            .is_some_and(|t| COMMON_SUFFIXES.contains(&t.trim_end_matches('.')))
        {
            tokens.pop();
        }
        out = tokens.join(" ");
    }

    NormalizedValue(out)
}

fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_ws = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !in_ws {
                out.push(' ');
            }
            in_ws = true;
        } else {
            out.push(ch);
            in_ws = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(s: &str) -> String {
        normalize(s, &NormalizeOptions::default()).as_str().to_string()
    }

    #[test]
    fn test_trim_and_case_fold() {
        assert_eq!(norm("  Acme Inc "), "acme inc");
        assert_eq!(norm("acme inc"), norm("ACME   INC"));
    }

    #[test]
    fn test_punctuation_removed() {
        assert_eq!(norm("Acme, Inc."), "acme inc");
        assert_eq!(norm("O'Brien-Smith"), "o brien smith");
    }

    #[test]
    fn test_nfkc_folds_compatibility_forms() {
        // full-width latin letters
        assert_eq!(norm("ＡＣＭＥ"), "acme");
    }

    #[test]
    fn test_minimal_keeps_punctuation() {
        let n = normalize(" Acme, Inc. ", &NormalizeOptions::minimal());
        assert_eq!(n.as_str(), "acme, inc.");
    }

    #[test]
    fn test_suffix_stripping() {
        let opts = NormalizeOptions {
            strip_common_suffixes: true,
            ..NormalizeOptions::default()
        };
        assert_eq!(normalize("Acme Corp.", &opts).as_str(), "acme");
        assert_eq!(normalize("Acme Holdings Co Ltd", &opts).as_str(), "acme holdings");
        assert!(normalize("Inc", &opts).is_empty());
    }

    #[test]
    fn test_ampersand() {
        let opts = NormalizeOptions {
            ampersand_to_and: true,
            ..NormalizeOptions::default()
        };
        assert_eq!(normalize("Smith & Sons", &opts).as_str(), "smith and sons");
    }

    #[test]
    fn test_blank_is_empty() {
        assert!(normalize("   ", &NormalizeOptions::default()).is_empty());
        assert!(normalize("...", &NormalizeOptions::default()).is_empty());
    }
}
