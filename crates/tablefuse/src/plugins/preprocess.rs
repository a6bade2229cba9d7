//! Domain-specific cell preprocessing.
//!
//! Domain detection is a pure keyword function over the consolidated cell
//! texts; processor selection is a lookup in an explicitly constructed
//! [`PreprocessorRegistry`](super::registry::PreprocessorRegistry).
//! Preprocessors only normalize text. They never add, drop, or move cells.

use crate::consolidate::SsotCell;
use crate::plugins::Plugin;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use unicode_normalization::UnicodeNormalization;

/// Document domain a table belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainTag {
    Receipt,
    SchoolNotice,
    Generic,
}

impl DomainTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainTag::Receipt => "receipt",
            DomainTag::SchoolNotice => "school_notice",
            DomainTag::Generic => "generic",
        }
    }
}

impl fmt::Display for DomainTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainTag {
    type Err = crate::TableFuseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "receipt" => Ok(DomainTag::Receipt),
            "school_notice" | "school" => Ok(DomainTag::SchoolNotice),
            "generic" => Ok(DomainTag::Generic),
            other => Err(crate::TableFuseError::validation(format!("Unknown domain '{}'", other))),
        }
    }
}

const RECEIPT_KEYWORDS: &[&str] = &[
    "合計", "小計", "税込", "税抜", "消費税", "領収", "お釣", "receipt", "subtotal", "total", "tax", "change due",
];

const SCHOOL_KEYWORDS: &[&str] = &[
    "時間割", "限", "学年", "給食", "献立", "行事", "持ち物", "school", "period", "homework", "grade", "class",
];

/// Classify a table by keyword hits over its cell texts.
///
/// The domain with the most hits wins; ties and zero hits yield `Generic`.
pub fn detect_domain<'a, I>(texts: I) -> DomainTag
where
    I: IntoIterator<Item = &'a str>,
{
    let mut receipt = 0usize;
    let mut school = 0usize;

    for text in texts {
        let lowered = text.to_lowercase();
        receipt += RECEIPT_KEYWORDS.iter().filter(|k| lowered.contains(*k)).count();
        school += SCHOOL_KEYWORDS.iter().filter(|k| lowered.contains(*k)).count();
    }

    match receipt.cmp(&school) {
        std::cmp::Ordering::Greater => DomainTag::Receipt,
        std::cmp::Ordering::Less => DomainTag::SchoolNotice,
        std::cmp::Ordering::Equal => DomainTag::Generic,
    }
}

/// Trait for domain preprocessors.
pub trait Preprocessor: Plugin {
    /// Domain this processor is registered under.
    fn domain(&self) -> DomainTag;

    /// Normalize cell texts. Must return the same cells in the same order.
    fn preprocess(&self, cells: Vec<SsotCell>) -> Vec<SsotCell>;
}

static WHITESPACE_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("Whitespace regex pattern is valid and should compile"));
static SPLIT_CURRENCY_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([¥$€£])\s+(\d)").expect("Currency prefix regex pattern is valid and should compile")
});
static SPLIT_CURRENCY_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d)\s+(円|yen)").expect("Currency suffix regex pattern is valid and should compile")
});
static SPACED_THOUSANDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d)\s*,\s+(\d{3})|(\d)\s+,\s*(\d{3})")
        .expect("Thousands separator regex pattern is valid and should compile")
});
static SPACED_PERIOD_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+)\s+(限|時間目|校時|年|組|月|日)").expect("Period label regex pattern is valid and should compile")
});

fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RUN.replace_all(text.trim(), " ").into_owned()
}

fn map_texts(cells: Vec<SsotCell>, f: impl Fn(&str) -> String) -> Vec<SsotCell> {
    cells
        .into_iter()
        .map(|mut cell| {
            if !cell.text.is_empty() {
                cell.text = f(&cell.text);
            }
            cell
        })
        .collect()
}

/// Whitespace normalization only.
pub struct GenericPreprocessor;

impl Plugin for GenericPreprocessor {
    fn name(&self) -> &str {
        "generic-preprocessor"
    }

    fn version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }
}

impl Preprocessor for GenericPreprocessor {
    fn domain(&self) -> DomainTag {
        DomainTag::Generic
    }

    fn preprocess(&self, cells: Vec<SsotCell>) -> Vec<SsotCell> {
        map_texts(cells, collapse_whitespace)
    }
}

/// Width normalization plus re-joining of amounts split by OCR.
pub struct ReceiptPreprocessor;

impl Plugin for ReceiptPreprocessor {
    fn name(&self) -> &str {
        "receipt-preprocessor"
    }

    fn version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }
}

impl Preprocessor for ReceiptPreprocessor {
    fn domain(&self) -> DomainTag {
        DomainTag::Receipt
    }

    fn preprocess(&self, cells: Vec<SsotCell>) -> Vec<SsotCell> {
        map_texts(cells, |text| {
            let normalized: String = text.nfkc().collect();
            let normalized = collapse_whitespace(&normalized);
            let normalized = SPLIT_CURRENCY_PREFIX.replace_all(&normalized, "$1$2");
            let normalized = SPLIT_CURRENCY_SUFFIX.replace_all(&normalized, "$1$2");
            SPACED_THOUSANDS.replace_all(&normalized, "$1$3,$2$4").into_owned()
        })
    }
}

/// Width normalization plus collapsing of spaced period labels (`1 限` → `1限`).
pub struct SchoolNoticePreprocessor;

impl Plugin for SchoolNoticePreprocessor {
    fn name(&self) -> &str {
        "school-notice-preprocessor"
    }

    fn version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }
}

impl Preprocessor for SchoolNoticePreprocessor {
    fn domain(&self) -> DomainTag {
        DomainTag::SchoolNotice
    }

    fn preprocess(&self, cells: Vec<SsotCell>) -> Vec<SsotCell> {
        map_texts(cells, |text| {
            let normalized: String = text.nfkc().collect();
            let normalized = collapse_whitespace(&normalized);
            SPACED_PERIOD_LABEL.replace_all(&normalized, "$1$2").into_owned()
        })
    }
}
