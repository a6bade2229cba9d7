//! Text-type classification used by header detection.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Coarse type of a cell's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellKind {
    Empty,
    /// Amounts, counts, percentages.
    Numeric,
    /// Period or date labels (`1限`, `4月`, `月曜`, `4/1`, `Q2`, `Mon`).
    Period,
    /// Short non-numeric text.
    Label,
    /// Longer free text.
    Text,
}

impl CellKind {
    pub fn is_header_like(self) -> bool {
        matches!(self, CellKind::Period | CellKind::Label)
    }
}

static NUMERIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+\-−]?[¥$€£]?\s?[+\-−]?\d[\d,]*(\.\d+)?\s?(円|%|％|yen)?$")
        .expect("Numeric cell regex pattern is valid and should compile")
});

static PERIOD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^(",
        r"\d{1,2}\s?(限|時間目|時限|校時|時|月|日|週|年度?)",
        r"|第\s?\d{1,2}\s?(限|時限|週|回)",
        r"|\d{4}\s?年(\s?\d{1,2}\s?月(\s?\d{1,2}\s?日)?)?",
        r"|\d{1,2}\s?月\s?\d{1,2}\s?日",
        r"|\d{1,4}[/\-]\d{1,2}([/\-]\d{1,4})?",
        r"|[月火水木金土日]\s?(曜日?)?",
        r"|\(?[月火水木金土日]\)?",
        r"|[Qq][1-4]",
        r"|(?i:mon|tue|wed|thu|fri|sat|sun)(?i:day|sday|nesday|rsday|urday)?\.?",
        r"|(?i:jan(uary)?|feb(ruary)?|mar(ch)?|apr(il)?|may|june?|july?|aug(ust)?|sep(t(ember)?)?|oct(ober)?|nov(ember)?|dec(ember)?)\.?",
        r"|(?i:period|week)\s?\d{1,2}",
        r")$"
    ))
    .expect("Period label regex pattern is valid and should compile")
});

/// Classify `text`; labels up to `short_label_chars` characters are [`CellKind::Label`].
pub fn classify(text: &str, short_label_chars: usize) -> CellKind {
    let text = text.trim();
    if text.is_empty() {
        return CellKind::Empty;
    }
    if PERIOD.is_match(text) {
        return CellKind::Period;
    }
    if NUMERIC.is_match(text) {
        return CellKind::Numeric;
    }
    if text.chars().count() <= short_label_chars {
        CellKind::Label
    } else {
        CellKind::Text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric() {
        for text in ["198", "¥1,200", "1,500円", "12.5%", "-3", "$ 4.99"] {
            assert_eq!(classify(text, 12), CellKind::Numeric, "{text}");
        }
    }

    #[test]
    fn test_period() {
        for text in ["1限", "2時間目", "4月", "月曜日", "火", "4/1", "2024年4月", "Q3", "Monday", "Jan", "第3週"] {
            assert_eq!(classify(text, 12), CellKind::Period, "{text}");
        }
    }

    #[test]
    fn test_label_and_text() {
        assert_eq!(classify("品名", 12), CellKind::Label);
        assert_eq!(classify("国語", 12), CellKind::Label);
        assert_eq!(
            classify("持ち物: 体操服と上履きを忘れずに持ってきてください", 12),
            CellKind::Text
        );
        assert_eq!(classify("   ", 12), CellKind::Empty);
        assert!(CellKind::Label.is_header_like());
        assert!(!CellKind::Numeric.is_header_like());
    }
}
