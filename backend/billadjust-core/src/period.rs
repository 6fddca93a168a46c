// src/period.rs
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};

// Month vocabulary, longest spellings first so the alternation never stops
// on a prefix ("Mars" before "Mar", "Juillet" before "Juil" before "Jul").
// A month word must be followed by a non-letter, so every accepted
// abbreviation is listed explicitly ("Sept", "Janv").
const MONTH_WORDS: &[(&str, u32)] = &[
    ("septembre", 9),
    ("september", 9),
    ("novembre", 11),
    ("décembre", 12),
    ("decembre", 12),
    ("february", 2),
    ("november", 11),
    ("december", 12),
    ("janvier", 1),
    ("février", 2),
    ("fevrier", 2),
    ("juillet", 7),
    ("octobre", 10),
    ("january", 1),
    ("october", 10),
    ("avril", 4),
    ("march", 3),
    ("april", 4),
    ("august", 8),
    ("mars", 3),
    ("juin", 6),
    ("août", 8),
    ("aout", 8),
    ("june", 6),
    ("july", 7),
    ("janv", 1),
    ("févr", 2),
    ("fevr", 2),
    ("juil", 7),
    ("sept", 9),
    ("aoû", 8),
    ("mai", 5),
    ("jan", 1),
    ("feb", 2),
    ("fév", 2),
    ("mar", 3),
    ("apr", 4),
    ("avr", 4),
    ("may", 5),
    ("jun", 6),
    ("jul", 7),
    ("aug", 8),
    ("sep", 9),
    ("oct", 10),
    ("nov", 11),
    ("dec", 12),
    ("déc", 12),
];

const ENGLISH_ABBREVIATIONS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

static PERIOD_PATTERN: Lazy<Regex> = Lazy::new(|| {
    let words: Vec<&str> = MONTH_WORDS.iter().map(|(word, _)| *word).collect();
    let pattern = format!(
        r"(?i)(?:^|[^\p{{L}}])({})(?:[^\p{{L}}\d][^\d]*)?(\d{{4}}|\d{{2}})",
        words.join("|")
    );
    Regex::new(&pattern).expect("month vocabulary pattern is valid")
});

/// The (month, year) a budget extract is forecast for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetPeriod {
    pub month: u32,
    pub year: i32,
}

impl BudgetPeriod {
    /// Parses a filename-like label such as `"Heures IBM Mai 25.xlsx"`.
    pub fn parse(label: &str) -> EngineResult<Self> {
        let captures = PERIOD_PATTERN
            .captures(label)
            .ok_or_else(|| EngineError::PeriodNotRecognized {
                label: label.to_string(),
            })?;

        let word = captures[1].to_lowercase();
        let month = MONTH_WORDS
            .iter()
            .find(|(candidate, _)| *candidate == word)
            .map(|(_, month)| *month)
            .ok_or_else(|| EngineError::PeriodNotRecognized {
                label: label.to_string(),
            })?;

        let digits = &captures[2];
        let raw_year: i32 = digits.parse().map_err(|_| EngineError::PeriodNotRecognized {
            label: label.to_string(),
        })?;
        let year = if digits.len() == 2 { 2000 + raw_year } else { raw_year };

        let period = Self { month, year };
        info!("Budget period {} parsed from '{}'", period, label);
        Ok(period)
    }

    pub fn english_abbreviation(&self) -> &'static str {
        ENGLISH_ABBREVIATIONS[(self.month as usize).saturating_sub(1) % 12]
    }

    pub fn two_digit_year(&self) -> String {
        format!("{:02}", self.year.rem_euclid(100))
    }

    /// True for a budget header like `"May 24 Forecasts"`.
    pub fn matches_forecast_header(&self, header: &str) -> bool {
        let lowered = header.to_lowercase();
        let matches = lowered.contains("forecast")
            && lowered.contains(&self.english_abbreviation().to_lowercase())
            && lowered.contains(&self.two_digit_year());
        if matches {
            debug!("Header '{}' matches forecast period {}", header, self);
        }
        matches
    }

    /// Index of the first header matching this period's forecast column.
    pub fn find_forecast_column(&self, headers: &[String]) -> Option<usize> {
        headers.iter().position(|h| self.matches_forecast_header(h))
    }
}

impl fmt::Display for BudgetPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.english_abbreviation(), self.year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(month: u32, year: i32) -> BudgetPeriod {
        BudgetPeriod { month, year }
    }

    #[test]
    fn parses_french_month_and_two_digit_year() {
        assert_eq!(BudgetPeriod::parse("Heures IBM Mai 25.xlsx").unwrap(), p(5, 2025));
        assert_eq!(BudgetPeriod::parse("IBM Heures Février 2024.xlsx").unwrap(), p(2, 2024));
        assert_eq!(BudgetPeriod::parse("heures_aout_24.csv").unwrap(), p(8, 2024));
    }

    #[test]
    fn parses_english_names_and_abbreviations() {
        assert_eq!(
            BudgetPeriod::parse("DTT IMT France MAFE Report - March 2024").unwrap(),
            p(3, 2024)
        );
        assert_eq!(BudgetPeriod::parse("IBM Jul-23").unwrap(), p(7, 2023));
        assert_eq!(BudgetPeriod::parse("IBM Dec2024").unwrap(), p(12, 2024));
    }

    #[test]
    fn prefers_full_month_over_prefix() {
        assert_eq!(BudgetPeriod::parse("Juillet 2024").unwrap(), p(7, 2024));
        assert_eq!(BudgetPeriod::parse("Mars 24").unwrap(), p(3, 2024));
    }

    #[test]
    fn parses_french_abbreviations() {
        assert_eq!(BudgetPeriod::parse("Heures IBM Janv 24.xlsx").unwrap(), p(1, 2024));
        assert_eq!(BudgetPeriod::parse("Heures IBM Févr 2024.xlsx").unwrap(), p(2, 2024));
        assert_eq!(BudgetPeriod::parse("heures_fevr_25.csv").unwrap(), p(2, 2025));
        assert_eq!(BudgetPeriod::parse("Heures IBM Avr. 24").unwrap(), p(4, 2024));
        assert_eq!(BudgetPeriod::parse("Heures IBM Juil 24.xlsx").unwrap(), p(7, 2024));
        assert_eq!(BudgetPeriod::parse("Heures IBM Aoû 24").unwrap(), p(8, 2024));
        assert_eq!(BudgetPeriod::parse("Heures IBM Sept 2024.xlsx").unwrap(), p(9, 2024));
        assert_eq!(BudgetPeriod::parse("Heures IBM Déc. 2023").unwrap(), p(12, 2023));
    }

    #[test]
    fn month_inside_a_word_is_ignored() {
        assert_eq!(BudgetPeriod::parse("Summary Juin 24").unwrap(), p(6, 2024));
        assert!(BudgetPeriod::parse("Marseille 24").is_err());
    }

    #[test]
    fn unrecognized_label_is_fatal() {
        let err = BudgetPeriod::parse("Heures IBM.xlsx").unwrap_err();
        match err {
            EngineError::PeriodNotRecognized { label } => assert_eq!(label, "Heures IBM.xlsx"),
            other => panic!("Wrong error type returned: {:?}", other),
        }
    }

    #[test]
    fn forecast_header_matching() {
        let period = p(5, 2024);
        let headers = vec![
            "Country".to_string(),
            "Customer Name".to_string(),
            "Apr 24 Forecasts".to_string(),
            "May 24 Actuals".to_string(),
            "May 24 Forecasts".to_string(),
            "May 25 Forecasts".to_string(),
        ];
        assert_eq!(period.find_forecast_column(&headers), Some(4));
        assert_eq!(p(1, 2030).find_forecast_column(&headers), None);
    }
}
