//! Utility functions for date parsing, Roman numerals, and text normalization.
//!
//! This module provides helper functions used throughout the application:
//! - Flexible calendar-date parsing for CLI input and blog index rows
//! - Roman numeral conversion for volume tokens on storefront result titles
//! - NFKC folding for full-width blog text
//! - Image filename helpers for downloaded covers

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::error::{ScrapeError, ScrapeResult};

static FLEXIBLE_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<year>[0-9]{4})[-/.](?P<month>[0-9]{1,2})[-/.]?(?P<day>[0-9]{0,2})").unwrap()
});

static ROMAN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^M{0,3}(CM|CD|D?C{0,3})(XC|XL|L?X{0,3})(IX|IV|V?I{0,3})$").unwrap());

static IMAGE_EXT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.([A-Za-z0-9]+)$").unwrap());

const ROMAN_VALUES: [(char, u32); 7] = [
    ('I', 1),
    ('V', 5),
    ('X', 10),
    ('L', 50),
    ('C', 100),
    ('D', 500),
    ('M', 1000),
];

/// Parse a date string of the form `YYYY-MM-DD`, `YYYY/MM/DD` or `YYYY.MM.DD`.
///
/// The day component may be omitted (`"2022-11"`), in which case it defaults
/// to the first of the month. Anything that does not lead with a four-digit
/// year is rejected.
///
/// # Arguments
///
/// * `value` - The date string to parse
///
/// # Returns
///
/// The parsed [`NaiveDate`], or `ScrapeError::Structure` when the string does
/// not follow the year-first layout or names an impossible calendar date.
pub fn parse_flexible_date(value: &str) -> ScrapeResult<NaiveDate> {
    let caps = FLEXIBLE_DATE_RE
        .captures(value.trim())
        .ok_or_else(|| ScrapeError::Structure(format!("unrecognized date string: {value}")))?;

    let year = caps["year"].parse::<i32>().ok();
    let month = caps["month"].parse::<u32>().ok();
    let day = if caps["day"].is_empty() {
        Some(1)
    } else {
        caps["day"].parse::<u32>().ok()
    };

    match (year, month, day) {
        (Some(y), Some(m), Some(d)) => NaiveDate::from_ymd_opt(y, m, d)
            .ok_or_else(|| ScrapeError::Structure(format!("impossible calendar date: {value}"))),
        _ => Err(ScrapeError::Structure(format!(
            "unrecognized date string: {value}"
        ))),
    }
}

/// Convert a Roman numeral to its integer value.
///
/// Storefront result titles occasionally number volumes in Roman numerals
/// ("Berserk Deluxe Volume XIV"). Input is validated against the standard
/// numeral grammar first, so strings like `"IIX"` or `"2022"` return `None`.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(roman_to_int("XIV"), Some(14));
/// assert_eq!(roman_to_int("IX"), Some(9));
/// assert_eq!(roman_to_int("spy"), None);
/// ```
pub fn roman_to_int(value: &str) -> Option<u32> {
    if value.is_empty() || !ROMAN_RE.is_match(value) {
        return None;
    }
    let mut total = 0u32;
    let mut prev = 0u32;
    for ch in value.chars().rev() {
        let val = ROMAN_VALUES.iter().find(|(c, _)| *c == ch).map(|(_, v)| *v)?;
        if val < prev {
            total -= val;
        } else {
            total += val;
            prev = val;
        }
    }
    Some(total)
}

/// Parse a volume token: Roman numerals first, plain integers second.
pub fn parse_volume_token(token: &str) -> Option<u32> {
    roman_to_int(token).or_else(|| token.parse().ok())
}

/// NFKC-fold a line of blog text and trim surrounding whitespace.
///
/// The blog source pads its entry rows with full-width digits and
/// non-breaking spaces; NFKC folds both into their ASCII forms so the
/// downstream regexes only deal with one alphabet.
pub fn normalize_text(line: &str) -> String {
    line.nfkc().collect::<String>().trim().to_string()
}

/// File extension for a downloaded cover, taken from the URL tail.
///
/// Falls back to `"jpg"` when the URL does not end in a recognizable
/// extension (query strings, opaque CDN paths).
pub fn image_extension(url: &str) -> &str {
    IMAGE_EXT_RE
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or("jpg")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_date() {
        let date = parse_flexible_date("2022-11-11").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2022, 11, 11).unwrap());
    }

    #[test]
    fn test_parse_date_without_day_defaults_to_first() {
        let date = parse_flexible_date("2022-11").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2022, 11, 1).unwrap());
    }

    #[test]
    fn test_parse_dotted_date() {
        let date = parse_flexible_date("2022.10.4").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2022, 10, 4).unwrap());
    }

    #[test]
    fn test_day_first_date_is_rejected() {
        assert!(parse_flexible_date("11-11-2022").is_err());
    }

    #[test]
    fn test_impossible_date_is_rejected() {
        assert!(parse_flexible_date("2022-13-01").is_err());
    }

    #[test]
    fn test_roman_to_int() {
        assert_eq!(roman_to_int("XIV"), Some(14));
        assert_eq!(roman_to_int("IX"), Some(9));
        assert_eq!(roman_to_int("MCMXCIV"), Some(1994));
    }

    #[test]
    fn test_roman_rejects_invalid_sequences() {
        assert_eq!(roman_to_int("IIX"), None);
        assert_eq!(roman_to_int(""), None);
        assert_eq!(roman_to_int("spy"), None);
    }

    #[test]
    fn test_volume_token_falls_through_to_integers() {
        assert_eq!(parse_volume_token("XIV"), Some(14));
        assert_eq!(parse_volume_token("12"), Some(12));
        assert_eq!(parse_volume_token("n/a"), None);
    }

    #[test]
    fn test_normalize_folds_full_width_text() {
        assert_eq!(normalize_text("ＳＰＹ×ＦＡＭＩＬＹ　１０ "), "SPY×FAMILY 10");
        assert_eq!(normalize_text("  9784088831275\u{a0}"), "9784088831275");
    }

    #[test]
    fn test_image_extension() {
        assert_eq!(image_extension("https://cdn.example.com/covers/abc.png"), "png");
        assert_eq!(image_extension("https://cdn.example.com/covers/abc"), "jpg");
        assert_eq!(image_extension("https://m.media-amazon.com/I/81x._SX342_.jpg"), "jpg");
    }
}
