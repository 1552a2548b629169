//! Field normalization shared by every strategy.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

pub fn pattern(re: &str) -> Option<Regex> {
    Regex::new(re)
        .map_err(|e| tracing::error!(pattern = re, error = %e, "Invalid built-in pattern"))
        .ok()
}

static NUMBER: LazyLock<Option<Regex>> = LazyLock::new(|| pattern(r"\d+(?:[.,]\d+)?"));
static PAGES: LazyLock<Option<Regex>> =
    LazyLock::new(|| pattern(r"(?i)(\d[\d,]*)\s*(?:pages|pp\.?|p\.|seiten|páginas)"));
static INTEGER: LazyLock<Option<Regex>> = LazyLock::new(|| pattern(r"\d[\d,]*"));
static MONTH_DATE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    pattern(
        r"(?i)\b(jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})\b",
    )
});
static DAY_MONTH_DATE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    pattern(
        r"(?i)\b(\d{1,2})\s+(jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.?,?\s+(\d{4})\b",
    )
});
static MONTH_YEAR: LazyLock<Option<Regex>> = LazyLock::new(|| {
    pattern(r"(?i)\b(jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.?,?\s+(\d{4})\b")
});
static ISO_DATE: LazyLock<Option<Regex>> =
    LazyLock::new(|| pattern(r"\b(\d{4})-(\d{1,2})-(\d{1,2})"));
static ISBN_LABEL: LazyLock<Option<Regex>> =
    LazyLock::new(|| pattern(r"(?i)isbn(?:-?1[03])?\s*:?"));
static YEAR: LazyLock<Option<Regex>> = LazyLock::new(|| pattern(r"\b(1[5-9]\d{2}|20\d{2})\b"));

/// Collapses runs of whitespace and drops control characters.
pub fn clean_text(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| word.chars().filter(|c| !c.is_control()).collect::<String>())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strips a leading "by" from author bylines.
pub fn clean_author(raw: &str) -> Option<String> {
    let text = clean_text(raw);
    let text = text
        .strip_prefix("by ")
        .or_else(|| text.strip_prefix("By "))
        .unwrap_or(&text)
        .trim_matches(|c: char| c == ',' || c == '(' || c == ')' || c.is_whitespace());
    if text.is_empty() || text.len() >= 100 {
        return None;
    }
    Some(text.to_string())
}

/// Normalizes an ISBN-10 or ISBN-13 to its digits, validating the checksum.
///
/// Accepts labelled values ("ISBN-13: 978-...") and lists of several ISBNs,
/// in which case the first valid one wins.
pub fn normalize_isbn(raw: &str) -> Option<String> {
    let unlabelled = match ISBN_LABEL.as_ref() {
        Some(re) => re.replace_all(raw, " ").into_owned(),
        None => raw.to_string(),
    };
    checked_isbn(&unlabelled).or_else(|| {
        unlabelled
            .split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '/' | '(' | ')'))
            .find_map(checked_isbn)
    })
}

fn checked_isbn(raw: &str) -> Option<String> {
    let candidate: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == 'X' || *c == 'x')
        .map(|c| c.to_ascii_uppercase())
        .collect();

    match candidate.len() {
        13 if candidate.chars().all(|c| c.is_ascii_digit()) => {
            let sum: u32 = candidate
                .chars()
                .filter_map(|c| c.to_digit(10))
                .enumerate()
                .map(|(i, d)| if i % 2 == 0 { d } else { d * 3 })
                .sum();
            (sum % 10 == 0).then_some(candidate)
        }
        10 => {
            let mut sum = 0;
            for (i, c) in candidate.chars().enumerate() {
                let value = match c {
                    'X' if i == 9 => 10,
                    _ => c.to_digit(10)?,
                };
                sum += value * (10 - i as u32);
            }
            (sum % 11 == 0).then_some(candidate)
        }
        _ => None,
    }
}

/// First number in the text, accepted when it is a 0-5 rating.
pub fn parse_rating(raw: &str) -> Option<f64> {
    let found = NUMBER.as_ref()?.find(raw)?;
    let value: f64 = found.as_str().replace(',', ".").parse().ok()?;
    (0.0..=5.0).contains(&value).then_some(value)
}

/// Positive page count, preferring a number followed by "pages".
pub fn parse_page_count(raw: &str) -> Option<u32> {
    let digits = PAGES
        .as_ref()
        .and_then(|re| re.captures(raw))
        .and_then(|caps| caps.get(1))
        .or_else(|| INTEGER.as_ref().and_then(|re| re.find(raw)))?;
    let value: u32 = digits.as_str().replace(',', "").parse().ok()?;
    (value > 0).then_some(value)
}

fn month_number(name: &str) -> Option<u32> {
    let month = match name.get(..3)?.to_ascii_lowercase().as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// Finds a publication date anywhere in the text.
///
/// Full dates win over month-year, which wins over a bare year; partial dates
/// fall on the first day of the period.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let text = raw.trim();

    if let Some(caps) = ISO_DATE.as_ref().and_then(|re| re.captures(text)) {
        let date = NaiveDate::from_ymd_opt(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
        );
        if date.is_some() {
            return date;
        }
    }
    if let Some(caps) = MONTH_DATE.as_ref().and_then(|re| re.captures(text))
        && let Some(date) = NaiveDate::from_ymd_opt(
            caps[3].parse().ok()?,
            month_number(&caps[1])?,
            caps[2].parse().ok()?,
        )
    {
        return Some(date);
    }
    if let Some(caps) = DAY_MONTH_DATE.as_ref().and_then(|re| re.captures(text))
        && let Some(date) = NaiveDate::from_ymd_opt(
            caps[3].parse().ok()?,
            month_number(&caps[2])?,
            caps[1].parse().ok()?,
        )
    {
        return Some(date);
    }
    if let Some(caps) = MONTH_YEAR.as_ref().and_then(|re| re.captures(text)) {
        return NaiveDate::from_ymd_opt(caps[2].parse().ok()?, month_number(&caps[1])?, 1);
    }
    let caps = YEAR.as_ref()?.captures(text)?;
    NaiveDate::from_ymd_opt(caps[1].parse().ok()?, 1, 1)
}
