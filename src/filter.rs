use crate::markup::{decode_html_entities, remove_markup};
use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\s)\s+").unwrap());

/// Inclusive range of Unicode scalar values.
pub type CharRange = (u32, u32);

#[derive(Debug, Clone)]
pub struct FilterOptions {
    pub remove_html: bool,
    pub valid_ranges: Vec<CharRange>,
    pub invalid_ranges: Vec<CharRange>,
    pub collapse_whitespace: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            remove_html: true,
            valid_ranges: Vec::new(),
            invalid_ranges: Vec::new(),
            collapse_whitespace: false,
        }
    }
}

/// Article body filter: strips markup and disallowed characters.
///
/// Each worker owns its own instance; the filter holds nothing but its options.
#[derive(Debug, Clone, Default)]
pub struct WikiTextFilter {
    options: FilterOptions,
}

impl WikiTextFilter {
    pub fn new(options: FilterOptions) -> Self {
        Self { options }
    }

    /// Applies the filter until the output is stable, so `normalize` is idempotent.
    pub fn normalize(&self, text: &str) -> String {
        let mut current = self.normalize_once(text);
        // a pass that changes the text shortens it, so the input length bounds the passes
        for _ in 0..text.len() {
            let next = self.normalize_once(&current);
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    fn normalize_once(&self, text: &str) -> String {
        let text = if self.options.remove_html {
            decode_html_entities(text)
        } else {
            text.to_string()
        };

        let text = remove_markup(&text);
        let text = self.retain_allowed(&text);

        if self.options.collapse_whitespace {
            WHITESPACE_RUN.replace_all(&text, "$1").into_owned()
        } else {
            text
        }
    }

    fn retain_allowed(&self, text: &str) -> String {
        let valid = &self.options.valid_ranges;
        let invalid = &self.options.invalid_ranges;

        if valid.is_empty() && invalid.is_empty() {
            return text.to_string();
        }

        text.chars()
            .filter(|&c| valid.is_empty() || in_ranges(c, valid))
            .filter(|&c| !in_ranges(c, invalid))
            .collect()
    }
}

fn in_ranges(c: char, ranges: &[CharRange]) -> bool {
    let code = c as u32;
    ranges.iter().any(|&(lo, hi)| lo <= code && code <= hi)
}

/// UTF-8 decode that drops invalid byte sequences instead of replacing them.
pub fn decode_lossy(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(s) => s.to_string(),
        Err(_) => raw.utf8_chunks().map(|chunk| chunk.valid()).collect(),
    }
}

/// Parses a range argument such as `0x2466,0x2588` or `32,126`.
pub fn parse_range(text: &str) -> Result<CharRange> {
    let Some((lo, hi)) = text.split_once(',') else {
        bail!("Range must be two bounds separated by a comma: {text}");
    };

    let lo = parse_bound(lo)?;
    let hi = parse_bound(hi)?;
    if lo > hi {
        bail!("Range lower bound exceeds upper bound: {text}");
    }
    Ok((lo, hi))
}

fn parse_bound(text: &str) -> Result<u32> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    }
    .with_context(|| format!("Invalid range bound: {text}"))
}
