//! Pure filename heuristics shared by the extractor and the detector.
//!
//! Nothing here touches the filesystem. All functions operate on names (or
//! stems) only, so their behaviour can be tested in isolation.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

fn backup_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:[\s\-_.]+(?:copy|backup|old|bak)|\s*\(\d+\))$").expect("static regex")
    })
}

fn digit_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("static regex"))
}

/// Split `name` into `(stem, extension)`. Dotfiles keep their full name as stem.
pub fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => (&name[..idx], &name[idx + 1..]),
        _ => (name, ""),
    }
}

/// Strip trailing backup markers (`copy`, `backup`, `old`, `bak`, `(1)`)
/// repeatedly. Returns the remaining base and whether anything was removed.
pub fn strip_backup_suffix(stem: &str) -> (String, bool) {
    let re = backup_suffix_re();
    let mut current = stem.trim().to_string();
    let mut stripped = false;

    loop {
        let next = re.replace(&current, "").trim().to_string();
        if next == current || next.is_empty() {
            break;
        }
        current = next;
        stripped = true;
    }

    (current, stripped)
}

/// Key used to compare names for duplicate detection: backup markers removed,
/// lowercased, separators collapsed to single spaces.
pub fn normalize_stem(stem: &str) -> String {
    let (base, _) = strip_backup_suffix(stem);
    base.to_lowercase()
        .split(|c: char| c == '_' || c == '-' || c == '.' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether the stem carries any backup-ish word, suffix or not.
pub fn has_backup_marker(stem: &str) -> bool {
    let lower = stem.to_lowercase();
    ["copy", "backup", "old", "bak"]
        .iter()
        .any(|word| contains_word(&lower, word))
        || strip_backup_suffix(stem).1
}

/// Whether `word` occurs in `haystack` bounded by non-alphanumerics.
pub fn contains_word(haystack: &str, word: &str) -> bool {
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|token| token == word)
}

/// Series key for a filename: the last numeric run becomes `#`, everything
/// else stays literal. `img_7.png` → `("img_#.png", 7)`.
pub fn series_key(name: &str) -> Option<(String, u64)> {
    let (stem, ext) = split_name(name);
    let last = digit_run_re().find_iter(stem).last()?;
    let number: u64 = last.as_str().parse().ok()?;

    let mut pattern = String::with_capacity(name.len());
    pattern.push_str(&stem[..last.start()]);
    pattern.push('#');
    pattern.push_str(&stem[last.end()..]);
    if !ext.is_empty() {
        pattern.push('.');
        pattern.push_str(&ext.to_lowercase());
    }
    Some((pattern, number))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingStyle {
    Snake,
    Kebab,
    Camel,
    Pascal,
    Spaced,
    Lower,
    Upper,
    Mixed,
}

/// Classify a stem's naming convention. Digits are ignored so that
/// `img_001` and `img_abc` share a style.
pub fn naming_style(stem: &str) -> NamingStyle {
    let letters: String = stem.chars().filter(|c| !c.is_ascii_digit()).collect();
    let has_underscore = letters.contains('_');
    let has_dash = letters.contains('-');
    let has_space = letters.contains(' ');
    let separators = [has_underscore, has_dash, has_space]
        .iter()
        .filter(|b| **b)
        .count();

    if separators > 1 {
        return NamingStyle::Mixed;
    }
    if has_underscore {
        return NamingStyle::Snake;
    }
    if has_dash {
        return NamingStyle::Kebab;
    }
    if has_space {
        return NamingStyle::Spaced;
    }

    let alpha: Vec<char> = letters.chars().filter(|c| c.is_alphabetic()).collect();
    if alpha.is_empty() {
        return NamingStyle::Lower;
    }
    let has_upper = alpha.iter().any(|c| c.is_uppercase());
    let has_lower = alpha.iter().any(|c| c.is_lowercase());

    match (has_upper, has_lower) {
        (false, _) => NamingStyle::Lower,
        (true, false) => NamingStyle::Upper,
        (true, true) => {
            if alpha[0].is_uppercase() {
                NamingStyle::Pascal
            } else {
                NamingStyle::Camel
            }
        }
    }
}

/// Token-level Jaccard similarity of two normalized stems, `0..=100`.
pub fn name_similarity(a: &str, b: &str) -> u8 {
    let left: ahash::AHashSet<&str> = a.split(' ').filter(|t| !t.is_empty()).collect();
    let right: ahash::AHashSet<&str> = b.split(' ').filter(|t| !t.is_empty()).collect();
    if left.is_empty() && right.is_empty() {
        return 100;
    }
    let shared = left.intersection(&right).count();
    let union = left.union(&right).count();
    ((shared * 100) / union.max(1)) as u8
}
