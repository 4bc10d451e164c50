//! Mojibake repair for transform output.
//!
//! The exchange's stylesheets declare encodings inconsistently, and the HTML
//! they produce sometimes contains UTF-8 that was read back as a single-byte
//! encoding somewhere in the toolchain. Two kinds of damage are repaired:
//!
//! 1. **Typographic glyphs**: dashes and curly quotes whose UTF-8 bytes were
//!    read as windows-1252 (`â€”`) or windows-1251 (`вЂ”`). These sequences
//!    never occur in valid text and are replaced unconditionally.
//! 2. **Cyrillic runs**: UTF-8 Cyrillic read as windows-1251 turns every
//!    letter into `Р` or `С` followed by another Cyrillic-range character
//!    (`РќР°...`). Only runs of at least four such pairs are re-decoded, so
//!    correct words elsewhere on the page (`БИК`, `РФ`) are left alone.
//!
//! A run that does not re-decode to valid UTF-8 is kept as it is. Text that
//! was misread more than once is repaired one layer per pass until nothing
//! changes, so repairing already-repaired text is a no-op.

use encoding_rs::{Encoding, WINDOWS_1251, WINDOWS_1252};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Corrupted typographic sequences and their intended characters, applied
/// in this order.
const GLYPH_FIXES: &[(&str, &str)] = &[
    ("â€”", "—"),
    ("â€“", "–"),
    ("â€˜", "‘"),
    ("â€™", "’"),
    ("â€œ", "“"),
    ("â€\u{9d}", "”"),
    ("â€\u{9c}", "“"),
    ("â€\u{99}", "’"),
    ("â€\u{94}", "—"),
    ("â€\u{93}", "–"),
    ("вЂњ", "“"),
    ("вЂќ", "”"),
    ("вЂ™", "’"),
    ("вЂ”", "—"),
    ("вЂ–", "–"),
];

/// Four or more `Р`/`С` + Cyrillic pairs. The threshold is tuned to the
/// exchange's reports: lowering it starts hitting real abbreviations.
static RE_CYRILLIC_MOJIBAKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:[РС][\x{0400}-\x{04FF}]){4,}").unwrap());

/// Repair both kinds of mojibake in `text`.
///
/// Text without a corruption signature is returned unchanged.
pub fn fix_mojibake(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    // A pass that changes the text always shortens it, so this terminates.
    let mut current = text.to_string();
    loop {
        let next = fix_cyrillic_runs(&fix_glyphs(&current));
        if next == current {
            return current;
        }
        current = next;
    }
}

fn fix_glyphs(text: &str) -> String {
    GLYPH_FIXES
        .iter()
        .fold(text.to_string(), |acc, (broken, fixed)| {
            if acc.contains(broken) {
                acc.replace(broken, fixed)
            } else {
                acc
            }
        })
}

fn fix_cyrillic_runs(text: &str) -> String {
    RE_CYRILLIC_MOJIBAKE
        .replace_all(text, |caps: &Captures<'_>| {
            let run = &caps[0];
            // windows-1251 first; windows-1252 (latin-1) as the fallback.
            [WINDOWS_1251, WINDOWS_1252]
                .into_iter()
                .find_map(|via| redecode(run, via))
                .unwrap_or_else(|| run.to_string())
        })
        .into_owned()
}

/// Encode `run` with `via` and decode the bytes as UTF-8. `None` if either
/// step is lossy.
fn redecode(run: &str, via: &'static Encoding) -> Option<String> {
    let (bytes, _, unmappable) = via.encode(run);
    if unmappable {
        return None;
    }
    String::from_utf8(bytes.into_owned()).ok()
}
