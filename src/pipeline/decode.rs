//! Source decoding: turn uploaded report bytes into Unicode text.
//!
//! Exchange reports are produced by legacy Windows tooling and are usually
//! `windows-1251`, sometimes with a declaration that lies. Decoding is
//! therefore a short list of strict attempts followed by a lossy UTF-8
//! fallback, so this stage never fails.

use encoding_rs::Encoding;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Encoding assumed when a report carries no declaration.
pub const LEGACY_ENCODING: &str = "windows-1251";

/// Second spelling of [`LEGACY_ENCODING`], tried as its own attempt.
pub const LEGACY_ENCODING_ALIAS: &str = "cp1251";

/// Bytes of a source report inspected for an `encoding="..."` declaration.
pub const SOURCE_SNIFF_WINDOW: usize = 100;

static RE_ENCODING_DECL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"encoding=['"]([^'"]+)['"]"#).unwrap());

/// Decoded source text and the label of the encoding that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    pub text: String,
    pub encoding: String,
}

/// Look for an `encoding="..."` declaration in the first `window` bytes.
///
/// Non-ASCII bytes are skipped rather than rejected, so a corrupt header
/// still yields whatever declaration survives. The label is lower-cased.
pub fn sniff_declared_encoding(bytes: &[u8], window: usize) -> Option<String> {
    let head: String = bytes[..bytes.len().min(window)]
        .iter()
        .filter(|b| b.is_ascii())
        .map(|&b| b as char)
        .collect();
    RE_ENCODING_DECL
        .captures(&head)
        .map(|caps| caps[1].to_lowercase())
}

/// The encoding a report declares, or [`LEGACY_ENCODING`] if it declares none.
pub fn detect_encoding(bytes: &[u8]) -> String {
    sniff_declared_encoding(bytes, SOURCE_SNIFF_WINDOW).unwrap_or_else(|| LEGACY_ENCODING.to_string())
}

/// Strictly decode `bytes` as `label`.
///
/// Returns `None` for an unknown label or any malformed sequence.
pub fn decode_strict(bytes: &[u8], label: &str) -> Option<String> {
    let encoding = Encoding::for_label(label.trim().as_bytes())?;
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| text.into_owned())
}

/// Decode a report, trying the declared encoding, then `windows-1251`,
/// `cp1251`, and UTF-8, in that order.
///
/// If none decodes cleanly the bytes are read as UTF-8 with invalid
/// sequences dropped and the label `utf-8` is reported.
pub fn decode_source(bytes: &[u8]) -> DecodedText {
    let detected = detect_encoding(bytes);
    let attempts = [
        detected.as_str(),
        LEGACY_ENCODING,
        LEGACY_ENCODING_ALIAS,
        "utf-8",
    ];

    for label in attempts {
        if let Some(text) = decode_strict(bytes, label) {
            debug!("Decoded {} bytes as {}", bytes.len(), label);
            return DecodedText {
                text,
                encoding: label.to_string(),
            };
        }
        debug!("Decoding as {} failed, trying next encoding", label);
    }

    DecodedText {
        text: decode_utf8_dropping_invalid(bytes),
        encoding: "utf-8".to_string(),
    }
}

/// UTF-8 decode that silently drops invalid sequences instead of
/// replacing them with U+FFFD.
fn decode_utf8_dropping_invalid(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        out.push_str(chunk.valid());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_double_and_single_quotes() {
        assert_eq!(
            sniff_declared_encoding(br#"<?xml version="1.0" encoding="Windows-1251"?>"#, 100),
            Some("windows-1251".to_string())
        );
        assert_eq!(
            sniff_declared_encoding(b"<?xml version='1.0' encoding='UTF-8'?>", 100),
            Some("utf-8".to_string())
        );
    }

    #[test]
    fn sniff_respects_window() {
        let mut xml = vec![b' '; 120];
        xml.extend_from_slice(br#"<?xml encoding="utf-8"?>"#);
        assert_eq!(sniff_declared_encoding(&xml, 100), None);
        assert_eq!(sniff_declared_encoding(&xml, 200), Some("utf-8".to_string()));
    }

    #[test]
    fn sniff_skips_non_ascii_bytes() {
        let xml = b"\xff\xfe<?xml encoding=\"koi8-r\"?>";
        assert_eq!(sniff_declared_encoding(xml, 100), Some("koi8-r".to_string()));
    }

    #[test]
    fn missing_declaration_defaults_to_legacy() {
        assert_eq!(detect_encoding(b"<report/>"), "windows-1251");
    }

    #[test]
    fn decodes_declared_cp1251() {
        let (bytes, _, _) = encoding_rs::WINDOWS_1251.encode("<?xml version=\"1.0\" encoding=\"windows-1251\"?><r>Отчёт</r>");
        let decoded = decode_source(&bytes);
        assert_eq!(decoded.encoding, "windows-1251");
        assert!(decoded.text.contains("Отчёт"));
    }

    #[test]
    fn declared_utf8_is_used_first() {
        let xml = "<?xml version=\"1.0\" encoding=\"UTF-8\"?><r>Отчёт</r>";
        let decoded = decode_source(xml.as_bytes());
        assert_eq!(decoded.encoding, "utf-8");
        assert_eq!(decoded.text, xml);
    }

    #[test]
    fn bad_declared_utf8_falls_back_to_legacy() {
        // 0xCE 0xF2 is "От" in windows-1251 and invalid as UTF-8.
        let bytes = b"<?xml version=\"1.0\" encoding=\"utf-8\"?><r>\xce\xf2</r>";
        let decoded = decode_source(bytes);
        assert_eq!(decoded.encoding, "windows-1251");
        assert!(decoded.text.contains("От"));
    }

    #[test]
    fn unknown_label_is_skipped() {
        let bytes = b"<?xml version=\"1.0\" encoding=\"x-no-such-thing\"?><r/>";
        let decoded = decode_source(bytes);
        assert_eq!(decoded.encoding, "windows-1251");
    }

    #[test]
    fn strict_decode_rejects_malformed() {
        assert_eq!(decode_strict(b"\xff\xfe\xfd", "utf-8"), None);
        assert_eq!(decode_strict(b"abc", "no-such-encoding"), None);
        assert_eq!(decode_strict(b"abc", "utf-8").as_deref(), Some("abc"));
    }

    #[test]
    fn lossy_fallback_drops_invalid_sequences() {
        assert_eq!(decode_utf8_dropping_invalid(b"a\xffb\xc3\xa9"), "abé");
    }
}
