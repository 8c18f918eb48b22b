//! Prose sanitization applied before persistence.
//!
//! Three passes: Unicode NFC normalization, mojibake cleanup (UTF-8 bytes
//! decoded as Latin-1 upstream), and system-residue stripping (role tags,
//! markdown fences, assistant chatter). The whole pipeline is idempotent:
//! `sanitize(sanitize(x)) == sanitize(x)`, which the release gate relies on.

use unicode_normalization::UnicodeNormalization;

/// Common UTF-8-as-Latin-1 damage and the characters they decode to.
const MOJIBAKE_TABLE: &[(&str, &str)] = &[
    ("\u{00e2}\u{20ac}\u{2122}", "\u{2019}"), // â€™ → ’
    ("\u{00e2}\u{20ac}\u{0153}", "\u{201c}"), // â€œ → “
    ("\u{00e2}\u{20ac}\u{009d}", "\u{201d}"), // â€ → ”
    ("\u{00e2}\u{20ac}\u{201c}", "\u{2013}"), // â€“ → –
    ("\u{00e2}\u{20ac}\u{201d}", "\u{2014}"), // â€” → —
    ("\u{00e2}\u{20ac}\u{00a6}", "\u{2026}"), // â€¦ → …
    ("\u{00c3}\u{00a9}", "\u{00e9}"),         // Ã© → é
    ("\u{00c3}\u{00a8}", "\u{00e8}"),         // Ã¨ → è
    ("\u{00c3}\u{00a0}", "\u{00e0}"),         // Ã  → à
    ("\u{00c3}\u{00b4}", "\u{00f4}"),         // Ã´ → ô
    ("\u{00c3}\u{00a7}", "\u{00e7}"),         // Ã§ → ç
    ("\u{00c2}\u{00a0}", " "),                // Â + nbsp → space
];

/// Line prefixes that mark leaked conversation scaffolding rather than
/// narrative text.
const RESIDUE_PREFIXES: &[&str] = &[
    "```",
    "System:",
    "SYSTEM:",
    "Assistant:",
    "ASSISTANT:",
    "User:",
    "USER:",
    "[INST]",
    "[/INST]",
    "<|",
];

const RESIDUE_MARKERS: &[&str] = &[
    "As an AI language model",
    "As an AI assistant",
    "I cannot continue",
];

/// Result of a sanitization pass, with counters for the operational log.
#[derive(Debug, Clone)]
pub struct Sanitized {
    pub text: String,
    pub mojibake_replaced: u32,
    pub residue_lines_removed: u32,
}

/// Run the full sanitization pipeline over a chapter or document.
pub fn sanitize(text: &str) -> Sanitized {
    let normalized: String = text.nfc().collect();

    let mut cleaned = normalized;
    let mut mojibake_replaced = 0u32;
    for (bad, good) in MOJIBAKE_TABLE {
        let hits = cleaned.matches(bad).count() as u32;
        if hits > 0 {
            cleaned = cleaned.replace(bad, good);
            mojibake_replaced += hits;
        }
    }
    // Replacement characters carry no recoverable content.
    let fffd = cleaned.matches('\u{FFFD}').count() as u32;
    if fffd > 0 {
        cleaned = cleaned.replace('\u{FFFD}', "");
        mojibake_replaced += fffd;
    }

    let mut lines = Vec::new();
    let mut residue_lines_removed = 0u32;
    for line in cleaned.lines() {
        if is_residue_line(line) {
            residue_lines_removed += 1;
        } else {
            lines.push(line);
        }
    }

    Sanitized {
        text: lines.join("\n"),
        mojibake_replaced,
        residue_lines_removed,
    }
}

fn is_residue_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    RESIDUE_PREFIXES.iter().any(|p| trimmed.starts_with(p))
        || RESIDUE_MARKERS.iter().any(|m| trimmed.contains(m))
}

/// Count residual mojibake sequences without modifying the text. The prose
/// release gate requires this to be zero.
pub fn mojibake_count(text: &str) -> usize {
    MOJIBAKE_TABLE
        .iter()
        .map(|(bad, _)| text.matches(bad).count())
        .sum::<usize>()
        + text.matches('\u{FFFD}').count()
}

/// Content hash of sanitized text, used to assert sanitize idempotence.
pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_untouched() {
        let s = sanitize("The butler crossed the terrace at dusk.");
        assert_eq!(s.text, "The butler crossed the terrace at dusk.");
        assert_eq!(s.mojibake_replaced, 0);
        assert_eq!(s.residue_lines_removed, 0);
    }

    #[test]
    fn test_mojibake_repaired() {
        let broken = "It wasn\u{00e2}\u{20ac}\u{2122}t the vicar \u{00e2}\u{20ac}\u{201d} it never was.";
        let s = sanitize(broken);
        assert_eq!(s.text, "It wasn\u{2019}t the vicar \u{2014} it never was.");
        assert_eq!(s.mojibake_replaced, 2);
        assert_eq!(mojibake_count(&s.text), 0);
    }

    #[test]
    fn test_replacement_char_dropped() {
        let s = sanitize("a\u{FFFD}b");
        assert_eq!(s.text, "ab");
        assert_eq!(s.mojibake_replaced, 1);
    }

    #[test]
    fn test_residue_lines_stripped() {
        let raw = "```json\nChapter text line one.\nAssistant: here is the next part\nChapter text line two.\n```";
        let s = sanitize(raw);
        assert_eq!(s.text, "Chapter text line one.\nChapter text line two.");
        assert_eq!(s.residue_lines_removed, 3);
    }

    #[test]
    fn test_apology_marker_stripped() {
        let raw = "The hall fell silent.\nAs an AI language model, I should note the pacing.";
        let s = sanitize(raw);
        assert_eq!(s.text, "The hall fell silent.");
    }

    #[test]
    fn test_sanitize_idempotent() {
        let raw = "```\nShe said \u{00e2}\u{20ac}\u{0153}no\u{00e2}\u{20ac}\u{009d}.\nSystem: end of scene\nCaf\u{0065}\u{0301} door."; // includes decomposed é
        let once = sanitize(raw);
        let twice = sanitize(&once.text);
        assert_eq!(once.text, twice.text);
        assert_eq!(content_hash(&once.text), content_hash(&twice.text));
        assert_eq!(twice.mojibake_replaced, 0);
        assert_eq!(twice.residue_lines_removed, 0);
    }

    #[test]
    fn test_nfc_applied() {
        // e + combining acute composes to é
        let s = sanitize("Caf\u{0065}\u{0301}");
        assert_eq!(s.text, "Caf\u{00e9}");
    }

    #[test]
    fn test_mojibake_count_detects() {
        assert_eq!(mojibake_count("fine text"), 0);
        assert_eq!(
            mojibake_count("bad \u{00e2}\u{20ac}\u{2122} quote \u{00c3}\u{00a9}"),
            2
        );
    }
}
