//! Language-aware tokenization shared by every keyword path.
//!
//! CJK code points become single-character tokens (there are no word
//! boundaries to split on), alphanumeric runs become word tokens, everything
//! else separates. Indexing and querying must tokenize through this same
//! function or recall silently breaks.

/// Unicode block ranges treated as CJK: Han (+ extension A and compatibility
/// ideographs), Hiragana, Katakana, Hangul (syllables and jamo), CJK
/// punctuation, and half/fullwidth forms.
const CJK_RANGES: &[(u32, u32)] = &[
    (0x1100, 0x11FF),
    (0x3000, 0x303F),
    (0x3040, 0x309F),
    (0x30A0, 0x30FF),
    (0x3400, 0x4DBF),
    (0x4E00, 0x9FFF),
    (0xAC00, 0xD7AF),
    (0xF900, 0xFAFF),
    (0xFF00, 0xFFEF),
];

fn is_cjk(c: char) -> bool {
    let cp = c as u32;
    CJK_RANGES.iter().any(|&(lo, hi)| cp >= lo && cp <= hi)
}

/// Split `text` into lowercased tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();

    for c in text.to_lowercase().chars() {
        if is_cjk(c) {
            if !word.is_empty() {
                tokens.push(std::mem::take(&mut word));
            }
            tokens.push(c.to_string());
        } else if c.is_alphanumeric() {
            word.push(c);
        } else if !word.is_empty() {
            tokens.push(std::mem::take(&mut word));
        }
    }
    if !word.is_empty() {
        tokens.push(word);
    }
    tokens
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_words() {
        assert_eq!(tokenize("Hello, World!"), vec!["hello", "world"]);
    }

    #[test]
    fn test_digits_join_words() {
        assert_eq!(tokenize("ipv6 route-53"), vec!["ipv6", "route", "53"]);
    }

    #[test]
    fn test_cjk_chars_split_individually() {
        assert_eq!(tokenize("今天天气"), vec!["今", "天", "天", "气"]);
    }

    #[test]
    fn test_mixed_cjk_and_ascii() {
        assert_eq!(tokenize("今天meeting很好"), vec![
            "今", "天", "meeting", "很", "好"
        ]);
    }

    #[test]
    fn test_hiragana_katakana_hangul() {
        assert_eq!(tokenize("ひらカナ한"), vec!["ひ", "ら", "カ", "ナ", "한"]);
    }

    #[test]
    fn test_empty_and_separators_only() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("  --- !! ").is_empty());
    }
}
