// crates/dcyfr-daemon/src/utils.rs
// Small string helpers shared by the scanners and the supervisor log

/// Cut a string to at most `max_chars` characters, appending "..." when
/// anything was dropped. Counts characters, not bytes, so multibyte input
/// (source lines, error text) never splits inside a code point.
pub fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &s[..cut]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_string() {
        assert_eq!(truncate("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_exact_length() {
        assert_eq!(truncate("hello", 5), "hello");
    }

    #[test]
    fn test_truncate_long_string() {
        assert_eq!(truncate("hello world", 5), "hello...");
    }

    #[test]
    fn test_truncate_empty_string() {
        assert_eq!(truncate("", 5), "");
    }

    #[test]
    fn test_truncate_multibyte_not_split() {
        // é is two bytes; a byte-offset slice at 3 would panic
        assert_eq!(truncate("ééé", 2), "éé...");
        assert_eq!(truncate("ééé", 3), "ééé");
    }

    #[test]
    fn test_truncate_emoji_line() {
        let line = "// TODO: fix the 🚀 launcher before release";
        let cut = truncate(line, 20);
        assert!(cut.ends_with("..."));
        assert!(cut.chars().count() <= 23);
    }
}
