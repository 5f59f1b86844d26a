//! Extraction of `@name` mentions from message text.

use std::sync::OnceLock;

use regex::Regex;

fn mention_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|[\s,(])@([A-Za-z0-9_.\-]+)").unwrap())
}

/// Extract mentioned names from message content, in order of first
/// appearance. Duplicates (case-insensitive) are collapsed so one message
/// can mention a user at most once.
pub fn extract_mentions(content: &str) -> Vec<String> {
    let mut seen = Vec::new();
    let mut out = Vec::new();
    for cap in mention_re().captures_iter(content) {
        let name = cap[1].trim_end_matches('.').to_string();
        if name.is_empty() {
            continue;
        }
        let lower = name.to_lowercase();
        if seen.contains(&lower) {
            continue;
        }
        seen.push(lower);
        out.push(name);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_simple_mention() {
        assert_eq!(extract_mentions("hey @alice, lunch?"), vec!["alice"]);
    }

    #[test]
    fn extracts_multiple_mentions() {
        assert_eq!(
            extract_mentions("@alice @bob meeting in 5"),
            vec!["alice", "bob"]
        );
    }

    #[test]
    fn duplicate_mentions_collapse() {
        assert_eq!(extract_mentions("@alice ping @alice"), vec!["alice"]);
        // Case-insensitive: same user, one mention.
        assert_eq!(extract_mentions("@Alice ping @alice"), vec!["Alice"]);
    }

    #[test]
    fn mid_word_at_is_not_a_mention() {
        assert!(extract_mentions("mail me at bob@example.com").is_empty());
    }

    #[test]
    fn trailing_punctuation_stripped() {
        assert_eq!(extract_mentions("thanks @alice."), vec!["alice"]);
    }

    #[test]
    fn no_mentions() {
        assert!(extract_mentions("nothing to see here").is_empty());
        assert!(extract_mentions("").is_empty());
    }
}
