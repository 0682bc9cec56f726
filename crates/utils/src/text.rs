use lazy_static::lazy_static;
use regex::Regex;

pub const DESCRIPTION_MAX_LEN: usize = 255;

lazy_static! {
    static ref HTML_TAG: Regex = Regex::new(r"<[^>]*>").unwrap();
    static ref MD_IMAGE: Regex = Regex::new(r"!\[([^\]]*)\]\([^)]*\)").unwrap();
    static ref MD_LINK: Regex = Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap();
    static ref MD_LINE_PREFIX: Regex = Regex::new(r"(?m)^\s{0,3}(#{1,6}\s*|>\s?|[-*+]\s+|\d+\.\s+)").unwrap();
    static ref MD_EMPHASIS: Regex = Regex::new(r"(\*\*|__|\*|_|~~|`+)").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Plain-text rendering of a markdown/HTML long description.
pub fn plain_text(long_description: &str) -> String {
    let text = HTML_TAG.replace_all(long_description, " ");
    let text = MD_IMAGE.replace_all(&text, "$1");
    let text = MD_LINK.replace_all(&text, "$1");
    let text = MD_LINE_PREFIX.replace_all(&text, "");
    let text = MD_EMPHASIS.replace_all(&text, "");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// Short description derived from the long one: markup removed, cut to
/// [`DESCRIPTION_MAX_LEN`] characters with a trailing `...` when it had to be cut.
pub fn description_from_long_description(long_description: &str) -> String {
    let text = plain_text(long_description);
    if text.chars().count() <= DESCRIPTION_MAX_LEN {
        return text;
    }
    let mut cut: String = text.chars().take(DESCRIPTION_MAX_LEN - 3).collect();
    cut.push_str("...");
    cut
}

/// Short names end up in URLs, so the characters `$#&\/|` and whitespace are rejected.
pub fn is_valid_short_name(short_name: &str) -> bool {
    !short_name.is_empty()
        && !short_name
            .chars()
            .any(|c| c.is_whitespace() || "$#&\\/|".contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_keeps_short_text() {
        assert_eq!(description_from_long_description("Hello"), "Hello");
    }

    #[test]
    fn description_drops_markup() {
        let d = description_from_long_description("## Hello\n<b>big</b> [link](http://x.org)");
        assert!(!d.contains("##"));
        assert!(!d.contains("<b>"));
        assert_eq!(d, "Hello big link");
    }

    #[test]
    fn description_truncates_with_ellipsis() {
        let d = description_from_long_description(&"a".repeat(300));
        assert_eq!(d.chars().count(), 255);
        assert!(d.ends_with("..."));
    }

    #[test]
    fn short_name_rules() {
        assert!(is_valid_short_name("sampleapp"));
        assert!(is_valid_short_name("Измени-Киев!"));
        assert!(!is_valid_short_name("$#/|"));
        assert!(!is_valid_short_name("with space"));
        assert!(!is_valid_short_name(""));
    }
}
