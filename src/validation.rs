use crate::error::ValidationError;
use crate::model::ItemSeed;

pub const MAX_TEXT_CHARS: usize = 10_000;
pub const MAX_TAGS: usize = 20;

/// Collapses runs of whitespace, trims, and truncates to `max_chars`.
pub fn sanitize_text(text: &str, max_chars: usize) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(max_chars)
        .collect()
}

pub fn sanitize_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

pub fn validate_item(seed: &ItemSeed, max_chars: usize) -> Result<(), ValidationError> {
    let mut errors = Vec::new();

    if seed.text.trim().is_empty() {
        errors.push("text content is required".to_string());
    } else if seed.text.chars().count() > max_chars {
        errors.push(format!(
            "text content exceeds maximum length ({} characters)",
            max_chars
        ));
    }

    if let Err(e) = validate_tags(&seed.tags) {
        errors.extend(e.0);
    }

    if !seed.source_url.is_empty() && url::Url::parse(&seed.source_url).is_err() {
        errors.push("invalid source URL format".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError(errors))
    }
}

pub fn validate_tags(tags: &[String]) -> Result<(), ValidationError> {
    if tags.len() > MAX_TAGS {
        return Err(ValidationError(vec![format!("maximum {} tags allowed", MAX_TAGS)]));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(text: &str, url: &str) -> ItemSeed {
        ItemSeed::from_selection(text, url, "")
    }

    #[test]
    fn sanitize_collapses_whitespace_and_truncates() {
        assert_eq!(sanitize_text("  a \n\n b\t c  ", MAX_TEXT_CHARS), "a b c");
        assert_eq!(sanitize_text("abcdef", 3), "abc");
    }

    #[test]
    fn empty_text_is_rejected() {
        let err = validate_item(&seed("   ", ""), MAX_TEXT_CHARS).unwrap_err();
        assert_eq!(err.0, vec!["text content is required".to_string()]);
    }

    #[test]
    fn urls_must_be_absolute() {
        assert!(validate_item(&seed("text", "https://x.com/a?b=c"), MAX_TEXT_CHARS).is_ok());
        assert!(validate_item(&seed("text", "HTTP://x.com"), MAX_TEXT_CHARS).is_ok());
        assert!(validate_item(&seed("text", "file:///home/u/paper.pdf"), MAX_TEXT_CHARS).is_ok());
        assert!(validate_item(&seed("text", "chrome-extension://abc/viewer.html"), MAX_TEXT_CHARS).is_ok());
        assert!(validate_item(&seed("text", "about:blank"), MAX_TEXT_CHARS).is_ok());
        assert!(validate_item(&seed("text", "not a url"), MAX_TEXT_CHARS).is_err());
        assert!(validate_item(&seed("text", "/relative/path"), MAX_TEXT_CHARS).is_err());
    }

    #[test]
    fn too_many_tags() {
        let mut item = seed("text", "");
        item.tags = (0..=MAX_TAGS).map(|i| format!("t{i}")).collect();
        assert!(validate_item(&item, MAX_TEXT_CHARS).is_err());

        item.tags.pop();
        assert!(validate_item(&item, MAX_TEXT_CHARS).is_ok());
        assert!(validate_tags(&item.tags).is_ok());
    }

    #[test]
    fn blank_tags_are_dropped() {
        let tags = vec![" rust ".to_string(), "".to_string(), "  ".to_string()];
        assert_eq!(sanitize_tags(&tags), vec!["rust".to_string()]);
    }
}
