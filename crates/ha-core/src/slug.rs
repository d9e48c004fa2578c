//! Slug generation for entity object ids and collection item ids

/// Turn free text into an identifier usable as an object id
///
/// Lowercase ASCII letters and digits are kept, every other run of characters
/// collapses into a single `_`, and separators are trimmed from both ends. Text
/// without any usable character yields `"unknown"`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_separator = false;

    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('_');
            }
            pending_separator = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }

    if slug.is_empty() {
        return crate::STATE_UNKNOWN.to_string();
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_basic() {
        assert_eq!(slugify("Test Zone"), "test_zone");
        assert_eq!(slugify("Home"), "home");
        assert_eq!(slugify("yaml 1"), "yaml_1");
    }

    #[test]
    fn test_slugify_collapses_separators() {
        assert_eq!(slugify("  Work -- Office  "), "work_office");
        assert_eq!(slugify("a___b"), "a_b");
        assert_eq!(slugify("_leading and trailing_"), "leading_and_trailing");
    }

    #[test]
    fn test_slugify_non_ascii() {
        assert_eq!(slugify("Café Zone"), "caf_zone");
        assert_eq!(slugify("🏠"), "unknown");
        assert_eq!(slugify(""), "unknown");
    }
}
