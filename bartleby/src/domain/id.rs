//! Domain ID generation.
//!
//! All ids use the format `{6-char-hex}-{type}-{slug}`, e.g.
//! `019430-item-add-oauth-support`.

/// Generate a domain id from a type tag and a human title.
pub fn generate_id(domain_type: &str, title: &str) -> String {
    let uuid = uuid::Uuid::now_v7();
    let hex_prefix = &uuid.to_string()[..6];
    let slug = slugify(title);
    if slug.is_empty() {
        format!("{hex_prefix}-{domain_type}")
    } else {
        format!("{hex_prefix}-{domain_type}-{slug}")
    }
}

fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter_map(|c| {
            if c.is_alphanumeric() {
                Some(c)
            } else if c == '\'' || c == '\u{2019}' || c == '\u{2018}' {
                None
            } else {
                Some('-')
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_id_contains_type_and_slug() {
        let id = generate_id("item", "Add OAuth Support");
        assert!(id.contains("-item-"));
        assert!(id.ends_with("add-oauth-support"));
    }

    #[test]
    fn slugify_strips_apostrophes_and_collapses_punctuation() {
        assert_eq!(slugify("Here's a test!!"), "heres-a-test");
        assert_eq!(slugify("Multiple   Spaces"), "multiple-spaces");
    }

    #[test]
    fn generate_id_falls_back_to_bare_prefix_for_empty_title() {
        let id = generate_id("question", "***");
        assert!(id.ends_with("-question"));
    }
}
