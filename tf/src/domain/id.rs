//! Identifier generation

use uuid::Uuid;

/// Generate a readable unique id: `<prefix>-<slug>-<suffix>`
///
/// The slug is derived from the hint (lowercased, non-alphanumerics folded
/// to hyphens, capped at 24 chars); the suffix is the tail of a UUIDv7 so
/// ids sort roughly by creation time.
pub fn generate_id(prefix: &str, hint: &str) -> String {
    let slug: String = hint
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    let slug = if slug.len() > 24 { slug[..24].trim_end_matches('-').to_string() } else { slug };

    let uuid = Uuid::now_v7().simple().to_string();
    let suffix = &uuid[uuid.len() - 8..];

    if slug.is_empty() {
        format!("{}-{}", prefix, suffix)
    } else {
        format!("{}-{}-{}", prefix, slug, suffix)
    }
}
