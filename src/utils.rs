/// Longest name Kubernetes accepts for most objects and label values.
pub const MAX_SLUG_LENGTH: usize = 63;

/// Lowercase, ASCII-only, dash-separated form of `input`, at most
/// [`MAX_SLUG_LENGTH`] characters. Letters outside ASCII are transliterated
/// (`Café` becomes `cafe`) and the result never starts or ends with a dash.
pub fn slugify(input: &str) -> String {
    let mut slug = slug::slugify(input);
    if slug.len() > MAX_SLUG_LENGTH {
        slug.truncate(MAX_SLUG_LENGTH);
        let trimmed = slug.trim_end_matches('-').len();
        slug.truncate(trimmed);
    }
    slug
}

/// Label-safe form of a subject, e.g. `ada@example.com` becomes
/// `ada-at-example-com`.
pub fn subject_label(subject: &str) -> String {
    slugify(&subject.replace('@', "-at-"))
}
