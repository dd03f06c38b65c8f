//! Public domain resolution for completed uploads.

/// Pick the domain a link is served from.
///
/// The submitted domain wins when it is on the allow-list (compared
/// case-insensitively); otherwise the first allowed domain is used.
/// Returns `None` only when the allow-list is empty.
pub fn resolve_domain<'a>(submitted: Option<&str>, allowed: &'a [String]) -> Option<&'a str> {
    let submitted = submitted.map(str::trim).filter(|s| !s.is_empty());
    if let Some(wanted) = submitted
        && let Some(found) = allowed.iter().find(|d| d.eq_ignore_ascii_case(wanted))
    {
        return Some(found.as_str());
    }
    allowed.first().map(String::as_str)
}

/// Absolute link for a slug on a domain.
pub fn public_url(domain: &str, slug: &str) -> String {
    format!("https://{domain}/{slug}")
}

/// Path-relative link for a slug.
pub fn relative_url(slug: &str) -> String {
    format!("/{slug}")
}
