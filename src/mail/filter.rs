//! Sender allowlist.

/// Domains answered when `AUTOREPLY_ALLOWED_DOMAINS` is not set.
pub const DEFAULT_ALLOWED_DOMAINS: &[&str] = &[
    "@gmail.com",
    "@yahoo.com",
    "@outlook.com",
    "@hotmail.com",
    "@aol.com",
    "@icloud.com",
];

/// Check if a sender address ends with one of the allowlisted suffixes.
///
/// Matching is byte-wise and case-sensitive: `x@GMAIL.com` does not match
/// `@gmail.com`. An empty address never matches.
pub fn is_allowed(address: &str, allowlist: &[String]) -> bool {
    if address.is_empty() {
        return false;
    }
    allowlist.iter().any(|suffix| address.ends_with(suffix.as_str()))
}
