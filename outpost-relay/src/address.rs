//! Address classification.
//!
//! No validation happens here: an address without `@` has an empty domain and
//! ends up in its own degenerate group, failing later at delivery time.

/// Everything after the first `@`, or `""` when there is none.
#[must_use]
pub fn domain_of(address: &str) -> &str {
    address.split_once('@').map_or("", |(_, domain)| domain)
}

/// The grouping and DKIM key for a domain.
#[must_use]
pub fn normalize_domain(domain: &str) -> String {
    domain.to_ascii_lowercase()
}

/// [`domain_of`] followed by [`normalize_domain`].
#[must_use]
pub fn grouping_key(address: &str) -> String {
    normalize_domain(domain_of(address))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn splits_on_first_at() {
        assert_eq!(domain_of("user@example.com"), "example.com");
        assert_eq!(domain_of("\"odd@local\"@example.com"), "local\"@example.com");
        assert_eq!(domain_of("user@"), "");
    }

    #[test]
    fn missing_at_yields_empty_domain() {
        assert_eq!(domain_of("nodomain"), "");
        assert_eq!(grouping_key("nodomain"), "");
    }

    #[test]
    fn keys_are_lower_cased() {
        assert_eq!(grouping_key("Bob@Example.COM"), "example.com");
    }
}
