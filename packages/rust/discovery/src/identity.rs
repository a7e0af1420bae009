//! Identity-key derivation and address parsing for directory listings.

use std::sync::LazyLock;

use regex::Regex;
use sourcing_shared::{IdentityKey, normalize_domain};

/// Matches the `ST 12345` / `ST 12345-6789` tail of a US address.
static STATE_ZIP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z]{2})\s+(\d{5}(?:-\d{4})?)$").expect("state/zip regex")
});

/// Country suffixes that trail a US formatted address.
const US_SUFFIXES: &[&str] = &["USA", "US", "United States"];

// ---------------------------------------------------------------------------
// Domains and keys
// ---------------------------------------------------------------------------

/// Identity key for a listing: the normalized domain when there is one,
/// otherwise `name|address`.
pub fn identity_key(website: Option<&str>, name: &str, address: Option<&str>) -> IdentityKey {
    match website.and_then(normalize_domain) {
        Some(domain) => IdentityKey::from_domain(&domain),
        None => IdentityKey::from_name_address(name, address),
    }
}

// ---------------------------------------------------------------------------
// Address parsing
// ---------------------------------------------------------------------------

/// Location parts pulled out of a formatted address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedAddress {
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub country: Option<String>,
}

/// Parse `street, city, ST 12345[, USA]` into its parts.
///
/// Anything that does not look like a US address yields an empty result
/// rather than a guess.
pub fn parse_address(address: &str) -> ParsedAddress {
    let mut parts: Vec<&str> = address
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    if parts
        .last()
        .is_some_and(|last| US_SUFFIXES.iter().any(|s| s.eq_ignore_ascii_case(last)))
    {
        parts.pop();
    }

    if parts.len() < 3 {
        return ParsedAddress::default();
    }

    let state_zip = parts[parts.len() - 1];
    let Some(caps) = STATE_ZIP_RE.captures(state_zip) else {
        return ParsedAddress::default();
    };

    ParsedAddress {
        city: Some(parts[parts.len() - 2].to_string()),
        state: Some(caps[1].to_uppercase()),
        zip: Some(caps[2].to_string()),
        country: Some("USA".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_domain_same_key() {
        let a = identity_key(Some("https://www.acme.com/"), "Acme", None);
        let b = identity_key(Some("http://acme.com/about"), "Acme Heating LLC", Some("elsewhere"));
        assert_eq!(a, b);
    }

    #[test]
    fn falls_back_to_name_and_address() {
        let a = identity_key(None, "Acme", Some("1 Main St, Austin, TX 78701"));
        let b = identity_key(Some(""), "ACME", Some("1 MAIN ST, AUSTIN, TX 78701"));
        assert_eq!(a, b);
        assert_ne!(a, identity_key(None, "Acme", Some("2 Main St, Austin, TX 78701")));
    }

    #[test]
    fn parses_us_address() {
        let parsed = parse_address("1200 Industrial Blvd, Austin, TX 78701, USA");
        assert_eq!(parsed.city.as_deref(), Some("Austin"));
        assert_eq!(parsed.state.as_deref(), Some("TX"));
        assert_eq!(parsed.zip.as_deref(), Some("78701"));
        assert_eq!(parsed.country.as_deref(), Some("USA"));
    }

    #[test]
    fn parses_address_without_country() {
        let parsed = parse_address("5 Elm St, Suite 2, Round Rock, tx 78664-1234");
        assert_eq!(parsed.city.as_deref(), Some("Round Rock"));
        assert_eq!(parsed.state.as_deref(), Some("TX"));
        assert_eq!(parsed.zip.as_deref(), Some("78664-1234"));
    }

    #[test]
    fn unrecognized_address_is_empty() {
        assert_eq!(parse_address("Somewhere"), ParsedAddress::default());
        assert_eq!(parse_address("10 Downing St, London SW1A 2AA, UK"), ParsedAddress::default());
    }
}
