//! Serial number normalization
//!
//! Backends report serial numbers in whatever form their transport provides:
//! decimal probe serials, hex-padded USB `iSerialNumber` strings, and so on.
//! Purely numeric strings denoting the same value must collide on one map
//! key, so they are canonicalized to their shortest decimal form. Anything
//! containing a non-digit is an opaque identifier and is never coerced.

/// Normalize a raw serial number into a conflation map key
///
/// Returns `None` for an empty string: such a fragment carries no identity
/// and must be routed to the no-serial-number path instead.
///
/// ```
/// use conflater::serial_key::normalize;
///
/// assert_eq!(normalize("007"), Some("7".to_string()));
/// assert_eq!(normalize("7"), Some("7".to_string()));
/// assert_eq!(normalize("00AB"), Some("00AB".to_string()));
/// assert_eq!(normalize(""), None);
/// ```
pub fn normalize(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    if raw.bytes().all(|b| b.is_ascii_digit()) {
        // Canonical decimal form without going through an integer type, so
        // arbitrarily long serials cannot overflow.
        let stripped = raw.trim_start_matches('0');
        if stripped.is_empty() {
            Some("0".to_string())
        } else {
            Some(stripped.to_string())
        }
    } else {
        Some(raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_strings_collapse_to_canonical_decimal() {
        assert_eq!(normalize("007"), Some("7".into()));
        assert_eq!(normalize("7"), Some("7".into()));
        assert_eq!(normalize("000000683000123"), Some("683000123".into()));
    }

    #[test]
    fn alphanumeric_strings_stay_verbatim() {
        assert_eq!(normalize("00AB"), Some("00AB".into()));
        assert_eq!(normalize("AB"), Some("AB".into()));
        assert_ne!(normalize("00AB"), normalize("AB"));
        assert_eq!(
            normalize("752303138333518011C1"),
            Some("752303138333518011C1".into())
        );
    }

    #[test]
    fn all_zeroes_is_zero() {
        assert_eq!(normalize("0"), Some("0".into()));
        assert_eq!(normalize("0000"), Some("0".into()));
    }

    #[test]
    fn empty_string_has_no_identity() {
        assert_eq!(normalize(""), None);
    }

    #[test]
    fn overlong_numeric_serials_do_not_overflow() {
        let long = "9".repeat(40);
        assert_eq!(normalize(&long), Some(long.clone()));
    }
}
