//! Safety-critical identifier validation.
//!
//! Every interpolated SQL identifier — table names, column names,
//! incident-table names — passes through here before being concatenated
//! into a query. Arguments always travel as parameter placeholders; no
//! caller-supplied string is ever interpolated raw into SQL.

use crate::error::RevokerError;

/// Validates a bare (unquoted) SQL identifier: table or column name.
///
/// Accepts only `[0-9a-zA-Z$_]+`, rejects all-digit strings, and rejects
/// anything that looks like a floating-point literal (`<digits>e...`,
/// e.g. `12345e`) which some database drivers would otherwise coerce.
///
/// # Errors
/// Returns [`RevokerError::BadRequest`] if `ident` fails validation.
pub fn validate_identifier(ident: &str) -> Result<(), RevokerError> {
    if ident.is_empty() {
        return Err(RevokerError::BadRequest("empty identifier".into()));
    }
    if !ident
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'$' || b == b'_')
    {
        return Err(RevokerError::BadRequest(format!(
            "identifier contains disallowed characters: {ident}"
        )));
    }
    if ident.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RevokerError::BadRequest(format!(
            "identifier must not be all digits: {ident}"
        )));
    }
    if looks_like_float_literal(ident) {
        return Err(RevokerError::BadRequest(format!(
            "identifier looks like a numeric literal: {ident}"
        )));
    }
    Ok(())
}

/// `<digits>e` (optionally followed by more digits/sign) reads as a
/// floating-point exponent to some parsers — reject it outright.
fn looks_like_float_literal(ident: &str) -> bool {
    let bytes = ident.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    i > 0 && i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E')
}

/// Validates a dynamically-named incident table: `^incident_[0-9a-zA-Z_]{1,100}$`.
///
/// # Errors
/// Returns [`RevokerError::BadRequest`] if `name` doesn't match.
pub fn validate_incident_table_name(name: &str) -> Result<(), RevokerError> {
    const PREFIX: &str = "incident_";
    let Some(suffix) = name.strip_prefix(PREFIX) else {
        return Err(RevokerError::BadRequest(format!(
            "incident table name must start with '{PREFIX}': {name}"
        )));
    };
    if suffix.is_empty() || suffix.len() > 100 {
        return Err(RevokerError::BadRequest(format!(
            "incident table suffix must be 1-100 characters: {name}"
        )));
    }
    if !suffix
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_')
    {
        return Err(RevokerError::BadRequest(format!(
            "incident table name contains disallowed characters: {name}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_identifiers() {
        for ident in ["hi", "_x", "$id", "MixedCase", "col_1"] {
            assert!(validate_identifier(ident).is_ok(), "{ident} should be valid");
        }
    }

    #[test]
    fn rejects_empty() {
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn rejects_trailing_space() {
        assert!(validate_identifier("hi ").is_err());
    }

    #[test]
    fn rejects_embedded_backslash() {
        assert!(validate_identifier("hi\\x").is_err());
    }

    #[test]
    fn rejects_all_digit_strings() {
        assert!(validate_identifier("12345").is_err());
    }

    #[test]
    fn rejects_float_like_prefixes() {
        assert!(validate_identifier("12345e").is_err());
        assert!(validate_identifier("1e10").is_err());
    }

    #[test]
    fn incident_table_regex_boundaries() {
        assert!(validate_incident_table_name("incident_foo").is_ok());
        assert!(validate_incident_table_name("incident_Foo_123").is_ok());
        assert!(validate_incident_table_name("incident_").is_err());
        assert!(validate_incident_table_name("incidents_foo").is_err());
        assert!(validate_incident_table_name("incident_bad-name").is_err());
        let too_long = format!("incident_{}", "a".repeat(101));
        assert!(validate_incident_table_name(&too_long).is_err());
    }
}
