//! Input shape checks for recipient emails and admin usernames.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{CoreError, CoreResult};

/// ASCII local part, then one or more domain labels that start and end with
/// a letter or digit, then an alphabetic TLD of two or more.
const EMAIL_PATTERN: &str =
    r"^[A-Za-z0-9._%+\-]+@(?:[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?\.)+[A-Za-z]{2,}$";

const USERNAME_PATTERN: &str = r"^[a-zA-Z0-9_-]+$";

pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 50;

/// Longest accepted recipient address.
pub const EMAIL_MAX_LEN: usize = 254;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(EMAIL_PATTERN).expect("valid regex"));

static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(USERNAME_PATTERN).expect("valid regex"));

pub fn validate_email(email: &str) -> CoreResult<()> {
    if email.len() > EMAIL_MAX_LEN || !EMAIL_RE.is_match(email) {
        return Err(CoreError::Validation("Invalid email address".into()));
    }
    Ok(())
}

pub fn validate_username(username: &str) -> CoreResult<()> {
    let len = username.chars().count();
    if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
        return Err(CoreError::Validation(format!(
            "Username must be {USERNAME_MIN_LEN}-{USERNAME_MAX_LEN} characters"
        )));
    }
    if !USERNAME_RE.is_match(username) {
        return Err(CoreError::Validation(
            "Username may only contain letters, digits, '_' and '-'".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_campus_addresses() {
        assert!(validate_email("student@campus.edu").is_ok());
        assert!(validate_email("first.last+mail@dept.uni.ac.uk").is_ok());
        assert!(validate_email("ops@north-campus.example.edu").is_ok());
    }

    #[test]
    fn rejects_malformed_addresses() {
        for bad in [
            "",
            "no-at-sign",
            "a@b",
            "a@b.c",
            "a b@campus.edu",
            "é@campus.edu",
            "@campus.edu",
            "a@..com",
            "a@-.co",
            "a@campus-.edu",
            "a@.campus.edu",
            "a@campus..edu",
        ] {
            assert!(validate_email(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn username_length_bounds() {
        assert!(validate_username("abc").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username(&"a".repeat(50)).is_ok());
        assert!(validate_username(&"a".repeat(51)).is_err());
    }

    #[test]
    fn username_charset() {
        assert!(validate_username("desk_ops-2").is_ok());
        assert!(validate_username("desk ops").is_err());
        assert!(validate_username("admin;--").is_err());
    }
}
