/// Longest username accepted at registration, counted in characters.
pub const MAX_USERNAME_CHARS: usize = 20;

/// Usernames are compared trimmed and lowercased everywhere.
pub fn normalize(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Rules a new username must meet before it reaches the credential store.
pub fn is_valid_username(username: &str) -> bool {
    !username.is_empty()
        && username.chars().count() <= MAX_USERNAME_CHARS
        && !username.chars().any(|c| c.is_whitespace() || c.is_control())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_padding() {
        assert_eq!(normalize("  Alice \r"), "alice");
        assert_eq!(normalize("BOB"), "bob");
    }

    #[test]
    fn accepts_plain_names_up_to_the_limit() {
        assert!(is_valid_username("alice"));
        assert!(is_valid_username(&"a".repeat(MAX_USERNAME_CHARS)));
        // Counted in characters, not bytes.
        assert!(is_valid_username(&"é".repeat(MAX_USERNAME_CHARS)));
    }

    #[test]
    fn rejects_empty_long_or_spaced_names() {
        assert!(!is_valid_username(""));
        assert!(!is_valid_username(&"a".repeat(MAX_USERNAME_CHARS + 1)));
        assert!(!is_valid_username("alice smith"));
        assert!(!is_valid_username("alice\tsmith"));
    }

    #[test]
    fn rejects_control_characters() {
        // Relay lines start with the username, so it must not look like a
        // directory marker.
        assert!(!is_valid_username(&normalize("\u{1e}eve")));
        assert!(!is_valid_username("eve\u{0}"));
        assert!(!is_valid_username("\u{7f}eve"));
    }
}
