/// Maximum message content length (characters).
pub const MAX_MESSAGE_LENGTH: usize = 2000;

/// Maximum server and channel name length.
pub const MAX_NAME_LENGTH: usize = 100;

/// Maximum server and channel description length.
pub const MAX_DESCRIPTION_LENGTH: usize = 500;

/// Maximum display name length.
pub const MAX_DISPLAY_NAME_LENGTH: usize = 32;

/// Maximum avatar, icon and banner URL length.
pub const MAX_IMAGE_URL_LENGTH: usize = 2048;

/// Maximum message nonce length.
pub const MAX_NONCE_LENGTH: usize = 64;

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn validate_name(kind: &str, name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err(format!("{kind} name cannot be empty"));
    }
    if char_len(name) > MAX_NAME_LENGTH {
        return Err(format!(
            "{kind} name too long (max {} characters)",
            MAX_NAME_LENGTH
        ));
    }
    Ok(())
}

/// Validate a server name. Must be 1-100 chars and not blank.
pub fn validate_server_name(name: &str) -> Result<(), String> {
    validate_name("Server", name)
}

/// Validate a channel name. Must be 1-100 chars and not blank.
pub fn validate_channel_name(name: &str) -> Result<(), String> {
    validate_name("Channel", name)
}

/// Validate a server or channel description. May be empty.
pub fn validate_description(description: &str) -> Result<(), String> {
    if char_len(description) > MAX_DESCRIPTION_LENGTH {
        return Err(format!(
            "Description too long (max {} characters)",
            MAX_DESCRIPTION_LENGTH
        ));
    }
    Ok(())
}

/// Validate message content. Must be non-empty and under the length limit.
pub fn validate_message(content: &str) -> Result<(), String> {
    if content.trim().is_empty() {
        return Err("Message cannot be empty".into());
    }
    if char_len(content) > MAX_MESSAGE_LENGTH {
        return Err(format!(
            "Message too long (max {} characters)",
            MAX_MESSAGE_LENGTH
        ));
    }
    Ok(())
}

/// Validate a display name. Must be 1-32 chars with no control characters.
pub fn validate_display_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Display name cannot be empty".into());
    }
    if char_len(name) > MAX_DISPLAY_NAME_LENGTH {
        return Err(format!(
            "Display name too long (max {} characters)",
            MAX_DISPLAY_NAME_LENGTH
        ));
    }
    if name.chars().any(char::is_control) {
        return Err("Display name cannot contain control characters".into());
    }
    Ok(())
}

/// Validate an avatar, icon or banner URL: absolute http(s) with a host.
pub fn validate_image_url(url: &str) -> Result<(), String> {
    if char_len(url) > MAX_IMAGE_URL_LENGTH {
        return Err(format!("URL too long (max {} characters)", MAX_IMAGE_URL_LENGTH));
    }
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| "URL must start with http:// or https://".to_string())?;
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    if host.is_empty() {
        return Err("URL must include a host".into());
    }
    if url.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err("URL cannot contain whitespace".into());
    }
    Ok(())
}

/// Validate a client message nonce. Opaque, but short and printable.
pub fn validate_nonce(nonce: &str) -> Result<(), String> {
    if nonce.is_empty() {
        return Err("Nonce cannot be empty".into());
    }
    if char_len(nonce) > MAX_NONCE_LENGTH {
        return Err(format!("Nonce too long (max {} characters)", MAX_NONCE_LENGTH));
    }
    if nonce.chars().any(char::is_control) {
        return Err("Nonce cannot contain control characters".into());
    }
    Ok(())
}

/// Validate an invite's maximum use count.
pub fn validate_max_uses(max_uses: i64) -> Result<(), String> {
    if max_uses < 1 {
        return Err("Max uses must be at least 1".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(validate_server_name("Test").is_ok());
        assert!(validate_channel_name("general").is_ok());
        assert!(validate_channel_name("off topic").is_ok());
        assert!(validate_server_name(&"a".repeat(MAX_NAME_LENGTH)).is_ok());
    }

    #[test]
    fn test_invalid_names() {
        assert!(validate_server_name("").is_err());
        assert!(validate_server_name("   ").is_err());
        assert!(validate_channel_name(&"a".repeat(MAX_NAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_name_length_counts_characters() {
        // 100 multibyte characters is still within bounds.
        assert!(validate_channel_name(&"é".repeat(MAX_NAME_LENGTH)).is_ok());
    }

    #[test]
    fn test_description_bounds() {
        assert!(validate_description("").is_ok());
        assert!(validate_description(&"x".repeat(MAX_DESCRIPTION_LENGTH)).is_ok());
        assert!(validate_description(&"x".repeat(MAX_DESCRIPTION_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_message_validation() {
        assert!(validate_message("hello").is_ok());
        assert!(validate_message("").is_err());
        assert!(validate_message(" \n\t ").is_err());
        assert!(validate_message(&"x".repeat(MAX_MESSAGE_LENGTH)).is_ok());
        assert!(validate_message(&"x".repeat(MAX_MESSAGE_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_display_name_validation() {
        assert!(validate_display_name("alice").is_ok());
        assert!(validate_display_name("").is_err());
        assert!(validate_display_name("a\u{0007}b").is_err());
        assert!(validate_display_name(&"a".repeat(MAX_DISPLAY_NAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_max_uses() {
        assert!(validate_max_uses(1).is_ok());
        assert!(validate_max_uses(0).is_err());
        assert!(validate_max_uses(-3).is_err());
    }

    #[test]
    fn test_image_urls() {
        assert!(validate_image_url("https://cdn.example.com/a.png").is_ok());
        assert!(validate_image_url("http://localhost:8080/a.png?size=64").is_ok());
        assert!(validate_image_url("ftp://example.com/a.png").is_err());
        assert!(validate_image_url("https:///a.png").is_err());
        assert!(validate_image_url("https://exa mple.com/a.png").is_err());
        assert!(validate_image_url("javascript:alert(1)").is_err());
        let long = format!("https://example.com/{}", "a".repeat(MAX_IMAGE_URL_LENGTH));
        assert!(validate_image_url(&long).is_err());
    }

    #[test]
    fn test_nonces() {
        assert!(validate_nonce("c-1729").is_ok());
        assert!(validate_nonce("").is_err());
        assert!(validate_nonce(&"n".repeat(MAX_NONCE_LENGTH + 1)).is_err());
        assert!(validate_nonce("a\nb").is_err());
    }
}
