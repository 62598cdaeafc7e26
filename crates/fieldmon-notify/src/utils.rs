//! Utility functions for notification channels

use serde_json::Value;

/// Maximum length of an external response body kept in an error message.
pub const MAX_BODY_LENGTH: usize = 4000;

/// Truncates `s` to at most `max_len` bytes on a char boundary.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &s[..end])
}

/// Redact sensitive fields from JSON configuration
///
/// Replaces values for fields that commonly contain sensitive information:
/// - password, passwd, pwd
/// - token, access_token, refresh_token
/// - secret, client_secret
/// - api_key, apikey
/// - credentials
pub fn redact_sensitive_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = serde_json::Map::new();
            for (key, val) in map {
                let key_lower = key.to_lowercase();
                let is_sensitive = key_lower.contains("password")
                    || key_lower.contains("passwd")
                    || key_lower.contains("pwd")
                    || key_lower.contains("token")
                    || key_lower.contains("secret")
                    || key_lower.contains("api_key")
                    || key_lower.contains("apikey")
                    || key_lower.contains("credentials");

                if is_sensitive {
                    redacted.insert(key.clone(), Value::String("***".to_string()));
                } else {
                    redacted.insert(key.clone(), redact_sensitive_json(val));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(redact_sensitive_json).collect()),
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("hello", 10), "hello");
        assert_eq!(truncate_string("hello world", 5), "hello... [truncated]");
        // Does not split a multi-byte char
        assert_eq!(truncate_string("température", 4), "temp... [truncated]");
        assert_eq!(truncate_string("tempé", 5), "temp... [truncated]");
    }

    #[test]
    fn test_redact_sensitive_json() {
        let json = serde_json::json!({
            "smtp_username": "alerts",
            "smtp_password": "secret123",
            "api_key": "abc123",
            "smtp_host": "smtp.example.com",
            "headers": {
                "x-auth-token": "xyz789",
                "x-site": "north-yard"
            }
        });

        let redacted = redact_sensitive_json(&json);
        assert_eq!(redacted["smtp_username"], "alerts");
        assert_eq!(redacted["smtp_password"], "***");
        assert_eq!(redacted["api_key"], "***");
        assert_eq!(redacted["smtp_host"], "smtp.example.com");
        assert_eq!(redacted["headers"]["x-auth-token"], "***");
        assert_eq!(redacted["headers"]["x-site"], "north-yard");
    }
}
