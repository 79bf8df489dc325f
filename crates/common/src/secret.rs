//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for connection strings and other
//! credentials in service configuration. `SecretString` implements `Debug`
//! with redaction, so a config struct that derives or hand-writes `Debug`
//! cannot leak a Redis URL (which may embed a password) into the logs.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! let redis_url = SecretString::from("redis://:hunter2@cache:6379");
//! assert!(!format!("{redis_url:?}").contains("hunter2"));
//! assert_eq!(redis_url.expose_secret(), "redis://:hunter2@cache:6379");
//! ```

pub use secrecy::{ExposeSecret, SecretString};

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("redis://:pw@localhost:6379");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("pw@localhost"));
    }

    #[test]
    fn test_expose_secret_returns_inner_value() {
        let secret = SecretString::from("redis://localhost:6379");
        assert_eq!(secret.expose_secret(), "redis://localhost:6379");
    }

    #[test]
    fn test_struct_with_secret_is_safe() {
        #[allow(dead_code)]
        #[derive(Debug)]
        struct StorageSettings {
            backend: String,
            url: SecretString,
        }

        let settings = StorageSettings {
            backend: "redis".to_string(),
            url: SecretString::from("redis://:super-secret@cache:6379"),
        };

        let debug_str = format!("{settings:?}");

        assert!(debug_str.contains("redis"));
        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("super-secret"));
    }

    #[test]
    fn test_deserialize() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct StorageSettings {
            backend: String,
            url: SecretString,
        }

        let json = r#"{"backend": "redis", "url": "redis://:my-secret-value@cache"}"#;
        let settings: StorageSettings = serde_json::from_str(json).expect("deserialize");

        assert_eq!(
            settings.url.expose_secret(),
            "redis://:my-secret-value@cache"
        );

        let debug = format!("{settings:?}");
        assert!(!debug.contains("my-secret-value"));
        assert!(debug.contains("REDACTED"));
    }
}
