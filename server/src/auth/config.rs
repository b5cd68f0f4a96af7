/// Session token configuration.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub session_expiry_hours: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "fennec-dev-secret-change-me".into(),
            session_expiry_hours: 720, // 30 days
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AuthConfig::default();
        assert_eq!(config.jwt_secret, "fennec-dev-secret-change-me");
        assert_eq!(config.session_expiry_hours, 720);
    }

    #[test]
    fn test_auth_config_clone() {
        let config = AuthConfig {
            jwt_secret: "s".into(),
            session_expiry_hours: 2,
        };
        let cloned = config.clone();
        assert_eq!(cloned.jwt_secret, "s");
        assert_eq!(cloned.session_expiry_hours, 2);
    }
}
