use secrecy::SecretString;

/// Secrets shared by every action.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub jwt_secret: SecretString,
    pub redis_url: Option<SecretString>,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(jwt_secret: SecretString, redis_url: Option<SecretString>) -> Self {
        Self {
            jwt_secret,
            redis_url,
        }
    }
}
