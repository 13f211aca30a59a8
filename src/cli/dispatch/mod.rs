use crate::cli::{
    actions::{server, Action},
    commands::{auth, store, ARG_TRUST_PROXY_HEADERS},
    globals::GlobalArgs,
};
use anyhow::{anyhow, Result};

/// Turn parsed arguments into the action to run.
///
/// # Errors
///
/// Returns an error if a required argument is missing
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let auth = auth::Options::parse(matches)?;
    let store = store::Options::parse(matches);

    Ok(Action::Server(server::Args {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        dsn: matches
            .get_one("dsn")
            .map(|s: &String| s.to_string())
            .ok_or_else(|| anyhow!("missing required argument: --dsn"))?,
        globals: GlobalArgs::new(auth.jwt_secret, store.redis_url),
        access_token_ttl_seconds: auth.access_token_ttl_seconds,
        refresh_token_ttl_seconds: auth.refresh_token_ttl_seconds,
        min_response_ms: auth.min_response_ms,
        store_timeout_ms: store.timeout_ms,
        trust_proxy_headers: matches.get_flag(ARG_TRUST_PROXY_HEADERS),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;
    use secrecy::ExposeSecret;

    #[test]
    fn test_handler_server() {
        temp_env::with_vars(
            [
                ("TOLLGATE_REDIS_URL", None::<&str>),
                ("TOLLGATE_PORT", None::<&str>),
                ("TOLLGATE_TRUST_PROXY_HEADERS", None::<&str>),
            ],
            || {
                let matches = commands::new().get_matches_from(vec![
                    "tollgate",
                    "--dsn",
                    "postgres://localhost/tollgate",
                    "--jwt-secret",
                    "k9Qm2xV7pL4tR8wZ1nB6cY3hJ5dF0sGq",
                    "--min-response-ms",
                    "50",
                ]);

                let Action::Server(args) = handler(&matches).expect("dispatch");
                assert_eq!(args.port, 8080);
                assert_eq!(args.dsn, "postgres://localhost/tollgate");
                assert_eq!(args.access_token_ttl_seconds, 900);
                assert_eq!(args.refresh_token_ttl_seconds, 604_800);
                assert_eq!(args.min_response_ms, 50);
                assert_eq!(args.store_timeout_ms, 500);
                assert!(!args.trust_proxy_headers);
                assert!(args.globals.redis_url.is_none());
                assert_eq!(
                    args.globals.jwt_secret.expose_secret(),
                    "k9Qm2xV7pL4tR8wZ1nB6cY3hJ5dF0sGq"
                );
            },
        );
    }
}
