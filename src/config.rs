use anyhow::{Context, Result, anyhow};
use std::env;
use std::str::FromStr;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub server_addr: String,
    pub access_token_ttl: usize,
    pub refresh_token_ttl: usize,

    // Rate limiting
    pub rate_login_per_min: u32,
    pub rate_refresh_per_min: u32,
    pub rate_protected_per_min: u32,

    pub api_prefix: String,
    pub log_dir: String,
    pub project_cache_ttl_secs: u64,
    pub run_migrations: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| lookup(key).ok_or_else(|| anyhow!("{key} must be set"));

        Ok(Self {
            server_addr: required("SERVER_ADDR")?,
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            access_token_ttl: parse_or(&lookup, "ACCESS_TOKEN_TTL", 900)?, // 15 min
            refresh_token_ttl: parse_or(&lookup, "REFRESH_TOKEN_TTL", 604_800)?, // 7 days

            rate_login_per_min: parse_or(&lookup, "RATE_LOGIN_PER_MIN", 60)?,
            rate_refresh_per_min: parse_or(&lookup, "RATE_REFRESH_PER_MIN", 30)?,
            rate_protected_per_min: parse_or(&lookup, "RATE_PROTECTED_PER_MIN", 1000)?,

            api_prefix: lookup("API_PREFIX").unwrap_or_else(|| "/api".to_string()),
            log_dir: lookup("LOG_DIR").unwrap_or_else(|| "logs".to_string()),
            project_cache_ttl_secs: parse_or(&lookup, "PROJECT_CACHE_TTL_SECS", 300)?,
            run_migrations: parse_or(&lookup, "RUN_MIGRATIONS", true)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("SERVER_ADDR", "127.0.0.1:8080"),
        ("DATABASE_URL", "mysql://root@localhost/sitecrew"),
        ("JWT_SECRET", "secret"),
    ];

    #[test]
    fn defaults_apply_when_optional_keys_missing() {
        let config = Config::from_lookup(lookup_from(&REQUIRED)).unwrap();

        assert_eq!(config.access_token_ttl, 900);
        assert_eq!(config.refresh_token_ttl, 604_800);
        assert_eq!(config.rate_protected_per_min, 1000);
        assert_eq!(config.api_prefix, "/api");
        assert_eq!(config.log_dir, "logs");
        assert_eq!(config.project_cache_ttl_secs, 300);
        assert!(config.run_migrations);
    }

    #[test]
    fn missing_required_key_is_an_error() {
        let err = Config::from_lookup(lookup_from(&REQUIRED[..2])).unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn invalid_number_is_reported_with_key() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("ACCESS_TOKEN_TTL", "fifteen"));
        let err = Config::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(err.to_string().contains("ACCESS_TOKEN_TTL"));
    }

    #[test]
    fn overrides_are_parsed() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("API_PREFIX", "/api/v1"),
            ("RUN_MIGRATIONS", "false"),
            ("RATE_LOGIN_PER_MIN", " 5 "),
        ]);
        let config = Config::from_lookup(lookup_from(&pairs)).unwrap();

        assert_eq!(config.api_prefix, "/api/v1");
        assert!(!config.run_migrations);
        assert_eq!(config.rate_login_per_min, 5);
    }
}
