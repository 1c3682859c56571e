use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use tracing::{info, warn};

/// Runtime settings, read once from `BOOKINGS_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub template_dir: PathBuf,
    pub static_dir: PathBuf,
    pub mail_template_dir: PathBuf,
    /// `None` logs outgoing mail instead of writing `.eml` files.
    pub mail_dir: Option<PathBuf>,
    pub in_production: bool,
    pub use_cache: bool,
    pub session_lifetime: Duration,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub owner_email: String,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    pub bcrypt_cost: u32,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind: try_load("BOOKINGS_BIND", "0.0.0.0"),
            port: try_load("BOOKINGS_PORT", "8080"),
            data_dir: try_load("BOOKINGS_DATA_DIR", "./data"),
            template_dir: try_load("BOOKINGS_TEMPLATE_DIR", "./templates"),
            static_dir: try_load("BOOKINGS_STATIC_DIR", "./static"),
            mail_template_dir: try_load("BOOKINGS_MAIL_TEMPLATE_DIR", "./email-templates"),
            mail_dir: optional("BOOKINGS_MAIL_DIR"),
            in_production: try_load("BOOKINGS_IN_PRODUCTION", "true"),
            use_cache: try_load("BOOKINGS_USE_CACHE", "true"),
            session_lifetime: Duration::from_secs(try_load(
                "BOOKINGS_SESSION_LIFETIME_SECS",
                "86400",
            )),
            compact_threshold: try_load("BOOKINGS_COMPACT_THRESHOLD", "1000"),
            metrics_port: optional("BOOKINGS_METRICS_PORT"),
            owner_email: try_load("BOOKINGS_OWNER_EMAIL", "me@here.com"),
            admin_email: optional("BOOKINGS_ADMIN_EMAIL"),
            admin_password: optional("BOOKINGS_ADMIN_PASSWORD"),
            bcrypt_cost: try_load("BOOKINGS_BCRYPT_COST", "12"),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }

    /// Settings for tests and local runs: plain-HTTP cookies, live templates
    /// and a cheap bcrypt cost.
    pub fn development(data_dir: PathBuf) -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8080,
            data_dir,
            template_dir: "./templates".into(),
            static_dir: "./static".into(),
            mail_template_dir: "./email-templates".into(),
            mail_dir: None,
            in_production: false,
            use_cache: false,
            session_lifetime: Duration::from_secs(86_400),
            compact_threshold: 1000,
            metrics_port: None,
            owner_email: "me@here.com".into(),
            admin_email: None,
            admin_password: None,
            bcrypt_cost: 4,
        }
    }
}

fn parse_or_default<T: FromStr>(key: &str, raw: &str, default: &str) -> T
where
    T::Err: Display,
{
    raw.trim().parse().unwrap_or_else(|e| {
        warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
        default
            .parse()
            .unwrap_or_else(|_| panic!("default for {key} does not parse"))
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => parse_or_default(key, &raw, default),
        Err(_) => {
            info!("{key} not set, using default: {default}");
            parse_or_default(key, default, default)
        }
    }
}

/// Unset or empty means `None`. A value that fails to parse is logged and
/// treated as unset.
fn optional<T: FromStr>(key: &str) -> Option<T>
where
    T::Err: Display,
{
    let raw = env::var(key).ok().filter(|s| !s.trim().is_empty())?;
    raw.trim()
        .parse()
        .map_err(|e| warn!("Invalid {key} value {raw:?}: {e}, ignoring"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_value_falls_back_to_default() {
        let port: u16 = parse_or_default("BOOKINGS_PORT", "not-a-port", "8080");
        assert_eq!(port, 8080);
        let flag: bool = parse_or_default("BOOKINGS_USE_CACHE", " false ", "true");
        assert!(!flag);
    }

    #[test]
    fn wal_lives_in_data_dir() {
        let config = Config::development(PathBuf::from("/tmp/bookings"));
        assert_eq!(config.wal_path(), PathBuf::from("/tmp/bookings/bookings.wal"));
    }
}
