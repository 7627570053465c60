//! Pool configuration.
//!
//! A [`PoolConfig`] is freely mutable until it is finalized with
//! [`PoolConfig::check`], which validates every field and produces a
//! read-only [`CheckedConfig`]. The pool only ever sees the checked form, so
//! no setting can change underneath a running pool.

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::time::Duration;

use beecp_driver::Properties;

use crate::error::{PoolError, Result};

/// Property keys understood by [`PoolConfig::from_properties`].
pub mod keys {
    /// Driver name.
    pub const DRIVER_CLASS_NAME: &str = "driverClassName";
    /// Connection URL.
    pub const URL: &str = "url";
    /// User name.
    pub const USERNAME: &str = "username";
    /// Password.
    pub const PASSWORD: &str = "password";
    /// Initial pool size.
    pub const INITIAL_SIZE: &str = "initialSize";
    /// Maximum pool size.
    pub const MAX_ACTIVE: &str = "maxActive";
    /// Borrower wait time in milliseconds.
    pub const MAX_WAIT: &str = "maxWait";
    /// `true`/`Y` selects fair mode.
    pub const FAIR_MODE: &str = "fairMode";
    /// Validation query text.
    pub const VALIDATION_QUERY: &str = "validationQuery";
    /// Validation timeout in seconds.
    pub const VALIDATION_QUERY_TIMEOUT: &str = "validationQueryTimeout";
    /// Idle eviction threshold in milliseconds.
    pub const MIN_EVICTABLE_IDLE_TIME_MILLIS: &str = "minEvictableIdleTimeMillis";
    /// `true`/`Y` enables the prepared statement cache.
    pub const POOL_PREPARED_STATEMENTS: &str = "poolPreparedStatements";
    /// Prepared statement cache size.
    pub const MAX_OPEN_PREPARED_STATEMENTS: &str = "maxOpenPreparedStatements";
}

/// Configuration for a connection pool.
#[derive(Clone)]
pub struct PoolConfig {
    /// Name of the driver to resolve in the registry.
    pub driver: String,

    /// Connection URL.
    pub url: String,

    /// User name, passed to the driver as the `user` property.
    pub user: String,

    /// Password, passed to the driver as the `password` property.
    pub password: String,

    /// Extra driver properties.
    pub properties: Properties,

    /// Serve waiting borrowers in arrival order (default: false).
    pub fair_mode: bool,

    /// Connections created eagerly at startup (default: 0).
    pub pool_init_size: usize,

    /// Hard upper bound on pooled connections (default: 10).
    pub pool_max_size: usize,

    /// Per-connection prepared statement cache capacity; 0 disables caching (default: 10).
    pub prepared_statement_cache_size: usize,

    /// Maximum time `borrow` blocks (default: 180s).
    pub borrower_max_wait_time: Duration,

    /// Idle connections older than this are evicted (default: 180s).
    pub connection_idle_timeout: Duration,

    /// Liveness query; blank disables validation (default: `select 1`).
    pub validation_query_sql: String,

    /// Deadline for a single validation query (default: 5s).
    pub validation_query_timeout: Duration,

    /// In-use connections inactive longer than this are checked (default: 1s).
    pub max_inactive_time_to_check: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            driver: String::new(),
            url: String::new(),
            user: String::new(),
            password: String::new(),
            properties: Properties::new(),
            fair_mode: false,
            pool_init_size: 0,
            pool_max_size: 10,
            prepared_statement_cache_size: 10,
            borrower_max_wait_time: Duration::from_secs(180),
            connection_idle_timeout: Duration::from_secs(180),
            validation_query_sql: "select 1".to_string(),
            validation_query_timeout: Duration::from_secs(5),
            max_inactive_time_to_check: Duration::from_secs(1),
        }
    }
}

impl PoolConfig {
    /// Create a configuration for the given driver, URL and credentials.
    #[must_use]
    pub fn new(
        driver: impl Into<String>,
        url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            driver: driver.into(),
            url: url.into(),
            user: user.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    /// Build a configuration from factory-style properties.
    ///
    /// Unknown keys are ignored. The statement cache is only enabled when
    /// `poolPreparedStatements` is `true` or `Y`.
    pub fn from_properties(props: &Properties) -> Result<Self> {
        let text = |key: &str| props.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        let mut config = Self::new(
            text(keys::DRIVER_CLASS_NAME).unwrap_or_default(),
            text(keys::URL).unwrap_or_default(),
            text(keys::USERNAME).unwrap_or_default(),
            text(keys::PASSWORD).unwrap_or_default(),
        );

        if let Some(v) = text(keys::MAX_ACTIVE) {
            config.pool_max_size = parse_number(keys::MAX_ACTIVE, v)?;
        }
        if let Some(v) = text(keys::INITIAL_SIZE) {
            config.pool_init_size = parse_number(keys::INITIAL_SIZE, v)?;
        }
        if let Some(v) = text(keys::MAX_WAIT) {
            config.borrower_max_wait_time = Duration::from_millis(parse_number(keys::MAX_WAIT, v)?);
        }
        if let Some(v) = text(keys::VALIDATION_QUERY) {
            config.validation_query_sql = v.to_string();
        }
        if let Some(v) = text(keys::VALIDATION_QUERY_TIMEOUT) {
            config.validation_query_timeout =
                Duration::from_secs(parse_number(keys::VALIDATION_QUERY_TIMEOUT, v)?);
        }
        if let Some(v) = text(keys::MIN_EVICTABLE_IDLE_TIME_MILLIS) {
            config.connection_idle_timeout =
                Duration::from_millis(parse_number(keys::MIN_EVICTABLE_IDLE_TIME_MILLIS, v)?);
        }

        if text(keys::POOL_PREPARED_STATEMENTS).is_some_and(is_truthy) {
            if let Some(v) = text(keys::MAX_OPEN_PREPARED_STATEMENTS) {
                config.prepared_statement_cache_size =
                    parse_number(keys::MAX_OPEN_PREPARED_STATEMENTS, v)?;
            }
        } else {
            config.prepared_statement_cache_size = 0;
        }

        config.fair_mode = text(keys::FAIR_MODE).is_some_and(is_truthy);

        for key in props.keys() {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                tracing::debug!(key = %key, "ignoring unknown pool property");
            }
        }

        Ok(config)
    }

    /// Set the connection URL.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set the driver name.
    #[must_use]
    pub fn driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    /// Enable or disable fair mode.
    #[must_use]
    pub fn fair_mode(mut self, fair: bool) -> Self {
        self.fair_mode = fair;
        self
    }

    /// Set the number of connections created at startup.
    #[must_use]
    pub fn pool_init_size(mut self, size: usize) -> Self {
        self.pool_init_size = size;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn pool_max_size(mut self, size: usize) -> Self {
        self.pool_max_size = size;
        self
    }

    /// Set the prepared statement cache capacity (0 disables caching).
    #[must_use]
    pub fn prepared_statement_cache_size(mut self, size: usize) -> Self {
        self.prepared_statement_cache_size = size;
        self
    }

    /// Set the maximum borrower wait time.
    #[must_use]
    pub fn borrower_max_wait_time(mut self, wait: Duration) -> Self {
        self.borrower_max_wait_time = wait;
        self
    }

    /// Set the idle eviction threshold.
    #[must_use]
    pub fn connection_idle_timeout(mut self, timeout: Duration) -> Self {
        self.connection_idle_timeout = timeout;
        self
    }

    /// Set the validation query; blank disables validation.
    #[must_use]
    pub fn validation_query_sql(mut self, sql: impl Into<String>) -> Self {
        self.validation_query_sql = sql.into();
        self
    }

    /// Set the validation query deadline.
    #[must_use]
    pub fn validation_query_timeout(mut self, timeout: Duration) -> Self {
        self.validation_query_timeout = timeout;
        self
    }

    /// Set the inactivity threshold for probing in-use connections.
    #[must_use]
    pub fn max_inactive_time_to_check(mut self, threshold: Duration) -> Self {
        self.max_inactive_time_to_check = threshold;
        self
    }

    /// Add an extra driver property.
    #[must_use]
    pub fn add_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Remove an extra driver property.
    #[must_use]
    pub fn remove_property(mut self, key: &str) -> Self {
        self.properties.remove(key);
        self
    }

    /// Validate every field and freeze the configuration.
    pub fn check(self) -> Result<CheckedConfig> {
        if is_blank(&self.driver) {
            return Err(config_error("driver name can't be blank"));
        }
        if is_blank(&self.url) {
            return Err(config_error("connection URL can't be blank"));
        }
        if self.pool_max_size == 0 {
            return Err(config_error("pool_max_size must be greater than zero"));
        }
        if self.pool_init_size > self.pool_max_size {
            return Err(config_error(
                "pool_init_size cannot be greater than pool_max_size",
            ));
        }
        if self.connection_idle_timeout.is_zero() {
            return Err(config_error(
                "connection_idle_timeout must be greater than zero",
            ));
        }
        if self.borrower_max_wait_time.is_zero() {
            return Err(config_error(
                "borrower_max_wait_time must be greater than zero",
            ));
        }
        if self.validation_query_timeout.is_zero() {
            return Err(config_error(
                "validation_query_timeout must be greater than zero",
            ));
        }
        if self.max_inactive_time_to_check.is_zero() {
            return Err(config_error(
                "max_inactive_time_to_check must be greater than zero",
            ));
        }
        if !is_blank(&self.validation_query_sql) && !is_select(&self.validation_query_sql) {
            return Err(config_error("validation query must start with 'select '"));
        }

        let mut connect_properties = self.properties.clone();
        if !is_blank(&self.user) {
            connect_properties.insert("user".to_string(), self.user.clone());
        }
        if !is_blank(&self.password) {
            connect_properties.insert("password".to_string(), self.password.clone());
        }

        Ok(CheckedConfig {
            inner: self,
            connect_properties,
        })
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("driver", &self.driver)
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("fair_mode", &self.fair_mode)
            .field("pool_init_size", &self.pool_init_size)
            .field("pool_max_size", &self.pool_max_size)
            .field(
                "prepared_statement_cache_size",
                &self.prepared_statement_cache_size,
            )
            .field("borrower_max_wait_time", &self.borrower_max_wait_time)
            .field("connection_idle_timeout", &self.connection_idle_timeout)
            .field("validation_query_sql", &self.validation_query_sql)
            .field("validation_query_timeout", &self.validation_query_timeout)
            .field(
                "max_inactive_time_to_check",
                &self.max_inactive_time_to_check,
            )
            .finish_non_exhaustive()
    }
}

/// A validated, immutable pool configuration.
///
/// Dereferences to [`PoolConfig`] for read access only.
#[derive(Debug, Clone)]
pub struct CheckedConfig {
    inner: PoolConfig,
    connect_properties: Properties,
}

impl CheckedConfig {
    /// Properties passed to the driver, including `user` and `password`.
    #[must_use]
    pub fn connect_properties(&self) -> &Properties {
        &self.connect_properties
    }

    /// Whether connections are validated on creation.
    #[must_use]
    pub fn validation_enabled(&self) -> bool {
        !is_blank(&self.inner.validation_query_sql)
    }

    /// Period of the idle scanner.
    #[must_use]
    pub fn scan_period(&self) -> Duration {
        self.inner
            .connection_idle_timeout
            .min(self.inner.max_inactive_time_to_check)
    }
}

impl Deref for CheckedConfig {
    type Target = PoolConfig;

    fn deref(&self) -> &PoolConfig {
        &self.inner
    }
}

const KNOWN_KEYS: &[&str] = &[
    keys::DRIVER_CLASS_NAME,
    keys::URL,
    keys::USERNAME,
    keys::PASSWORD,
    keys::INITIAL_SIZE,
    keys::MAX_ACTIVE,
    keys::MAX_WAIT,
    keys::FAIR_MODE,
    keys::VALIDATION_QUERY,
    keys::VALIDATION_QUERY_TIMEOUT,
    keys::MIN_EVICTABLE_IDLE_TIME_MILLIS,
    keys::POOL_PREPARED_STATEMENTS,
    keys::MAX_OPEN_PREPARED_STATEMENTS,
];

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// Whether `sql` is a query, ignoring case and leading whitespace.
fn is_select(sql: &str) -> bool {
    use once_cell::sync::Lazy;
    use regex::Regex;

    // literal pattern, cannot fail to compile
    #[allow(clippy::unwrap_used)]
    static SELECT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^select\s").unwrap());

    SELECT_RE.is_match(sql.trim())
}

fn is_truthy(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("y")
}

fn config_error(message: &str) -> PoolError {
    PoolError::Config(message.to_string())
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| PoolError::Config(format!("invalid {key}: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> PoolConfig {
        PoolConfig::new("mock", "mock://db", "sa", "secret")
    }

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.pool_init_size, 0);
        assert_eq!(config.pool_max_size, 10);
        assert_eq!(config.prepared_statement_cache_size, 10);
        assert_eq!(config.validation_query_sql, "select 1");
        assert!(!config.fair_mode);
    }

    #[test]
    fn test_check_accepts_valid_config() {
        let checked = valid().pool_init_size(2).pool_max_size(4).check().unwrap();
        assert_eq!(checked.pool_max_size, 4);
        assert_eq!(checked.connect_properties().get("user").unwrap(), "sa");
        assert_eq!(checked.connect_properties().get("password").unwrap(), "secret");
        assert!(checked.validation_enabled());
    }

    #[test]
    fn test_check_rejects_init_above_max() {
        let err = valid().pool_init_size(5).pool_max_size(4).check().unwrap_err();
        assert!(matches!(err, PoolError::Config(_)));
    }

    #[test]
    fn test_check_rejects_blank_identity() {
        assert!(PoolConfig::new("", "mock://db", "", "").check().is_err());
        assert!(PoolConfig::new("mock", "  ", "", "").check().is_err());
    }

    #[test]
    fn test_check_rejects_zero_durations() {
        assert!(valid().borrower_max_wait_time(Duration::ZERO).check().is_err());
        assert!(valid().connection_idle_timeout(Duration::ZERO).check().is_err());
        assert!(valid().validation_query_timeout(Duration::ZERO).check().is_err());
        assert!(valid().max_inactive_time_to_check(Duration::ZERO).check().is_err());
        assert!(valid().pool_max_size(0).check().is_err());
    }

    #[test]
    fn test_validation_sql_must_start_with_select() {
        assert!(valid().validation_query_sql("SELECT 1").check().is_ok());
        assert!(valid().validation_query_sql("  select 1 from dual").check().is_ok());
        assert!(valid().validation_query_sql("delete from t").check().is_err());
        assert!(valid().validation_query_sql("selectx").check().is_err());
        // blank disables validation rather than failing
        let checked = valid().validation_query_sql("").check().unwrap();
        assert!(!checked.validation_enabled());
    }

    #[test]
    fn test_scan_period_is_smaller_threshold() {
        let checked = valid()
            .connection_idle_timeout(Duration::from_secs(60))
            .max_inactive_time_to_check(Duration::from_secs(2))
            .check()
            .unwrap();
        assert_eq!(checked.scan_period(), Duration::from_secs(2));
    }

    #[test]
    fn test_from_properties() {
        let props: Properties = [
            ("driverClassName", "mock"),
            ("url", "mock://db"),
            ("username", "app"),
            ("password", "pw"),
            ("initialSize", "2"),
            ("maxActive", "8"),
            ("maxWait", "1500"),
            ("fairMode", "Y"),
            ("validationQuery", "select 1 from dual"),
            ("validationQueryTimeout", "3"),
            ("minEvictableIdleTimeMillis", "60000"),
            ("poolPreparedStatements", "true"),
            ("maxOpenPreparedStatements", "32"),
            ("somethingElse", "ignored"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = PoolConfig::from_properties(&props).unwrap();
        assert_eq!(config.driver, "mock");
        assert_eq!(config.user, "app");
        assert_eq!(config.pool_init_size, 2);
        assert_eq!(config.pool_max_size, 8);
        assert_eq!(config.borrower_max_wait_time, Duration::from_millis(1500));
        assert!(config.fair_mode);
        assert_eq!(config.validation_query_timeout, Duration::from_secs(3));
        assert_eq!(config.connection_idle_timeout, Duration::from_secs(60));
        assert_eq!(config.prepared_statement_cache_size, 32);
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_from_properties_statement_cache_off_by_default() {
        let props: Properties = [("url".to_string(), "mock://db".to_string())]
            .into_iter()
            .collect();
        let config = PoolConfig::from_properties(&props).unwrap();
        assert_eq!(config.prepared_statement_cache_size, 0);
        assert!(!config.fair_mode);
    }

    #[test]
    fn test_from_properties_rejects_bad_number() {
        let props: Properties = [("maxActive".to_string(), "lots".to_string())]
            .into_iter()
            .collect();
        let err = PoolConfig::from_properties(&props).unwrap_err();
        assert!(err.to_string().contains("maxActive"));
    }

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", valid());
        assert!(!rendered.contains("secret"));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn check_enforces_size_ordering(init in 0usize..64, max in 0usize..64) {
                let result = valid().pool_init_size(init).pool_max_size(max).check();
                prop_assert_eq!(result.is_ok(), max > 0 && init <= max);
            }
        }
    }
}
