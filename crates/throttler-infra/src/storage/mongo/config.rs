use std::time::Duration;

/// Collection used when none is configured.
pub const DEFAULT_COLLECTION: &str = "throttler";

/// MongoDB connection configuration for the throttler storage.
#[derive(Debug, Clone)]
pub struct MongoConfig {
    /// Connection string (e.g., mongodb://localhost:27017/app)
    pub url: String,
    /// Database name. Falls back to the database in the URL, then `test`.
    pub database: Option<String>,
    /// Collection holding the counter records
    pub collection: String,
    /// Application name reported to the server
    pub app_name: Option<String>,
    /// Connection pool size; the driver default applies when unset
    pub max_pool_size: Option<u32>,
    /// TCP connect timeout; the URL or driver default applies when unset
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout; the URL or driver default applies when unset
    pub server_selection_timeout: Option<Duration>,
    /// How long an increment waits for the background connection to settle
    pub ready_timeout: Duration,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            url: "mongodb://localhost:27017".to_string(),
            database: None,
            collection: DEFAULT_COLLECTION.to_string(),
            app_name: None,
            max_pool_size: None,
            connect_timeout: None,
            server_selection_timeout: None,
            ready_timeout: Duration::from_secs(30),
        }
    }
}

impl MongoConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let secs = |name: &str| {
            var(name)
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
        };
        let defaults = Self::default();

        Self {
            url: var("MONGODB_URL").unwrap_or(defaults.url),
            database: var("MONGODB_DATABASE").filter(|s| !s.is_empty()),
            collection: var("THROTTLER_COLLECTION")
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.collection),
            app_name: var("MONGODB_APP_NAME").filter(|s| !s.is_empty()),
            max_pool_size: var("MONGODB_MAX_POOL_SIZE").and_then(|s| s.parse().ok()),
            connect_timeout: secs("MONGODB_CONNECT_TIMEOUT_SECS"),
            server_selection_timeout: secs("MONGODB_SERVER_SELECTION_TIMEOUT_SECS"),
            ready_timeout: secs("THROTTLER_READY_TIMEOUT_SECS").unwrap_or(defaults.ready_timeout),
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    pub fn with_max_pool_size(mut self, size: u32) -> Self {
        self.max_pool_size = Some(size);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.server_selection_timeout = Some(timeout);
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }
}
