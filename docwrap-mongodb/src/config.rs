//! Connection configuration.

use std::time::Duration;

use mongodb::options::{
    Acknowledgment, ClientOptions, ReadPreference as DriverReadPreference, SelectionCriteria,
    WriteConcern as DriverWriteConcern,
};

use crate::error::{MongoError, MongoResult};

/// Connection configuration for [`MongoStore`](crate::mongo::MongoStore).
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// MongoDB connection URI.
    pub uri: String,
    /// Application name (shown in server logs).
    pub app_name: Option<String>,
    /// Minimum connection pool size.
    pub min_pool_size: Option<u32>,
    /// Maximum connection pool size.
    pub max_pool_size: Option<u32>,
    /// Maximum idle time for connections.
    pub max_idle_time: Option<Duration>,
    /// Connection timeout.
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout.
    pub server_selection_timeout: Option<Duration>,
    /// Time limit applied to every store call made through the client.
    pub operation_timeout: Option<Duration>,
    /// Read preference.
    pub read_preference: Option<ReadPreference>,
    /// Write concern.
    pub write_concern: Option<WriteConcern>,
    /// Retry writes.
    pub retry_writes: Option<bool>,
    /// Retry reads.
    pub retry_reads: Option<bool>,
    /// Direct connection (bypass replica set discovery).
    pub direct_connection: Option<bool>,
}

/// Read preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPreference {
    /// Read from primary only.
    #[default]
    Primary,
    /// Read from primary preferred, fallback to secondary.
    PrimaryPreferred,
    /// Read from secondary only.
    Secondary,
    /// Read from secondary preferred, fallback to primary.
    SecondaryPreferred,
    /// Read from nearest member.
    Nearest,
}

impl ReadPreference {
    fn to_driver(self) -> DriverReadPreference {
        match self {
            Self::Primary => DriverReadPreference::Primary,
            Self::PrimaryPreferred => DriverReadPreference::PrimaryPreferred {
                options: Default::default(),
            },
            Self::Secondary => DriverReadPreference::Secondary {
                options: Default::default(),
            },
            Self::SecondaryPreferred => DriverReadPreference::SecondaryPreferred {
                options: Default::default(),
            },
            Self::Nearest => DriverReadPreference::Nearest {
                options: Default::default(),
            },
        }
    }
}

/// Write concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteConcern {
    /// Acknowledge writes from the specified number of nodes.
    W(u32),
    /// Acknowledge writes from majority of nodes.
    Majority,
    /// Custom tag set.
    Custom(String),
}

impl WriteConcern {
    fn to_driver(&self) -> DriverWriteConcern {
        let w = match self {
            Self::W(n) => Acknowledgment::Nodes(*n),
            Self::Majority => Acknowledgment::Majority,
            Self::Custom(tag) => Acknowledgment::Custom(tag.clone()),
        };
        DriverWriteConcern::builder().w(w).build()
    }
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            app_name: Some("docwrap".to_string()),
            min_pool_size: None,
            max_pool_size: Some(10),
            max_idle_time: Some(Duration::from_secs(300)),
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            operation_timeout: None,
            read_preference: Some(ReadPreference::Primary),
            write_concern: None,
            retry_writes: Some(true),
            retry_reads: Some(true),
            direct_connection: None,
        }
    }
}

impl ConnectConfig {
    /// Create a configuration from a MongoDB URI.
    pub fn from_uri(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }

    /// Create a builder for configuration.
    pub fn builder() -> ConnectConfigBuilder {
        ConnectConfigBuilder::new()
    }

    /// Convert to driver client options.
    pub async fn to_client_options(&self) -> MongoResult<ClientOptions> {
        let mut options = ClientOptions::parse(&self.uri)
            .await
            .map_err(|e| MongoError::config(format!("failed to parse URI: {}", e)))?;

        if let Some(ref app_name) = self.app_name {
            options.app_name = Some(app_name.clone());
        }
        if let Some(min_pool) = self.min_pool_size {
            options.min_pool_size = Some(min_pool);
        }
        if let Some(max_pool) = self.max_pool_size {
            options.max_pool_size = Some(max_pool);
        }
        if let Some(max_idle) = self.max_idle_time {
            options.max_idle_time = Some(max_idle);
        }
        if let Some(connect_timeout) = self.connect_timeout {
            options.connect_timeout = Some(connect_timeout);
        }
        if let Some(selection_timeout) = self.server_selection_timeout {
            options.server_selection_timeout = Some(selection_timeout);
        }
        if let Some(read_pref) = self.read_preference {
            options.selection_criteria =
                Some(SelectionCriteria::ReadPreference(read_pref.to_driver()));
        }
        if let Some(ref wc) = self.write_concern {
            options.write_concern = Some(wc.to_driver());
        }
        if let Some(retry_writes) = self.retry_writes {
            options.retry_writes = Some(retry_writes);
        }
        if let Some(retry_reads) = self.retry_reads {
            options.retry_reads = Some(retry_reads);
        }
        if let Some(direct) = self.direct_connection {
            options.direct_connection = Some(direct);
        }

        Ok(options)
    }
}

/// Builder for [`ConnectConfig`].
#[derive(Debug, Default)]
pub struct ConnectConfigBuilder {
    uri: Option<String>,
    app_name: Option<String>,
    min_pool_size: Option<u32>,
    max_pool_size: Option<u32>,
    max_idle_time: Option<Duration>,
    connect_timeout: Option<Duration>,
    server_selection_timeout: Option<Duration>,
    operation_timeout: Option<Duration>,
    read_preference: Option<ReadPreference>,
    write_concern: Option<WriteConcern>,
    retry_writes: Option<bool>,
    retry_reads: Option<bool>,
    direct_connection: Option<bool>,
}

impl ConnectConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the MongoDB URI.
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    /// Set the minimum pool size.
    pub fn min_pool_size(mut self, size: u32) -> Self {
        self.min_pool_size = Some(size);
        self
    }

    /// Set the maximum pool size.
    pub fn max_pool_size(mut self, size: u32) -> Self {
        self.max_pool_size = Some(size);
        self
    }

    /// Set the maximum idle time for connections.
    pub fn max_idle_time(mut self, duration: Duration) -> Self {
        self.max_idle_time = Some(duration);
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.connect_timeout = Some(duration);
        self
    }

    /// Set the server selection timeout.
    pub fn server_selection_timeout(mut self, duration: Duration) -> Self {
        self.server_selection_timeout = Some(duration);
        self
    }

    /// Bound every store call made through the client.
    pub fn operation_timeout(mut self, duration: Duration) -> Self {
        self.operation_timeout = Some(duration);
        self
    }

    /// Set the read preference.
    pub fn read_preference(mut self, pref: ReadPreference) -> Self {
        self.read_preference = Some(pref);
        self
    }

    /// Set the write concern.
    pub fn write_concern(mut self, wc: WriteConcern) -> Self {
        self.write_concern = Some(wc);
        self
    }

    /// Enable or disable retry writes.
    pub fn retry_writes(mut self, enabled: bool) -> Self {
        self.retry_writes = Some(enabled);
        self
    }

    /// Enable or disable retry reads.
    pub fn retry_reads(mut self, enabled: bool) -> Self {
        self.retry_reads = Some(enabled);
        self
    }

    /// Enable direct connection (bypass replica set discovery).
    pub fn direct_connection(mut self, enabled: bool) -> Self {
        self.direct_connection = Some(enabled);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> MongoResult<ConnectConfig> {
        let uri = self
            .uri
            .unwrap_or_else(|| "mongodb://localhost:27017".to_string());
        if !uri.starts_with("mongodb://") && !uri.starts_with("mongodb+srv://") {
            return Err(MongoError::config(format!(
                "URI must start with mongodb:// or mongodb+srv://, got '{}'",
                uri
            )));
        }

        if let (Some(min), Some(max)) = (self.min_pool_size, self.max_pool_size) {
            if min > max {
                return Err(MongoError::config(format!(
                    "min_pool_size ({}) exceeds max_pool_size ({})",
                    min, max
                )));
            }
        }

        let defaults = ConnectConfig::default();
        Ok(ConnectConfig {
            uri,
            app_name: self.app_name.or(defaults.app_name),
            min_pool_size: self.min_pool_size,
            max_pool_size: self.max_pool_size.or(defaults.max_pool_size),
            max_idle_time: self.max_idle_time.or(defaults.max_idle_time),
            connect_timeout: self.connect_timeout.or(defaults.connect_timeout),
            server_selection_timeout: self
                .server_selection_timeout
                .or(defaults.server_selection_timeout),
            operation_timeout: self.operation_timeout,
            read_preference: self.read_preference.or(defaults.read_preference),
            write_concern: self.write_concern,
            retry_writes: self.retry_writes.or(defaults.retry_writes),
            retry_reads: self.retry_reads.or(defaults.retry_reads),
            direct_connection: self.direct_connection,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_uri() {
        let config = ConnectConfig::from_uri("mongodb://db.internal:27017");
        assert_eq!(config.uri, "mongodb://db.internal:27017");
        assert_eq!(config.max_pool_size, Some(10));
        assert_eq!(config.operation_timeout, None);
    }

    #[test]
    fn test_config_builder() {
        let config = ConnectConfig::builder()
            .uri("mongodb://localhost:27017")
            .app_name("test-app")
            .max_pool_size(20)
            .operation_timeout(Duration::from_secs(3))
            .build()
            .unwrap();

        assert_eq!(config.app_name, Some("test-app".to_string()));
        assert_eq!(config.max_pool_size, Some(20));
        assert_eq!(config.operation_timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.retry_writes, Some(true));
    }

    #[test]
    fn test_config_builder_rejects_bad_uri() {
        let err = ConnectConfig::builder()
            .uri("postgres://localhost")
            .build()
            .unwrap_err();
        assert!(matches!(err, MongoError::Config(_)));
    }

    #[test]
    fn test_config_builder_rejects_inverted_pool() {
        let result = ConnectConfig::builder()
            .min_pool_size(20)
            .max_pool_size(5)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_read_preference_default() {
        let pref: ReadPreference = Default::default();
        assert_eq!(pref, ReadPreference::Primary);
    }

    #[tokio::test]
    async fn test_to_client_options() {
        let config = ConnectConfig::builder()
            .uri("mongodb://localhost:27017")
            .app_name("opts")
            .direct_connection(true)
            .write_concern(WriteConcern::Majority)
            .build()
            .unwrap();
        let options = config.to_client_options().await.unwrap();
        assert_eq!(options.app_name.as_deref(), Some("opts"));
        assert_eq!(options.direct_connection, Some(true));
        assert!(options.write_concern.is_some());
    }
}
