use serde::{Deserialize, Serialize};

use crate::logic::catalog::ModelDefinition;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub version_control: VersionControlConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub connection_string: Option<String>,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionControlConfig {
    pub default_branch: String,
    /// Name reported for the fixed store that non-versioned models live in.
    pub global_store: String,
    pub merge_candidate_prefix: String,
    /// Request header naming the branch a request works on.
    pub branch_header: String,
    pub routing_enabled: bool,
    /// Author of commits the service makes on its own behalf, `Name <email>`.
    pub system_author: String,
    /// Extra registry entries, same shape as the registry itself.
    #[serde(default)]
    pub versioned_models: Option<serde_json::Value>,
    #[serde(default)]
    pub models: Vec<ModelDefinition>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            max_connections: Some(20),
        }
    }
}

impl Default for VersionControlConfig {
    fn default() -> Self {
        Self {
            default_branch: "main".to_string(),
            global_store: "global".to_string(),
            merge_candidate_prefix: "xxx-merge-candidate".to_string(),
            branch_header: "x-dolt-branch".to_string(),
            routing_enabled: true,
            system_author: "nautobot <nautobot@ntc.com>".to_string(),
            versioned_models: None,
            models: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and config file
    pub fn load() -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        config = config.add_source(config::File::with_name("config").required(false));

        // Keys contain underscores, so nesting uses a double underscore:
        // DOLTVC_VERSION_CONTROL__DEFAULT_BRANCH=trunk
        config = config.add_source(
            config::Environment::with_prefix("DOLTVC")
                .prefix_separator("_")
                .separator("__"),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }

    /// Get the database URL from config or environment
    pub fn database_url(&self) -> anyhow::Result<String> {
        if let Some(connection_string) = &self.database.connection_string {
            return Ok(connection_string.clone());
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            return Ok(url);
        }

        // Default for a local `dolt sql-server`
        Ok("mysql://root@localhost:3306/nautobot".to_string())
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
