use serde_json::Value;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Section holding the identity provider settings
pub const IDENTITY_SECTION: &str = "AzureAdB2C";

const DEFAULT_INSTANCE: &str = "https://login.microsoftonline.com";
const DEFAULT_SCOPE_DESCRIPTION: &str = "Access the API";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_HSTS_MAX_AGE: u64 = 30 * 24 * 60 * 60; // 30 days
const DEFAULT_CLOCK_SKEW: u64 = 300;
const DEFAULT_METADATA_REFRESH: u64 = 3600;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration key '{key}'")]
    MissingKey { key: String },

    #[error("Invalid value '{value}' for configuration key '{key}': {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read configuration file {path}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Hosting environment, selected by `APP_ENVIRONMENT`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
    Other(String),
}

impl Environment {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "development" => Environment::Development,
            "staging" => Environment::Staging,
            "production" | "" => Environment::Production,
            _ => Environment::Other(name.trim().to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Environment::Development => "Development",
            Environment::Staging => "Staging",
            Environment::Production => "Production",
            Environment::Other(name) => name,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Flattened key/value view over every configuration source.
///
/// Keys use `:` as section separator and compare case-insensitively.
/// Sources added later override earlier ones.
#[derive(Debug, Clone, Default)]
pub struct LayeredSettings {
    values: BTreeMap<String, String>,
}

impl LayeredSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a JSON settings file; a missing optional file is skipped
    pub fn add_json_file(&mut self, path: &Path, optional: bool) -> Result<(), ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if optional && e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(ConfigError::FileRead {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        let root: Value = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        self.add_json_value(&root);
        Ok(())
    }

    /// Add an already parsed JSON document
    pub fn add_json_value(&mut self, root: &Value) {
        flatten_json("", root, &mut self.values);
    }

    /// Add environment variables; `__` in a name separates sections
    pub fn add_environment<I, K, V>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (name, value) in vars {
            let key = name.as_ref().replace("__", ":");
            self.set(&key, value);
        }
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(normalize_key(key), value.into());
    }

    /// Raw value, including empty strings
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&normalize_key(key)).map(String::as_str)
    }

    /// Value with surrounding whitespace removed; empty values count as absent
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|v| !v.is_empty())
    }

    fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get_non_empty(key).ok_or_else(|| ConfigError::MissingKey {
            key: key.to_string(),
        })
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: fmt::Display,
    {
        match self.get_non_empty(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Values of `key` itself (whitespace separated) plus any `key:N` array entries
    fn list(&self, key: &str) -> Vec<String> {
        let mut items: Vec<String> = self
            .get_non_empty(key)
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let prefix = format!("{}:", normalize_key(key));
        let mut indexed: Vec<(usize, &String)> = self
            .values
            .iter()
            .filter_map(|(k, v)| {
                let index = k.strip_prefix(&prefix)?.parse::<usize>().ok()?;
                Some((index, v))
            })
            .collect();
        indexed.sort_by_key(|(index, _)| *index);
        items.extend(
            indexed
                .into_iter()
                .map(|(_, v)| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        );
        items
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase()
}

fn flatten_json(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) {
    let join = |segment: &str| {
        if prefix.is_empty() {
            segment.to_string()
        } else {
            format!("{}:{}", prefix, segment)
        }
    };

    match value {
        Value::Object(map) => {
            for (k, v) in map {
                flatten_json(&join(k), v, out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten_json(&join(&i.to_string()), v, out);
            }
        }
        Value::String(s) => {
            out.insert(normalize_key(prefix), s.clone());
        }
        Value::Null => {
            out.insert(normalize_key(prefix), String::new());
        }
        other => {
            out.insert(normalize_key(prefix), other.to_string());
        }
    }
}

/// Which bearer validation strategy the host runs with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStrategyKind {
    /// Identity-platform adapter bound to the common multi-tenant authority
    Platform,
    /// Plain JWT bearer validation against the configured tenant
    Direct,
}

impl AuthStrategyKind {
    pub fn name(&self) -> &'static str {
        match self {
            AuthStrategyKind::Platform => "platform",
            AuthStrategyKind::Direct => "direct",
        }
    }

    /// Identity keys that must be present and non-empty for this strategy
    pub fn required_keys(&self) -> &'static [&'static str] {
        match self {
            AuthStrategyKind::Platform => &["ClientId", "Domain", "Scope"],
            AuthStrategyKind::Direct => &["TenantId", "ClientId", "Scope"],
        }
    }
}

impl std::str::FromStr for AuthStrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "platform" => Ok(AuthStrategyKind::Platform),
            "direct" => Ok(AuthStrategyKind::Direct),
            other => Err(format!(
                "unknown strategy '{}', expected 'platform' or 'direct'",
                other
            )),
        }
    }
}

/// Identity provider settings
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Authority base URL, without trailing slash
    pub instance: String,

    /// Directory tenant; not used by the platform strategy
    pub tenant_id: Option<String>,

    /// Application (client) id, the expected token audience
    pub client_id: String,

    /// Directory domain
    pub domain: Option<String>,

    /// Scope identifiers the API exposes
    pub scopes: Vec<String>,

    /// Human readable description for the exposed scopes
    pub scope_description: String,
}

/// Token validation tuning
#[derive(Debug, Clone)]
pub struct AuthenticationConfig {
    pub strategy: AuthStrategyKind,
    pub clock_skew_seconds: u64,
    pub metadata_refresh_seconds: u64,
}

/// Listener and transport policy settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Port used when redirecting plaintext requests; `None` means the scheme default
    pub https_port: Option<u16>,
    pub hsts_max_age_seconds: u64,
    pub hsts_include_subdomains: bool,
}

/// Immutable host configuration, built once at startup
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub identity: IdentityConfig,
    pub authentication: AuthenticationConfig,
    pub required_scopes: Vec<String>,
    pub server: ServerConfig,
    pub docs_title: String,
}

/// Environment entries whose name and value are both valid UTF-8
fn utf8_env_vars<I>(vars: I) -> impl Iterator<Item = (String, String)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter().filter_map(|(key, value)| {
        match (key.into_string(), value.into_string()) {
            (Ok(key), Ok(value)) => Some((key, value)),
            (Ok(key), Err(_)) => {
                debug!(variable = %key, "Skipping environment variable with a non-UTF-8 value");
                None
            }
            (Err(_), _) => None,
        }
    })
}

impl Config {
    /// Load configuration from `appsettings.json`, `appsettings.{Environment}.json`,
    /// a `.env` file and the process environment, in that order of precedence.
    pub fn load() -> Result<Self, ConfigError> {
        // A missing .env file is normal outside local development
        let _ = dotenvy::dotenv();

        let environment =
            Environment::from_name(&std::env::var("APP_ENVIRONMENT").unwrap_or_default());
        let content_root = std::env::var("APP_CONTENT_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let settings = Self::layered_settings(
            &content_root,
            &environment,
            utf8_env_vars(std::env::vars_os()),
        )?;
        Self::from_settings(&settings, environment)
    }

    /// Assemble the configuration layers without reading the process environment
    pub fn layered_settings<I>(
        content_root: &Path,
        environment: &Environment,
        env_vars: I,
    ) -> Result<LayeredSettings, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut settings = LayeredSettings::new();
        settings.add_json_file(&content_root.join("appsettings.json"), true)?;
        settings.add_json_file(
            &content_root.join(format!("appsettings.{}.json", environment.name())),
            true,
        )?;
        settings.add_environment(env_vars);
        Ok(settings)
    }

    /// Build the typed configuration, failing on missing identity keys
    pub fn from_settings(
        settings: &LayeredSettings,
        environment: Environment,
    ) -> Result<Self, ConfigError> {
        let strategy: AuthStrategyKind =
            settings.parse_or("Authentication:Strategy", AuthStrategyKind::Platform)?;

        for key in strategy.required_keys() {
            settings.require(&format!("{}:{}", IDENTITY_SECTION, key))?;
        }

        let identity = Self::identity_from(settings)?;

        let authentication = AuthenticationConfig {
            strategy,
            clock_skew_seconds: settings
                .parse_or("Authentication:ClockSkewSeconds", DEFAULT_CLOCK_SKEW)?,
            metadata_refresh_seconds: settings
                .parse_or("Authentication:MetadataRefreshSeconds", DEFAULT_METADATA_REFRESH)?,
        };

        let port = match settings.get_non_empty("PORT") {
            Some(_) => settings.parse_or("PORT", DEFAULT_PORT)?,
            None => settings.parse_or("Server:Port", DEFAULT_PORT)?,
        };

        let https_port = match settings.get_non_empty("Server:HttpsPort") {
            Some(_) => Some(settings.parse_or("Server:HttpsPort", 443u16)?),
            None => None,
        };

        let server = ServerConfig {
            host: settings
                .get_non_empty("Server:Host")
                .unwrap_or("0.0.0.0")
                .to_string(),
            port,
            https_port,
            hsts_max_age_seconds: settings
                .parse_or("Server:HstsMaxAgeSeconds", DEFAULT_HSTS_MAX_AGE)?,
            hsts_include_subdomains: settings.parse_or("Server:HstsIncludeSubDomains", false)?,
        };

        Ok(Config {
            environment,
            identity,
            authentication,
            required_scopes: settings.list("Authorization:RequiredScopes"),
            server,
            docs_title: settings
                .get_non_empty("Documentation:Title")
                .unwrap_or("Web API")
                .to_string(),
        })
    }

    fn identity_from(settings: &LayeredSettings) -> Result<IdentityConfig, ConfigError> {
        let key = |name: &str| format!("{}:{}", IDENTITY_SECTION, name);

        let instance_key = key("Instance");
        let instance = settings
            .get_non_empty(&instance_key)
            .unwrap_or(DEFAULT_INSTANCE);
        Self::validate_instance(&instance_key, instance)?;

        let scopes = settings.list(&key("Scope"));
        if scopes.is_empty() {
            return Err(ConfigError::MissingKey { key: key("Scope") });
        }

        Ok(IdentityConfig {
            instance: instance.trim_end_matches('/').to_string(),
            tenant_id: settings.get_non_empty(&key("TenantId")).map(str::to_string),
            client_id: settings.require(&key("ClientId"))?.to_string(),
            domain: settings.get_non_empty(&key("Domain")).map(str::to_string),
            scopes,
            scope_description: settings
                .get_non_empty(&key("ScopeDescription"))
                .unwrap_or(DEFAULT_SCOPE_DESCRIPTION)
                .to_string(),
        })
    }

    /// The instance must be an absolute http(s) URL without query or fragment
    fn validate_instance(key: &str, instance: &str) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidValue {
            key: key.to_string(),
            value: instance.to_string(),
            reason,
        };

        let url = Url::parse(instance).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "https" | "http") {
            return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(invalid("query and fragment are not allowed".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn platform_settings() -> LayeredSettings {
        let mut settings = LayeredSettings::new();
        settings.add_json_value(&json!({
            "AzureAdB2C": {
                "ClientId": "11111111-2222-3333-4444-555555555555",
                "Domain": "contoso.onmicrosoft.com",
                "Scope": "api://poc/access_as_user"
            }
        }));
        settings
    }

    #[test]
    fn test_flatten_nested_sections_case_insensitive() {
        let settings = platform_settings();
        assert_eq!(
            settings.get("azureadb2c:clientid"),
            Some("11111111-2222-3333-4444-555555555555")
        );
        assert_eq!(
            settings.get("AZUREADB2C:DOMAIN"),
            Some("contoso.onmicrosoft.com")
        );
    }

    #[test]
    fn test_environment_overrides_file_values() {
        let mut settings = platform_settings();
        settings.add_environment([("AzureAdB2C__Domain", "fabrikam.onmicrosoft.com")]);
        assert_eq!(
            settings.get("AzureAdB2C:Domain"),
            Some("fabrikam.onmicrosoft.com")
        );
    }

    #[test]
    fn test_platform_defaults() {
        let config = Config::from_settings(&platform_settings(), Environment::Production).unwrap();
        assert_eq!(config.authentication.strategy, AuthStrategyKind::Platform);
        assert_eq!(config.identity.instance, "https://login.microsoftonline.com");
        assert_eq!(config.identity.scopes, vec!["api://poc/access_as_user"]);
        assert_eq!(config.identity.scope_description, "Access the API");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.https_port, None);
        assert_eq!(config.server.hsts_max_age_seconds, 2_592_000);
        assert!(config.required_scopes.is_empty());
    }

    #[test]
    fn test_direct_strategy_requires_tenant() {
        let mut settings = platform_settings();
        settings.set("Authentication:Strategy", "Direct");

        match Config::from_settings(&settings, Environment::Production) {
            Err(ConfigError::MissingKey { key }) => assert_eq!(key, "AzureAdB2C:TenantId"),
            other => panic!("Expected MissingKey, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_value_counts_as_missing() {
        let mut settings = platform_settings();
        settings.set("AzureAdB2C:ClientId", "   ");

        let err = Config::from_settings(&settings, Environment::Development).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey { ref key } if key == "AzureAdB2C:ClientId"));
        assert!(err.to_string().contains("AzureAdB2C:ClientId"));
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let mut settings = platform_settings();
        settings.set("Authentication:Strategy", "saml");

        let err = Config::from_settings(&settings, Environment::Production).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_invalid_instance_rejected() {
        let mut settings = platform_settings();
        settings.set("AzureAdB2C:Instance", "ftp://login.example.com");

        let err = Config::from_settings(&settings, Environment::Production).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "AzureAdB2C:Instance"));
    }

    #[test]
    fn test_port_env_override() {
        let mut settings = platform_settings();
        settings.set("Server:Port", "9000");
        settings.set("PORT", "3010");

        let config = Config::from_settings(&settings, Environment::Production).unwrap();
        assert_eq!(config.server.port, 3010);
    }

    #[test]
    fn test_required_scopes_from_array_and_string() {
        let mut settings = platform_settings();
        settings.add_json_value(&json!({
            "Authorization": { "RequiredScopes": ["access_as_user", "read"] }
        }));
        let config = Config::from_settings(&settings, Environment::Production).unwrap();
        assert_eq!(config.required_scopes, vec!["access_as_user", "read"]);

        let mut settings = platform_settings();
        settings.set("Authorization:RequiredScopes", "access_as_user write");
        let config = Config::from_settings(&settings, Environment::Production).unwrap();
        assert_eq!(config.required_scopes, vec!["access_as_user", "write"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_env_vars_skipped() {
        use std::os::unix::ffi::OsStringExt;

        let vars = vec![
            (OsString::from("Server__Port"), OsString::from("9090")),
            (
                OsString::from("Authentication__Strategy"),
                OsString::from_vec(vec![0x66, 0x6f, 0x80]),
            ),
            (OsString::from_vec(vec![0xff, 0xfe]), OsString::from("x")),
        ];

        let kept: Vec<_> = utf8_env_vars(vars).collect();
        assert_eq!(kept, vec![("Server__Port".to_string(), "9090".to_string())]);
    }

    #[test]
    fn test_environment_names() {
        assert_eq!(Environment::from_name("development"), Environment::Development);
        assert_eq!(Environment::from_name(""), Environment::Production);
        assert!(Environment::from_name("PRODUCTION").is_production());
        assert_eq!(
            Environment::from_name("QA"),
            Environment::Other("QA".to_string())
        );
        assert!(!Environment::from_name("QA").is_production());
    }
}
