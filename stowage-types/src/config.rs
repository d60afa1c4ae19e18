//! Provider-agnostic storage configuration.
//!
//! A [`Configuration`] names a provider and carries a flat bag of options. A handful of keys are
//! understood by every provider (see the constants in this module), everything else is passed
//! through untouched and interpreted by the provider that receives it.
//!
//! Values are stored exactly as they were given. In particular, values that originate from a
//! connection string are always strings; turning `"true"` into a boolean or `"750"` into a number
//! is the job of the provider, using [`Configuration::get_bool`] and friends.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::url::{self, ConnectionString, ParseError};

/// Principal of the credentials, such as an access key id, a key file, or a directory.
pub const PRINCIPAL: &str = "principal";
/// Secret belonging to the [`PRINCIPAL`].
pub const SECRET: &str = "secret";
/// The bucket that is selected when the adapter is created.
pub const BUCKET: &str = "bucket";
/// A path below the bucket.
pub const PATH: &str = "path";
/// Provider region.
pub const REGION: &str = "region";
/// Custom endpoint URL of the provider.
pub const ENDPOINT: &str = "endpoint";

/// Provider hint for input that does not start with a valid provider name.
const INVALID_PROVIDER: &str = "[invalid]";

/// Option keys whose values are never printed.
const REDACTED_KEYS: &[&str] = &[SECRET, "secret_access_key", "session_token", "password"];

/// A single configuration value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    /// A boolean flag.
    Bool(bool),
    /// A number.
    Number(f64),
    /// A string, the only kind produced by connection strings.
    String(String),
}

impl ConfigValue {
    /// Returns the string value, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<u64> for ConfigValue {
    fn from(value: u64) -> Self {
        Self::Number(value as f64)
    }
}

/// An option could not be interpreted as the type a provider expects.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid value `{value}` for option `{key}`: expected {expected}")]
pub struct OptionError {
    /// The offending option key.
    pub key: String,
    /// The value as it was configured.
    pub value: String,
    /// Human readable description of the expected type.
    pub expected: &'static str,
}

impl OptionError {
    fn new(key: &str, value: &ConfigValue, expected: &'static str) -> Self {
        Self {
            key: key.to_owned(),
            value: value.to_string(),
            expected,
        }
    }
}

/// Normalized configuration of one storage target.
///
/// The provider identifier is stored in lowercase. Options are kept in a sorted map so that
/// printing and serializing a configuration is deterministic.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(alias = "type", deserialize_with = "deserialize_provider")]
    provider: String,
    #[serde(flatten)]
    options: BTreeMap<String, ConfigValue>,
}

fn deserialize_provider<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let provider = String::deserialize(deserializer)?;
    Ok(provider.trim().to_ascii_lowercase())
}

impl Configuration {
    /// Creates an empty configuration for the given provider.
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into().trim().to_ascii_lowercase(),
            options: BTreeMap::new(),
        }
    }

    /// Parses a connection string into a configuration.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        input.parse()
    }

    /// Builder-style variant of [`set`](Self::set).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Sets an option, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        self.options.insert(key.into(), value.into());
    }

    /// Removes an option and returns its previous value.
    pub fn remove(&mut self, key: &str) -> Option<ConfigValue> {
        self.options.remove(key)
    }

    /// The provider identifier, e.g. `s3` or `local`.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Returns the raw value of an option.
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.options.get(key)
    }

    /// Returns a string option. Blank strings read as absent.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.options.get(key)? {
            ConfigValue::String(s) if !s.trim().is_empty() => Some(s),
            _ => None,
        }
    }

    /// Returns any option rendered as a string. Blank strings read as absent.
    pub fn get_string(&self, key: &str) -> Option<String> {
        let value = self.options.get(key)?.to_string();
        (!value.trim().is_empty()).then_some(value)
    }

    /// Interprets an option as a boolean.
    ///
    /// Accepts real booleans, `0`/`1`, and the strings `true`, `false`, `yes`, `no`, `on`, `off`.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, OptionError> {
        let Some(value) = self.options.get(key) else {
            return Ok(None);
        };

        match value {
            ConfigValue::Bool(b) => Ok(Some(*b)),
            ConfigValue::Number(n) if *n == 0.0 => Ok(Some(false)),
            ConfigValue::Number(n) if *n == 1.0 => Ok(Some(true)),
            ConfigValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "" => Ok(None),
                "true" | "1" | "yes" | "on" => Ok(Some(true)),
                "false" | "0" | "no" | "off" => Ok(Some(false)),
                _ => Err(OptionError::new(key, value, "a boolean")),
            },
            ConfigValue::Number(_) => Err(OptionError::new(key, value, "a boolean")),
        }
    }

    /// Interprets an option as an unsigned integer.
    pub fn get_u64(&self, key: &str) -> Result<Option<u64>, OptionError> {
        let Some(value) = self.options.get(key) else {
            return Ok(None);
        };

        match value {
            ConfigValue::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Ok(Some(*n as u64)),
            ConfigValue::String(s) if s.trim().is_empty() => Ok(None),
            ConfigValue::String(s) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| OptionError::new(key, value, "an unsigned integer")),
            _ => Err(OptionError::new(key, value, "an unsigned integer")),
        }
    }

    /// The [`PRINCIPAL`] option.
    pub fn principal(&self) -> Option<&str> {
        self.get_str(PRINCIPAL)
    }

    /// The [`SECRET`] option.
    pub fn secret(&self) -> Option<&str> {
        self.get_str(SECRET)
    }

    /// The [`BUCKET`] option.
    pub fn bucket(&self) -> Option<&str> {
        self.get_str(BUCKET)
    }

    /// The [`PATH`] option.
    pub fn path(&self) -> Option<&str> {
        self.get_str(PATH)
    }

    /// The [`REGION`] option.
    pub fn region(&self) -> Option<&str> {
        self.get_str(REGION)
    }

    /// The [`ENDPOINT`] option.
    pub fn endpoint(&self) -> Option<&str> {
        self.get_str(ENDPOINT)
    }

    /// Iterates over all options in key order.
    pub fn options(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.options.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromStr for Configuration {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.parse::<ConnectionString>()?.into())
    }
}

impl From<ConnectionString> for Configuration {
    fn from(url: ConnectionString) -> Self {
        let mut config = Configuration::new(url.provider);
        for (key, value) in url.options {
            config.set(key, value);
        }

        // Components of the authority take precedence over query options of the same name.
        let fields = [
            (PRINCIPAL, url.principal),
            (SECRET, url.secret),
            (BUCKET, url.bucket),
            (PATH, url.path),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                config.set(key, value);
            }
        }

        config
    }
}

struct RedactedOptions<'a>(&'a BTreeMap<String, ConfigValue>);

impl fmt::Debug for RedactedOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in self.0 {
            if REDACTED_KEYS.contains(&key.as_str()) {
                map.entry(key, &"[redacted]");
            } else {
                map.entry(key, value);
            }
        }
        map.finish()
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("provider", &self.provider)
            .field("options", &RedactedOptions(&self.options))
            .finish()
    }
}

/// Anything an adapter can be constructed from.
#[derive(Clone)]
pub enum ConfigInput {
    /// A connection string that still has to be parsed.
    Url(String),
    /// An already structured configuration.
    Config(Configuration),
}

impl ConfigInput {
    /// Resolves the input into a [`Configuration`], parsing it if necessary.
    pub fn resolve(self) -> Result<Configuration, ParseError> {
        match self {
            Self::Url(url) => url.parse(),
            Self::Config(config) => Ok(config),
        }
    }

    /// Best-effort provider name, available even if the input does not parse.
    ///
    /// Only returns text that is a valid provider name, so the hint can be logged without
    /// exposing credentials from a malformed connection string.
    pub fn provider_hint(&self) -> String {
        let input = match self {
            Self::Url(input) => input.as_str(),
            Self::Config(config) => return config.provider().to_owned(),
        };

        let scheme = input.split_once("://").map_or(input, |(scheme, _)| scheme);
        let leading = input.split_once(':').map_or(input, |(leading, _)| leading);
        url::parse_provider(scheme)
            .or_else(|_| url::parse_provider(leading))
            .unwrap_or_else(|_| INVALID_PROVIDER.to_owned())
    }
}

impl fmt::Debug for ConfigInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(_) => f
                .debug_tuple("Url")
                .field(&format_args!("{}://[redacted]", self.provider_hint()))
                .finish(),
            Self::Config(config) => f.debug_tuple("Config").field(config).finish(),
        }
    }
}

impl From<&str> for ConfigInput {
    fn from(value: &str) -> Self {
        Self::Url(value.to_owned())
    }
}

impl From<&String> for ConfigInput {
    fn from(value: &String) -> Self {
        Self::Url(value.clone())
    }
}

impl From<String> for ConfigInput {
    fn from(value: String) -> Self {
        Self::Url(value)
    }
}

impl From<Configuration> for ConfigInput {
    fn from(value: Configuration) -> Self {
        Self::Config(value)
    }
}

impl From<ConnectionString> for ConfigInput {
    fn from(value: ConnectionString) -> Self {
        Self::Config(value.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerces_booleans() {
        let config = Configuration::new("memory")
            .with("a", "true")
            .with("b", "Off")
            .with("c", true)
            .with("d", 0u64)
            .with("e", "   ")
            .with("f", "perhaps");

        assert_eq!(config.get_bool("a").unwrap(), Some(true));
        assert_eq!(config.get_bool("b").unwrap(), Some(false));
        assert_eq!(config.get_bool("c").unwrap(), Some(true));
        assert_eq!(config.get_bool("d").unwrap(), Some(false));
        assert_eq!(config.get_bool("e").unwrap(), None);
        assert_eq!(config.get_bool("missing").unwrap(), None);

        let err = config.get_bool("f").unwrap_err();
        assert_eq!(err.key, "f");
        assert_eq!(
            err.to_string(),
            "invalid value `perhaps` for option `f`: expected a boolean"
        );
    }

    #[test]
    fn coerces_numbers() {
        let config = Configuration::new("local")
            .with("mode", "750")
            .with("port", 9000u64)
            .with("bad", "-1");

        assert_eq!(config.get_u64("mode").unwrap(), Some(750));
        assert_eq!(config.get_u64("port").unwrap(), Some(9000));
        assert_eq!(config.get_string("port").as_deref(), Some("9000"));
        assert!(config.get_u64("bad").is_err());
    }

    #[test]
    fn blank_strings_read_as_absent() {
        let config = Configuration::new("s3").with("region", " ");
        assert_eq!(config.region(), None);
        assert_eq!(config.get_string("region"), None);
    }

    #[test]
    fn provider_is_lowercased() {
        assert_eq!(Configuration::new(" S3 ").provider(), "s3");
    }

    #[test]
    fn authority_wins_over_query() {
        let config = Configuration::parse("s3://key:secret@bucket?bucket=other&region=eu").unwrap();
        assert_eq!(config.bucket(), Some("bucket"));
        assert_eq!(config.region(), Some("eu"));
        assert_eq!(config.principal(), Some("key"));
        assert_eq!(config.secret(), Some("secret"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = Configuration::parse("s3://key:hunter2@bucket").unwrap();
        let printed = format!("{config:?}");
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("key"));

        let input = ConfigInput::from("s3://key:hunter2@bucket");
        let printed = format!("{input:?}");
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("s3://"));
    }

    #[test]
    fn deserializes_structured_config() {
        let config: Configuration = serde_json::from_str(
            r#"{"type": "local", "directory": "/tmp/data", "mode": 750, "bucket": "images"}"#,
        )
        .unwrap();

        assert_eq!(config.provider(), "local");
        assert_eq!(config.bucket(), Some("images"));
        assert_eq!(config.get_u64("mode").unwrap(), Some(750));
        assert_eq!(config.get_str("directory"), Some("/tmp/data"));
    }

    #[test]
    fn deserialized_provider_is_lowercased() {
        let config: Configuration =
            serde_json::from_str(r#"{"provider": " S3 ", "region": "eu-west-1"}"#).unwrap();
        assert_eq!(config.provider(), "s3");
        assert_eq!(config.region(), Some("eu-west-1"));
    }

    #[test]
    fn malformed_input_does_not_leak_credentials() {
        let input = ConfigInput::from("s3:/key:hunter2@bucket");
        assert_eq!(input.provider_hint(), "s3");

        let printed = format!("{input:?}");
        assert!(!printed.contains("hunter2"), "{printed}");

        let input = ConfigInput::from("s 3://key:hunter2@bucket");
        assert_eq!(input.provider_hint(), "[invalid]");
        assert!(!format!("{input:?}").contains("hunter2"));
    }

    #[test]
    fn provider_hint_survives_bad_input() {
        let input = ConfigInput::from("GCS://%ff@bucket");
        assert_eq!(input.provider_hint(), "gcs");
        assert!(input.resolve().is_err());
    }
}
