// Configuration loader for a single trigger. Broker and device settings are
// read fresh from a `ConfigSource` on every invocation; nothing is cached.
use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

pub const BROKER_HOST: &str = "BROKER_HOST";
pub const BROKER_PORT: &str = "BROKER_PORT";
pub const BROKER_USERNAME: &str = "BROKER_USERNAME";
pub const BROKER_PASSWORD: &str = "BROKER_PASSWORD";
pub const BASE_TOPIC: &str = "BASE_TOPIC";
pub const DEVICE_ID: &str = "DEVICE_ID";

pub const BASE_TOPIC_DEFAULT: &str = "homie/";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Anything that can answer "what is the value of key X".
pub trait ConfigSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads straight from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSource;

impl ConfigSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl ConfigSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Whether broker credentials must always be configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CredentialPolicy {
    /// Username and password are both required.
    #[default]
    Required,
    /// Either both are set, or neither is and the session is anonymous.
    BothOrNeither,
}

#[derive(Clone, PartialEq, Eq)]
pub struct BrokerTarget {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl BrokerTarget {
    /// Credentials are only presented when both halves are present.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) => Some((user, pass)),
            _ => None,
        }
    }
}

// Hand-written so the password never ends up in a log line.
impl fmt::Debug for BrokerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "*******"))
            .finish()
    }
}

/// A topic prefix that always ends in `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseTopic(String);

impl BaseTopic {
    pub fn new(raw: impl Into<String>) -> Self {
        let mut s = raw.into();
        if !s.ends_with('/') {
            s.push('/');
        }
        BaseTopic(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BaseTopic {
    fn default() -> Self {
        BaseTopic::new(BASE_TOPIC_DEFAULT)
    }
}

impl fmt::Display for BaseTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTarget {
    pub base_topic: BaseTopic,
    pub device_id: String,
}

/// Load broker and device settings from `source`.
///
/// Every missing required key is collected before failing, so an operator
/// sees the complete list in one go. Empty values count as missing.
pub fn load(
    source: &dyn ConfigSource,
    policy: CredentialPolicy,
) -> Result<(BrokerTarget, DeviceTarget), ConfigError> {
    let lookup = |key: &str| source.get(key).filter(|v| !v.is_empty());

    let host = lookup(BROKER_HOST);
    let port = lookup(BROKER_PORT);
    let username = lookup(BROKER_USERNAME);
    let password = lookup(BROKER_PASSWORD);
    let device_id = lookup(DEVICE_ID);

    let credentials_required = match policy {
        CredentialPolicy::Required => true,
        CredentialPolicy::BothOrNeither => username.is_some() || password.is_some(),
    };

    let mut missing = Vec::new();
    if host.is_none() {
        missing.push(BROKER_HOST);
    }
    if port.is_none() {
        missing.push(BROKER_PORT);
    }
    if credentials_required && username.is_none() {
        missing.push(BROKER_USERNAME);
    }
    if credentials_required && password.is_none() {
        missing.push(BROKER_PASSWORD);
    }
    if device_id.is_none() {
        missing.push(DEVICE_ID);
    }

    let (Some(host), Some(port), Some(device_id)) = (host, port, device_id) else {
        return Err(ConfigError::Missing(missing));
    };
    if !missing.is_empty() {
        return Err(ConfigError::Missing(missing));
    }

    let port = port.trim().parse::<u16>().map_err(|_| ConfigError::Invalid {
        key: BROKER_PORT,
        value: port.clone(),
    })?;

    let base_topic = source
        .get(BASE_TOPIC)
        .map(BaseTopic::new)
        .unwrap_or_default();

    Ok((
        BrokerTarget {
            host,
            port,
            username,
            password,
        },
        DeviceTarget {
            base_topic,
            device_id,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn source(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn full() -> HashMap<String, String> {
        source(&[
            (BROKER_HOST, "127.0.0.1"),
            (BROKER_PORT, "1883"),
            (BROKER_USERNAME, "u"),
            (BROKER_PASSWORD, "p"),
            (DEVICE_ID, "front-door"),
        ])
    }

    #[test]
    fn test_load_complete_config_defaults_base_topic() {
        let (broker, device) = load(&full(), CredentialPolicy::Required).unwrap();
        assert_eq!(broker.host, "127.0.0.1");
        assert_eq!(broker.port, 1883);
        assert_eq!(broker.credentials(), Some(("u", "p")));
        assert_eq!(device.base_topic.as_str(), "homie/");
        assert_eq!(device.device_id, "front-door");
    }

    #[test]
    fn test_base_topic_is_normalized() {
        let mut src = full();
        src.insert(BASE_TOPIC.into(), "devices".into());
        let (_, device) = load(&src, CredentialPolicy::Required).unwrap();
        assert_eq!(device.base_topic.as_str(), "devices/");
    }

    #[test]
    fn test_missing_device_id_is_reported_alone() {
        let mut src = full();
        src.remove(DEVICE_ID);
        let err = load(&src, CredentialPolicy::Required).unwrap_err();
        assert_eq!(err, ConfigError::Missing(vec![DEVICE_ID]));
    }

    #[test]
    fn test_all_missing_keys_are_reported() {
        let src = source(&[(BROKER_HOST, "broker"), (BROKER_PASSWORD, "")]);
        let err = load(&src, CredentialPolicy::Required).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Missing(vec![BROKER_PORT, BROKER_USERNAME, BROKER_PASSWORD, DEVICE_ID])
        );
        assert_eq!(
            err.to_string(),
            "missing required configuration: BROKER_PORT, BROKER_USERNAME, BROKER_PASSWORD, DEVICE_ID"
        );
    }

    #[test]
    fn test_credentials_required_by_default() {
        let mut src = full();
        src.remove(BROKER_USERNAME);
        src.remove(BROKER_PASSWORD);
        let err = load(&src, CredentialPolicy::Required).unwrap_err();
        assert_eq!(err, ConfigError::Missing(vec![BROKER_USERNAME, BROKER_PASSWORD]));
    }

    #[test]
    fn test_anonymous_allowed_with_both_or_neither() {
        let mut src = full();
        src.remove(BROKER_USERNAME);
        src.remove(BROKER_PASSWORD);
        let (broker, _) = load(&src, CredentialPolicy::BothOrNeither).unwrap();
        assert_eq!(broker.credentials(), None);

        src.insert(BROKER_USERNAME.into(), "u".into());
        let err = load(&src, CredentialPolicy::BothOrNeither).unwrap_err();
        assert_eq!(err, ConfigError::Missing(vec![BROKER_PASSWORD]));
    }

    #[test]
    fn test_invalid_port() {
        let mut src = full();
        src.insert(BROKER_PORT.into(), "not-a-port".into());
        let err = load(&src, CredentialPolicy::Required).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: BROKER_PORT,
                value: "not-a-port".into()
            }
        );
    }

    #[test]
    fn test_debug_hides_password() {
        let (broker, _) = load(&full(), CredentialPolicy::Required).unwrap();
        let shown = format!("{broker:?}");
        assert!(!shown.contains("\"p\""), "password leaked: {shown}");
    }

    proptest! {
        #[test]
        fn prop_base_topic_ends_with_separator(raw in ".*") {
            let once = BaseTopic::new(raw.clone());
            prop_assert!(once.as_str().ends_with('/'));
            prop_assert!(once.as_str().len() - raw.len() <= 1);
            let twice = BaseTopic::new(once.as_str());
            prop_assert_eq!(once, twice);
        }
    }
}
