// Remote garage door trigger. A single HTTP route (`GET /open/sesame`)
// opens a short-lived MQTT session, publishes one click command to
// `<base_topic><device_id>/garage_door_clicker/open/set` and disconnects.
// Concurrent triggers are serialized by a lock owned by `state::Clicker`.

pub mod config;
pub mod handlers;
pub mod logging;
pub mod mqtt;
pub mod server;
pub mod state;

pub use config::{BaseTopic, BrokerTarget, ConfigError, CredentialPolicy, DeviceTarget};
pub use mqtt::{run_session, run_session_with_timeout, PublishJob, SessionError};
pub use state::{Clicker, TriggerOptions, TriggerOutcome};
