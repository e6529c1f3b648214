// `main.rs` only parses the server flags and hands off to `server::run()`.
// Broker settings are deliberately absent here: they are read from the
// environment on every trigger.
use clap::Parser;
use garage_door_clicker::config::CredentialPolicy;
use garage_door_clicker::logging::init_logging;
use garage_door_clicker::server::{self, ServerConfig};
use garage_door_clicker::state::TriggerOptions;
use std::net::SocketAddr;

/// HTTP trigger that opens the garage door over MQTT
#[derive(Parser, Debug)]
#[command(name = "garage-door-clicker")]
#[command(version)]
struct Cli {
    /// Address the HTTP server binds to
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:5000")]
    bind: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,

    /// Answer failed triggers with an error status instead of `Opened`
    #[arg(long, env = "STRICT_RESPONSES")]
    strict_responses: bool,

    /// Accept broker configurations without username and password
    #[arg(long, env = "ALLOW_ANONYMOUS")]
    allow_anonymous: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.json_logs);

    let credential_policy = if cli.allow_anonymous {
        CredentialPolicy::BothOrNeither
    } else {
        CredentialPolicy::Required
    };

    server::run(ServerConfig {
        bind_addr: cli.bind,
        trigger: TriggerOptions {
            credential_policy,
            strict_responses: cli.strict_responses,
        },
    })
    .await
}
