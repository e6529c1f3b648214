// One-shot command line trigger: connect, publish one click, disconnect.
use anyhow::Context;
use clap::Parser;
use garage_door_clicker::config::{BaseTopic, BrokerTarget, DeviceTarget, BASE_TOPIC_DEFAULT};
use garage_door_clicker::logging::init_logging;
use garage_door_clicker::mqtt::run_session;

/// Publish a single open command to a garage door clicker
#[derive(Parser, Debug)]
#[command(name = "invoke-click")]
#[command(version)]
struct Args {
    /// Host name or ip address of the MQTT broker
    #[arg(short = 'l', long, default_value = "127.0.0.1")]
    broker_host: String,

    /// Port of the MQTT broker
    #[arg(short = 'p', long, default_value_t = 1883)]
    broker_port: u16,

    /// Username used to authenticate with the MQTT broker
    #[arg(short = 'u', long)]
    broker_username: Option<String>,

    /// Password used to authenticate with the MQTT broker
    #[arg(short = 'd', long)]
    broker_password: Option<String>,

    /// Base topic of the homie devices on the broker
    #[arg(short = 't', long, default_value = BASE_TOPIC_DEFAULT, value_parser = parse_base_topic)]
    base_topic: BaseTopic,

    /// Homie device id
    #[arg(short = 'i', long)]
    device_id: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_base_topic(s: &str) -> Result<BaseTopic, String> {
    Ok(BaseTopic::new(s))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, false);

    let broker = BrokerTarget {
        host: args.broker_host,
        port: args.broker_port,
        username: args.broker_username,
        password: args.broker_password,
    };
    let device = DeviceTarget {
        base_topic: args.base_topic,
        device_id: args.device_id,
    };

    let job = run_session(&broker, &device)
        .await
        .context("click was not published")?;
    println!("{} {}", job.topic, job.payload);
    Ok(())
}
