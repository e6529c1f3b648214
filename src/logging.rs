// Structured logging setup shared by both binaries. `RUST_LOG` takes
// precedence over the level passed on the command line.
use tracing_subscriber::{fmt, EnvFilter};

pub fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(level)
            // rumqttc is chatty at debug
            .add_directive("rumqttc=warn".parse().expect("static directive"))
    });

    if json {
        fmt().json().with_env_filter(filter).with_target(true).init();
    } else {
        fmt().with_env_filter(filter).with_target(true).init();
    }
}
