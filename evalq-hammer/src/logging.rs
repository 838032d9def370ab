use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable selecting the default level when `RUST_LOG` is unset.
pub const LOG_LEVEL_ENV: &str = "EVALQ_LOG";

/// Install the stderr subscriber.
///
/// `RUST_LOG` wins when set; otherwise `EVALQ_LOG` picks the level for the
/// evalq crates. `LOG_FORMAT=json` switches to JSON lines. Stdout stays free
/// for results and, in worker mode, for pipe frames.
pub fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = base_level(std::env::var(LOG_LEVEL_ENV).ok().as_deref());
        EnvFilter::new(format!("evalq={level},evalq_hammer={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

fn base_level(raw: Option<&str>) -> &'static str {
    match raw {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        _ => "info",
    }
}
