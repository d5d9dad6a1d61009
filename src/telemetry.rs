//! Tracing subscriber setup for binaries.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Dependencies that log every request and parse at `info`.
const QUIET_TARGETS: &[&str] = &["reqwest", "hyper_util", "rustls", "html5ever", "selectors"];

/// Directives used when `RUST_LOG` is unset: the crate at `level`, noisy
/// HTTP and HTML dependencies capped at `warn`.
fn default_directives(level: Level) -> String {
    let mut directives = vec![level.as_str().to_ascii_lowercase()];
    if level > Level::WARN {
        directives.extend(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")));
    }
    directives.join(",")
}

/// Installs the global subscriber on stderr, leaving stdout to the report.
/// Only the first call in a process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let json_layer = json.then(|| fmt::layer().json().with_writer(std::io::stderr));
    let text_layer = (!json).then(|| fmt::layer().with_target(false).with_writer(std::io::stderr));

    if let Err(err) = tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
    {
        tracing::debug!(error = %err, "tracing subscriber already installed");
    }
}
