//! Log output for the orbtree binary.
//!
//! Everything goes to stderr; stdout is reserved for command output such as
//! trees and forest documents. `ORBTREE_LOG` takes an `EnvFilter` directive
//! string and replaces the built-in directives entirely.

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_ENV: &str = "ORBTREE_LOG";

/// HTTP stack crates held at `warn` unless `ORBTREE_LOG` says otherwise.
const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "h2", "reqwest", "rustls"];

/// Filter used when `ORBTREE_LOG` is unset: `level` for orbtree, `warn` for
/// the gateway's HTTP stack.
pub fn default_directives(level: Level) -> String {
    let mut directives = vec![level.as_str().to_ascii_lowercase()];
    directives.extend(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")));
    directives.join(",")
}

/// Span lifecycle events to log. A long-running process (`watch`) logs the
/// close of every span, so each refresh cycle reports its busy and idle time.
fn span_events(long_running: bool) -> FmtSpan {
    if long_running {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_tracing(json: bool, level: Level, long_running: bool) {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_span_events(span_events(long_running));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.with_target(false))
            .try_init()
            .ok();
    }
}
