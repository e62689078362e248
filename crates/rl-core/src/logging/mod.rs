//! Structured logging for rl-core.
//!
//! Two output modes, both on stderr:
//! - Human-readable console output for interactive use
//! - Machine-parseable JSONL for schedulers and log shippers
//!
//! # Usage
//!
//! ```ignore
//! use rl_core::logging::{init_logging, LogConfig, LogContext, Stage, event_names};
//!
//! let config = LogConfig::from_env(None, None);
//! init_logging(&config);
//!
//! let ctx = LogContext::new(RunId::new().to_string(), get_host_id());
//! rl_core::log_event!(ctx, INFO, event_names::RUN_STARTED, Stage::Init, "starting run");
//! ```
//!
//! stdout is reserved for command payloads (JSON/MD output). Entity data is
//! never logged; events name entities by their opaque `type:id` reference.

pub mod config;
pub mod events;
pub mod layer;

pub use config::{LogConfig, LogFormat, LogLevel};
pub use events::{event_names, Level, LogContext, LogEvent, Stage};
pub use layer::JsonlLayer;

use sha2::{Digest, Sha256};
use std::io::IsTerminal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the logging subsystem.
///
/// Call once at startup. A second call is a no-op (the global subscriber
/// is already set).
pub fn init_logging(config: &LogConfig) {
    // Event names are used as targets, so the level applies globally rather
    // than to the `rl_core` module path.
    let filter = EnvFilter::try_new(config.filter_directive())
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    match config.format {
        LogFormat::Human => {
            let use_ansi = std::io::stderr().is_terminal();
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(use_ansi);

            if config.timestamps {
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer)
                    .try_init();
            } else {
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer.without_time())
                    .try_init();
            }
        }
        LogFormat::Jsonl => {
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(JsonlLayer::stderr())
                .try_init();
        }
    }
}

/// Host identifier for audit entries and logs.
///
/// Uses /etc/machine-id when present, else a hash of the hostname, else a
/// random id.
pub fn get_host_id() -> String {
    if let Ok(id) = std::fs::read_to_string("/etc/machine-id") {
        let id = id.trim();
        if id.len() >= 8 && id.is_ascii() {
            return format!("host-{}", &id[..8]);
        }
    }

    if let Ok(hostname) = std::env::var("HOSTNAME") {
        let hash = hex::encode(Sha256::digest(hostname.as_bytes()));
        return format!("host-{}", &hash[..8]);
    }

    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("host-{}", &uuid[..8])
}

/// Structured event logging with run context.
///
/// ```ignore
/// log_event!(ctx, INFO, event_names::HOLD_APPLIED, Stage::Gate, "legal hold applied",
///     schedule_id = %schedule.id, entity = %schedule.entity);
/// ```
#[macro_export]
macro_rules! log_event {
    (@emit $level:ident, $ctx:expr, $event:expr, $stage:expr, $msg:expr $(, $($rest:tt)+)?) => {
        tracing::$level!(
            target: $event,
            run_id = %$ctx.run_id,
            host_id = %$ctx.host_id,
            stage = %$stage,
            $($($rest)+,)?
            message = $msg
        )
    };
    ($ctx:expr, INFO, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $($val:tt)+)?) => {
        $crate::log_event!(@emit info, $ctx, $event, $stage, $msg $(, $key = $($val)+)?)
    };
    ($ctx:expr, DEBUG, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $($val:tt)+)?) => {
        $crate::log_event!(@emit debug, $ctx, $event, $stage, $msg $(, $key = $($val)+)?)
    };
    ($ctx:expr, WARN, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $($val:tt)+)?) => {
        $crate::log_event!(@emit warn, $ctx, $event, $stage, $msg $(, $key = $($val)+)?)
    };
    ($ctx:expr, ERROR, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $($val:tt)+)?) => {
        $crate::log_event!(@emit error, $ctx, $event, $stage, $msg $(, $key = $($val)+)?)
    };
}
