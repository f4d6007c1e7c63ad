use crate::types::Verbosity;
use anyhow::{Context, Result};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

/// Handle for changing the log level after the subscriber is installed.
#[derive(Debug, Clone)]
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    from_env: bool,
}

impl LogHandle {
    /// Switch to the level for `verbosity`. A `RUST_LOG` filter, if set, stays in charge.
    pub fn set_verbosity(&self, verbosity: Verbosity) -> Result<()> {
        if self.from_env {
            return Ok(());
        }
        self.filter
            .reload(EnvFilter::new(verbosity.filter_directive()))
            .context("failed to reload log filter")
    }
}

/// Install the global stderr subscriber. `RUST_LOG` overrides `verbosity`.
pub fn init(verbosity: Verbosity) -> Result<LogHandle> {
    let (filter, from_env) = match EnvFilter::try_from_default_env() {
        Ok(f) => (f, true),
        Err(_) => (EnvFilter::new(verbosity.filter_directive()), false),
    };
    let (filter, handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .context("failed to install tracing subscriber")?;
    Ok(LogHandle {
        filter: handle,
        from_env,
    })
}
