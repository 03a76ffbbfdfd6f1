use std::fs;
use std::path::Path;
use tracing::{info_span, Span};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes the logging system with both console and file output.
///
/// The returned guard must be held until exit so buffered file logs are
/// flushed.
pub fn init_logging(logs_dir: &Path) -> WorkerGuard {
    let _ = fs::create_dir_all(logs_dir);

    // Daily rotation, JSON lines
    let file_appender = tracing_appender::rolling::daily(logs_dir, "pipeline.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);

    let console_layer = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stdout);

    // Respect RUST_LOG if set
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("banking_pipeline=info,warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    guard
}

/// Logging context handed to each component at construction.
///
/// Components never reach for a global logger; they log inside the span this
/// context gives them, so every line carries the pipeline, batch and component
/// it came from.
#[derive(Debug, Clone)]
pub struct LogContext {
    root: Span,
}

impl LogContext {
    pub fn new(pipeline: &str) -> Self {
        Self {
            root: info_span!("pipeline", name = %pipeline),
        }
    }

    /// A child context scoped to one batch run.
    pub fn for_batch(&self, batch: &str, execution_date: &str, run_id: &str) -> Self {
        Self {
            root: info_span!(
                parent: &self.root,
                "batch",
                batch = %batch,
                execution_date = %execution_date,
                run_id = %run_id
            ),
        }
    }

    /// Span for one component, nested under this context.
    pub fn component(&self, name: &'static str) -> Span {
        info_span!(parent: &self.root, "component", component = name)
    }

    /// A context that records nothing.
    pub fn disabled() -> Self {
        Self { root: Span::none() }
    }
}

impl Default for LogContext {
    fn default() -> Self {
        Self::new("banking-pipeline")
    }
}
