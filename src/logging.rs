//! Structured logging setup on top of `tracing`

use std::env;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
  Pretty,
  Compact,
  Json,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
  /// Filter directive used when `RUST_LOG` is not set
  pub level: String,
  pub format: LogFormat,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      format: LogFormat::Pretty,
    }
  }
}

impl LoggingConfig {
  pub fn from_env() -> Self {
    let level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let format = match env::var("LOG_FORMAT").as_deref() {
      Ok("json") => LogFormat::Json,
      Ok("compact") => LogFormat::Compact,
      _ => LogFormat::Pretty,
    };
    Self { level, format }
  }

  /// Install the global subscriber. Fails (instead of panicking) if one is
  /// already installed.
  pub fn init(&self) -> Result<(), String> {
    let filter = EnvFilter::try_new(&self.level)
      .unwrap_or_else(|_| EnvFilter::new("info"))
      .add_directive(
        "sqlx=warn"
          .parse()
          .unwrap_or_else(|_| tracing::Level::WARN.into()),
      );

    let registry = tracing_subscriber::registry().with(filter);
    let result = match self.format {
      LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
      LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
      LogFormat::Pretty => registry.with(fmt::layer()).try_init(),
    };

    result.map_err(|e| format!("Failed to initialize logging: {}", e))
  }
}
