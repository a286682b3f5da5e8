use std::env;
use std::str::FromStr;

/// ---------------------------------------------------------------------------
/// Configuration Defaults
/// ---------------------------------------------------------------------------

const DEFAULT_DB_URL: &str = "sqlite://training-compliance.db?mode=rwc";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_MATCH_WINDOW_DAYS: i64 = 0;
/// Widest accepted matching window either side of the scheduled date
pub const MAX_MATCH_WINDOW_DAYS: i64 = 30;
const DEFAULT_AUTO_MATCH_MIN_CONFIDENCE: f64 = 0.7;
const DEFAULT_MIN_COVERAGE: f64 = 0.5;
const DEFAULT_SAMPLE_RATE_HZ: f64 = 1.0;

/// ---------------------------------------------------------------------------
/// Error Handling
/// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Invalid value for {key}: {value}")]
  Invalid { key: &'static str, value: String },
}

/// ---------------------------------------------------------------------------
/// Configuration Structures
/// ---------------------------------------------------------------------------

/// Knobs for suggesting and committing activity matches
#[derive(Debug, Clone, PartialEq)]
pub struct MatchingConfig {
  /// How many days either side of the scheduled date an activity may fall
  pub window_days: i64,
  /// Suggestions below this confidence are never committed automatically
  pub auto_match_min_confidence: f64,
}

impl Default for MatchingConfig {
  fn default() -> Self {
    Self {
      window_days: DEFAULT_MATCH_WINDOW_DAYS,
      auto_match_min_confidence: DEFAULT_AUTO_MATCH_MIN_CONFIDENCE,
    }
  }
}

/// Knobs for scoring a power stream against a segment timeline
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerConfig {
  /// Fraction of expected samples a segment window needs to count as completed
  pub min_coverage: f64,
  /// Recording rate the stream is expected to have
  pub expected_sample_rate_hz: f64,
}

impl Default for AnalyzerConfig {
  fn default() -> Self {
    Self {
      min_coverage: DEFAULT_MIN_COVERAGE,
      expected_sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
  pub database_url: String,
  pub max_connections: u32,
  pub matching: MatchingConfig,
  pub analyzer: AnalyzerConfig,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      database_url: DEFAULT_DB_URL.to_string(),
      max_connections: DEFAULT_MAX_CONNECTIONS,
      matching: MatchingConfig::default(),
      analyzer: AnalyzerConfig::default(),
    }
  }
}

impl AppConfig {
  /// Load configuration from the environment (and `.env` if present)
  pub fn from_env() -> Result<Self, ConfigError> {
    dotenvy::dotenv().ok();

    let config = Self {
      database_url: env::var("TRAINING_DB_URL").unwrap_or_else(|_| DEFAULT_DB_URL.to_string()),
      max_connections: parse_var("TRAINING_DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
      matching: MatchingConfig {
        window_days: parse_var("MATCH_WINDOW_DAYS", DEFAULT_MATCH_WINDOW_DAYS)?,
        auto_match_min_confidence: parse_var(
          "AUTO_MATCH_MIN_CONFIDENCE",
          DEFAULT_AUTO_MATCH_MIN_CONFIDENCE,
        )?,
      },
      analyzer: AnalyzerConfig {
        min_coverage: parse_var("COMPLIANCE_MIN_COVERAGE", DEFAULT_MIN_COVERAGE)?,
        expected_sample_rate_hz: parse_var("POWER_SAMPLE_RATE_HZ", DEFAULT_SAMPLE_RATE_HZ)?,
      },
    };

    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<(), ConfigError> {
    if self.max_connections == 0 {
      return Err(ConfigError::Invalid {
        key: "TRAINING_DB_MAX_CONNECTIONS",
        value: self.max_connections.to_string(),
      });
    }
    if !(0..=MAX_MATCH_WINDOW_DAYS).contains(&self.matching.window_days) {
      return Err(ConfigError::Invalid {
        key: "MATCH_WINDOW_DAYS",
        value: self.matching.window_days.to_string(),
      });
    }
    if !(0.0..=1.0).contains(&self.matching.auto_match_min_confidence) {
      return Err(ConfigError::Invalid {
        key: "AUTO_MATCH_MIN_CONFIDENCE",
        value: self.matching.auto_match_min_confidence.to_string(),
      });
    }
    if !(0.0..=1.0).contains(&self.analyzer.min_coverage) {
      return Err(ConfigError::Invalid {
        key: "COMPLIANCE_MIN_COVERAGE",
        value: self.analyzer.min_coverage.to_string(),
      });
    }
    if !(self.analyzer.expected_sample_rate_hz > 0.0) {
      return Err(ConfigError::Invalid {
        key: "POWER_SAMPLE_RATE_HZ",
        value: self.analyzer.expected_sample_rate_hz.to_string(),
      });
    }
    Ok(())
  }
}

fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
  match env::var(key) {
    Ok(raw) => raw
      .trim()
      .parse()
      .map_err(|_| ConfigError::Invalid { key, value: raw }),
    Err(_) => Ok(default),
  }
}
