//! Log output for the node binary.
//!
//! `RUST_LOG` always wins over the configured level so a single run can be
//! turned up without editing the config file.

use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Log level configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "warn" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format
    Pretty,
    /// JSON format for log aggregation
    Json,
    /// Compact single-line format
    Compact,
}

impl LogFormat {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Enable ANSI colors (ignored for JSON)
    pub ansi_colors: bool,
    /// Emit span open/close events
    pub span_events: bool,
    /// Per-crate overrides appended to the filter
    pub module_levels: Vec<(String, LogLevel)>,
    pub include_target: bool,
    pub include_location: bool,
    pub include_thread_id: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Pretty,
            ansi_colors: true,
            span_events: false,
            module_levels: Vec::new(),
            include_target: true,
            include_location: false,
            include_thread_id: false,
        }
    }
}

impl LogConfig {
    /// Overlay `LOG_FORMAT` and `LOG_ANSI` from the environment
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            self.format = LogFormat::from_str(&format);
        }
        if let Ok(ansi) = std::env::var("LOG_ANSI") {
            self.ansi_colors = ansi.eq_ignore_ascii_case("true");
        }
        self
    }

    /// Verbose configuration for the devnet command
    pub fn development() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Pretty,
            ansi_colors: true,
            span_events: false,
            module_levels: vec![
                ("meridian_consensus".to_string(), LogLevel::Debug),
                ("meridian_economics".to_string(), LogLevel::Info),
                ("meridian_execution".to_string(), LogLevel::Info),
            ],
            include_target: true,
            include_location: false,
            include_thread_id: false,
        }
    }

    fn build_filter(&self) -> String {
        let mut filter = self.level.as_str().to_string();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.as_str()));
        }
        filter
    }
}

/// Install the global subscriber
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(rust_log) => EnvFilter::new(rust_log),
        Err(_) => EnvFilter::new(config.build_filter()),
    };

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = tracing_subscriber::fmt::layer()
        .with_target(config.include_target)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_thread_ids(config.include_thread_id)
        .with_span_events(span_events);

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Json => registry.with(layer.json().with_ansi(false)).try_init(),
        LogFormat::Pretty => registry
            .with(layer.pretty().with_ansi(config.ansi_colors))
            .try_init(),
        LogFormat::Compact => registry
            .with(layer.compact().with_ansi(config.ansi_colors))
            .try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to init logging: {}", e))
}
