//! Tracing setup and log redaction
//!
//! Command lines and error messages can carry credentials (`mysql -p...`,
//! inline tokens, pasted keys). Anything logged or sent to a client goes
//! through [`sanitize`] first.

use crate::config::LoggingSettings;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing_subscriber::EnvFilter;

/// Maximum line length before truncation
const MAX_LINE_LENGTH: usize = 2048;

/// Sensitive patterns to redact
static SENSITIVE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // SSH private key blocks
        r"(?s)-----BEGIN[^-]*PRIVATE KEY-----.*?-----END[^-]*PRIVATE KEY-----",
        // sshpass / mysql style inline passwords
        r"sshpass\s+-p\s*\S+",
        // Authorization headers
        r"(?i)authorization\s*:\s*(bearer|basic)\s+\S+",
        // Generic secrets by key name (key=value patterns)
        r#"(?i)(password|passwd|pwd|secret|token|api[_-]?key|private[_-]?key|passphrase)\s*[:=]\s*["']?[^\s"']+["']?"#,
        // Long base64 blobs
        r"[A-Za-z0-9+/]{64,}={0,2}",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Sanitize a string by removing sensitive information
pub fn sanitize(input: &str) -> String {
    let mut result = input.to_string();

    for pattern in SENSITIVE_PATTERNS.iter() {
        result = pattern.replace_all(&result, "[REDACTED]").to_string();
    }

    if result.len() > MAX_LINE_LENGTH {
        let mut cut = MAX_LINE_LENGTH;
        while !result.is_char_boundary(cut) {
            cut -= 1;
        }
        result = format!("{}... [truncated]", &result[..cut]);
    }

    result
}

/// Build the subscriber filter: `RUST_LOG` wins over the configured level.
pub fn env_filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level))
}

/// Install the global fmt subscriber. Safe to call more than once.
pub fn init_tracing(settings: &LoggingSettings) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(settings))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
