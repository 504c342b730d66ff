//! Integration tests for logging system

use core_runtime::logging::{
    init_logging, redact_if_sensitive, strip_path, LogFormat, LogLevel, LoggingConfig,
};
use core_runtime::Error;

#[test]
fn test_logging_initializes_once_per_process() {
    // The global subscriber can only be installed once, so both calls live here.
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug)
        .with_spans(false);

    init_logging(config.clone()).unwrap();
    tracing::info!(job_id = "test", "logging online");

    let second = init_logging(config);
    assert!(matches!(second, Err(Error::Config(_))));
}

#[test]
fn test_credentials_are_redacted() {
    assert_eq!(redact_if_sensitive("access_token", "abc"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("refresh_token", "def"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("client_secret", "ghi"), "[REDACTED]");
}

#[test]
fn test_account_names_are_masked() {
    let redacted = redact_if_sensitive("account", "user@contoso.com");
    assert!(redacted.starts_with('u'));
    assert!(!redacted.contains("contoso.com"));
}

#[test]
fn test_normal_values_pass_through() {
    assert_eq!(redact_if_sensitive("section_id", "0-123"), "0-123");
    assert_eq!(redact_if_sensitive("title", "Weekly notes"), "Weekly notes");
}

#[test]
fn test_path_stripping() {
    assert_eq!(strip_path("/data/images/1-ab/1-abcdef_0.png"), "1-abcdef_0.png");
    assert_eq!(strip_path("D:\\cache\\notes.db"), "notes.db");
    assert_eq!(strip_path(""), "");
}

#[test]
fn test_config_chaining() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Json)
        .with_level(LogLevel::Warn)
        .with_target(false)
        .with_thread_info(true);

    assert_eq!(config.format, LogFormat::Json);
    assert_eq!(config.level, LogLevel::Warn);
    assert!(!config.display_target);
    assert!(config.display_thread_info);
}
