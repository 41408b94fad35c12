//! Integration tests for layered configuration loading

use crate::integration::test_utils::with_env;
use honyaku::config::{BackendConfig, ConversationalConfig, StructuredConfig};
use honyaku::prompt::{Direction, TranslationStyle};
use honyaku::{ConfigLoader, TranslateError, TranslatorConfig};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_explicit_file_overrides_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("honyaku.toml");
    fs::write(
        &config_file,
        r#"
request_timeout_secs = 120

[batch]
max_items = 20

[retry]
max_attempts = 5

[prompt]
style = "minimal"
direction = "to_japanese"
glossary_text = "見積書 = quotation"

[backend]
kind = "structured"
base_url = "http://127.0.0.1:8081"
context_tokens = 8192
stream = true

[backend.sampling]
temperature = 0.2
"#,
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(&config_file).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.batch.max_items, 20);
    assert_eq!(config.batch.max_chars, 1000);
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.request_timeout_secs, 120);
    assert_eq!(config.prompt.style, TranslationStyle::Minimal);
    assert_eq!(config.prompt.direction, Direction::ToJapanese);
    assert_eq!(config.prompt.glossary_text.as_deref(), Some("見積書 = quotation"));

    match config.backend {
        BackendConfig::Structured(StructuredConfig {
            ref base_url,
            context_tokens,
            stream,
            ref sampling,
            ..
        }) => {
            assert_eq!(base_url, "http://127.0.0.1:8081");
            assert_eq!(context_tokens, 8192);
            assert!(stream);
            assert_eq!(sampling.temperature, 0.2);
            assert_eq!(sampling.max_tokens, 1024);
        }
        other => panic!("unexpected backend {:?}", other),
    }
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("absent.toml");
    assert!(ConfigLoader::load_from_file(&missing).is_err());
}

#[test]
fn test_global_file_environment_and_explicit_file_precedence() {
    let temp_dir = TempDir::new().unwrap();
    let global_dir = temp_dir.path().join("honyaku");
    fs::create_dir_all(&global_dir).unwrap();
    fs::write(
        global_dir.join("config.toml"),
        r#"
[batch]
max_items = 30
max_chars = 800

[backend]
kind = "conversational"
use_id_markers = false
"#,
    )
    .unwrap();
    let explicit = temp_dir.path().join("job.toml");
    fs::write(&explicit, "[batch]\nmax_chars = 600\n").unwrap();

    let config = with_env(
        &temp_dir,
        &[("HONYAKU__BATCH__MAX_ITEMS", "12")],
        || ConfigLoader::load(Some(&explicit)).unwrap(),
    );

    assert_eq!(config.batch.max_items, 12);
    assert_eq!(config.batch.max_chars, 600);
    assert_eq!(
        config.backend,
        BackendConfig::Conversational(ConversationalConfig {
            use_id_markers: false,
            ..ConversationalConfig::default()
        })
    );
    assert_eq!(
        with_env(&temp_dir, &[], ConfigLoader::global_config_path),
        Some(global_dir.join("config.toml"))
    );
}

#[test]
fn test_defaults_without_any_file() {
    let temp_dir = TempDir::new().unwrap();
    // Default paths depend on HOME, so compare under the same environment.
    let (loaded, expected) = with_env(&temp_dir, &[], || {
        (ConfigLoader::load(None).unwrap(), TranslatorConfig::default())
    });
    assert_eq!(loaded, expected);
}

#[test]
fn test_validation_errors_are_reported_together() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("bad.toml");
    fs::write(
        &config_file,
        r#"
[batch]
max_chars = 10

[retry]
max_attempts = 0
"#,
    )
    .unwrap();

    let err = with_env(&temp_dir, &[], || {
        ConfigLoader::load_validated(Some(&config_file)).unwrap_err()
    });
    match err {
        TranslateError::Config(message) => {
            assert!(message.contains("Batch:"));
            assert!(message.contains("Retry:"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}
