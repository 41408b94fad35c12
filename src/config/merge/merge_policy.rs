//! Merge rules: defaults, override order, conflict handling.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
///
/// Only scalar sections are seeded here; the tagged `backend` table is left to serde
/// defaults so a file can switch `kind` without inheriting the other variant's keys.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("batch.max_items", 50)?
        .set_default("batch.max_chars", 1000)?
        .set_default("batch.min_split_chars", 300)?
        .set_default("retry.max_attempts", 3)?
        .set_default("retry.initial_backoff_ms", 2000)?
        .set_default("retry.backoff_multiplier", 2.0)?
        .set_default("retry.max_backoff_ms", 8000)?
        .set_default("request_timeout_secs", 300)
}
