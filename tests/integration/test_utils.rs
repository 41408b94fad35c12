//! Shared test utilities for integration tests
//!
//! Environment isolation for configuration tests plus fragment and response fixtures.

use honyaku::prompt::TranslationRequest;
use honyaku::{Fragment, FragmentId};
use serde_json::json;
use std::sync::Mutex;
use tempfile::TempDir;

/// Serializes environment variable access across tests running in parallel.
static ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Environment variable state to restore after test
struct EnvState {
    saved: Vec<(String, Option<String>)>,
}

impl EnvState {
    fn capture(keys: &[&str]) -> Self {
        Self {
            saved: keys
                .iter()
                .map(|k| (k.to_string(), std::env::var(k).ok()))
                .collect(),
        }
    }

    fn restore(self) {
        for (key, value) in self.saved {
            match value {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// Runs `f` with `XDG_CONFIG_HOME` and `HOME` pointed into `test_dir` and the given
/// extra variables set, restoring everything afterwards.
pub fn with_env<F, R>(test_dir: &TempDir, vars: &[(&str, &str)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let mut keys = vec!["HOME", "XDG_CONFIG_HOME"];
    keys.extend(vars.iter().map(|(k, _)| *k));
    let env_state = EnvState::capture(&keys);

    let test_home = test_dir.path().join("home");
    std::fs::create_dir_all(&test_home).unwrap();
    std::env::set_var("HOME", test_home.to_str().unwrap());
    std::env::set_var("XDG_CONFIG_HOME", test_dir.path().to_str().unwrap());
    for (key, value) in vars {
        std::env::set_var(key, value);
    }

    let result = f();

    env_state.restore();

    result
}

/// The three-greeting fixture used across scenarios.
pub fn greetings() -> Vec<Fragment> {
    vec![
        Fragment::new(1, "こんにちは"),
        Fragment::new(2, "ありがとう"),
        Fragment::new(3, "さようなら"),
    ]
}

/// Structured reply translating every id in `request` as `"<prefix> <id>"`.
pub fn echo_items(request: &TranslationRequest, prefix: &str) -> String {
    let items: Vec<_> = request
        .fragment_ids()
        .into_iter()
        .map(|id| json!({ "id": id.as_u64(), "translation": format!("{} {}", prefix, id) }))
        .collect();
    if items.len() == 1 {
        json!({ "translation": format!("{} {}", prefix, request.fragment_ids()[0]) }).to_string()
    } else {
        json!({ "items": items }).to_string()
    }
}

/// Numbered free-text reply for a conversational request of `ids`.
pub fn numbered_reply(ids: &[FragmentId], prefix: &str) -> String {
    ids.iter()
        .enumerate()
        .map(|(i, id)| format!("{}. [[ID:{}]] {} {}", i + 1, id, prefix, id))
        .collect::<Vec<_>>()
        .join("\n")
}
