use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use assert_cmd::Command;
use async_trait::async_trait;
use echoes::session::{Identity, IdentityProvider};
use echoes::store::SqlitePostStore;
use echoes::{CollectionRef, FeedSnapshot, FeedSubscription, Session};
use futures::StreamExt;
use tempfile::TempDir;

#[allow(dead_code)]
pub fn create_temp_store() -> (SqlitePostStore, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let db_path = tmp.path().join("echoes.db");
    let store = SqlitePostStore::new_with_path(db_path)
        .expect("failed to create sqlite store with path")
        .with_poll_interval(Duration::from_millis(25));
    (store, tmp)
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("echoes.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

#[allow(dead_code)]
pub fn collection() -> CollectionRef {
    CollectionRef::posts_for_app("integration")
}

#[allow(dead_code)]
pub fn session(uid: &str) -> Session {
    Session::new(Identity {
        uid: uid.to_string(),
        is_anonymous: true,
    })
}

/// Next snapshot satisfying `pred`, failing the test after two seconds.
#[allow(dead_code)]
pub async fn next_matching(
    sub: &mut FeedSubscription,
    pred: impl Fn(&FeedSnapshot) -> bool,
) -> FeedSnapshot {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let snapshot = sub.next().await.expect("feed stream ended");
            if pred(&snapshot) {
                return snapshot;
            }
        }
    })
    .await
    .expect("timed out waiting for snapshot")
}

/// Identity provider that always refuses.
#[allow(dead_code)]
pub struct RefusingProvider;

#[async_trait]
impl IdentityProvider for RefusingProvider {
    async fn create_anonymous_identity(&self) -> echoes::Result<Identity> {
        Err(anyhow::anyhow!("identity service unavailable"))
    }

    async fn sign_in_with_custom_token(&self, _token: &str) -> echoes::Result<Identity> {
        Err(anyhow::anyhow!("identity service unavailable"))
    }
}

#[allow(dead_code)]
pub fn refusing_provider() -> Arc<dyn IdentityProvider> {
    Arc::new(RefusingProvider)
}

/// The `echoes` binary against the database in `dir`, isolated from the
/// caller's environment and config file.
#[allow(dead_code)]
pub fn echoes_cmd(dir: &TempDir) -> Command {
    echoes_cmd_with_config(dir, &dir.path().join("missing.yaml"))
}

/// Like [`echoes_cmd`] but reading `config_path`.
#[allow(dead_code)]
pub fn echoes_cmd_with_config(dir: &TempDir, config_path: &Path) -> Command {
    let mut cmd = isolated_cmd(config_path);
    cmd.arg("--db").arg(dir.path().join("echoes.db"));
    cmd
}

/// The `echoes` binary with no database flag and its platform data
/// directory rooted at `home`.
#[allow(dead_code)]
pub fn echoes_cmd_in_home(home: &TempDir) -> Command {
    let mut cmd = isolated_cmd(&home.path().join("missing.yaml"));
    cmd.env("HOME", home.path())
        .env("XDG_DATA_HOME", home.path().join("data"));
    cmd
}

fn isolated_cmd(config_path: &Path) -> Command {
    let mut cmd = Command::cargo_bin("echoes").expect("binary built");
    for var in [
        "ECHOES_APP_ID",
        "ECHOES_STORE",
        "ECHOES_DB",
        "ECHOES_POLL_INTERVAL_MS",
        "ECHOES_INITIAL_AUTH_TOKEN",
        "ECHOES_LOG_LEVEL",
        "ECHOES_JSON_LOGS",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd.arg("--config").arg(config_path);
    cmd
}
