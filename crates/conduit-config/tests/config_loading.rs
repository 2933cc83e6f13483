//! Integration tests for environment-driven configuration loading.

use std::collections::HashMap;
use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use conduit_config::{
    Config, ConfigLoadError, LOG_FILTER_ENV_VAR, LOG_FORMAT_ENV_VAR, LogFormat, ROOT_ENV_VAR,
    SocketEndpoint, default_log_filter,
};
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct FakeEnv {
    values: HashMap<&'static str, OsString>,
}

impl FakeEnv {
    fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    fn with(mut self, key: &'static str, value: &str) -> Self {
        self.values.insert(key, OsString::from(value));
        self
    }

    fn load(&self, well_known: &Utf8Path) -> Result<Config, ConfigLoadError> {
        Config::from_lookup(|key| self.values.get(key).cloned(), well_known)
    }
}

#[fixture]
fn well_known() -> TempDir {
    tempfile::tempdir().expect("temp dir")
}

fn utf8(dir: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 temp dir")
}

#[rstest]
fn defaults_apply_without_overrides(well_known: TempDir) {
    let config = FakeEnv::new().load(&utf8(&well_known)).expect("load");
    assert_eq!(config.log_filter(), default_log_filter());
    assert_eq!(config.log_format(), LogFormat::Json);
    assert!(config.sidecar_root().endpoint().is_unix());
}

#[rstest]
fn environment_overrides_every_setting(well_known: TempDir) {
    let config = FakeEnv::new()
        .with(ROOT_ENV_VAR, "tcp://127.0.0.1:7300")
        .with(LOG_FILTER_ENV_VAR, "conduit_dial=debug")
        .with(LOG_FORMAT_ENV_VAR, "compact")
        .load(&utf8(&well_known))
        .expect("load");
    assert_eq!(
        config.sidecar_root().endpoint(),
        &SocketEndpoint::tcp("127.0.0.1", 7300)
    );
    assert_eq!(config.log_filter(), "conduit_dial=debug");
    assert_eq!(config.log_format(), LogFormat::Compact);
}

#[rstest]
fn invalid_log_format_is_reported(well_known: TempDir) {
    let error = FakeEnv::new()
        .with(LOG_FORMAT_ENV_VAR, "pretty")
        .load(&utf8(&well_known))
        .expect_err("format should be rejected");
    assert!(matches!(error, ConfigLoadError::LogFormat { .. }));
}

#[test]
fn missing_root_is_fatal() {
    let error = FakeEnv::new()
        .load(Utf8Path::new("/nonexistent/conduit-root"))
        .expect_err("root should be missing");
    assert!(matches!(error, ConfigLoadError::Root(_)));
}

#[test]
fn logging_settings_apply_to_an_explicit_root() {
    let env = FakeEnv::new().with(LOG_FILTER_ENV_VAR, "warn");
    let root = conduit_config::SidecarRoot::new(SocketEndpoint::tcp("127.0.0.1", 7301));
    let config = Config::new(root)
        .with_logging_from(&|key: &str| env.values.get(key).cloned())
        .expect("logging settings");
    assert_eq!(config.log_filter(), "warn");
    assert_eq!(config.log_format(), LogFormat::Json);
}
