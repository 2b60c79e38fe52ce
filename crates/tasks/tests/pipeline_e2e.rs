//! Standard pipeline against a provided Node.js distribution
#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use nodekit_cache::FingerprintStore;
use nodekit_core::config::ScriptConfig;
use nodekit_core::{Arch, Config, Error, FixedPlatformResolver, Os, Platform};
use nodekit_install::{
    DistributionUrlBuilder, DownloadOptions, HttpDownloader, InstallCache, InstallationManager,
};
use nodekit_tasks::{
    BufferedSink, CommandExecutor, Stream, Toolchain, UnitOutcome, UnitReport, standard_pipeline,
};
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const FAKE_NODE: &str = "#!/bin/sh\necho v16.14.0\n";

// Records every invocation in calls.log inside the project directory and,
// like npm, writes package-lock.json on the first install.
const FAKE_NPM: &str = r#"#!/bin/sh
echo "$*" >> calls.log
case "$1 $2" in
  "install "*)
    mkdir -p node_modules
    [ -f package-lock.json ] || echo '{"lockfileVersion":3}' > package-lock.json ;;
  "run fail") echo "build broke" 1>&2; exit 3 ;;
esac
echo "npm $* (${GREETING:-none})"
"#;

fn executable(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

struct Fixture {
    tmp: TempDir,
    sink: Arc<BufferedSink>,
}

impl Fixture {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        executable(&tmp.path().join("node/bin/node"), FAKE_NODE);
        executable(&tmp.path().join("node/bin/npm"), FAKE_NPM);
        fs::create_dir_all(tmp.path().join("project/src")).unwrap();
        fs::write(
            tmp.path().join("project/package.json"),
            r#"{"name":"web","scripts":{"build":"vite build"}}"#,
        )
        .unwrap();
        fs::write(tmp.path().join("project/src/main.ts"), "export {}").unwrap();
        Self {
            tmp,
            sink: Arc::new(BufferedSink::new()),
        }
    }

    fn project(&self) -> PathBuf {
        self.tmp.path().join("project")
    }

    fn config(&self, scripts: Vec<ScriptConfig>) -> Config {
        let mut config = Config::for_node("16.14.0");
        config.working_directory = self.project();
        config.node.install_directory = Some(self.tmp.path().join("node"));
        config.scripts = scripts;
        config
    }

    async fn run(&self, config: Config) -> nodekit_core::Result<Vec<UnitReport>> {
        let manager = InstallationManager::new(
            InstallCache::new(self.tmp.path().join("cache"), Duration::from_secs(5)),
            Arc::new(FixedPlatformResolver(Platform::new(Os::Linux, Arch::X64))),
            DistributionUrlBuilder::default(),
            Arc::new(HttpDownloader::new(&DownloadOptions::default(), None).unwrap()),
        );
        let toolchain = Arc::new(Toolchain::new(config, manager));
        let executor = Arc::new(CommandExecutor::new(self.sink.clone()));
        let store = FingerprintStore::new(self.tmp.path().join("state"));
        standard_pipeline(toolchain, executor, store)?.run().await
    }

    fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.project().join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

fn script(name: &str, command: &str) -> ScriptConfig {
    ScriptConfig {
        name: name.to_string(),
        command: command.to_string(),
        inputs: vec![PathBuf::from("src")],
        env: BTreeMap::from([("GREETING".to_string(), "hi".to_string())]),
    }
}

fn outcomes(reports: &[UnitReport]) -> Vec<(&str, UnitOutcome)> {
    reports
        .iter()
        .map(|r| (r.unit.as_str(), r.outcome))
        .collect()
}

#[tokio::test]
async fn scripts_run_once_until_inputs_change() {
    let fixture = Fixture::new();
    let config = fixture.config(vec![script("assemble", "run build")]);

    let first = fixture.run(config.clone()).await.unwrap();
    assert_eq!(
        outcomes(&first),
        [
            ("install-node", UnitOutcome::Executed { exit_code: 0 }),
            ("install-package-manager", UnitOutcome::NotApplicable),
            ("install-dependencies", UnitOutcome::Executed { exit_code: 0 }),
            ("run-script:assemble", UnitOutcome::Executed { exit_code: 0 }),
        ]
    );
    assert_eq!(fixture.calls(), ["install", "run build"]);
    assert!(fixture.project().join("node_modules").is_dir());
    assert!(
        fixture
            .sink
            .text(Stream::Stdout)
            .contains("npm run build (hi)")
    );

    let second = fixture.run(config.clone()).await.unwrap();
    assert!(
        second
            .iter()
            .filter(|r| r.outcome != UnitOutcome::NotApplicable)
            .all(UnitReport::was_skipped_by_cache)
    );
    assert_eq!(fixture.calls().len(), 2);

    fs::write(
        fixture.project().join("package.json"),
        r#"{"name":"web","scripts":{"build":"vite build --minify"}}"#,
    )
    .unwrap();
    let third = fixture.run(config.clone()).await.unwrap();
    assert!(!third[2].was_skipped_by_cache());
    assert!(!third[3].was_skipped_by_cache());
    assert_eq!(fixture.calls(), ["install", "run build", "install", "run build"]);

    fs::write(fixture.project().join("src/main.ts"), "export const x = 1").unwrap();
    let fourth = fixture.run(config).await.unwrap();
    assert!(fourth[2].was_skipped_by_cache());
    assert!(!fourth[3].was_skipped_by_cache());
}

#[tokio::test]
async fn failing_script_stops_pipeline_with_its_exit_code() {
    let fixture = Fixture::new();
    let config = fixture.config(vec![
        script("broken", "run fail"),
        script("never", "run build"),
    ]);

    let err = fixture.run(config.clone()).await.unwrap_err();
    assert!(matches!(&err, Error::Unit { unit, .. } if unit == "run-script:broken"));
    assert_eq!(err.exit_code(), Some(3));
    assert_eq!(fixture.calls(), ["install", "run fail"]);
    assert!(fixture.sink.text(Stream::Stderr).contains("build broke"));

    // Nothing was recorded for the failed unit, so it runs again.
    let _ = fixture.run(config).await.unwrap_err();
    assert_eq!(fixture.calls(), ["install", "run fail", "run fail"]);
}

#[tokio::test]
async fn deleted_node_modules_triggers_reinstall() {
    let fixture = Fixture::new();
    let config = fixture.config(Vec::new());

    fixture.run(config.clone()).await.unwrap();
    fs::remove_dir_all(fixture.project().join("node_modules")).unwrap();
    let reports = fixture.run(config).await.unwrap();

    assert!(!reports[2].was_skipped_by_cache());
    assert_eq!(fixture.calls(), ["install", "install"]);
}

#[tokio::test]
async fn lock_file_written_by_install_keeps_dependencies_up_to_date() {
    let fixture = Fixture::new();
    let config = fixture.config(Vec::new());

    fixture.run(config.clone()).await.unwrap();
    assert!(fixture.project().join("package-lock.json").is_file());

    let second = fixture.run(config).await.unwrap();
    assert!(second[2].was_skipped_by_cache());
    assert_eq!(fixture.calls(), ["install"]);
}

#[tokio::test]
async fn lock_file_change_reinstalls_and_reruns_scripts() {
    let fixture = Fixture::new();
    let config = fixture.config(vec![script("assemble", "run build")]);

    fixture.run(config.clone()).await.unwrap();
    fs::write(
        fixture.project().join("package-lock.json"),
        r#"{"lockfileVersion":3,"packages":{"node_modules/vite":{"version":"5.0.1"}}}"#,
    )
    .unwrap();
    let second = fixture.run(config).await.unwrap();

    assert!(!second[2].was_skipped_by_cache());
    assert!(!second[3].was_skipped_by_cache());
    assert_eq!(fixture.calls(), ["install", "run build", "install", "run build"]);
}
