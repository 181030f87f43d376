//! Cold-start sequencing with a file-backed store in a temp home and fake
//! supervisor / transport / ingestor collaborators.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rstest::rstest;
use serde_json::{json, Value};
use tempfile::TempDir;

use dester_core::{
    store, Category, CategoryId, ConfigStore, Configuration, CredentialBlock, DaemonSettings,
    FileConfigStore, ProviderApiKey,
};
use dester_daemon::{
    paths::daemon_config_path, DaemonError, LaunchSpec, PlatformFamily, ProcessController,
    ProcessSupervisor, RcTransport,
};
use dester_startup::{
    IngestReport, MetadataError, MetadataIngestor, MetadataSyncTrigger, StartupError,
    StartupOutcome, StartupSequencer, StartupState,
};

const DAEMON_PID: u32 = 4242;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeSupervisor {
    terminated: AtomicUsize,
    launched: AtomicUsize,
}

impl ProcessSupervisor for FakeSupervisor {
    fn family(&self) -> PlatformFamily {
        PlatformFamily::Linux
    }

    fn listener_pids(&self, _port: u16) -> Vec<u32> {
        vec![]
    }

    fn terminate_listener(&self, _port: u16) -> Vec<u32> {
        self.terminated.fetch_add(1, Ordering::SeqCst);
        vec![]
    }

    fn launch(&self, _spec: &LaunchSpec) -> Result<u32, DaemonError> {
        self.launched.fetch_add(1, Ordering::SeqCst);
        Ok(DAEMON_PID)
    }
}

impl FakeSupervisor {
    fn restarts(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct FakeTransport {
    down: bool,
    methods: Mutex<Vec<String>>,
}

impl RcTransport for FakeTransport {
    fn call(&self, method: &str, _params: Value) -> Result<Value, DaemonError> {
        self.methods.lock().expect("lock").push(method.to_string());
        if self.down {
            return Err(DaemonError::Unreachable {
                url: format!("http://localhost:35530/{method}"),
                message: "connection refused".into(),
            });
        }
        Ok(json!({ "pid": DAEMON_PID }))
    }
}

#[derive(Default)]
struct CountingIngestor {
    calls: AtomicUsize,
    fail: bool,
}

impl MetadataIngestor for CountingIngestor {
    fn ingest(&self, api_key: &ProviderApiKey) -> Result<IngestReport, MetadataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(api_key.expose(), "tmdb-key");
        if self.fail {
            return Err(MetadataError::Rejected {
                status: 401,
                message: "Invalid API key".into(),
            });
        }
        Ok(IngestReport {
            provider: "fake".into(),
            detail: None,
        })
    }
}

impl CountingIngestor {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    home: TempDir,
    supervisor: Arc<FakeSupervisor>,
    ingestor: Arc<CountingIngestor>,
    sequencer: StartupSequencer,
}

fn categories(n: usize) -> Vec<Category> {
    (0..n)
        .map(|i| Category::new(format!("cat-{i}"), format!("Category {i}"), format!("gdrive:{i}")))
        .collect()
}

fn config(initialized: bool, metadata: bool, categories: Vec<Category>) -> Configuration {
    Configuration {
        is_config_initialized: initialized,
        is_metadata_initialized: metadata,
        categories,
        remote_credentials: vec![
            CredentialBlock::from("[gdrive]\ntype = drive"),
            CredentialBlock::from("[onedrive]\ntype = onedrive"),
        ],
        provider_api_key: Some(ProviderApiKey::new("tmdb-key")),
        updated_at: None,
    }
}

fn daemon_settings() -> DaemonSettings {
    DaemonSettings {
        binary: Some(PathBuf::from("/opt/rclone/rclone")),
        ready_attempts: 2,
        ready_interval_ms: 1,
        ..DaemonSettings::default()
    }
}

fn harness_with(
    configuration: Option<Configuration>,
    platform: &str,
    transport: FakeTransport,
    ingestor: CountingIngestor,
) -> Harness {
    let home = TempDir::new().expect("home");
    if let Some(configuration) = configuration {
        store::save_at(home.path(), &configuration).expect("save config");
    }

    let supervisor = Arc::new(FakeSupervisor::default());
    let ingestor = Arc::new(ingestor);
    let controller = ProcessController::new(
        home.path(),
        daemon_settings(),
        platform,
        supervisor.clone(),
        Arc::new(transport),
    );
    let sequencer = StartupSequencer::new(
        Arc::new(FileConfigStore::at(home.path())),
        controller,
        MetadataSyncTrigger::new(ingestor.clone()),
    );

    Harness {
        home,
        supervisor,
        ingestor,
        sequencer,
    }
}

fn harness(configuration: Option<Configuration>) -> Harness {
    harness_with(
        configuration,
        "linux",
        FakeTransport::default(),
        CountingIngestor::default(),
    )
}

// ---------------------------------------------------------------------------
// 1. First run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn uninitialized_config_parks_in_first_run() {
    let mut h = harness(Some(config(false, false, categories(3))));

    let outcome = h.sequencer.run().await;

    assert!(matches!(outcome, StartupOutcome::FirstRun));
    assert_eq!(h.sequencer.state(), StartupState::FirstRun);
    assert_eq!(h.supervisor.restarts(), 0, "no daemon restart on first run");
    assert_eq!(h.supervisor.terminated.load(Ordering::SeqCst), 0);
    assert!(h.sequencer.registry().is_empty());
    assert_eq!(h.ingestor.calls(), 0);
    assert!(!daemon_config_path(h.home.path()).exists());
}

#[tokio::test]
async fn absent_document_is_first_run() {
    let mut h = harness(None);
    assert!(matches!(h.sequencer.run().await, StartupOutcome::FirstRun));
    assert!(h.sequencer.registry().is_empty());
}

// ---------------------------------------------------------------------------
// 2. Provisioning
// ---------------------------------------------------------------------------

#[rstest]
#[case(0)]
#[case(1)]
#[case(4)]
#[tokio::test]
async fn one_handle_per_category(#[case] n: usize) {
    let mut h = harness(Some(config(true, true, categories(n))));

    let outcome = h.sequencer.run().await;

    let report = match outcome {
        StartupOutcome::Ready(report) => report,
        other => panic!("expected Ready, got {other:?}"),
    };
    assert_eq!(h.sequencer.state(), StartupState::Ready);
    assert_eq!(h.sequencer.registry().len(), n);
    let expected: Vec<CategoryId> = categories(n).into_iter().map(|c| c.identifier).collect();
    assert_eq!(h.sequencer.registry().ids(), expected.as_slice());
    assert_eq!(report.categories, expected);
    for id in &expected {
        assert!(h.sequencer.registry().contains(id), "missing handle for {id}");
    }
    assert_eq!(h.supervisor.restarts(), 1);
}

#[tokio::test]
async fn daemon_config_is_written_from_stored_credentials() {
    let mut h = harness(Some(config(true, true, categories(1))));

    h.sequencer.run().await;

    let written =
        std::fs::read_to_string(daemon_config_path(h.home.path())).expect("daemon config");
    assert_eq!(
        written,
        "\n\n[gdrive]\ntype = drive\n\n[onedrive]\ntype = onedrive"
    );
}

#[tokio::test]
async fn duplicate_identifiers_collapse_to_one_handle() {
    let cats = vec![
        Category::new("movies", "Movies", "gdrive:Movies"),
        Category::new("movies", "Films", "onedrive:Films"),
    ];
    let mut h = harness(Some(config(true, true, cats)));

    h.sequencer.run().await;

    let registry = h.sequencer.registry();
    assert_eq!(registry.len(), 1);
    let handle = registry.get(&CategoryId::from("movies")).expect("movies");
    assert_eq!(handle.category().display_name, "Films");
}

// ---------------------------------------------------------------------------
// 3. Metadata gating
// ---------------------------------------------------------------------------

#[tokio::test]
async fn metadata_already_initialized_skips_ingestion() {
    let mut h = harness(Some(config(true, true, categories(2))));

    let outcome = h.sequencer.run().await;

    assert!(matches!(outcome, StartupOutcome::Ready(ref r) if !r.metadata_ingested));
    assert_eq!(h.ingestor.calls(), 0);
}

#[tokio::test]
async fn metadata_not_initialized_ingests_exactly_once() {
    let mut h = harness(Some(config(true, false, categories(2))));

    let outcome = h.sequencer.run().await;

    assert!(matches!(outcome, StartupOutcome::Ready(ref r) if r.metadata_ingested));
    assert_eq!(h.ingestor.calls(), 1);

    // A second run on the same process is refused and does not re-ingest.
    let again = h.sequencer.run().await;
    assert!(matches!(
        again,
        StartupOutcome::Failed(StartupError::AlreadyStarted {
            state: StartupState::Ready
        })
    ));
    assert_eq!(h.ingestor.calls(), 1);
    assert_eq!(h.supervisor.restarts(), 1);
}

#[tokio::test]
async fn missing_api_key_fails_startup() {
    let mut configuration = config(true, false, categories(1));
    configuration.provider_api_key = None;
    let mut h = harness(Some(configuration));

    let outcome = h.sequencer.run().await;

    assert!(matches!(
        outcome,
        StartupOutcome::Failed(StartupError::Config(_))
    ));
    assert_eq!(h.ingestor.calls(), 0);
    assert_eq!(
        h.supervisor.terminated.load(Ordering::SeqCst),
        2,
        "the launched daemon is stopped again"
    );
}

// ---------------------------------------------------------------------------
// 4. Failure semantics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unsupported_platform_fails_without_launch_or_handles() {
    let mut h = harness_with(
        Some(config(true, true, categories(2))),
        "haiku",
        FakeTransport::default(),
        CountingIngestor::default(),
    );

    let outcome = h.sequencer.run().await;

    assert!(matches!(
        outcome,
        StartupOutcome::Failed(StartupError::Daemon(DaemonError::UnsupportedPlatform(_)))
    ));
    assert_eq!(h.sequencer.state(), StartupState::Failed);
    assert_eq!(h.supervisor.restarts(), 0);
    assert_eq!(h.supervisor.terminated.load(Ordering::SeqCst), 0);
    assert!(h.sequencer.registry().is_empty());
}

fn host_sequencer(home: &TempDir, platform: &str) -> StartupSequencer {
    let controller = ProcessController::for_platform(home.path(), daemon_settings(), platform);
    StartupSequencer::new(
        Arc::new(FileConfigStore::at(home.path())),
        controller,
        MetadataSyncTrigger::new(Arc::new(CountingIngestor::default())),
    )
}

#[tokio::test]
async fn unsupported_host_still_parks_in_first_run() {
    let home = TempDir::new().expect("home");
    store::save_at(home.path(), &config(false, false, categories(2))).expect("save");
    let mut sequencer = host_sequencer(&home, "freebsd");

    let outcome = sequencer.run().await;

    assert!(matches!(outcome, StartupOutcome::FirstRun), "got: {outcome:?}");
    assert_eq!(sequencer.state(), StartupState::FirstRun);
    sequencer.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn unsupported_host_fails_once_provisioning_needs_the_daemon() {
    let home = TempDir::new().expect("home");
    store::save_at(home.path(), &config(true, true, categories(2))).expect("save");
    let mut sequencer = host_sequencer(&home, "freebsd");

    let outcome = sequencer.run().await;

    assert!(matches!(
        outcome,
        StartupOutcome::Failed(StartupError::Daemon(DaemonError::UnsupportedPlatform(ref p)))
            if p == "freebsd"
    ));
    assert!(sequencer.registry().is_empty());
}

#[tokio::test]
async fn unreachable_daemon_fails_startup() {
    let mut h = harness_with(
        Some(config(true, true, categories(2))),
        "linux",
        FakeTransport {
            down: true,
            ..FakeTransport::default()
        },
        CountingIngestor::default(),
    );

    let outcome = h.sequencer.run().await;

    assert!(matches!(
        outcome,
        StartupOutcome::Failed(StartupError::Daemon(DaemonError::NotReady { attempts: 2 }))
    ));
    assert!(h.sequencer.registry().is_empty(), "no partial-ready registry");
    assert_eq!(
        h.supervisor.terminated.load(Ordering::SeqCst),
        2,
        "port cleared before launch and after the failed readiness check"
    );
    assert!(matches!(
        h.sequencer.require_ready(),
        Err(StartupError::NotReady {
            state: StartupState::Failed
        })
    ));
}

#[tokio::test]
async fn ingestion_failure_leaves_no_handles() {
    let mut h = harness_with(
        Some(config(true, false, categories(3))),
        "linux",
        FakeTransport::default(),
        CountingIngestor {
            fail: true,
            ..CountingIngestor::default()
        },
    );

    let outcome = h.sequencer.run().await;

    assert!(matches!(
        outcome,
        StartupOutcome::Failed(StartupError::Metadata(_))
    ));
    assert_eq!(h.ingestor.calls(), 1);
    assert!(h.sequencer.registry().is_empty());
    assert_eq!(h.supervisor.terminated.load(Ordering::SeqCst), 2);
}

// ---------------------------------------------------------------------------
// 5. Readiness contract, reprovision, shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn registry_is_gated_until_ready() {
    let mut h = harness(Some(config(true, true, categories(1))));
    assert!(matches!(
        h.sequencer.require_ready(),
        Err(StartupError::NotReady {
            state: StartupState::Cold
        })
    ));

    h.sequencer.run().await;

    assert_eq!(h.sequencer.require_ready().expect("ready").len(), 1);
}

#[tokio::test]
async fn reprovision_picks_up_updated_categories() {
    let mut h = harness(Some(config(true, true, categories(2))));
    h.sequencer.run().await;
    let before = h
        .sequencer
        .registry()
        .get(&CategoryId::from("cat-0"))
        .expect("cat-0")
        .generation();

    store::save_at(h.home.path(), &config(true, true, categories(3))).expect("update");
    let ids = h.sequencer.reprovision().await.expect("reprovision");

    assert_eq!(ids.len(), 3);
    assert_eq!(h.sequencer.state(), StartupState::Ready);
    assert_eq!(h.supervisor.restarts(), 2, "daemon restarted again");
    let after = h
        .sequencer
        .registry()
        .get(&CategoryId::from("cat-0"))
        .expect("cat-0")
        .generation();
    assert_ne!(before, after, "handles are rebuilt, not reused");
}

#[tokio::test]
async fn reprovision_before_ready_is_refused() {
    let mut h = harness(Some(config(false, false, vec![])));
    h.sequencer.run().await;

    let err = h.sequencer.reprovision().await.unwrap_err();
    assert!(matches!(
        err,
        StartupError::NotReady {
            state: StartupState::FirstRun
        }
    ));
    assert_eq!(h.supervisor.restarts(), 0);
}

#[tokio::test]
async fn shutdown_drops_handles_and_stops_daemon() {
    let mut h = harness(Some(config(true, true, categories(2))));
    h.sequencer.run().await;
    let terminations = h.supervisor.terminated.load(Ordering::SeqCst);

    h.sequencer.shutdown().await.expect("shutdown");

    assert!(h.sequencer.registry().is_empty());
    assert_eq!(
        h.supervisor.terminated.load(Ordering::SeqCst),
        terminations + 1
    );
}

#[tokio::test]
async fn shutdown_after_first_run_leaves_port_alone() {
    let mut h = harness(Some(config(false, false, vec![])));
    h.sequencer.run().await;

    h.sequencer.shutdown().await.expect("shutdown");
    assert_eq!(h.supervisor.terminated.load(Ordering::SeqCst), 0);
}

#[test]
fn store_write_back_is_visible_to_next_cold_start() {
    let home = TempDir::new().expect("home");
    store::save_at(home.path(), &config(true, false, categories(1))).expect("save");
    let file_store = FileConfigStore::at(home.path());

    file_store.set_metadata_initialized(true).expect("write back");

    assert!(file_store.is_metadata_initialized().expect("flag"));
}
