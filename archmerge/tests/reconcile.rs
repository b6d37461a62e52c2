use std::sync::Arc;
use std::time::Duration;

use archmerge::error::{PassError, ScanError};
use archmerge::memory::{Fault, MemoryRegistry};
use archmerge::publish::{Console, DockerPusher, DryRun, IndexPusher, RegistryPusher};
use archmerge::{
    scan, Architectures, DecrementPolicy, Key, Options, Reconciler, ScanOptions, SharedRegistry,
};
use indoc::formatdoc;
use parking_lot::Mutex;
use registry::{media_types, Descriptor, Digest, Platform};
use tokio_util::sync::CancellationToken;

const DOMAIN: &str = "r.example";

fn options(all: &[&str], selected: &[&str]) -> Options {
    Options {
        architectures: Arc::new(Architectures::new(all.iter().copied(), selected.iter().copied()).unwrap()),
        policy: DecrementPolicy::All,
        concurrency: 4,
        interval: Duration::ZERO,
        dry_run: false,
    }
}

fn listed(architecture: &str, digest: &Digest) -> Descriptor {
    Descriptor {
        media_type: media_types::DOCKER_MANIFEST.into(),
        digest: digest.clone(),
        size: 1,
        platform: Some(Platform::new("linux", architecture)),
    }
}

struct Harness {
    memory: Arc<MemoryRegistry>,
    console: Arc<Mutex<Vec<u8>>>,
}

impl Harness {
    fn new() -> Self {
        Self::with(MemoryRegistry::new(DOMAIN))
    }

    fn with(memory: MemoryRegistry) -> Self {
        Self {
            memory: Arc::new(memory),
            console: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn registry(&self) -> SharedRegistry {
        self.memory.clone()
    }

    fn console(&self) -> Console {
        self.console.clone()
    }

    fn output(&self) -> String {
        String::from_utf8(self.console.lock().clone()).unwrap()
    }

    fn reconciler(&self, options: Options) -> Reconciler {
        let pusher: Arc<dyn IndexPusher> = Arc::new(RegistryPusher::new(self.registry()));
        self.reconciler_with(pusher, options)
    }

    fn dry_run(&self, inner: Arc<dyn IndexPusher>, mut options: Options) -> Reconciler {
        options.dry_run = true;
        let pusher: Arc<dyn IndexPusher> = Arc::new(DryRun::new(inner, self.console()));
        self.reconciler_with(pusher, options)
    }

    fn reconciler_with(&self, pusher: Arc<dyn IndexPusher>, options: Options) -> Reconciler {
        Reconciler::new(self.registry(), pusher, options).with_console(self.console())
    }
}

#[tokio::test]
async fn dry_run_end_to_end() {
    let harness = Harness::new();
    let d1 = harness.memory.put_image("amd64/app", "v1", "amd64", "app-amd64");
    let d2 = harness.memory.put_image("arm64/app", "v1", "arm64", "app-arm64");
    harness.memory.put_list("app", "v1", vec![]);

    let inner: Arc<dyn IndexPusher> = Arc::new(RegistryPusher::new(harness.registry()));
    let reconciler = harness.dry_run(inner, options(&["amd64", "arm64", "s390x"], &["amd64", "arm64"]));

    let summary = reconciler.pass(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary.updates.len(), 1);
    assert_eq!(summary.updates[0].to_string(), "app:v1 [amd64, arm64]");
    assert!(harness.memory.pushes().is_empty());
    assert_eq!(harness.memory.list("app", "v1"), Some(vec![]));

    assert_eq!(
        harness.output(),
        formatdoc! {"
            amd64/app: arch amd64, process
            app: base, process
            arm64/app: arch arm64, process
            r.example/app:v1
              linux/amd64 {d1} r.example/amd64/app@{d1}
              linux/arm64 {d2} r.example/arm64/app@{d2}
            copy r.example/amd64/app@{d1} -> r.example/app
            copy r.example/arm64/app@{d2} -> r.example/app
            put r.example/app:v1 (application/vnd.docker.distribution.manifest.list.v2+json, 2 manifests)
        "}
    );
}

#[tokio::test]
async fn dry_run_with_docker_backend() {
    let harness = Harness::new();
    let d1 = harness.memory.put_image("amd64/app", "v1", "amd64", "app-amd64");

    let scratch = tempfile::tempdir().unwrap();
    let manifests = scratch.path().join("manifests");
    std::fs::create_dir(&manifests).unwrap();
    let docker = DockerPusher::new(true).with_scratch(Some(manifests.clone()));
    let reconciler = harness.dry_run(Arc::new(docker), options(&["amd64", "arm64"], &["amd64"]));

    reconciler.pass(&CancellationToken::new()).await.unwrap();

    let output = harness.output();
    assert!(output.contains(&format!("rm -rf {}\n", manifests.display())));
    assert!(output.contains(&format!(
        "docker manifest create --insecure --amend r.example/app:v1 r.example/amd64/app@{d1}\n"
    )));
    assert!(output.contains("docker manifest push --insecure r.example/app:v1\n"));
    assert!(manifests.exists());
}

#[tokio::test]
async fn publishes_sorted_list_and_settles() {
    let harness = Harness::new();
    let d1 = harness.memory.put_image("amd64/app", "v1", "amd64", "app-amd64");
    let d2 = harness.memory.put_image("arm64/app", "v1", "arm64", "app-arm64");
    let reconciler = harness.reconciler(options(&["amd64", "arm64"], &["arm64", "amd64"]));
    let token = CancellationToken::new();

    let first = reconciler.pass(&token).await.unwrap();
    assert_eq!(first.published.len(), 1);

    let pushes = harness.memory.pushes();
    assert_eq!(pushes.len(), 1);
    let sources: Vec<&str> = pushes[0]
        .entries
        .iter()
        .map(|entry| entry.source_repository.as_str())
        .collect();
    assert_eq!(sources, ["amd64/app", "arm64/app"]);
    let published: Vec<(String, Digest)> = harness
        .memory
        .list("app", "v1")
        .unwrap()
        .into_iter()
        .map(|d| (d.platform.unwrap().to_string(), d.digest))
        .collect();
    assert_eq!(
        published,
        [("linux/amd64".to_string(), d1), ("linux/arm64".to_string(), d2)]
    );

    let second = reconciler.pass(&token).await.unwrap();
    assert!(second.updates.is_empty());
    assert_eq!(harness.memory.pushes().len(), 1);
}

#[tokio::test]
async fn changed_image_moves_two_counters() {
    let harness = Harness::new();
    harness.memory.put_image("amd64/app", "v1", "amd64", "old");
    let reconciler = harness.reconciler(options(&["amd64"], &["amd64"]));
    let token = CancellationToken::new();
    reconciler.pass(&token).await.unwrap();

    let new = harness.memory.put_image("amd64/app", "v1", "amd64", "new");
    let old = Digest::sha256(b"old");

    let scan_options = ScanOptions {
        architectures: reconciler.options().architectures.clone(),
        policy: DecrementPolicy::All,
        concurrency: 4,
    };
    let scanned = scan(&harness.registry(), &scan_options, &token).await.unwrap();
    let entry = scanned.ledger.get(&Key::new("app", "v1")).unwrap();
    assert_eq!(entry.count(&old), -1);
    assert_eq!(entry.count(&new), 1);
    assert_eq!(entry.drift().count(), 2);

    let summary = reconciler.pass(&token).await.unwrap();
    assert_eq!(summary.updates.len(), 1);
    let pushed = harness.memory.list("app", "v1").unwrap();
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].digest, new);
}

#[tokio::test]
async fn deselected_architectures_are_not_scanned() {
    let harness = Harness::new();
    harness.memory.put_image("amd64/app", "v1", "amd64", "app-amd64");
    harness.memory.put_image("arm64/app", "v1", "arm64", "app-arm64");
    harness.memory.fail(Fault::Tags("arm64/app".into()));

    let reconciler = harness.reconciler(options(&["amd64", "arm64"], &["amd64"]));
    let summary = reconciler.pass(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.updates[0].to_string(), "app:v1 [amd64]");
}

#[tokio::test]
async fn failed_digest_publishes_nothing() {
    let harness = Harness::new();
    harness.memory.put_image("amd64/app", "v1", "amd64", "app-amd64");
    harness.memory.put_image("amd64/web", "v1", "amd64", "web-amd64");
    harness
        .memory
        .fail(Fault::Digest("amd64/web".into(), "v1".into()));

    let reconciler = harness.reconciler(options(&["amd64"], &["amd64"]));
    let err = reconciler.pass(&CancellationToken::new()).await.unwrap_err();

    match err {
        PassError::Scan(ScanError::Digest { reference, .. }) => assert_eq!(reference, "amd64/web:v1"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(harness.memory.pushes().is_empty());
}

#[tokio::test]
async fn failed_publish_does_not_stop_siblings() {
    let harness = Harness::new();
    harness.memory.put_image("amd64/app", "v1", "amd64", "app-amd64");
    harness.memory.put_image("amd64/web", "v1", "amd64", "web-amd64");
    harness.memory.fail(Fault::Push("app".into(), "v1".into()));

    let reconciler = harness.reconciler(options(&["amd64"], &["amd64"]));
    let err = reconciler.pass(&CancellationToken::new()).await.unwrap_err();

    match err {
        PassError::Publish {
            failed, attempted, errors,
        } => {
            assert_eq!((failed, attempted), (1, 2));
            assert!(errors[0].to_string().starts_with("app:v1"));
        }
        other => panic!("unexpected error: {other}"),
    }

    let pushed: Vec<String> = harness
        .memory
        .pushes()
        .iter()
        .map(|push| format!("{}:{}", push.repository, push.tag))
        .collect();
    assert_eq!(pushed, ["web:v1"]);
}

#[tokio::test]
async fn decrement_policy_for_deselected_entries() {
    let harness = Harness::new();
    let d1 = harness.memory.put_image("amd64/app", "v1", "amd64", "app-amd64");
    let stale = Digest::sha256(b"app-s390x");
    harness.memory.put_list(
        "app",
        "v1",
        vec![listed("amd64", &d1), listed("s390x", &stale)],
    );

    let token = CancellationToken::new();

    let mut selected = options(&["amd64", "s390x"], &["amd64"]);
    selected.policy = DecrementPolicy::Selected;
    let summary = harness.reconciler(selected).pass(&token).await.unwrap();
    assert!(summary.updates.is_empty());

    let all = options(&["amd64", "s390x"], &["amd64"]);
    let summary = harness.reconciler(all).pass(&token).await.unwrap();
    assert_eq!(summary.updates.len(), 1);
    assert_eq!(harness.memory.list("app", "v1").unwrap().len(), 1);
}

#[tokio::test]
async fn selected_republish_keeps_deselected_entries() {
    let harness = Harness::new();
    let old = Digest::sha256(b"app-amd64-old");
    let s390x = Digest::sha256(b"app-s390x");
    harness.memory.put_image("amd64/app", "v1", "amd64", "app-amd64-new");
    harness.memory.put_list(
        "app",
        "v1",
        vec![listed("amd64", &old), listed("s390x", &s390x)],
    );

    let mut selected = options(&["amd64", "s390x"], &["amd64"]);
    selected.policy = DecrementPolicy::Selected;
    let reconciler = harness.reconciler(selected);
    let token = CancellationToken::new();

    let summary = reconciler.pass(&token).await.unwrap();
    assert_eq!(summary.updates.len(), 1);
    assert_eq!(
        harness.memory.list("app", "v1").unwrap(),
        vec![
            harness.memory.descriptor("amd64/app", "v1").unwrap(),
            listed("s390x", &s390x)
        ]
    );
    let pushes = harness.memory.pushes();
    let sources: Vec<&str> = pushes[0]
        .entries
        .iter()
        .map(|entry| entry.source_repository.as_str())
        .collect();
    assert_eq!(sources, ["amd64/app", "app"]);

    let summary = reconciler.pass(&token).await.unwrap();
    assert!(summary.updates.is_empty());
}

#[tokio::test]
async fn cancelled_while_idle() {
    let harness = Harness::new();
    harness.memory.put_image("amd64/app", "v1", "amd64", "app-amd64");
    let mut options = options(&["amd64"], &["amd64"]);
    options.interval = Duration::from_secs(3600);
    let reconciler = harness.reconciler(options);

    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let result = tokio::time::timeout(Duration::from_secs(5), reconciler.run(token)).await;
    assert!(matches!(result, Ok(Ok(()))));
    assert_eq!(harness.memory.pushes().len(), 1);
}

#[tokio::test]
async fn cancelled_while_scanning() {
    let harness = Harness::with(MemoryRegistry::new(DOMAIN).with_latency(Duration::from_secs(30)));
    harness.memory.put_image("amd64/app", "v1", "amd64", "app-amd64");
    let reconciler = harness.reconciler(options(&["amd64"], &["amd64"]));

    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let result = tokio::time::timeout(Duration::from_secs(5), reconciler.run(token)).await;
    assert!(matches!(result, Ok(Err(PassError::Cancelled))));
    assert!(harness.memory.pushes().is_empty());
}
