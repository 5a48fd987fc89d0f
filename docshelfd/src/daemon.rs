use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use docshelf_core::DocshelfClient;
use notify::RecommendedWatcher;
use time::OffsetDateTime;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::info;

use crate::sync::context::{SyncContext, SyncedFile};
use crate::sync::coordinator::{DEBOUNCE, ResyncCoordinator, SyncPass, Trigger};
use crate::sync::layout::WorkspaceLayout;
use crate::sync::local_watcher::{WatchEvent, start_watcher};
use crate::sync::mappings::MappingStore;
use crate::sync::queue::SerialQueue;
use crate::sync::reconciler::Reconciler;
use crate::sync::relay::MutationRelay;
use crate::sync::resolver::FolderResolver;

const DEFAULT_WORKSPACE_DIR_NAME: &str = "Docshelf";

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub workspace_dir: PathBuf,
    pub api_url: String,
    pub token: String,
    pub debounce: Duration,
    pub enable_watcher: bool,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let workspace_dir = std::env::var("DOCSHELF_WORKSPACE_DIR")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(|| home.join(DEFAULT_WORKSPACE_DIR_NAME));
        let api_url = std::env::var("DOCSHELF_API_URL").context("DOCSHELF_API_URL is not set")?;
        let token = std::env::var("DOCSHELF_TOKEN").context("DOCSHELF_TOKEN is not set")?;
        let debounce = Duration::from_millis(read_u64_env(
            "DOCSHELF_DEBOUNCE_MS",
            DEBOUNCE.as_millis() as u64,
        ));
        let enable_watcher = read_bool_env("DOCSHELF_ENABLE_WATCHER", true);

        Ok(Self {
            workspace_dir,
            api_url,
            token,
            debounce,
            enable_watcher,
        })
    }
}

/// Notices from the remote change feed, already decoded from transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteNotice {
    /// The feed (re)connected; local state may be arbitrarily stale.
    Ready,
    FolderChanged,
    FileChanged,
}

fn trigger_for(notice: RemoteNotice) -> Trigger {
    match notice {
        RemoteNotice::Ready => Trigger::Reconnected,
        RemoteNotice::FolderChanged | RemoteNotice::FileChanged => Trigger::RemoteChange,
    }
}

/// One running workspace synchronization session. Owns the watcher, the
/// mutation relay, and the resync coordinator; dropping or stopping it
/// tears all of them down.
pub struct WorkspaceSync {
    ctx: Arc<SyncContext>,
    coordinator: ResyncCoordinator,
    watcher: Option<RecommendedWatcher>,
    watcher_task: Option<JoinHandle<()>>,
    notice_task: Option<JoinHandle<()>>,
}

impl WorkspaceSync {
    pub async fn start(config: DaemonConfig) -> anyhow::Result<Self> {
        let client = DocshelfClient::new(&config.api_url, &config.token)
            .context("invalid API base url")?;
        let store = MappingStore::new_default()
            .await
            .context("failed to open folder mapping store")?;
        Self::start_with(config, client, store).await
    }

    /// Wiring seam shared by `start` and the tests, which inject a mock
    /// client and an in-memory mapping store.
    pub async fn start_with(
        config: DaemonConfig,
        client: DocshelfClient,
        store: MappingStore,
    ) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.workspace_dir)
            .await
            .with_context(|| {
                format!(
                    "failed to create workspace dir at {:?}",
                    config.workspace_dir
                )
            })?;
        store.init().await.context("failed to run migrations")?;

        let layout = WorkspaceLayout::new(&config.workspace_dir);
        let ctx = Arc::new(SyncContext::new());
        let resolver = Arc::new(FolderResolver::new(
            client.clone(),
            store.clone(),
            layout.clone(),
        ));
        let relay = MutationRelay::new(
            SerialQueue::new(),
            Arc::clone(&resolver),
            client.clone(),
            store.clone(),
            Arc::clone(&ctx),
            layout.clone(),
        );

        let reconciler = Arc::new(Reconciler::new(client, store, layout, Arc::clone(&ctx)));
        let pass: SyncPass = Arc::new(move || {
            let reconciler = Arc::clone(&reconciler);
            Box::pin(async move { reconciler.run().await })
        });
        let coordinator = ResyncCoordinator::start_with(Arc::clone(&ctx), pass, config.debounce);

        let (watcher, watcher_task) = if config.enable_watcher {
            let (watcher, events) = start_watcher(&config.workspace_dir)
                .context("failed to start filesystem watcher")?;
            let task = forward_watch_events(Arc::clone(&ctx), events, relay);
            (Some(watcher), Some(task))
        } else {
            (None, None)
        };

        coordinator.trigger(Trigger::Reconnected);
        info!(workspace = %config.workspace_dir.display(), "workspace sync started");

        Ok(Self {
            ctx,
            coordinator,
            watcher,
            watcher_task,
            notice_task: None,
        })
    }

    /// Returns a sender the remote feed consumer pushes notices into.
    pub fn notice_sender(&mut self) -> UnboundedSender<RemoteNotice> {
        let (tx, mut rx) = mpsc::unbounded_channel::<RemoteNotice>();
        let triggers = self.coordinator.sender();
        self.notice_task = Some(tokio::spawn(async move {
            while let Some(notice) = rx.recv().await {
                if triggers.send(trigger_for(notice)).is_err() {
                    break;
                }
            }
        }));
        tx
    }

    pub fn trigger_resync(&self) {
        self.coordinator.trigger(Trigger::RemoteChange);
    }

    pub async fn synced_files(&self) -> Vec<SyncedFile> {
        self.ctx.files().await
    }

    pub async fn last_synced_at(&self) -> Option<OffsetDateTime> {
        self.ctx.last_synced_at().await
    }

    pub fn stop(mut self) {
        if let Some(task) = self.watcher_task.take() {
            task.abort();
        }
        if let Some(task) = self.notice_task.take() {
            task.abort();
        }
        // Dropping the watcher detaches it from the kernel.
        self.watcher.take();
        self.coordinator.stop();
        info!("workspace sync stopped");
    }
}

/// Feeds watcher events into the relay. Mirror writes made by a sync pass
/// come back through the watcher; events arriving while the suppression
/// flag is raised are dropped here, before they reach the relay.
fn forward_watch_events(
    ctx: Arc<SyncContext>,
    mut events: mpsc::UnboundedReceiver<WatchEvent>,
    relay: MutationRelay,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if ctx.is_suppressed() {
                continue;
            }
            relay.dispatch(event);
        }
    })
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_bool_env(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::SqlitePool;
    use tempfile::tempdir;
    use crate::sync::paths::normalize_path;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn expand_with_home_handles_tilde_prefixes() {
        let home = Path::new("/home/sam");
        assert_eq!(expand_with_home("~", home), PathBuf::from("/home/sam"));
        assert_eq!(
            expand_with_home("~/Docs", home),
            PathBuf::from("/home/sam/Docs")
        );
        assert_eq!(expand_with_home("/abs", home), PathBuf::from("/abs"));
    }

    #[test]
    fn read_u64_env_rejects_zero_and_garbage() {
        unsafe {
            std::env::set_var("DOCSHELF_TEST_U64_A", "0");
            std::env::set_var("DOCSHELF_TEST_U64_B", "nope");
            std::env::set_var("DOCSHELF_TEST_U64_C", "250");
        }
        assert_eq!(read_u64_env("DOCSHELF_TEST_U64_A", 7), 7);
        assert_eq!(read_u64_env("DOCSHELF_TEST_U64_B", 7), 7);
        assert_eq!(read_u64_env("DOCSHELF_TEST_U64_C", 7), 250);
        assert_eq!(read_u64_env("DOCSHELF_TEST_U64_MISSING", 7), 7);
    }

    #[test]
    fn read_bool_env_accepts_common_spellings() {
        unsafe {
            std::env::set_var("DOCSHELF_TEST_BOOL_A", "TRUE");
            std::env::set_var("DOCSHELF_TEST_BOOL_B", "off");
        }
        assert!(read_bool_env("DOCSHELF_TEST_BOOL_A", false));
        assert!(!read_bool_env("DOCSHELF_TEST_BOOL_B", true));
        assert!(read_bool_env("DOCSHELF_TEST_BOOL_MISSING", true));
    }

    #[test]
    fn notices_map_to_the_expected_triggers() {
        assert_eq!(trigger_for(RemoteNotice::Ready), Trigger::Reconnected);
        assert_eq!(trigger_for(RemoteNotice::FolderChanged), Trigger::RemoteChange);
        assert_eq!(trigger_for(RemoteNotice::FileChanged), Trigger::RemoteChange);
    }

    #[tokio::test]
    async fn suppressed_watch_events_never_reach_the_relay() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/folders"))
            .and(body_json(json!({ "name": "Dropped", "parentId": "root" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "f9", "name": "Dropped", "parentId": "root"
            })))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/folders"))
            .and(body_json(json!({ "name": "Kept", "parentId": "root" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "f1", "name": "Kept", "parentId": "root"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let client = DocshelfClient::new(&server.uri(), "test-token").unwrap();
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = MappingStore::from_pool(pool);
        store.init().await.unwrap();
        let layout = WorkspaceLayout::new(dir.path());
        let ctx = Arc::new(SyncContext::new());
        let resolver = Arc::new(FolderResolver::new(
            client.clone(),
            store.clone(),
            layout.clone(),
        ));
        let relay = MutationRelay::new(
            SerialQueue::new(),
            resolver,
            client,
            store.clone(),
            Arc::clone(&ctx),
            layout,
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let task = forward_watch_events(Arc::clone(&ctx), rx, relay);

        {
            let _guard = ctx.suppress();
            tx.send(WatchEvent::FolderCreated(dir.path().join("My Folders/Dropped")))
                .unwrap();
            // Give the consumer time to see the event while the flag is
            // still raised.
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        tx.send(WatchEvent::FolderCreated(dir.path().join("My Folders/Kept")))
            .unwrap();
        let kept_key = normalize_path(&dir.path().join("My Folders/Kept"));
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while store.get(&kept_key).await.unwrap().is_none() {
            assert!(std::time::Instant::now() < deadline, "kept event timed out");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let dropped_key = normalize_path(&dir.path().join("My Folders/Dropped"));
        assert_eq!(store.get(&dropped_key).await.unwrap(), None);
        task.abort();
    }

    #[tokio::test]
    async fn session_runs_an_initial_pass_and_resyncs_on_notice() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/folders/tree"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "root", "name": "My Folders", "children": [] },
                { "name": "Shared With Me", "children": [] },
                { "id": "g1", "name": "General", "children": [] }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/files"))
            .and(query_param("folderId", "root"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/files"))
            .and(query_param("folderId", "g1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "id": "d1",
                "name": "handbook.pdf",
                "size": 4,
                "modified": "2024-01-01T00:00:00Z",
                "folderId": "g1"
            }])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/files/d1/download"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"book"))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let config = DaemonConfig {
            workspace_dir: dir.path().to_path_buf(),
            api_url: server.uri(),
            token: "test-token".to_string(),
            debounce: Duration::from_millis(10),
            enable_watcher: false,
        };
        let client = DocshelfClient::new(&server.uri(), "test-token").unwrap();
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = MappingStore::from_pool(pool);

        let mut session = WorkspaceSync::start_with(config, client, store)
            .await
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while session.last_synced_at().await.is_none() {
            assert!(std::time::Instant::now() < deadline, "initial pass timed out");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let first = session.last_synced_at().await;
        let files = session.synced_files().await;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "handbook.pdf");
        assert_eq!(
            std::fs::read(dir.path().join("General/handbook.pdf")).unwrap(),
            b"book"
        );

        let notices = session.notice_sender();
        notices.send(RemoteNotice::FileChanged).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while session.last_synced_at().await == first {
            assert!(std::time::Instant::now() < deadline, "resync timed out");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        session.stop();
    }
}
