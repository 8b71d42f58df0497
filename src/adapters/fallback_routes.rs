//! Hot reload for the critical fallback route set.
//!
//! Editors and config-management tools rewrite files as bursts of
//! create/modify/rename events, sometimes through temp files. Raw
//! filesystem events are therefore coalesced: anything touching the
//! target file feeds a debounce task, and subscribers observe one
//! generation bump per burst, after the file has settled.
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use eyre::{Context, Result};
use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};

use crate::config::{loader::load_fallback_routes, models::RouteDefinition};

/// How long the file must stay quiet before a reload is signaled.
const SETTLE_WINDOW: Duration = Duration::from_millis(250);

pub struct FallbackRouteProvider {
    path: PathBuf,
    changes: watch::Receiver<u64>,
    // Dropping the watcher stops event delivery; hold it for the
    // provider's lifetime.
    _watcher: notify::RecommendedWatcher,
}

impl FallbackRouteProvider {
    /// Start watching `path`. Must be called from within a runtime: the
    /// debounce task is spawned here.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file_name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("Fallback route path has no file name"))?
            .to_owned();

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (generation_tx, generation_rx) = watch::channel(0u64);

        let mut watcher =
            notify::recommended_watcher(move |outcome: notify::Result<notify::Event>| {
                let event = match outcome {
                    Ok(event) => event,
                    Err(error) => {
                        tracing::error!(error = %error, "fallback route watch error");
                        return;
                    }
                };
                let touches_file = event.paths.iter().any(|p| p.ends_with(&file_name));
                let mutates = matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                );
                if touches_file && mutates {
                    let _ = raw_tx.send(());
                }
            })?;

        // The file itself may be replaced by rename, so watch its
        // directory rather than the inode.
        let watch_dir = path.parent().unwrap_or_else(|| Path::new("."));
        watcher
            .watch(watch_dir, RecursiveMode::NonRecursive)
            .wrap_err("Failed to watch fallback route directory")?;

        tokio::spawn(coalesce_events(raw_rx, generation_tx));

        Ok(Self {
            path,
            changes: generation_rx,
            _watcher: watcher,
        })
    }

    pub fn load(&self) -> Result<Vec<RouteDefinition>> {
        let path = self
            .path
            .to_str()
            .ok_or_else(|| eyre::eyre!("Invalid fallback route path"))?;
        load_fallback_routes(path)
    }

    /// A receiver that sees one generation bump per burst of edits.
    /// Any number of subscribers may listen.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.clone()
    }
}

/// Collapse a burst of raw events into a single notification once the
/// file has been quiet for the settle window.
async fn coalesce_events(mut raw: mpsc::UnboundedReceiver<()>, generations: watch::Sender<u64>) {
    let mut generation = 0u64;
    while raw.recv().await.is_some() {
        loop {
            tokio::time::sleep(SETTLE_WINDOW).await;
            // Another write landed during the window; keep waiting.
            if raw.try_recv().is_err() {
                break;
            }
            while raw.try_recv().is_ok() {}
        }
        generation += 1;
        tracing::debug!(generation, "fallback route set settled after edit");
        if generations.send(generation).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{fs::File, io::Write};

    use tempfile::tempdir;
    use tokio::time::{sleep, timeout};

    use super::*;

    const INITIAL: &str = r#"[
        {
            "id": "emergency-auth",
            "uri": "http://auth:9000",
            "predicates": [{"name": "Path", "args": {"pattern": "/auth/**"}}],
            "metadata": {"critical": "true"}
        }
    ]"#;

    const UPDATED: &str = r#"[
        {
            "id": "emergency-auth",
            "uri": "http://auth:9100",
            "predicates": [{"name": "Path", "args": {"pattern": "/auth/**"}}],
            "metadata": {"critical": "true"}
        },
        {
            "id": "emergency-status",
            "uri": "http://status:9200",
            "predicates": [{"name": "Path", "args": {"pattern": "/status/**"}}],
            "metadata": {"critical": "true"}
        }
    ]"#;

    fn write_file(path: &Path, contents: &str) {
        let mut file = File::create(path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn signals_once_after_edits_settle() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("fallback-routes.json");
        write_file(&file_path, INITIAL);

        let provider = FallbackRouteProvider::new(&file_path)?;
        assert_eq!(provider.load()?.len(), 1);

        let mut changes = provider.subscribe();
        let before = *changes.borrow();

        sleep(Duration::from_millis(50)).await;
        // Several quick rewrites, as an editor save would produce.
        write_file(&file_path, INITIAL);
        write_file(&file_path, UPDATED);

        timeout(Duration::from_secs(3), changes.changed())
            .await
            .expect("timed out waiting for settle")
            .expect("watch channel closed");
        assert!(*changes.borrow() > before);

        let defs = provider.load()?;
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].uri, "http://auth:9100");
        Ok(())
    }

    #[tokio::test]
    async fn multiple_subscribers_observe_the_same_generation() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("fallback-routes.json");
        write_file(&file_path, INITIAL);

        let provider = FallbackRouteProvider::new(&file_path)?;
        let mut first = provider.subscribe();
        let mut second = provider.subscribe();

        sleep(Duration::from_millis(50)).await;
        write_file(&file_path, UPDATED);

        timeout(Duration::from_secs(3), first.changed())
            .await
            .expect("timed out")
            .unwrap();
        timeout(Duration::from_secs(3), second.changed())
            .await
            .expect("timed out")
            .unwrap();
        assert_eq!(*first.borrow(), *second.borrow());
        Ok(())
    }
}
