//! Test file watching and the watch driver.

use colored::*;
use futures::{Stream, StreamExt};
use notify::{Event as NotifyEvent, EventKind, PollWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::sequence::{print_summary, Session};
use crate::state::SequenceState;

/// The watched file was created or modified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    pub path: PathBuf,
}

/// Lazy sequence of change notices for one file
pub type Changes = ReceiverStream<ChangeNotice>;

/// Watch `path` for edits. Bursts of events within `debounce` collapse into a
/// single notice. Must be called inside a tokio runtime.
pub fn watch_file(path: &Path, debounce: Duration) -> Result<Changes> {
    let (raw_tx, mut raw_rx) = mpsc::channel::<NotifyEvent>(100);
    let (tx, rx) = mpsc::channel::<ChangeNotice>(1);

    let mut watcher = PollWatcher::new(
        move |res: std::result::Result<NotifyEvent, notify::Error>| match res {
            Ok(event) => {
                let _ = raw_tx.try_send(event);
            }
            Err(e) => warn!(error = %e, "watch error"),
        },
        notify::Config::default()
            .with_poll_interval(Duration::from_millis(100))
            .with_compare_contents(true),
    )?;

    // Editors often replace the file, so watch its directory
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    info!(path = %path.display(), "watching test file");

    let target = path.to_path_buf();
    tokio::spawn(async move {
        // Keeps the watcher alive for as long as someone listens
        let _watcher = watcher;

        while let Some(event) = raw_rx.recv().await {
            if !is_edit_of(&event, &name) {
                continue;
            }

            // Swallow the rest of the burst
            while let Ok(Some(_)) = tokio::time::timeout(debounce, raw_rx.recv()).await {}

            debug!(path = %target.display(), "test file changed");
            match tx.try_send(ChangeNotice {
                path: target.clone(),
            }) {
                Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }
    });

    Ok(ReceiverStream::new(rx))
}

fn is_edit_of(event: &NotifyEvent, name: &OsString) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name().is_some_and(|n| n == name.as_os_str()))
}

/// Start a sequence for every change notice that arrives while the session
/// is idle. Notices that arrive while a sequence is in flight are dropped.
///
/// Returns the number of sequences that completed once `changes` ends and the
/// last sequence has finished. The first sequence error ends the drive.
pub async fn drive<S>(session: Arc<Session>, mut changes: S) -> Result<u32>
where
    S: Stream<Item = ChangeNotice> + Unpin,
{
    let (done_tx, mut done_rx) = mpsc::channel::<Result<SequenceState>>(1);
    let mut completed = 0;
    let mut running = false;

    loop {
        tokio::select! {
            notice = changes.next() => {
                let Some(notice) = notice else { break };
                let Some(slot) = session.try_begin() else {
                    info!(path = %notice.path.display(), "sequence in flight, dropping change");
                    continue;
                };

                println!("\n{} {}", "Change detected:".bold(), notice.path.display());
                running = true;
                let session = session.clone();
                let done_tx = done_tx.clone();
                tokio::spawn(async move {
                    let result = session.run(slot).await;
                    let _ = done_tx.send(result).await;
                });
            }
            Some(result) = done_rx.recv() => {
                running = false;
                print_summary(&result?);
                completed += 1;
            }
        }
    }

    if running {
        if let Some(result) = done_rx.recv().await {
            print_summary(&result?);
            completed += 1;
        }
    }

    Ok(completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};

    fn event(kind: EventKind, path: &str) -> NotifyEvent {
        NotifyEvent::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_is_edit_of_matches_file_name() {
        let name = OsString::from("main_test.go");
        assert!(is_edit_of(
            &event(EventKind::Modify(ModifyKind::Any), "/w/main_test.go"),
            &name
        ));
        assert!(is_edit_of(
            &event(EventKind::Create(CreateKind::File), "/w/main_test.go"),
            &name
        ));
        assert!(!is_edit_of(
            &event(EventKind::Modify(ModifyKind::Any), "/w/main.go"),
            &name
        ));
        assert!(!is_edit_of(
            &event(EventKind::Remove(RemoveKind::File), "/w/main_test.go"),
            &name
        ));
    }

    #[tokio::test]
    async fn test_watch_file_reports_edit() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("main_test.go");
        std::fs::write(&path, "package main\n").unwrap();

        let mut changes = watch_file(&path, Duration::from_millis(50)).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        std::fs::write(&path, "package main\n\nfunc TestFoo(t *testing.T) {}\n").unwrap();

        let notice = tokio::time::timeout(Duration::from_secs(5), changes.next())
            .await
            .expect("no change notice")
            .unwrap();
        assert_eq!(notice.path, path);
    }

    #[tokio::test]
    async fn test_watch_file_ignores_other_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("main_test.go");
        std::fs::write(&path, "package main\n").unwrap();

        let mut changes = watch_file(&path, Duration::from_millis(50)).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        std::fs::write(dir.path().join("main.go"), "package main\n").unwrap();

        let res = tokio::time::timeout(Duration::from_millis(800), changes.next()).await;
        assert!(res.is_err());
    }
}
