//! # File Stream Source
//!
//! Reads whole files named by a `PathSource` and decodes each one into
//! radials. The path source is usually a directory watcher, but any
//! `mpsc::Receiver<PathBuf>` works, which keeps tests free of filesystem
//! notification timing.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::{DriverError, ProtocolError, TransientFetchError};

use super::level2::Radial;
use super::SourceReader;

/// Blocking "provide next file path" source.
#[async_trait]
pub trait PathSource: Send {
    /// Waits for the next path. `None` when the source is exhausted or
    /// `cancel` fired while waiting.
    async fn next_path(&mut self, cancel: &CancellationToken) -> Option<PathBuf>;
}

#[async_trait]
impl PathSource for mpsc::Receiver<PathBuf> {
    async fn next_path(&mut self, cancel: &CancellationToken) -> Option<PathBuf> {
        tokio::select! {
            _ = cancel.cancelled() => None,
            path = self.recv() => path,
        }
    }
}

#[async_trait]
impl PathSource for mpsc::UnboundedReceiver<PathBuf> {
    async fn next_path(&mut self, cancel: &CancellationToken) -> Option<PathBuf> {
        tokio::select! {
            _ = cancel.cancelled() => None,
            path = self.recv() => path,
        }
    }
}

#[async_trait]
impl<P: PathSource + ?Sized> PathSource for Box<P> {
    async fn next_path(&mut self, cancel: &CancellationToken) -> Option<PathBuf> {
        (**self).next_path(cancel).await
    }
}

/// Turns the bytes of one file into radials.
pub trait RadialDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<Radial>, ProtocolError>;
}

impl<D: RadialDecoder + ?Sized> RadialDecoder for Arc<D> {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<Radial>, ProtocolError> {
        (**self).decode(bytes)
    }
}

/// One decoded file.
#[derive(Debug, Clone)]
pub struct RadialFile {
    pub path: PathBuf,
    pub radials: Vec<Radial>,
}

/// Source reader yielding one decoded file per call.
pub struct FileStreamReader<P, D> {
    paths: P,
    decoder: D,
    exhausted: bool,
}

impl<P: PathSource, D: RadialDecoder> FileStreamReader<P, D> {
    pub fn new(paths: P, decoder: D) -> Self {
        Self {
            paths,
            decoder,
            exhausted: false,
        }
    }

    fn decode_file(&self, path: PathBuf, bytes: &[u8]) -> Result<Option<RadialFile>, DriverError> {
        let radials = self.decoder.decode(bytes)?;
        if radials.is_empty() {
            debug!("{}: no radials", path.display());
            return Ok(None);
        }
        debug!("{}: {} radials", path.display(), radials.len());
        Ok(Some(RadialFile { path, radials }))
    }
}

#[async_trait]
impl<P: PathSource, D: RadialDecoder> SourceReader for FileStreamReader<P, D> {
    type Unit = RadialFile;

    fn describe(&self) -> String {
        "file stream".to_string()
    }

    async fn next_unit(&mut self, cancel: &CancellationToken) -> Result<Option<RadialFile>, DriverError> {
        if self.exhausted {
            cancel.cancelled().await;
            return Ok(None);
        }
        match self.paths.next_path(cancel).await {
            Some(path) => {
                let bytes = tokio::fs::read(&path).await.map_err(TransientFetchError::Io)?;
                self.decode_file(path, &bytes)
            }
            None if cancel.is_cancelled() => Ok(None),
            None => {
                // Nothing will ever arrive again; park until stopped instead of spinning.
                info!("path source exhausted, waiting for stop");
                self.exhausted = true;
                cancel.cancelled().await;
                Ok(None)
            }
        }
    }
}

#[cfg(feature = "watch")]
pub use watcher::DirectoryWatcher;

#[cfg(feature = "watch")]
mod watcher {
    use std::collections::{HashMap, VecDeque};
    use std::path::{Path, PathBuf};
    use std::time::{Duration, SystemTime};

    use async_trait::async_trait;
    use log::{debug, warn};
    use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RemoveKind, RenameMode};
    use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
    use tokio::sync::mpsc;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use super::PathSource;
    use crate::errors::ConfigurationError;

    /// A file written to without a close event counts as finished after this long.
    const QUIET_PERIOD: Duration = Duration::from_secs(2);
    /// Upper bound on remembered file versions.
    const MAX_TRACKED: usize = 4096;

    #[derive(Debug)]
    enum Signal {
        /// Data is being written.
        Written(PathBuf),
        /// Closed after writing, or moved into place.
        Finished(PathBuf),
        Removed(PathBuf),
    }

    /// Version of a file's content as seen through its metadata.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Version {
        len: u64,
        modified: Option<SystemTime>,
    }

    impl Version {
        fn of(path: &Path) -> Option<Self> {
            let meta = std::fs::metadata(path).ok().filter(|m| m.is_file())?;
            Some(Self {
                len: meta.len(),
                modified: meta.modified().ok(),
            })
        }
    }

    /// Yields files of one directory once their writer is done with them.
    ///
    /// A file is ready when it is closed after writing, renamed into the
    /// directory, or left untouched for `QUIET_PERIOD` after its last write.
    /// The same path is yielded again when its content changes later.
    pub struct DirectoryWatcher {
        dir: PathBuf,
        // Dropping the watcher ends the notification stream.
        _watcher: RecommendedWatcher,
        events: mpsc::UnboundedReceiver<Signal>,
        writing: HashMap<PathBuf, Instant>,
        ready: VecDeque<PathBuf>,
        delivered: HashMap<PathBuf, Version>,
    }

    impl DirectoryWatcher {
        /// Starts watching `dir` (non-recursive). With `scan_existing`, files
        /// already present are queued first, sorted by name.
        pub fn new(dir: impl AsRef<Path>, scan_existing: bool) -> Result<Self, ConfigurationError> {
            let dir = dir.as_ref().to_path_buf();
            if !dir.is_dir() {
                return Err(ConfigurationError::InvalidAddress {
                    address: dir.display().to_string(),
                    reason: "not a directory".to_string(),
                });
            }

            let (tx, events) = mpsc::unbounded_channel();
            let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if let Some(signal) = classify(event) {
                        let _ = tx.send(signal);
                    }
                }
                Err(e) => warn!("directory watch error: {}", e),
            })
            .map_err(|e| watch_error(&dir, e))?;
            watcher
                .watch(&dir, RecursiveMode::NonRecursive)
                .map_err(|e| watch_error(&dir, e))?;

            let mut ready = VecDeque::new();
            if scan_existing {
                let mut existing: Vec<PathBuf> = std::fs::read_dir(&dir)?
                    .filter_map(|entry| entry.ok().map(|e| e.path()))
                    .filter(|p| p.is_file())
                    .collect();
                existing.sort();
                debug!("{}: {} existing files queued", dir.display(), existing.len());
                ready.extend(existing);
            }

            Ok(Self {
                dir,
                _watcher: watcher,
                events,
                writing: HashMap::new(),
                ready,
                delivered: HashMap::new(),
            })
        }

        pub fn dir(&self) -> &Path {
            &self.dir
        }

        fn note(&mut self, signal: Signal) {
            match signal {
                Signal::Written(path) => {
                    self.writing.insert(path, Instant::now());
                }
                Signal::Finished(path) => {
                    self.writing.remove(&path);
                    self.ready.push_back(path);
                }
                Signal::Removed(path) => {
                    self.writing.remove(&path);
                    self.delivered.remove(&path);
                }
            }
        }

        /// Moves files whose writer went quiet to the ready queue, oldest first.
        fn promote_quiet(&mut self) {
            let now = Instant::now();
            let mut quiet: Vec<(Instant, PathBuf)> = self
                .writing
                .iter()
                .filter(|(_, last)| **last + QUIET_PERIOD <= now)
                .map(|(path, last)| (*last, path.clone()))
                .collect();
            quiet.sort();
            for (_, path) in quiet {
                self.writing.remove(&path);
                self.ready.push_back(path);
            }
        }

        fn take_ready(&mut self) -> Option<PathBuf> {
            while let Some(path) = self.ready.pop_front() {
                let Some(version) = Version::of(&path) else {
                    continue;
                };
                if self.delivered.get(&path) == Some(&version) {
                    debug!("{}: unchanged, not read again", path.display());
                    continue;
                }
                self.remember(path.clone(), version);
                return Some(path);
            }
            None
        }

        fn remember(&mut self, path: PathBuf, version: Version) {
            self.delivered.insert(path, version);
            if self.delivered.len() > MAX_TRACKED {
                self.delivered.retain(|p, _| p.is_file());
            }
            while self.delivered.len() > MAX_TRACKED {
                let oldest = self
                    .delivered
                    .iter()
                    .min_by_key(|(_, v)| v.modified)
                    .map(|(p, _)| p.clone());
                match oldest {
                    Some(p) => self.delivered.remove(&p),
                    None => break,
                };
            }
        }

        fn quiet_deadline(&self) -> Option<Instant> {
            self.writing.values().min().map(|last| *last + QUIET_PERIOD)
        }
    }

    fn classify(event: Event) -> Option<Signal> {
        let path = event.paths.last()?.clone();
        match event.kind {
            EventKind::Access(AccessKind::Close(AccessMode::Write))
            | EventKind::Modify(ModifyKind::Name(RenameMode::To))
            | EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => Some(Signal::Finished(path)),
            EventKind::Create(CreateKind::File)
            | EventKind::Create(CreateKind::Any)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Any) => Some(Signal::Written(path)),
            EventKind::Remove(RemoveKind::File)
            | EventKind::Remove(RemoveKind::Any)
            | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(Signal::Removed(path)),
            _ => None,
        }
    }

    fn watch_error(dir: &Path, e: notify::Error) -> ConfigurationError {
        ConfigurationError::InvalidAddress {
            address: dir.display().to_string(),
            reason: e.to_string(),
        }
    }

    #[async_trait]
    impl PathSource for DirectoryWatcher {
        async fn next_path(&mut self, cancel: &CancellationToken) -> Option<PathBuf> {
            loop {
                if let Some(path) = self.take_ready() {
                    return Some(path);
                }
                let deadline = self.quiet_deadline();
                let quiet = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    signal = self.events.recv() => self.note(signal?),
                    _ = quiet => self.promote_quiet(),
                }
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::io::Write;

        async fn next(watcher: &mut DirectoryWatcher, cancel: &CancellationToken) -> PathBuf {
            tokio::time::timeout(Duration::from_secs(10), watcher.next_path(cancel))
                .await
                .expect("no file within 10 s")
                .expect("watcher ended")
        }

        #[tokio::test]
        async fn existing_files_come_first_in_name_order() {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("b.ar2v"), b"b").unwrap();
            std::fs::write(dir.path().join("a.ar2v"), b"a").unwrap();
            std::fs::create_dir(dir.path().join("sub")).unwrap();

            let mut watcher = DirectoryWatcher::new(dir.path(), true).unwrap();
            let cancel = CancellationToken::new();
            assert_eq!(watcher.next_path(&cancel).await.unwrap(), dir.path().join("a.ar2v"));
            assert_eq!(watcher.next_path(&cancel).await.unwrap(), dir.path().join("b.ar2v"));

            cancel.cancel();
            assert_eq!(watcher.next_path(&cancel).await, None);
        }

        #[tokio::test]
        async fn file_is_yielded_after_its_writer_finishes() {
            let dir = tempfile::tempdir().unwrap();
            let mut watcher = DirectoryWatcher::new(dir.path(), false).unwrap();
            let cancel = CancellationToken::new();
            let path = dir.path().join("KHTX_20141227_120000");

            let target = path.clone();
            let writer = tokio::task::spawn_blocking(move || {
                let mut file = std::fs::File::create(&target).unwrap();
                file.write_all(b"first half,").unwrap();
                file.flush().unwrap();
                std::thread::sleep(Duration::from_millis(300));
                file.write_all(b"second half").unwrap();
                file.flush().unwrap();
                std::thread::sleep(Duration::from_millis(300));
            });

            assert_eq!(next(&mut watcher, &cancel).await, path);
            writer.await.unwrap();
            assert_eq!(std::fs::read(&path).unwrap(), b"first half,second half");

            // New content under the same name is read again.
            std::fs::write(&path, b"next volume, longer than before").unwrap();
            assert_eq!(next(&mut watcher, &cancel).await, path);
            assert_eq!(std::fs::read(&path).unwrap(), b"next volume, longer than before");
        }

        #[test]
        fn unchanged_file_is_not_yielded_twice() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("vol");
            std::fs::write(&path, b"data").unwrap();
            let mut watcher = DirectoryWatcher::new(dir.path(), false).unwrap();

            watcher.ready.push_back(path.clone());
            watcher.ready.push_back(path.clone());
            assert_eq!(watcher.take_ready(), Some(path.clone()));
            assert_eq!(watcher.take_ready(), None);

            watcher.note(Signal::Removed(path.clone()));
            assert!(watcher.delivered.is_empty());
        }

        #[test]
        fn missing_directory_is_a_configuration_error() {
            let dir = tempfile::tempdir().unwrap();
            let err = DirectoryWatcher::new(dir.path().join("nope"), false).err().unwrap();
            assert!(matches!(err, ConfigurationError::InvalidAddress { .. }));
        }
    }
}
