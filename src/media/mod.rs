/// Removable-media arrival detection.
///
/// A `VolumeSource` enumerates the volumes currently present. The
/// `MediaWatcher` polls it, diffs against the previous snapshot and
/// reports each newly appeared volume once. Removals are not events.
pub mod sources;

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use sources::{DirectorySource, MountTableSource};

/// Capacity of the arrival channel; the watcher waits when it is full.
const EVENT_BUFFER: usize = 16;

/// Opaque handle to a storage location (a mount path).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VolumeHandle(PathBuf);

impl VolumeHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Path of a file at the root of this volume.
    pub fn file(&self, name: &str) -> PathBuf {
        self.0.join(name)
    }
}

impl fmt::Display for VolumeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Platform primitive listing the volumes present right now.
pub trait VolumeSource: Send {
    /// Human-readable name of this source, for logs.
    fn name(&self) -> &str;

    fn enumerate(&mut self) -> std::io::Result<BTreeSet<VolumeHandle>>;
}

impl<S: VolumeSource + ?Sized> VolumeSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn enumerate(&mut self) -> std::io::Result<BTreeSet<VolumeHandle>> {
        (**self).enumerate()
    }
}

/// A volume that was not present on the previous tick.
#[derive(Debug, Clone)]
pub struct ArrivalEvent {
    pub volume: VolumeHandle,
    pub detected_at: DateTime<Utc>,
}

/// Polls a `VolumeSource` and reports arrivals.
pub struct MediaWatcher<S> {
    source: S,
    known: BTreeSet<VolumeHandle>,
    interval: Duration,
}

impl<S: VolumeSource> MediaWatcher<S> {
    /// Start from the volumes present now, so only later insertions count.
    pub fn new(mut source: S, interval: Duration) -> Self {
        let known = match source.enumerate() {
            Ok(volumes) => volumes,
            Err(e) => {
                warn!(source = source.name(), error = %e, "Initial volume enumeration failed");
                BTreeSet::new()
            }
        };
        Self {
            source,
            known,
            interval,
        }
    }

    /// Start from an empty snapshot, so the first tick reports every
    /// volume already present.
    pub fn from_empty(source: S, interval: Duration) -> Self {
        Self {
            source,
            known: BTreeSet::new(),
            interval,
        }
    }

    pub fn known(&self) -> &BTreeSet<VolumeHandle> {
        &self.known
    }

    /// One tick: enumerate, diff, replace the snapshot.
    ///
    /// A failed enumeration leaves the snapshot untouched and reports
    /// nothing; the next tick retries.
    pub fn poll(&mut self) -> Vec<VolumeHandle> {
        let current = match self.source.enumerate() {
            Ok(volumes) => volumes,
            Err(e) => {
                warn!(source = self.source.name(), error = %e, "Volume enumeration failed, retrying next tick");
                return Vec::new();
            }
        };

        let arrived: Vec<VolumeHandle> = current.difference(&self.known).cloned().collect();
        self.known = current;

        for volume in &arrived {
            info!(volume = %volume, "Volume arrived");
        }
        arrived
    }
}

impl<S: VolumeSource + 'static> MediaWatcher<S> {
    /// `poll` on the blocking pool; enumeration reads the filesystem.
    async fn poll_off_runtime(mut self) -> (Self, Vec<VolumeHandle>) {
        let polled = tokio::task::spawn_blocking(move || {
            let arrived = self.poll();
            (self, arrived)
        })
        .await;
        match polled {
            Ok(done) => done,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            // Cancelled only at runtime shutdown, which drops the caller too.
            Err(_) => std::future::pending().await,
        }
    }

    /// Run the poll loop on its own task.
    ///
    /// The loop ends when the receiver is dropped; the handle then yields
    /// the watcher back with its snapshot intact so it can be restarted.
    pub fn spawn(self) -> (mpsc::Receiver<ArrivalEvent>, JoinHandle<Self>) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let handle = tokio::spawn(async move {
            let mut watcher = self;
            let mut ticker = tokio::time::interval(watcher.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            debug!(source = watcher.source.name(), interval = ?watcher.interval, "Media watcher started");

            'outer: loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = tx.closed() => break,
                }
                let (polled, arrived) = watcher.poll_off_runtime().await;
                watcher = polled;
                for volume in arrived {
                    let event = ArrivalEvent {
                        volume,
                        detected_at: Utc::now(),
                    };
                    if tx.send(event).await.is_err() {
                        break 'outer;
                    }
                }
            }

            debug!(source = watcher.source.name(), "Media watcher stopped");
            watcher
        });
        (rx, handle)
    }
}
