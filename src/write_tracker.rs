//! Skip-unless-changed bookkeeping for output writes
//!
//! The tracker remembers, per normalized output path, the fingerprint of the
//! last document physically written there. It outlives individual engine runs
//! so that a rebuild only touches files whose fingerprint moved.
//!
//! Each path has its own lock: [`WriteTracker::write_if_changed`] holds it
//! across the compare, the write and the record, so two pipelines racing on
//! one destination are serialized while writes to different paths proceed in
//! parallel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::path::NormalizedPath;

type Slot = Arc<Mutex<Option<Fingerprint>>>;

/// What `write_if_changed` decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Skipped,
}

/// Counters across the tracker's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub written: u64,
    pub skipped: u64,
}

impl WriteStats {
    /// Counts accumulated since `earlier`.
    pub fn since(&self, earlier: &WriteStats) -> WriteStats {
        WriteStats {
            written: self.written.saturating_sub(earlier.written),
            skipped: self.skipped.saturating_sub(earlier.skipped),
        }
    }
}

/// Concurrent map of output path to last-written fingerprint.
#[derive(Default)]
pub struct WriteTracker {
    slots: Mutex<HashMap<NormalizedPath, Slot>>,
    written: AtomicU64,
    skipped: AtomicU64,
}

impl WriteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The tracker shared by everything in this process.
    pub fn process_wide() -> Arc<WriteTracker> {
        static TRACKER: OnceLock<Arc<WriteTracker>> = OnceLock::new();
        Arc::clone(TRACKER.get_or_init(|| Arc::new(WriteTracker::new())))
    }

    fn slot(&self, path: &NormalizedPath) -> Result<Slot> {
        let mut slots = self.slots.lock().map_err(|_| Error::LockPoisoned {
            context: "write tracker".to_string(),
        })?;
        Ok(Arc::clone(slots.entry(path.clone()).or_default()))
    }

    /// Whether writing `fingerprint` to `path` would change anything.
    pub fn should_write(&self, path: &NormalizedPath, fingerprint: &Fingerprint) -> Result<bool> {
        let slot = self.slot(path)?;
        let last = slot.lock().map_err(|_| Error::LockPoisoned {
            context: format!("write tracker entry {}", path),
        })?;
        Ok(last.as_ref() != Some(fingerprint))
    }

    /// Note that `fingerprint` was physically written to `path`.
    pub fn record_write(&self, path: &NormalizedPath, fingerprint: Fingerprint) -> Result<()> {
        let slot = self.slot(path)?;
        let mut last = slot.lock().map_err(|_| Error::LockPoisoned {
            context: format!("write tracker entry {}", path),
        })?;
        *last = Some(fingerprint);
        Ok(())
    }

    /// Run `write` only if `fingerprint` differs from the last one recorded
    /// for `path`, and record it once the write succeeds.
    pub fn write_if_changed<F>(
        &self,
        path: &NormalizedPath,
        fingerprint: Fingerprint,
        write: F,
    ) -> Result<WriteOutcome>
    where
        F: FnOnce() -> Result<()>,
    {
        let slot = self.slot(path)?;
        let mut last = slot.lock().map_err(|_| Error::LockPoisoned {
            context: format!("write tracker entry {}", path),
        })?;

        if last.as_ref() == Some(&fingerprint) {
            trace!("Skipping unchanged write to {} ({})", path, fingerprint.short());
            self.skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(WriteOutcome::Skipped);
        }

        write()?;
        *last = Some(fingerprint);
        self.written.fetch_add(1, Ordering::Relaxed);
        debug!("Wrote {} ({})", path, fingerprint.short());
        Ok(WriteOutcome::Written)
    }

    pub fn last_written(&self, path: &NormalizedPath) -> Result<Option<Fingerprint>> {
        let slots = self.slots.lock().map_err(|_| Error::LockPoisoned {
            context: "write tracker".to_string(),
        })?;
        match slots.get(path) {
            None => Ok(None),
            Some(slot) => Ok(*slot.lock().map_err(|_| Error::LockPoisoned {
                context: format!("write tracker entry {}", path),
            })?),
        }
    }

    /// Forget everything, e.g. after the output directory was cleaned.
    pub fn clear(&self) -> Result<()> {
        let mut slots = self.slots.lock().map_err(|_| Error::LockPoisoned {
            context: "write tracker".to_string(),
        })?;
        slots.clear();
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        let slots = self.slots.lock().map_err(|_| Error::LockPoisoned {
            context: "write tracker".to_string(),
        })?;
        Ok(slots.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn stats(&self) -> WriteStats {
        WriteStats {
            written: self.written.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_should_write_until_recorded() {
        let tracker = WriteTracker::new();
        let path = NormalizedPath::new("index.html");
        let fp = Fingerprint::of_bytes(b"one");

        assert!(tracker.should_write(&path, &fp).unwrap());
        tracker.record_write(&path, fp).unwrap();
        assert!(!tracker.should_write(&path, &fp).unwrap());
        assert!(tracker
            .should_write(&path, &Fingerprint::of_bytes(b"two"))
            .unwrap());
        assert_eq!(tracker.last_written(&path).unwrap(), Some(fp));
    }

    #[test]
    fn test_write_if_changed_skips_same_fingerprint() {
        let tracker = WriteTracker::new();
        let path = NormalizedPath::new("a/b.txt");
        let mut writes = 0;

        let fp = Fingerprint::of_bytes(b"content");
        for _ in 0..2 {
            tracker
                .write_if_changed(&path, fp, || {
                    writes += 1;
                    Ok(())
                })
                .unwrap();
        }
        assert_eq!(writes, 1);

        let outcome = tracker
            .write_if_changed(&path, Fingerprint::of_bytes(b"changed"), || {
                writes += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Written);
        assert_eq!(writes, 2);
        assert_eq!(tracker.stats(), WriteStats { written: 2, skipped: 1 });
    }

    #[test]
    fn test_failed_write_is_not_recorded() {
        let tracker = WriteTracker::new();
        let path = NormalizedPath::new("x");
        let fp = Fingerprint::of_bytes(b"x");
        let result = tracker.write_if_changed(&path, fp, || Err(Error::execution("disk full")));
        assert!(result.is_err());
        assert!(tracker.should_write(&path, &fp).unwrap());
    }

    #[test]
    fn test_concurrent_writers_same_path_write_once() {
        let tracker = Arc::new(WriteTracker::new());
        let writes = Arc::new(AtomicU64::new(0));
        let path = NormalizedPath::new("shared.html");
        let fp = Fingerprint::of_bytes(b"same");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                let writes = Arc::clone(&writes);
                let path = path.clone();
                thread::spawn(move || {
                    tracker
                        .write_if_changed(&path, fp, || {
                            writes.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stats_since() {
        let before = WriteStats { written: 2, skipped: 1 };
        let after = WriteStats { written: 5, skipped: 1 };
        assert_eq!(after.since(&before), WriteStats { written: 3, skipped: 0 });
    }
}
