use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockUpgradableReadGuard,
    RwLockWriteGuard,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Where the authoritative copy of a buffer is expected to be used
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Residency {
    /// Only the host touches the buffer
    Host,
    /// Kernels read and write the buffer on the device; the host sees it on demand
    Device,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Coherence {
    Synced,
    HostNewer,
    DeviceNewer,
}

/// Counters of host/device traffic
#[derive(Debug, Default)]
pub struct TransferStats {
    host_to_device_bytes: AtomicUsize,
    device_to_host_bytes: AtomicUsize,
    transfers: AtomicUsize,
}

/// A copy of the [TransferStats] counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransferSnapshot {
    pub host_to_device_bytes: usize,
    pub device_to_host_bytes: usize,
    pub transfers: usize,
}

impl TransferStats {
    pub fn snapshot(&self) -> TransferSnapshot {
        TransferSnapshot {
            host_to_device_bytes: self.host_to_device_bytes.load(Ordering::Relaxed),
            device_to_host_bytes: self.device_to_host_bytes.load(Ordering::Relaxed),
            transfers: self.transfers.load(Ordering::Relaxed),
        }
    }

    fn record(&self, counter: &AtomicUsize, len: usize) {
        counter.fetch_add(len * std::mem::size_of::<f64>(), Ordering::Relaxed);
        self.transfers.fetch_add(1, Ordering::Relaxed);
    }
}

struct Storage {
    residency: Residency,
    host: Vec<f64>,
    /// Present only when the owning engine runs kernels on a device
    mirror: Option<Vec<f64>>,
    coherence: Coherence,
    stats: Arc<TransferStats>,
}

impl Storage {
    fn push(&mut self) {
        if let Some(mirror) = self.mirror.as_mut() {
            if self.coherence == Coherence::HostNewer {
                mirror.copy_from_slice(&self.host);
                self.stats.record(&self.stats.host_to_device_bytes, self.host.len());
                log::trace!("pushed {} values host -> device", self.host.len());
            }
            self.coherence = Coherence::Synced;
        }
    }

    fn pull(&mut self) {
        if let Some(mirror) = self.mirror.as_ref() {
            if self.coherence == Coherence::DeviceNewer {
                self.host.copy_from_slice(mirror);
                self.stats.record(&self.stats.device_to_host_bytes, mirror.len());
                log::trace!("pulled {} values device -> host", mirror.len());
            }
            self.coherence = Coherence::Synced;
        }
    }

    fn device_slice(&self) -> &[f64] {
        self.mirror.as_deref().unwrap_or(self.host.as_slice())
    }

    fn device_slice_mut(&mut self) -> &mut [f64] {
        match self.mirror.as_mut() {
            Some(mirror) => mirror,
            None => &mut self.host,
        }
    }
}

/// A reference-counted array of `f64` with an optional device mirror
///
/// Clones share storage. Host access after a device write pulls the device copy first and device
/// access after a host write pushes the host copy first, so either side always sees the latest
/// values.
#[derive(Clone)]
pub struct Buffer {
    storage: Arc<RwLock<Storage>>,
    len: usize,
}

impl Buffer {
    pub(crate) fn new(data: Vec<f64>, residency: Residency, mirrored: bool, stats: Arc<TransferStats>) -> Self {
        let len = data.len();
        let mirror = (mirrored && residency == Residency::Device).then(|| data.clone());
        if mirror.is_some() {
            stats.record(&stats.host_to_device_bytes, len);
        }

        Self {
            storage: Arc::new(RwLock::new(Storage {
                residency,
                host: data,
                mirror,
                coherence: Coherence::Synced,
                stats,
            })),
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn residency(&self) -> Residency {
        self.storage.read().residency
    }

    /// Whether a separate device copy is maintained
    pub fn is_mirrored(&self) -> bool {
        self.storage.read().mirror.is_some()
    }

    /// Number of handles sharing this storage
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.storage)
    }

    /// Read the host copy
    pub fn host(&self) -> MappedRwLockReadGuard<'_, [f64]> {
        let guard = self.storage.upgradable_read();
        let guard = if guard.coherence == Coherence::DeviceNewer {
            let mut write = RwLockUpgradableReadGuard::upgrade(guard);
            write.pull();
            RwLockWriteGuard::downgrade(write)
        } else {
            RwLockUpgradableReadGuard::downgrade(guard)
        };
        RwLockReadGuard::map(guard, |s| s.host.as_slice())
    }

    /// Write the host copy; the device copy becomes stale
    pub fn host_mut(&self) -> MappedRwLockWriteGuard<'_, [f64]> {
        let mut guard = self.storage.write();
        guard.pull();
        if guard.mirror.is_some() {
            guard.coherence = Coherence::HostNewer;
        }
        RwLockWriteGuard::map(guard, |s| s.host.as_mut_slice())
    }

    /// Read the copy kernels see (the host copy when not mirrored)
    pub fn device(&self) -> MappedRwLockReadGuard<'_, [f64]> {
        let guard = self.storage.upgradable_read();
        let guard = if guard.coherence == Coherence::HostNewer {
            let mut write = RwLockUpgradableReadGuard::upgrade(guard);
            write.push();
            RwLockWriteGuard::downgrade(write)
        } else {
            RwLockUpgradableReadGuard::downgrade(guard)
        };
        RwLockReadGuard::map(guard, |s| s.device_slice())
    }

    /// Write the copy kernels see; the host copy becomes stale
    pub fn device_mut(&self) -> MappedRwLockWriteGuard<'_, [f64]> {
        let mut guard = self.storage.write();
        guard.push();
        if guard.mirror.is_some() {
            guard.coherence = Coherence::DeviceNewer;
        }
        RwLockWriteGuard::map(guard, |s| s.device_slice_mut())
    }

    /// Copy host values to the device now
    pub fn push(&self) {
        self.storage.write().push();
    }

    /// Copy device values to the host now
    pub fn pull(&self) {
        self.storage.write().pull();
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.host().to_vec()
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let storage = self.storage.read();
        f.debug_struct("Buffer")
            .field("len", &self.len)
            .field("residency", &storage.residency)
            .field("coherence", &storage.coherence)
            .finish()
    }
}
