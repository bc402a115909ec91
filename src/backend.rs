/// Reference-counted host/device arrays
pub mod buffer;

pub use buffer::{Buffer, Residency, TransferSnapshot, TransferStats};

use crate::error::{HydroError, HydroResult};
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Environment variable that overrides the configured [ExecutionMode]
pub const EXECUTION_MODE_VAR: &str = "HYDRO_EXECUTION";

/// Where kernels run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Plain loops on the calling thread
    Serial,
    /// The global rayon pool; all memory is host memory
    Parallel,
    /// A dedicated worker pool acting as the device queue, with mirrored device buffers
    Accelerator,
}

impl FromStr for ExecutionMode {
    type Err = HydroError;

    fn from_str(s: &str) -> HydroResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "serial" => Ok(Self::Serial),
            "parallel" | "threads" => Ok(Self::Parallel),
            "accelerator" | "device" => Ok(Self::Accelerator),
            other => Err(HydroError::InvalidConfig(format!("unknown execution mode '{}'", other))),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "serial"),
            Self::Parallel => write!(f, "parallel"),
            Self::Accelerator => write!(f, "accelerator"),
        }
    }
}

enum Queue {
    Serial,
    Parallel,
    Device(ThreadPool),
}

/// Memory allocation and kernel dispatch for one execution mode
///
/// Cloning an engine is cheap; clones share the device queue and the transfer counters.
#[derive(Clone)]
pub struct Engine {
    mode: ExecutionMode,
    queue: Arc<Queue>,
    stats: Arc<TransferStats>,
}

impl Engine {
    pub fn new(mode: ExecutionMode) -> HydroResult<Self> {
        let queue = match mode {
            ExecutionMode::Serial => Queue::Serial,
            ExecutionMode::Parallel => Queue::Parallel,
            ExecutionMode::Accelerator => Queue::Device(
                ThreadPoolBuilder::new()
                    .thread_name(|i| format!("hydro-device-{}", i))
                    .build()
                    .map_err(|err| HydroError::Backend(err.to_string()))?,
            ),
        };
        log::debug!("starting {} engine", mode);

        Ok(Self {
            mode,
            queue: Arc::new(queue),
            stats: Arc::new(TransferStats::default()),
        })
    }

    pub fn serial() -> Self {
        Self {
            mode: ExecutionMode::Serial,
            queue: Arc::new(Queue::Serial),
            stats: Arc::new(TransferStats::default()),
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn transfer_stats(&self) -> TransferSnapshot {
        self.stats.snapshot()
    }

    /// Allocate a zeroed buffer
    pub fn alloc(&self, len: usize, residency: Residency) -> Buffer {
        self.alloc_from(vec![0.0; len], residency)
    }

    /// Wrap `data` in a buffer; device-resident buffers get a device mirror in accelerator mode
    pub fn alloc_from(&self, data: Vec<f64>, residency: Residency) -> Buffer {
        Buffer::new(
            data,
            residency,
            self.mode == ExecutionMode::Accelerator,
            Arc::clone(&self.stats),
        )
    }

    /// The side of `buffer` that kernels dispatched by this engine read
    pub fn kernel_view<'a>(&self, buffer: &'a Buffer) -> MappedRwLockReadGuard<'a, [f64]> {
        match self.mode {
            ExecutionMode::Accelerator => buffer.device(),
            _ => buffer.host(),
        }
    }

    /// The side of `buffer` that kernels dispatched by this engine write
    pub fn kernel_view_mut<'a>(&self, buffer: &'a Buffer) -> MappedRwLockWriteGuard<'a, [f64]> {
        match self.mode {
            ExecutionMode::Accelerator => buffer.device_mut(),
            _ => buffer.host_mut(),
        }
    }

    /// Collect `f(i)` for `i` in `0..n`, in order
    pub fn map_collect<T, F>(&self, n: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Send + Sync,
    {
        match self.queue.as_ref() {
            Queue::Serial => (0..n).map(f).collect(),
            Queue::Parallel => (0..n).into_par_iter().map(f).collect(),
            Queue::Device(pool) => pool.install(|| (0..n).into_par_iter().map(f).collect()),
        }
    }

    /// Run `f(i, chunk)` over consecutive chunks of `chunk_len` entries
    pub fn for_each_chunk_mut<T, F>(&self, data: &mut [T], chunk_len: usize, f: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Send + Sync,
    {
        if data.is_empty() {
            return;
        }
        assert!(chunk_len > 0, "chunk length must be positive!");
        match self.queue.as_ref() {
            Queue::Serial => data
                .chunks_mut(chunk_len)
                .enumerate()
                .for_each(|(i, chunk)| f(i, chunk)),
            Queue::Parallel => data
                .par_chunks_mut(chunk_len)
                .enumerate()
                .for_each(|(i, chunk)| f(i, chunk)),
            Queue::Device(pool) => pool.install(|| {
                data.par_chunks_mut(chunk_len)
                    .enumerate()
                    .for_each(|(i, chunk)| f(i, chunk))
            }),
        }
    }

    /// Run `f(i, chunk)` over consecutive chunks and reduce the returned values with `min`
    ///
    /// Returns `+inf` for empty input.
    pub fn reduce_min_chunks_mut<F>(&self, data: &mut [f64], chunk_len: usize, f: F) -> f64
    where
        F: Fn(usize, &mut [f64]) -> f64 + Send + Sync,
    {
        if data.is_empty() {
            return f64::INFINITY;
        }
        assert!(chunk_len > 0, "chunk length must be positive!");
        match self.queue.as_ref() {
            Queue::Serial => data
                .chunks_mut(chunk_len)
                .enumerate()
                .map(|(i, chunk)| f(i, chunk))
                .fold(f64::INFINITY, f64::min),
            Queue::Parallel => data
                .par_chunks_mut(chunk_len)
                .enumerate()
                .map(|(i, chunk)| f(i, chunk))
                .reduce(|| f64::INFINITY, f64::min),
            Queue::Device(pool) => pool.install(|| {
                data.par_chunks_mut(chunk_len)
                    .enumerate()
                    .map(|(i, chunk)| f(i, chunk))
                    .reduce(|| f64::INFINITY, f64::min)
            }),
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine").field("mode", &self.mode).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engines() -> Vec<Engine> {
        [ExecutionMode::Serial, ExecutionMode::Parallel, ExecutionMode::Accelerator]
            .into_iter()
            .map(|mode| Engine::new(mode).unwrap())
            .collect()
    }

    #[test]
    fn dispatch_agrees_across_modes() {
        for engine in engines() {
            let squares = engine.map_collect(100, |i| (i * i) as f64);
            assert_eq!(squares[7], 49.0);
            assert_eq!(squares.len(), 100);

            let mut data = vec![0.0; 30];
            engine.for_each_chunk_mut(&mut data, 4, |i, chunk| chunk.iter_mut().for_each(|x| *x = i as f64));
            assert_eq!(data[29], 7.0);

            let min = engine.reduce_min_chunks_mut(&mut data, 3, |i, _| 10.0 - i as f64);
            assert_eq!(min, 1.0);
        }
    }

    #[test]
    fn empty_reduction_is_infinite() {
        assert_eq!(Engine::serial().reduce_min_chunks_mut(&mut [], 3, |_, _| 0.0), f64::INFINITY);
    }

    #[test]
    fn accelerator_buffers_are_mirrored() {
        let engine = Engine::new(ExecutionMode::Accelerator).unwrap();
        let device = engine.alloc(8, Residency::Device);
        let host = engine.alloc(8, Residency::Host);
        assert!(device.is_mirrored());
        assert!(!host.is_mirrored());

        engine.kernel_view_mut(&device).fill(2.0);
        assert_eq!(engine.transfer_stats().device_to_host_bytes, 0);
        assert_eq!(device.to_vec(), vec![2.0; 8]);
        assert_eq!(engine.transfer_stats().device_to_host_bytes, 64);
    }

    #[test]
    fn parse_modes() {
        assert_eq!("Serial".parse::<ExecutionMode>().unwrap(), ExecutionMode::Serial);
        assert_eq!("device".parse::<ExecutionMode>().unwrap(), ExecutionMode::Accelerator);
        assert!("gpu-ish".parse::<ExecutionMode>().is_err());
    }
}
