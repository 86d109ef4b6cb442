//! Bounded worker pool for row-parallel jobs.
//!
//! Each call spawns at most `limit` scoped threads, and `limit` itself never
//! exceeds [`ProtocolConfig::MAX_WORKERS`]. Workers compete for the next row
//! index, so there is no ordering between rows, and a call returns only after
//! every worker has been joined.
//!
//! # Thread Safety
//!
//! [`WorkerPool::fill_rows`] splits the output slice into disjoint rows before
//! any worker starts. A job receives `&mut` access to its own row and nothing
//! else, so writers never share memory and no lock guards pixel data.

use crate::config::ProtocolConfig;
use crate::{RelayError, Result};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use tracing::warn;

/// Executes independent row jobs with a concurrency ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPool {
    limit: usize,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self { limit: 1 }
    }
}

impl WorkerPool {
    /// Create a pool. A limit below 1 means serial execution; limits above
    /// [`ProtocolConfig::MAX_WORKERS`] are capped.
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            limit: concurrency_limit.clamp(1, ProtocolConfig::MAX_WORKERS),
        }
    }

    /// Maximum number of concurrently running jobs.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run `row_fn(y)` for every `y` in `0..row_count`.
    pub fn run_rows<F>(&self, row_count: usize, row_fn: F) -> Result<()>
    where
        F: Fn(usize) + Sync,
    {
        let workers = self.limit.min(row_count);
        if workers <= 1 {
            return catch_row_panic(|| (0..row_count).for_each(&row_fn));
        }

        let next_row = AtomicUsize::new(0);
        run_workers(workers, || loop {
            let y = next_row.fetch_add(1, Ordering::Relaxed);
            if y >= row_count {
                break;
            }
            row_fn(y);
        })
    }

    /// Split `data` into rows of `row_len` elements and run
    /// `row_fn(y, row)` for each, with exclusive access to that row.
    pub fn fill_rows<T, F>(&self, data: &mut [T], row_len: usize, row_fn: F) -> Result<()>
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync,
    {
        if row_len == 0 || data.is_empty() {
            return Ok(());
        }

        let row_count = data.len().div_ceil(row_len);
        let workers = self.limit.min(row_count);
        if workers <= 1 {
            return catch_row_panic(|| {
                data.chunks_mut(row_len)
                    .enumerate()
                    .for_each(|(y, row)| row_fn(y, row))
            });
        }

        let queue = Mutex::new(data.chunks_mut(row_len).enumerate());
        run_workers(workers, || loop {
            // Hold the lock only long enough to claim a row.
            let next = queue
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .next();
            match next {
                Some((y, row)) => row_fn(y, row),
                None => break,
            }
        })
    }
}

/// Spawn up to `workers` scoped threads running `work` and join them all.
///
/// Every worker drains a shared row source, so if the OS refuses a thread the
/// ones already running still finish every row. Only a failure to spawn the
/// first worker is an error.
fn run_workers<W>(workers: usize, work: W) -> Result<()>
where
    W: Fn() + Sync,
{
    let work = &work;
    thread::scope(|s| {
        let mut handles = Vec::with_capacity(workers);
        let mut spawn_error = None;
        for i in 0..workers {
            let builder = thread::Builder::new().name(format!("row-worker-{}", i));
            match builder.spawn_scoped(s, move || work()) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    spawn_error = Some(e);
                    break;
                }
            }
        }

        match spawn_error {
            Some(e) if handles.is_empty() => Err(RelayError::WorkerSpawn {
                message: e.to_string(),
                source: Some(e),
            }),
            Some(e) => {
                warn!(
                    "Spawned {} of {} row workers: {}",
                    handles.len(),
                    workers,
                    e
                );
                join_all(handles)
            }
            None => join_all(handles),
        }
    })
}

fn join_all(handles: Vec<thread::ScopedJoinHandle<'_, ()>>) -> Result<()> {
    let mut first_panic = None;
    for handle in handles {
        if let Err(payload) = handle.join() {
            first_panic.get_or_insert(payload);
        }
    }
    match first_panic {
        Some(payload) => Err(panic_error(payload)),
        None => Ok(()),
    }
}

fn catch_row_panic(f: impl FnOnce()) -> Result<()> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(panic_error)
}

fn panic_error(payload: Box<dyn Any + Send>) -> RelayError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    RelayError::WorkerPanicked { message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    #[test]
    fn test_limit_below_one_is_serial() {
        assert_eq!(WorkerPool::new(0).limit(), 1);
        assert_eq!(WorkerPool::new(8).limit(), 8);
    }

    #[test]
    fn test_limit_is_capped() {
        assert_eq!(
            WorkerPool::new(1_000_000).limit(),
            ProtocolConfig::MAX_WORKERS
        );
        assert_eq!(WorkerPool::new(usize::MAX).limit(), ProtocolConfig::MAX_WORKERS);
    }

    #[test]
    fn test_huge_limit_on_tall_buffer_stays_bounded() {
        let pool = WorkerPool::new(1_000_000);
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let mut data = vec![0u8; 4 * 5_000];

        pool.fill_rows(&mut data, 4, |y, row| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            row.fill((y % 251) as u8);
            active.fetch_sub(1, Ordering::SeqCst);
        })
        .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= ProtocolConfig::MAX_WORKERS);
        assert_eq!(data[4 * 4_999], (4_999 % 251) as u8);
    }

    #[test]
    fn test_run_rows_executes_each_row_once() {
        for limit in [1, 2, 7, 64] {
            let pool = WorkerPool::new(limit);
            let calls = AtomicUsize::new(0);
            let seen = Mutex::new(HashSet::new());

            pool.run_rows(100, |y| {
                calls.fetch_add(1, Ordering::SeqCst);
                assert!(seen.lock().unwrap().insert(y), "row {} ran twice", y);
            })
            .unwrap();

            assert_eq!(calls.load(Ordering::SeqCst), 100);
            assert_eq!(seen.lock().unwrap().len(), 100);
        }
    }

    #[test]
    fn test_run_rows_zero_rows() {
        let calls = AtomicUsize::new(0);
        WorkerPool::new(4)
            .run_rows(0, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_concurrency_never_exceeds_limit() {
        let pool = WorkerPool::new(3);
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        pool.run_rows(24, |_| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(2));
            active.fetch_sub(1, Ordering::SeqCst);
        })
        .unwrap();

        let peak = peak.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= 3, "peak concurrency was {}", peak);
    }

    #[test]
    fn test_fill_rows_concurrency_never_exceeds_limit() {
        let pool = WorkerPool::new(3);
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let mut data = vec![0u8; 8 * 24];

        pool.fill_rows(&mut data, 8, |y, row| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(2));
            row.fill(y as u8);
            active.fetch_sub(1, Ordering::SeqCst);
        })
        .unwrap();

        let peak = peak.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= 3, "peak concurrency was {}", peak);
        assert!(data.chunks(8).enumerate().all(|(y, row)| row.iter().all(|&v| v == y as u8)));
    }

    #[test]
    fn test_fill_rows_gives_each_job_its_own_row() {
        let pool = WorkerPool::new(4);
        let mut data = vec![0u32; 5 * 9];

        pool.fill_rows(&mut data, 5, |y, row| {
            assert_eq!(row.len(), 5);
            for (x, v) in row.iter_mut().enumerate() {
                *v = (y * 100 + x) as u32;
            }
        })
        .unwrap();

        for y in 0..9 {
            for x in 0..5 {
                assert_eq!(data[y * 5 + x], (y * 100 + x) as u32);
            }
        }
    }

    #[test]
    fn test_fill_rows_zero_width_is_noop() {
        let mut data: Vec<u8> = Vec::new();
        WorkerPool::new(2)
            .fill_rows(&mut data, 0, |_, _| panic!("no rows expected"))
            .unwrap();
    }

    #[test]
    fn test_panicking_row_is_reported_after_join() {
        let completed = AtomicUsize::new(0);
        let err = WorkerPool::new(4)
            .run_rows(16, |y| {
                if y == 5 {
                    panic!("row five failed");
                }
                completed.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap_err();

        match err {
            RelayError::WorkerPanicked { message } => assert!(message.contains("row five")),
            other => panic!("Expected WorkerPanicked, got: {:?}", other),
        }
    }

    #[test]
    fn test_serial_panic_is_reported() {
        let mut data = vec![0u8; 8];
        let err = WorkerPool::new(1)
            .fill_rows(&mut data, 4, |_, _| panic!("boom"))
            .unwrap_err();
        assert!(matches!(err, RelayError::WorkerPanicked { .. }));
    }
}
