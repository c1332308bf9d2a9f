use crate::error::PoolError;
use log::{debug, warn};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// 等待結束時檢查中斷信號的間隔
const INTERRUPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

struct PoolState {
    /// 已交給 rayon 但尚未結束的任務數，包含排隊中的任務
    in_flight: Mutex<usize>,
    drained: Condvar,
    cancelled: AtomicBool,
}

/// 任務結束時更新計數，panic 時也會執行
struct InFlightGuard(Arc<PoolState>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = self
            .0
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *in_flight = in_flight.saturating_sub(1);
        if *in_flight == 0 {
            self.0.drained.notify_all();
        }
    }
}

/// 已提交任務的結果
pub struct TaskHandle<T> {
    receiver: Receiver<Result<T, PoolError>>,
}

impl<T> TaskHandle<T> {
    /// 阻塞直到任務完成；任務在執行前被強制取消時回傳 `PoolError::Cancelled`
    pub fn join(self) -> Result<T, PoolError> {
        self.receiver.recv().unwrap_or(Err(PoolError::Cancelled))
    }
}

/// 建立在 rayon `ThreadPool` 上、同時任務數有上限的執行緒池
///
/// 未結束的任務數達到 `worker_count + queue_capacity` 時，
/// 由提交端的執行緒直接執行該任務，佇列不會無限成長，也不會拒絕任務。
pub struct WorkerPool {
    name: String,
    pool: Mutex<Option<ThreadPool>>,
    state: Arc<PoolState>,
    interrupt_signal: Option<Arc<AtomicBool>>,
    worker_count: usize,
    queue_capacity: usize,
}

impl WorkerPool {
    pub fn new(name: &str, worker_count: usize, queue_capacity: usize) -> Result<Self, PoolError> {
        let worker_count = worker_count.max(1);
        let queue_capacity = queue_capacity.max(1);
        let thread_prefix = name.to_string();
        let pool = ThreadPoolBuilder::new()
            .num_threads(worker_count)
            .thread_name(move |index| format!("{thread_prefix}-{index}"))
            .build()
            .map_err(|e| PoolError::Build {
                pool: name.to_string(),
                detail: e.to_string(),
            })?;

        debug!("[{name}] 執行緒池已建立: {worker_count} 個工作執行緒, 佇列容量 {queue_capacity}");

        Ok(Self {
            name: name.to_string(),
            pool: Mutex::new(Some(pool)),
            state: Arc::new(PoolState {
                in_flight: Mutex::new(0),
                drained: Condvar::new(),
                cancelled: AtomicBool::new(false),
            }),
            interrupt_signal: None,
            worker_count,
            queue_capacity,
        })
    }

    /// 等待結束時若此信號被設定，立即強制取消並回報 `PoolError::Interrupted`
    #[must_use]
    pub fn with_interrupt_signal(mut self, signal: Arc<AtomicBool>) -> Self {
        self.interrupt_signal = Some(signal);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn worker_count(&self) -> usize {
        self.worker_count
    }

    #[must_use]
    pub const fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// 提交任務
    ///
    /// 任務中的 panic 會被捕捉並轉成 `PoolError::TaskPanicked`。
    pub fn submit<T, F>(&self, task: F) -> Result<TaskHandle<T>, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (result_sender, receiver) = mpsc::channel();
        let state = Arc::clone(&self.state);
        let job = move || {
            if state.cancelled.load(Ordering::SeqCst) {
                return;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(task))
                .map_err(|payload| PoolError::TaskPanicked(panic_message(payload.as_ref())));
            let _ = result_sender.send(outcome);
        };

        let guard = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(pool) = guard.as_ref() else {
            return Err(PoolError::ShutDown);
        };

        if self.try_reserve_slot() {
            let in_flight = InFlightGuard(Arc::clone(&self.state));
            pool.spawn(move || {
                let _in_flight = in_flight;
                job();
            });
        } else {
            drop(guard);
            debug!("[{}] 佇列已滿，由提交端執行任務", self.name);
            job();
        }

        Ok(TaskHandle { receiver })
    }

    /// 提交全部任務並依提交順序等待結果
    pub fn run_all<T, F, I>(&self, tasks: I) -> Vec<Result<T, PoolError>>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let handles: Vec<_> = tasks.into_iter().map(|task| self.submit(task)).collect();
        handles
            .into_iter()
            .map(|handle| handle.and_then(TaskHandle::join))
            .collect()
    }

    /// 停止接受新任務，在 `timeout` 內等待已提交的任務結束
    ///
    /// 逾時或收到中斷信號時設定取消旗標：尚未開始的任務會被丟棄，
    /// 執行中的任務無法中止，會在背景跑完。兩種情況都以錯誤回報。
    pub fn shutdown(&self, timeout: Duration) -> Result<(), PoolError> {
        // 丟棄 ThreadPool 不會阻塞，已 spawn 的任務仍會被執行
        let pool = self
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if pool.is_none() {
            return Ok(());
        }

        let outcome = self.await_termination(Instant::now() + timeout, timeout);
        match &outcome {
            Ok(()) => debug!("[{}] 執行緒池已關閉", self.name),
            Err(e) => {
                self.state.cancelled.store(true, Ordering::SeqCst);
                warn!("[{}] {e}", self.name);
            }
        }
        drop(pool);
        outcome
    }

    fn try_reserve_slot(&self) -> bool {
        let mut in_flight = self
            .state
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *in_flight >= self.worker_count + self.queue_capacity {
            return false;
        }
        *in_flight += 1;
        true
    }

    fn await_termination(&self, deadline: Instant, timeout: Duration) -> Result<(), PoolError> {
        let mut in_flight = self
            .state
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        while *in_flight > 0 {
            let now = Instant::now();
            if now >= deadline {
                return Err(PoolError::ShutdownTimeout {
                    pool: self.name.clone(),
                    timeout,
                });
            }

            let wait = (deadline - now).min(INTERRUPT_POLL_INTERVAL);
            let (guard, wait_result) = self
                .state
                .drained
                .wait_timeout(in_flight, wait)
                .unwrap_or_else(PoisonError::into_inner);
            in_flight = guard;

            // 中斷信號只讀不清除，讓上層也能看到
            if *in_flight > 0 && wait_result.timed_out() && self.is_interrupted() {
                return Err(PoolError::Interrupted {
                    pool: self.name.clone(),
                });
            }
        }

        Ok(())
    }

    fn is_interrupted(&self) -> bool {
        self.interrupt_signal
            .as_ref()
            .is_some_and(|signal| signal.load(Ordering::SeqCst))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "未知的 panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_run_all_preserves_submission_order() {
        let pool = WorkerPool::new("test", 4, 8).unwrap();
        let results = pool.run_all((0..32).map(|i| move || i * 2));

        let values: Vec<_> = results.into_iter().map(Result::unwrap).collect();
        assert_eq!(values, (0..32).map(|i| i * 2).collect::<Vec<_>>());
        pool.shutdown(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_workers_are_named_after_pool() {
        let pool = WorkerPool::new("tile", 1, 1).unwrap();
        let name = pool
            .submit(|| thread::current().name().map(ToString::to_string))
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(name.as_deref(), Some("tile-0"));
        pool.shutdown(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_full_queue_runs_task_on_caller() {
        let pool = WorkerPool::new("backpressure", 1, 1).unwrap();
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        // 佔住唯一的工作執行緒
        let blocker = pool
            .submit(move || {
                started_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                thread::current().id()
            })
            .unwrap();
        started_rx.recv().unwrap();

        // 佔滿佇列
        let queued = pool.submit(|| thread::current().id()).unwrap();
        // 已達上限，應由目前執行緒執行
        let overflow = pool.submit(|| thread::current().id()).unwrap();

        assert_eq!(overflow.join().unwrap(), thread::current().id());

        release_tx.send(()).unwrap();
        assert_ne!(blocker.join().unwrap(), thread::current().id());
        assert_ne!(queued.join().unwrap(), thread::current().id());
        pool.shutdown(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_panic_is_captured_as_error() {
        let pool = WorkerPool::new("panic", 2, 2).unwrap();
        let handle = pool.submit(|| -> u32 { panic!("tile exploded") }).unwrap();

        assert_eq!(
            handle.join(),
            Err(PoolError::TaskPanicked("tile exploded".to_string()))
        );

        // 工作執行緒仍然可用
        let next = pool.submit(|| 7).unwrap();
        assert_eq!(next.join(), Ok(7));
        pool.shutdown(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_submit_after_shutdown_is_rejected() {
        let pool = WorkerPool::new("closed", 2, 2).unwrap();
        pool.shutdown(Duration::from_secs(5)).unwrap();

        assert!(matches!(pool.submit(|| 1), Err(PoolError::ShutDown)));
    }

    #[test]
    fn test_shutdown_waits_for_queued_tasks() {
        let pool = WorkerPool::new("drain", 2, 16).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let counter = Arc::clone(&counter);
                pool.submit(move || {
                    thread::sleep(Duration::from_millis(5));
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
            })
            .collect();

        pool.shutdown(Duration::from_secs(10)).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        for handle in handles {
            assert!(handle.join().is_ok());
        }
    }

    #[test]
    fn test_shutdown_timeout_cancels_queued_tasks() {
        let pool = WorkerPool::new("slow", 1, 4).unwrap();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel();

        let running = pool
            .submit(move || {
                started_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            })
            .unwrap();
        started_rx.recv().unwrap();
        let queued = pool.submit(|| 1).unwrap();

        let result = pool.shutdown(Duration::from_millis(100));
        assert!(matches!(result, Err(PoolError::ShutdownTimeout { .. })));

        release_tx.send(()).unwrap();
        assert!(running.join().is_ok());
        assert_eq!(queued.join(), Err(PoolError::Cancelled));
    }

    #[test]
    fn test_interrupt_during_shutdown_is_reported_and_kept() {
        let signal = Arc::new(AtomicBool::new(false));
        let pool = WorkerPool::new("interrupt", 1, 1)
            .unwrap()
            .with_interrupt_signal(Arc::clone(&signal));
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel();

        let running = pool
            .submit(move || {
                started_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            })
            .unwrap();
        started_rx.recv().unwrap();

        signal.store(true, Ordering::SeqCst);
        let result = pool.shutdown(Duration::from_secs(30));

        assert!(matches!(result, Err(PoolError::Interrupted { .. })));
        assert!(signal.load(Ordering::SeqCst));

        release_tx.send(()).unwrap();
        assert!(running.join().is_ok());
    }
}
