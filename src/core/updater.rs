//! A single-flight periodic task driving a connection's flushes.
//! 驱动连接刷新的单实例周期任务。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

type Predicate = Box<dyn Fn() -> bool + Send + Sync>;
type Action = Box<dyn Fn() + Send + Sync>;

/// Runs `update` every `interval` while `should_continue` holds.
///
/// `wake_up` spawns the loop on the current tokio runtime unless an instance is
/// already running, so any number of wake-ups collapse into one task. The loop
/// checks `should_terminate` before starting and `should_continue` before every
/// iteration.
///
/// 当 `should_continue` 成立时每隔 `interval` 执行一次 `update`。
///
/// `wake_up` 在当前 tokio 运行时上启动循环，除非已有实例在运行，因此任意次数的唤醒
/// 只会合并为一个任务。循环在启动前检查 `should_terminate`，每次迭代前检查 `should_continue`。
pub struct Updater {
    interval_ms: AtomicU64,
    running: AtomicBool,
    should_continue: Predicate,
    should_terminate: Predicate,
    update: Action,
}

impl std::fmt::Debug for Updater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Updater")
            .field("interval", &self.interval())
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish()
    }
}

impl Updater {
    pub fn new(
        interval: Duration,
        should_continue: impl Fn() -> bool + Send + Sync + 'static,
        should_terminate: impl Fn() -> bool + Send + Sync + 'static,
        update: impl Fn() + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            interval_ms: AtomicU64::new(interval.as_millis() as u64),
            running: AtomicBool::new(false),
            should_continue: Box::new(should_continue),
            should_terminate: Box::new(should_terminate),
            update: Box::new(update),
        })
    }

    /// Starts the loop if it is not running yet.
    ///
    /// 如果循环尚未运行则启动它。
    pub fn wake_up(self: &Arc<Self>) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let Ok(handle) = tokio::runtime::Handle::try_current() else {
                // No runtime left to run on, e.g. during shutdown.
                self.running.store(false, Ordering::Release);
                return;
            };
            let this = Arc::clone(self);
            handle.spawn(async move { this.run().await });
        }
    }

    /// Changes the sleep between iterations; takes effect on the next iteration.
    pub fn set_interval(&self, interval: Duration) {
        self.interval_ms
            .store(interval.as_millis() as u64, Ordering::Release);
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    async fn run(self: Arc<Self>) {
        loop {
            if !(self.should_terminate)() {
                while (self.should_continue)() {
                    (self.update)();
                    tokio::time::sleep(self.interval()).await;
                }
            }
            self.running.store(false, Ordering::Release);

            // A wake-up that raced with the exit above found the guard taken and
            // returned; pick its work up here.
            if (self.should_terminate)() || !(self.should_continue)() {
                return;
            }
            if self
                .running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct Probe {
        runs: AtomicU32,
        budget: AtomicU32,
        stop: AtomicBool,
    }

    fn probe(budget: u32) -> Arc<Probe> {
        Arc::new(Probe {
            runs: AtomicU32::new(0),
            budget: AtomicU32::new(budget),
            stop: AtomicBool::new(false),
        })
    }

    fn updater(probe: &Arc<Probe>, interval: Duration) -> Arc<Updater> {
        let (p1, p2, p3) = (probe.clone(), probe.clone(), probe.clone());
        Updater::new(
            interval,
            move || p1.runs.load(Ordering::SeqCst) < p1.budget.load(Ordering::SeqCst),
            move || p2.stop.load(Ordering::SeqCst),
            move || {
                p3.runs.fetch_add(1, Ordering::SeqCst);
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_until_predicate_fails() {
        let probe = probe(3);
        let updater = updater(&probe, Duration::from_millis(10));
        updater.wake_up();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(probe.runs.load(Ordering::SeqCst), 3);
        assert!(!updater.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wake_up_is_single_flight() {
        let probe = probe(1000);
        let updater = updater(&probe, Duration::from_millis(10));
        for _ in 0..10 {
            updater.wake_up();
        }
        tokio::task::yield_now().await;
        // One task: one run per interval, not ten.
        assert_eq!(probe.runs.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(35)).await;
        assert_eq!(probe.runs.load(Ordering::SeqCst), 4);
        probe.stop.store(true, Ordering::SeqCst);
        probe.budget.store(0, Ordering::SeqCst);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminated_updater_never_runs() {
        let probe = probe(5);
        probe.stop.store(true, Ordering::SeqCst);
        let updater = updater(&probe, Duration::from_millis(10));
        updater.wake_up();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(probe.runs.load(Ordering::SeqCst), 0);
        assert!(!updater.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarts_after_idle() {
        let probe = probe(1);
        let updater = updater(&probe, Duration::from_millis(10));
        updater.wake_up();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(probe.runs.load(Ordering::SeqCst), 1);
        assert!(!updater.is_running());

        probe.budget.store(2, Ordering::SeqCst);
        updater.wake_up();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(probe.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_change_applies() {
        let probe = probe(1000);
        let updater = updater(&probe, Duration::from_secs(5));
        updater.wake_up();
        tokio::task::yield_now().await;
        assert_eq!(probe.runs.load(Ordering::SeqCst), 1);

        updater.set_interval(Duration::from_secs(1));
        assert_eq!(updater.interval(), Duration::from_secs(1));
        // The pending 5 s sleep completes first, then 1 s steps follow.
        tokio::time::sleep(Duration::from_millis(7_500)).await;
        assert_eq!(probe.runs.load(Ordering::SeqCst), 4);
        probe.budget.store(0, Ordering::SeqCst);
    }
}
