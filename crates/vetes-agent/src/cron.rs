//! Leader-gated periodic job runner.
//!
//! Each registered job runs on its own period in its own task. Ticks are
//! strictly sequential per job — a tick that outlasts its period causes the
//! missed ticks to be skipped, never stacked — and no job runs while this
//! instance is not the leader.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;

type JobFn = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct CronJob {
    name: String,
    period: Duration,
    func: JobFn,
}

/// Creates a leadership gate.
///
/// The cron runner observes the receiver; flip the sender when leadership
/// changes. An agent running without leader election keeps it at `true`.
#[must_use]
pub fn leader_gate(initially_leading: bool) -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(initially_leading)
}

/// Periodic job driver.
pub struct CronRunner {
    leader: watch::Receiver<bool>,
    jobs: Vec<CronJob>,
}

impl CronRunner {
    /// Creates a runner gated on the given leadership signal.
    #[must_use]
    pub fn new(leader: watch::Receiver<bool>) -> Self {
        Self {
            leader,
            jobs: Vec::new(),
        }
    }

    /// Registers a job to run every `period`.
    pub fn register<F, Fut>(&mut self, name: &str, period: Duration, func: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let job_fn: JobFn = Arc::new(move || {
            Box::pin(func()) as Pin<Box<dyn Future<Output = ()> + Send>>
        });
        self.jobs.push(CronJob {
            name: name.to_owned(),
            period,
            func: job_fn,
        });
    }

    /// Runs all jobs until the task is aborted.
    pub async fn run(self) {
        let mut set = JoinSet::new();
        for job in self.jobs {
            let leader = self.leader.clone();
            set.spawn(run_job(job, leader));
        }
        while set.join_next().await.is_some() {}
    }
}

async fn run_job(job: CronJob, leader: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(job.period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // the first tick of tokio intervals fires immediately; consume it so
    // jobs start one period after startup, like a crontab
    interval.tick().await;
    loop {
        interval.tick().await;
        if !*leader.borrow() {
            continue;
        }
        tracing::debug!(job = %job.name, "cron tick");
        (job.func)().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn jobs_tick_on_their_period() {
        let (_, leader) = leader_gate(true);
        let mut runner = CronRunner::new(leader);
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        runner.register("tick", Duration::from_secs(10), move || {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        let handle = tokio::spawn(runner.run());
        tokio::time::sleep(Duration::from_secs(35)).await;
        handle.abort();

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_leader_skips_ticks() {
        let (set_leader, leader) = leader_gate(false);
        let mut runner = CronRunner::new(leader);
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        runner.register("tick", Duration::from_secs(10), move || {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        let handle = tokio::spawn(runner.run());
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        set_leader.send(true).unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;
        handle.abort();
        assert!(count.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_ticks_skip_instead_of_stacking() {
        let (_, leader) = leader_gate(true);
        let mut runner = CronRunner::new(leader);
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        runner.register("slow", Duration::from_secs(10), move || {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(25)).await;
            }
        });

        let handle = tokio::spawn(runner.run());
        tokio::time::sleep(Duration::from_secs(60)).await;
        handle.abort();

        // 10s..35s, 40s..65s: the 20s and 30s ticks are skipped
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
