use std::sync::{
    atomic::{AtomicUsize, Ordering::SeqCst},
    Arc,
};

use color_eyre::{eyre::eyre, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    config::DrillConfig,
    gate::{Cancelled, Gate},
};

#[derive(Debug, Default)]
pub struct Stats {
    pub proceeded: AtomicUsize,
    pub cancelled: AtomicUsize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub concurrency: usize,
    pub passed_before_open: usize,
    pub cancelled: usize,
    pub proceeded: usize,
    pub waiters_left: usize,
}

impl Report {
    pub fn check(&self, config: &DrillConfig) -> Result<()> {
        let (passed_early, cancelled) = if config.initially_open {
            (config.concurrency, 0)
        } else {
            (0, config.cancel_targets())
        };

        if self.passed_before_open != passed_early {
            return Err(eyre!(
                "{} tasks passed before the gate opened, expected {passed_early}",
                self.passed_before_open
            ));
        }
        if self.cancelled != cancelled {
            return Err(eyre!(
                "{} tasks were cancelled, expected {cancelled}",
                self.cancelled
            ));
        }
        if self.proceeded + self.cancelled != self.concurrency {
            return Err(eyre!(
                "{} proceeded and {} cancelled out of {} tasks",
                self.proceeded,
                self.cancelled,
                self.concurrency
            ));
        }
        if self.waiters_left != 0 {
            return Err(eyre!("{} waiters left at the gate", self.waiters_left));
        }
        Ok(())
    }
}

pub struct Drill {
    pub config: DrillConfig,
    pub gate: Gate,
    pub stats: Stats,

    pub shutdown_signal: CancellationToken,
}

struct Attempt {
    index: usize,
    token: CancellationToken,
    task: JoinHandle<Result<(), Cancelled>>,
}

impl Drill {
    pub fn new(config: DrillConfig) -> Arc<Self> {
        Arc::new(Self {
            gate: Gate::new(config.initially_open),
            config,
            stats: Default::default(),
            shutdown_signal: CancellationToken::new(),
        })
    }

    pub fn shutdown(&self) {
        self.shutdown_signal.cancel();
    }

    pub async fn run(self: Arc<Self>) -> Result<Report> {
        let attempts = self.spawn_attempts();
        self.release(attempts).await
    }

    fn spawn_attempts(self: &Arc<Self>) -> Vec<Attempt> {
        let mut attempts = Vec::with_capacity(self.config.concurrency);
        for index in 0..self.config.concurrency {
            let token = self.shutdown_signal.child_token();
            let self_ref = self.clone();
            let task_token = token.clone();
            let task =
                tokio::task::spawn(async move { self_ref.attempt(index, task_token).await });
            attempts.push(Attempt { index, token, task });
        }
        log::info!(
            "spawned {} tasks at a {} gate",
            attempts.len(),
            if self.gate.is_open() { "open" } else { "closed" }
        );
        attempts
    }

    async fn release(&self, attempts: Vec<Attempt>) -> Result<Report> {
        let result = self.cancel_then_open(attempts).await;
        if result.is_err() {
            // nobody will open the gate now, so send the parked tasks home
            log::warn!("drill failed, cancelling remaining tasks");
            self.shutdown();
        }
        result
    }

    async fn cancel_then_open(&self, attempts: Vec<Attempt>) -> Result<Report> {
        tokio::time::sleep(self.config.settle()).await;

        let (targets, rest): (Vec<_>, Vec<_>) = attempts
            .into_iter()
            .partition(|attempt| self.config.should_cancel(attempt.index));
        for attempt in &targets {
            attempt.token.cancel();
        }
        log::info!("cancelled {} tasks", targets.len());
        self.join(targets).await?;

        let passed_before_open = self.stats.proceeded.load(SeqCst);
        self.gate.open();
        log::info!("gate opened");
        self.join(rest).await?;

        let report = Report {
            concurrency: self.config.concurrency,
            passed_before_open,
            cancelled: self.stats.cancelled.load(SeqCst),
            proceeded: self.stats.proceeded.load(SeqCst),
            waiters_left: self.gate.waiter_count(),
        };
        log::info!("{report:?}");
        Ok(report)
    }

    async fn attempt(&self, index: usize, token: CancellationToken) -> Result<(), Cancelled> {
        match self.gate.enter(&token).await {
            Ok(()) => {
                log::debug!("task {index} proceeded");
                self.stats.proceeded.fetch_add(1, SeqCst);
                Ok(())
            }
            Err(Cancelled) => {
                log::debug!("task {index} cancelled");
                self.stats.cancelled.fetch_add(1, SeqCst);
                Err(Cancelled)
            }
        }
    }

    async fn join(&self, attempts: Vec<Attempt>) -> Result<()> {
        let pending = attempts.len();
        let joined = tokio::time::timeout(self.config.deadline(), async {
            for attempt in attempts {
                if let Err(e) = attempt.task.await {
                    return Err(eyre!("task {} failed: {e}", attempt.index));
                }
            }
            Ok(())
        })
        .await;

        match joined {
            Ok(result) => result,
            Err(_) => {
                log::warn!("{pending} tasks did not finish in time");
                Err(eyre!(
                    "tasks still waiting after {:?}",
                    self.config.deadline()
                ))
            }
        }
    }
}
