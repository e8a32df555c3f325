//! Scheduler Engine: keeps registered callbacks and fires the due ones.
//! Uses tokio::interval for ticking (sleeps between checks).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use shiftclaw_core::{Result, ShiftClawError};
use tokio::sync::{Mutex, watch};

use crate::tasks::{CallbackSpec, Task, TaskAction, TaskType};

/// Engine shared between the timer loop and the code that (re)schedules.
pub type SharedScheduler = Arc<Mutex<SchedulerEngine>>;

/// A task that came due during a tick.
#[derive(Debug, Clone)]
pub struct FiredTask {
    pub key: String,
    pub action: TaskAction,
    /// The logical fire time (may be earlier than the tick).
    pub scheduled_for: DateTime<Utc>,
    pub fired_at: DateTime<Utc>,
    pub run_count: u32,
}

/// Receives fired tasks from the timer loop.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, fired: &FiredTask);
}

/// Outcome of a reconcile pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: usize,
    pub removed: usize,
    pub kept: usize,
}

/// The scheduler engine: owns callback registrations, keyed by name.
#[derive(Default)]
pub struct SchedulerEngine {
    tasks: BTreeMap<String, Task>,
}

impl SchedulerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a fresh engine for sharing with the timer loop.
    pub fn shared() -> SharedScheduler {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Register a one-shot callback. Replaces any task with the same key.
    pub fn schedule_once(&mut self, fire_at: DateTime<Utc>, key: &str, action: TaskAction) {
        self.add(CallbackSpec::once(key, fire_at, action), Utc::now());
    }

    /// Register a fixed-rate recurring callback. Replaces any task with the same key.
    pub fn schedule_recurring(
        &mut self,
        first: DateTime<Utc>,
        every: Duration,
        key: &str,
        action: TaskAction,
    ) -> Result<()> {
        if every <= Duration::zero() {
            return Err(ShiftClawError::Scheduler(format!(
                "recurring task '{key}' needs a positive interval"
            )));
        }
        self.add(CallbackSpec::recurring(key, first, every, action), Utc::now());
        Ok(())
    }

    /// Register a callback from a spec.
    pub fn add(&mut self, spec: CallbackSpec, now: DateTime<Utc>) {
        let task = Task::from_spec(spec, now);
        tracing::debug!("📅 Task armed: '{}' next at {}", task.key, task.next_run);
        if let Some(old) = self.tasks.insert(task.key.clone(), task) {
            tracing::debug!("♻️ Replaced task '{}'", old.key);
        }
    }

    /// Remove a task by key.
    pub fn cancel(&mut self, key: &str) -> bool {
        let removed = self.tasks.remove(key).is_some();
        if removed {
            tracing::debug!("🗑️ Task cancelled: '{key}'");
        }
        removed
    }

    /// Remove every task whose key starts with `prefix`.
    pub fn cancel_prefix(&mut self, prefix: &str) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|key, _| !key.starts_with(prefix));
        let removed = before - self.tasks.len();
        if removed > 0 {
            tracing::debug!("🗑️ Cancelled {removed} task(s) under '{prefix}'");
        }
        removed
    }

    /// Make the registrations under `prefix` match `desired`: cancel extras,
    /// add missing, keep unchanged ones with their armed fire time.
    pub fn reconcile(
        &mut self,
        prefix: &str,
        desired: Vec<CallbackSpec>,
        now: DateTime<Utc>,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        if desired.is_empty() {
            report.removed = self.cancel_prefix(prefix);
            tracing::info!("🔁 Reconciled '{prefix}': every job switched off (-{})", report.removed);
            return report;
        }

        let stale: Vec<String> = self
            .tasks
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, task)| !desired.iter().any(|spec| spec.same_job(task)))
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            self.tasks.remove(&key);
            report.removed += 1;
        }

        for spec in desired {
            debug_assert!(spec.key.starts_with(prefix));
            let unchanged = self
                .tasks
                .get(&spec.key)
                .is_some_and(|task| spec.same_job(task));
            if unchanged {
                report.kept += 1;
            } else {
                self.add(spec, now);
                report.added += 1;
            }
        }

        tracing::info!(
            "🔁 Reconciled '{}': +{} -{} ={}",
            prefix,
            report.added,
            report.removed,
            report.kept
        );
        report
    }

    /// Tick: called periodically to collect due tasks.
    /// One-shot tasks are removed; recurring tasks advance by one interval.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<FiredTask> {
        let mut fired = Vec::new();
        let mut finished = Vec::new();

        for task in self.tasks.values_mut() {
            if !task.should_run(now) {
                continue;
            }

            tracing::info!("🔔 Task triggered: '{}'", task.key);
            task.last_run = Some(now);
            task.run_count += 1;
            fired.push(FiredTask {
                key: task.key.clone(),
                action: task.action.clone(),
                scheduled_for: task.next_run,
                fired_at: now,
                run_count: task.run_count,
            });

            match &task.task_type {
                TaskType::Once { .. } => finished.push(task.key.clone()),
                TaskType::Recurring { every_secs, .. } => {
                    task.next_run += Duration::seconds(*every_secs);
                }
            }
        }

        for key in finished {
            self.tasks.remove(&key);
        }

        fired
    }

    pub fn get(&self, key: &str) -> Option<&Task> {
        self.tasks.get(key)
    }

    /// Keys of every task under `prefix`.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.tasks
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Get task count.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

/// Spawn-able scheduler loop. Ticks every `check_interval_secs` until the
/// shutdown flag flips to `true`. The engine lock is released before the
/// handler runs, so handlers may reschedule freely.
pub async fn spawn_scheduler(
    engine: SharedScheduler,
    handler: Arc<dyn TaskHandler>,
    check_interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(
        "⏰ Scheduler started (check every {}s)",
        check_interval_secs
    );

    let mut interval = tokio::time::interval(StdDuration::from_secs(check_interval_secs.max(1)));

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let triggered = {
            let mut eng = engine.lock().await;
            eng.tick(Utc::now())
        };

        for task in &triggered {
            handler.handle(task).await;
        }
    }

    tracing::info!("⏹️ Scheduler stopped");
}
