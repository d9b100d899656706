//! Named task scheduling for extensions.
//!
//! Extensions arm repeating polls, one-shot delays, and second-by-second
//! countdowns by name. Re-arming a name always cancels the previous handle
//! first, and every handle carries a generation number so a fire raced
//! against its own cancellation is recognized and dropped instead of
//! reaching the extension.
//!
//! Fires are delivered over a channel to the runtime loop, which runs the
//! extension callback there. A callback failure is logged by the runtime
//! and never disturbs the spawned cadence.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

// ============================================================================
// Task Types
// ============================================================================

/// The cadence of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Fires on a fixed interval until cancelled.
    Repeating,
    /// Fires once after a delay.
    OneShot,
    /// Fires every second, counting down to zero.
    Countdown,
}

/// One delivery from a scheduled task.
#[derive(Debug, Clone)]
pub struct TaskFire {
    /// The task name the fire belongs to.
    pub name: String,

    /// Handle generation; stale fires carry an old generation.
    pub generation: u64,

    /// Seconds left for countdown tasks, `None` otherwise.
    pub remaining: Option<i64>,

    /// True on the final fire of a one-shot or countdown.
    pub terminal: bool,
}

struct TaskEntry {
    generation: u64,
    kind: TaskKind,
    cancel: CancellationToken,
}

// ============================================================================
// Scheduler
// ============================================================================

/// Owns all scheduled task handles for one extension.
pub struct Scheduler {
    tasks: HashMap<String, TaskEntry>,
    fire_tx: mpsc::UnboundedSender<TaskFire>,
    next_generation: u64,
    countdown_tick: Duration,
}

impl Scheduler {
    /// Creates a scheduler delivering fires to `fire_tx`.
    pub fn new(fire_tx: mpsc::UnboundedSender<TaskFire>) -> Self {
        Self {
            tasks: HashMap::new(),
            fire_tx,
            next_generation: 0,
            countdown_tick: Duration::from_secs(1),
        }
    }

    /// Overrides the countdown tick, for tests that cannot wait real seconds.
    pub fn with_countdown_tick(mut self, tick: Duration) -> Self {
        self.countdown_tick = tick;
        self
    }

    /// Arms a repeating task. An existing task under `name` is cancelled
    /// before the new handle is created.
    pub fn schedule_repeating(&mut self, name: &str, interval: Duration) {
        let (generation, cancel) = self.arm(name, TaskKind::Repeating);
        let fire_tx = self.fire_tx.clone();
        let name = name.to_string();
        debug!(task = %name, interval_ms = interval.as_millis() as u64, "Armed repeating task");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = sleep(interval) => {}
                }
                let fire = TaskFire {
                    name: name.clone(),
                    generation,
                    remaining: None,
                    terminal: false,
                };
                if fire_tx.send(fire).is_err() {
                    return;
                }
            }
        });
    }

    /// Arms a one-shot task firing once after `delay`.
    pub fn schedule_once(&mut self, name: &str, delay: Duration) {
        let (generation, cancel) = self.arm(name, TaskKind::OneShot);
        let fire_tx = self.fire_tx.clone();
        let name = name.to_string();
        debug!(task = %name, delay_ms = delay.as_millis() as u64, "Armed one-shot task");

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(delay) => {}
            }
            let _ = fire_tx.send(TaskFire {
                name,
                generation,
                remaining: None,
                terminal: true,
            });
        });
    }

    /// Arms a countdown firing once per tick, starting immediately.
    ///
    /// For `remaining = N` the task fires N+1 times with `remaining` values
    /// N down to 0; the zero fire is terminal.
    pub fn start_countdown(&mut self, name: &str, remaining: i64) {
        let (generation, cancel) = self.arm(name, TaskKind::Countdown);
        let fire_tx = self.fire_tx.clone();
        let tick = self.countdown_tick;
        let name = name.to_string();
        debug!(task = %name, remaining, "Armed countdown task");

        tokio::spawn(async move {
            let mut left = remaining.max(0);
            loop {
                let fire = TaskFire {
                    name: name.clone(),
                    generation,
                    remaining: Some(left),
                    terminal: left == 0,
                };
                let terminal = fire.terminal;
                if fire_tx.send(fire).is_err() || terminal {
                    return;
                }
                left -= 1;
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = sleep(tick) => {}
                }
            }
        });
    }

    /// Cancels the task under `name`. Idempotent; unknown names are a no-op.
    pub fn cancel(&mut self, name: &str) {
        if let Some(entry) = self.tasks.remove(name) {
            entry.cancel.cancel();
            debug!(task = %name, "Cancelled task");
        }
    }

    /// Cancels every task.
    pub fn cancel_all(&mut self) {
        for (name, entry) in self.tasks.drain() {
            entry.cancel.cancel();
            debug!(task = %name, "Cancelled task");
        }
    }

    /// Returns true if `fire` belongs to the current handle for its name.
    ///
    /// A fire queued just before its task was cancelled or re-armed carries
    /// a stale generation and must be dropped.
    pub fn accepts(&self, fire: &TaskFire) -> bool {
        self.tasks
            .get(&fire.name)
            .is_some_and(|entry| entry.generation == fire.generation)
    }

    /// Removes the bookkeeping entry after a terminal fire.
    pub fn complete(&mut self, fire: &TaskFire) {
        if self.accepts(fire) {
            self.tasks.remove(&fire.name);
        }
    }

    /// Returns true if a task is currently armed under `name`.
    pub fn is_scheduled(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Returns the kind of the task armed under `name`.
    pub fn kind_of(&self, name: &str) -> Option<TaskKind> {
        self.tasks.get(name).map(|entry| entry.kind)
    }

    // Cancel-before-rearm plus generation bump, shared by all arm paths.
    fn arm(&mut self, name: &str, kind: TaskKind) -> (u64, CancellationToken) {
        self.cancel(name);
        self.next_generation += 1;
        let generation = self.next_generation;
        let cancel = CancellationToken::new();
        self.tasks.insert(
            name.to_string(),
            TaskEntry {
                generation,
                kind,
                cancel: cancel.clone(),
            },
        );
        (generation, cancel)
    }
}

// ============================================================================
// Tests
// ============================================================================
