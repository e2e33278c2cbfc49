//! Durable one-shot scheduler: "fire at instant T" becomes a persisted row
//! plus an in-process timer. The row, not the timer, is the source of
//! truth; timers are rebuilt from the table on startup, so a reminder
//! survives process death.
//!
//! The firing path claims the row (deletes it) before dispatching. A crash
//! between claim and dispatch loses at most one notification and never
//! duplicates one, and the claim is what arbitrates a cancel racing a
//! fire: whichever side deletes the row wins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::core::error::Result;
use crate::core::time::Clock;
use crate::database::Database;
use crate::features::reminders::dispatcher::NotificationDispatcher;

/// A persisted, not-yet-fired reminder. At most one exists per todo id;
/// scheduling again for the same id supersedes the previous one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledReminder {
    pub todo_id: i64,
    pub fire_at: DateTime<Utc>,
    /// Title snapshot taken at schedule time, so the notification text is
    /// stable even if the todo itself is edited or gone by fire time.
    pub title: String,
}

struct ArmedTimer {
    generation: u64,
    /// Absent only for the instant between reserving the slot and the
    /// spawn returning; a zero-delay timer may already have fired and
    /// removed the whole entry by then.
    handle: Option<JoinHandle<()>>,
}

impl ArmedTimer {
    fn abort(&self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

/// Turns "fire at instant T" into a durable, cancellable future invocation
/// of the [`NotificationDispatcher`].
pub struct ReminderScheduler {
    db: Arc<Database>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    /// Armed in-process timers keyed by todo id. The generation tag lets a
    /// finished timer clean up only its own entry, never a successor's.
    timers: Arc<DashMap<i64, ArmedTimer>>,
    generation: AtomicU64,
    /// Serializes all store/scheduler mutations. Shared with the
    /// `TodoStore`, which holds it across whole composite operations so a
    /// concurrent `delete` cannot interleave them.
    mutations: Arc<Mutex<()>>,
}

impl ReminderScheduler {
    pub fn new(
        db: Arc<Database>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        ReminderScheduler {
            db,
            dispatcher,
            clock,
            timers: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
            mutations: Arc::new(Mutex::new(())),
        }
    }

    /// The lock serializing all store/scheduler mutations. The `TodoStore`
    /// shares it so its composite operations are atomic with respect to
    /// the scheduler's own surface.
    pub(crate) fn mutations(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.mutations)
    }

    fn lock_mutations(&self) -> MutexGuard<'_, ()> {
        self.mutations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Persist and arm a reminder. An instant in the past is not rejected;
    /// it fires as soon as possible. Supersedes any previously scheduled
    /// reminder for the same todo id.
    pub fn schedule(&self, todo_id: i64, title: &str, fire_at: DateTime<Utc>) -> Result<()> {
        let _mutations = self.lock_mutations();
        self.schedule_locked(todo_id, title, fire_at)
    }

    /// Caller must hold the mutation lock.
    pub(crate) fn schedule_locked(
        &self,
        todo_id: i64,
        title: &str,
        fire_at: DateTime<Utc>,
    ) -> Result<()> {
        let reminder = ScheduledReminder {
            todo_id,
            fire_at,
            title: title.to_string(),
        };
        self.db.upsert_scheduled(&reminder)?;
        info!("Scheduled reminder for todo {} at {}", todo_id, fire_at);
        self.arm(reminder);
        Ok(())
    }

    /// Disarm and forget a reminder. Idempotent. Once this returns, no fire
    /// for `todo_id` will happen, unless a timer had already claimed its
    /// row, in which case the fire was in flight before the cancel.
    pub fn cancel(&self, todo_id: i64) -> Result<()> {
        let _mutations = self.lock_mutations();
        self.cancel_locked(todo_id)
    }

    /// Caller must hold the mutation lock.
    pub(crate) fn cancel_locked(&self, todo_id: i64) -> Result<()> {
        if let Some((_, timer)) = self.timers.remove(&todo_id) {
            timer.abort();
            debug!("Disarmed timer for todo {}", todo_id);
        }
        if self.db.remove_scheduled(todo_id)? {
            info!("Cancelled reminder for todo {}", todo_id);
        }
        Ok(())
    }

    /// Re-arm every persisted reminder. Call once at startup, before any
    /// new `schedule` calls. Rows whose instant passed while the process
    /// was down fire immediately. Returns how many reminders were re-armed.
    pub fn recover_pending(&self) -> Result<usize> {
        let _mutations = self.lock_mutations();
        let pending = self.db.all_scheduled()?;
        let count = pending.len();
        for reminder in pending {
            debug!(
                "Recovered reminder for todo {} (fire at {})",
                reminder.todo_id, reminder.fire_at
            );
            self.arm(reminder);
        }
        if count > 0 {
            info!("Re-armed {} persisted reminder(s)", count);
        }
        Ok(count)
    }

    /// Abort every armed timer without touching persisted rows. The rows
    /// are re-armed by `recover_pending` on the next run.
    pub fn shutdown(&self) {
        let _mutations = self.lock_mutations();
        let mut disarmed = 0usize;
        self.timers.retain(|_, timer| {
            timer.abort();
            disarmed += 1;
            false
        });
        if disarmed > 0 {
            info!("Disarmed {} timer(s) at shutdown", disarmed);
        }
    }

    fn arm(&self, reminder: ScheduledReminder) {
        let todo_id = reminder.todo_id;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let delay = (reminder.fire_at - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        // Reserve the map slot before the task exists, so a zero-delay
        // timer that runs immediately still finds its own entry to remove.
        if let Some(previous) = self.timers.insert(
            todo_id,
            ArmedTimer {
                generation,
                handle: None,
            },
        ) {
            previous.abort();
            debug!("Superseded armed timer for todo {}", todo_id);
        }

        let db = Arc::clone(&self.db);
        let dispatcher = Arc::clone(&self.dispatcher);
        let timers = Arc::clone(&self.timers);
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            timers.remove_if(&todo_id, |_, timer| timer.generation == generation);

            // Claim the row. Whoever deletes it wins, so a fire never
            // follows a completed cancel.
            match db.remove_scheduled(todo_id) {
                Ok(true) => {
                    if let Err(e) = dispatcher.fire(todo_id, &reminder.title).await {
                        warn!("Reminder dispatch for todo {} failed: {}", todo_id, e);
                    }
                }
                Ok(false) => {
                    debug!("Reminder for todo {} was cancelled before firing", todo_id);
                }
                Err(e) => warn!("Could not claim reminder for todo {}: {}", todo_id, e),
            }
        });

        // Attach the handle to the reserved slot unless the timer already
        // fired and cleaned the entry up.
        if let Some(mut entry) = self.timers.get_mut(&todo_id) {
            if entry.generation == generation {
                entry.handle = Some(handle);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn armed_count(&self) -> usize {
        self.timers.len()
    }
}
