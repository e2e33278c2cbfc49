//! Todo records and the reactively-observable store that owns them.
//!
//! Every mutation republishes the full ordered snapshot to a watch
//! channel, so subscribers always converge on the current list without
//! polling. Subscribers that fall behind skip straight to the latest
//! snapshot; intermediate states are conflated, never reordered.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::core::error::{Error, Result};
use crate::core::time::Clock;
use crate::database::Database;
use crate::features::reminders::ReminderScheduler;

/// A single user-entered note with creation time and optional reminder
/// time. Ids are assigned by the store and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub id: i64,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub reminder_at: Option<DateTime<Utc>>,
}

/// Owns the durable todo list and its live query.
pub struct TodoStore {
    db: Arc<Database>,
    scheduler: Arc<ReminderScheduler>,
    clock: Arc<dyn Clock>,
    snapshot: watch::Sender<Vec<Todo>>,
    /// Shared with the scheduler; held across each whole mutation so
    /// composites like `set_reminder` cannot interleave with a concurrent
    /// `delete` for the same id.
    mutations: Arc<Mutex<()>>,
}

impl TodoStore {
    /// Build a store over `db`, seeding the live query with the current
    /// rows.
    pub fn new(
        db: Arc<Database>,
        scheduler: Arc<ReminderScheduler>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let (snapshot, _) = watch::channel(db.all_todos()?);
        let mutations = scheduler.mutations();
        Ok(TodoStore {
            db,
            scheduler,
            clock,
            snapshot,
            mutations,
        })
    }

    fn lock_mutations(&self) -> MutexGuard<'_, ()> {
        self.mutations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a todo. Fails with `InvalidInput` for an empty or
    /// whitespace-only title; nothing is persisted and subscribers are not
    /// notified.
    pub fn add(&self, title: &str) -> Result<Todo> {
        if title.trim().is_empty() {
            return Err(Error::InvalidInput(
                "todo title must not be empty".to_string(),
            ));
        }
        let _mutations = self.lock_mutations();
        let todo = self.db.insert_todo(title, self.clock.now())?;
        info!("Added todo {} ({:?})", todo.id, todo.title);
        self.publish()?;
        Ok(todo)
    }

    /// Delete a todo. Deleting an unknown id is a no-op, not an error. Any
    /// pending scheduled reminder for the id is cancelled first, so a
    /// deleted todo can never fire.
    pub fn delete(&self, id: i64) -> Result<()> {
        let _mutations = self.lock_mutations();
        self.scheduler.cancel_locked(id)?;
        if self.db.delete_todo(id)? {
            info!("Deleted todo {}", id);
            self.publish()?;
        }
        Ok(())
    }

    /// Update the stored reminder instant without arming a timer; arming is
    /// the caller's job. Fails with `NotFound` for an unknown id.
    pub fn set_reminder_field(&self, id: i64, when: DateTime<Utc>) -> Result<()> {
        let _mutations = self.lock_mutations();
        if !self.db.set_reminder_at(id, when)? {
            return Err(Error::NotFound(id));
        }
        self.publish()?;
        Ok(())
    }

    /// Set and arm a reminder in one call: stores `when` on the todo,
    /// snapshots the current title, and schedules the timer.
    pub fn set_reminder(&self, id: i64, when: DateTime<Utc>) -> Result<()> {
        let _mutations = self.lock_mutations();
        let todo = self.db.get_todo(id)?.ok_or(Error::NotFound(id))?;
        if !self.db.set_reminder_at(id, when)? {
            return Err(Error::NotFound(id));
        }
        self.scheduler.schedule_locked(id, &todo.title, when)?;
        self.publish()?;
        Ok(())
    }

    /// Subscribe to the live query. The receiver holds the current ordered
    /// snapshot immediately and is notified on every change. Dropping the
    /// receiver detaches the subscriber.
    pub fn observe(&self) -> watch::Receiver<Vec<Todo>> {
        self.snapshot.subscribe()
    }

    fn publish(&self) -> Result<()> {
        let todos = self.db.all_todos()?;
        debug!("Publishing snapshot of {} todo(s)", todos.len());
        self.snapshot.send_replace(todos);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::reminders::NotificationDispatcher;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;
    use tempfile::tempdir;
    use tokio::time::sleep;

    #[derive(Default)]
    struct RecordingDispatcher {
        fired: Mutex<Vec<(i64, String)>>,
    }

    impl RecordingDispatcher {
        fn calls(&self) -> Vec<(i64, String)> {
            self.fired.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotificationDispatcher for RecordingDispatcher {
        async fn fire(&self, todo_id: i64, title: &str) -> anyhow::Result<()> {
            self.fired.lock().unwrap().push((todo_id, title.to_string()));
            Ok(())
        }
    }

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn set(&self, now: DateTime<Utc>) {
            *self.0.lock().unwrap() = now;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    struct Fixture {
        store: TodoStore,
        dispatcher: Arc<RecordingDispatcher>,
        clock: Arc<ManualClock>,
        _dir: tempfile::TempDir,
    }

    fn setup() -> Fixture {
        let dir = tempdir().unwrap();
        let db = Arc::new(Database::open(dir.path().join("nudge.db")).unwrap());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let clock = Arc::new(ManualClock(Mutex::new(Utc::now())));
        let scheduler = Arc::new(ReminderScheduler::new(
            Arc::clone(&db),
            Arc::clone(&dispatcher) as Arc<dyn NotificationDispatcher>,
            Arc::new(crate::core::time::SystemClock),
        ));
        let store = TodoStore::new(
            db,
            scheduler,
            Arc::clone(&clock) as Arc<dyn Clock>,
        )
        .unwrap();
        Fixture {
            store,
            dispatcher,
            clock,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_add_returns_record_and_publishes() {
        let fixture = setup();
        let mut rx = fixture.store.observe();
        assert!(rx.borrow().is_empty());

        let todo = fixture.store.add("Buy milk").unwrap();
        assert_eq!(todo.id, 1);
        assert_eq!(todo.title, "Buy milk");
        assert_eq!(todo.reminder_at, None);

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), vec![todo]);
    }

    #[tokio::test]
    async fn test_add_rejects_blank_titles() {
        let fixture = setup();
        let rx = fixture.store.observe();

        assert!(matches!(
            fixture.store.add(""),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            fixture.store.add("   "),
            Err(Error::InvalidInput(_))
        ));

        // Nothing was created and nobody was notified.
        assert!(rx.borrow().is_empty());
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_ordering_newest_first_ties_by_id() {
        let fixture = setup();
        let start = fixture.clock.now();

        // Two todos sharing a creation instant, then a newer one.
        fixture.store.add("a").unwrap();
        fixture.store.add("b").unwrap();
        fixture.clock.set(start + chrono::Duration::seconds(10));
        fixture.store.add("c").unwrap();

        let rx = fixture.store.observe();
        let ids: Vec<i64> = rx.borrow().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn test_delete_unknown_id_is_silent_noop() {
        let fixture = setup();
        fixture.store.add("keep").unwrap();
        let rx = fixture.store.observe();

        fixture.store.delete(99).unwrap();
        assert!(!rx.has_changed().unwrap());
        assert_eq!(rx.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_set_reminder_field_unknown_id() {
        let fixture = setup();
        let when = Utc::now() + chrono::Duration::minutes(5);
        assert!(matches!(
            fixture.store.set_reminder_field(99, when),
            Err(Error::NotFound(99))
        ));
    }

    #[tokio::test]
    async fn test_set_reminder_field_publishes_update() {
        let fixture = setup();
        let todo = fixture.store.add("call mom").unwrap();
        let mut rx = fixture.store.observe();

        let when = Utc::now() + chrono::Duration::minutes(5);
        fixture.store.set_reminder_field(todo.id, when).unwrap();

        rx.changed().await.unwrap();
        let list = rx.borrow_and_update().clone();
        assert_eq!(
            list[0].reminder_at.map(|at| at.timestamp_millis()),
            Some(when.timestamp_millis())
        );
    }

    #[tokio::test]
    async fn test_set_reminder_fires_with_snapshotted_title() {
        let fixture = setup();
        let todo = fixture.store.add("Buy milk").unwrap();

        let when = Utc::now() + chrono::Duration::milliseconds(100);
        fixture.store.set_reminder(todo.id, when).unwrap();

        sleep(StdDuration::from_millis(300)).await;
        assert_eq!(
            fixture.dispatcher.calls(),
            vec![(todo.id, "Buy milk".to_string())]
        );
    }

    #[tokio::test]
    async fn test_set_reminder_unknown_id() {
        let fixture = setup();
        let when = Utc::now() + chrono::Duration::minutes(5);
        assert!(matches!(
            fixture.store.set_reminder(99, when),
            Err(Error::NotFound(99))
        ));
    }

    #[tokio::test]
    async fn test_delete_cancels_pending_reminder() {
        let fixture = setup();
        let todo = fixture.store.add("Buy milk").unwrap();
        let when = Utc::now() + chrono::Duration::milliseconds(200);
        fixture.store.set_reminder(todo.id, when).unwrap();

        fixture.store.delete(todo.id).unwrap();

        sleep(StdDuration::from_millis(400)).await;
        assert!(fixture.dispatcher.calls().is_empty());
        assert!(fixture.store.observe().borrow().is_empty());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_get_deliveries() {
        let fixture = setup();
        let mut first = fixture.store.observe();
        let mut second = fixture.store.observe();

        fixture.store.add("shared").unwrap();

        first.changed().await.unwrap();
        second.changed().await.unwrap();
        assert_eq!(first.borrow_and_update().len(), 1);
        assert_eq!(second.borrow_and_update().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_delete_racing_set_reminder_never_fires() {
        let Fixture {
            store,
            dispatcher,
            clock: _,
            _dir,
        } = setup();
        let store = Arc::new(store);

        let mut ids = Vec::new();
        for _ in 0..100 {
            ids.push(store.add("race").unwrap().id);
        }

        // Deadline far enough out that every delete below returns before
        // any timer comes due; after that point a fire is a bug.
        let when = Utc::now() + chrono::Duration::seconds(1);
        let mut handles = Vec::new();
        for id in ids {
            let setter = Arc::clone(&store);
            handles.push(tokio::task::spawn_blocking(move || {
                // NotFound just means the delete won the race.
                let _ = setter.set_reminder(id, when);
            }));
            let deleter = Arc::clone(&store);
            handles.push(tokio::task::spawn_blocking(move || {
                deleter.delete(id).unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        sleep(StdDuration::from_millis(1500)).await;
        assert!(
            dispatcher.calls().is_empty(),
            "reminders fired after delete() returned: {:?}",
            dispatcher.calls()
        );
    }

    #[tokio::test]
    async fn test_storage_failure_surfaces_to_caller() {
        let fixture = setup();
        // Yank the table out from under the store with a second connection.
        let raw = sqlite::open(fixture._dir.path().join("nudge.db")).unwrap();
        raw.execute("DROP TABLE todos").unwrap();

        assert!(matches!(fixture.store.add("x"), Err(Error::Storage(_))));
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_current_snapshot() {
        let fixture = setup();
        fixture.store.add("a").unwrap();
        fixture.store.add("b").unwrap();

        let rx = fixture.store.observe();
        assert_eq!(rx.borrow().len(), 2);
        assert!(!rx.has_changed().unwrap());
    }
}
