//! # Database Layer
//!
//! SQLite persistence for todos and scheduled reminders. A single
//! connection behind a mutex serializes every mutation, forming the one
//! critical section the concurrency model relies on; reads are quick and
//! take the same lock.
//!
//! Instants are stored as unix milliseconds so ordering is total and cheap
//! to index. Todo ids come from `AUTOINCREMENT`, which never reuses an id
//! even after deletion.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::debug;
use sqlite::{Connection, State, Statement};

use crate::core::error::Result;
use crate::features::reminders::ScheduledReminder;
use crate::features::todos::Todo;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS todos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    reminder_at INTEGER
);
CREATE TABLE IF NOT EXISTS scheduled_reminders (
    todo_id INTEGER PRIMARY KEY,
    fire_at INTEGER NOT NULL,
    title TEXT NOT NULL
);
";

pub struct Database {
    connection: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let connection = sqlite::open(path.as_ref())?;
        connection.execute(SCHEMA)?;
        debug!("Opened database at {}", path.as_ref().display());
        Ok(Database {
            connection: Mutex::new(connection),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A poisoned lock means a panic mid-statement; the connection
        // itself is still usable.
        self.connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a new todo and return the stored record with its assigned id.
    pub fn insert_todo(&self, title: &str, created_at: DateTime<Utc>) -> Result<Todo> {
        let connection = self.lock();
        let mut statement =
            connection.prepare("INSERT INTO todos (title, created_at) VALUES (?, ?)")?;
        statement.bind((1, title))?;
        statement.bind((2, created_at.timestamp_millis()))?;
        statement.next()?;

        let mut rowid = connection.prepare("SELECT last_insert_rowid()")?;
        rowid.next()?;
        let id = rowid.read::<i64, _>(0)?;

        Ok(Todo {
            id,
            title: title.to_string(),
            created_at: from_millis(created_at.timestamp_millis()),
            reminder_at: None,
        })
    }

    /// Fetch a single todo by id.
    pub fn get_todo(&self, id: i64) -> Result<Option<Todo>> {
        let connection = self.lock();
        let mut statement = connection
            .prepare("SELECT id, title, created_at, reminder_at FROM todos WHERE id = ?")?;
        statement.bind((1, id))?;
        if let State::Row = statement.next()? {
            Ok(Some(read_todo(&statement)?))
        } else {
            Ok(None)
        }
    }

    /// Delete a todo row. Returns whether a row existed.
    pub fn delete_todo(&self, id: i64) -> Result<bool> {
        let connection = self.lock();
        let mut statement = connection.prepare("DELETE FROM todos WHERE id = ?")?;
        statement.bind((1, id))?;
        statement.next()?;
        Ok(connection.change_count() > 0)
    }

    /// Update a todo's reminder instant. Returns whether a row existed.
    pub fn set_reminder_at(&self, id: i64, when: DateTime<Utc>) -> Result<bool> {
        let connection = self.lock();
        let mut statement = connection.prepare("UPDATE todos SET reminder_at = ? WHERE id = ?")?;
        statement.bind((1, when.timestamp_millis()))?;
        statement.bind((2, id))?;
        statement.next()?;
        Ok(connection.change_count() > 0)
    }

    /// All todos, most recently created first, ties broken by ascending id.
    pub fn all_todos(&self) -> Result<Vec<Todo>> {
        let connection = self.lock();
        let mut statement = connection.prepare(
            "SELECT id, title, created_at, reminder_at FROM todos
             ORDER BY created_at DESC, id ASC",
        )?;
        let mut todos = Vec::new();
        while let State::Row = statement.next()? {
            todos.push(read_todo(&statement)?);
        }
        Ok(todos)
    }

    /// Insert or replace the scheduled reminder for a todo id.
    pub fn upsert_scheduled(&self, reminder: &ScheduledReminder) -> Result<()> {
        let connection = self.lock();
        let mut statement = connection.prepare(
            "INSERT INTO scheduled_reminders (todo_id, fire_at, title) VALUES (?, ?, ?)
             ON CONFLICT(todo_id) DO UPDATE SET fire_at = excluded.fire_at, title = excluded.title",
        )?;
        statement.bind((1, reminder.todo_id))?;
        statement.bind((2, reminder.fire_at.timestamp_millis()))?;
        statement.bind((3, reminder.title.as_str()))?;
        statement.next()?;
        Ok(())
    }

    /// Remove the scheduled reminder row for a todo id. The return value
    /// reports whether the row still existed, which arbitrates a cancel
    /// racing a fire: exactly one caller observes `true`.
    pub fn remove_scheduled(&self, todo_id: i64) -> Result<bool> {
        let connection = self.lock();
        let mut statement =
            connection.prepare("DELETE FROM scheduled_reminders WHERE todo_id = ?")?;
        statement.bind((1, todo_id))?;
        statement.next()?;
        Ok(connection.change_count() > 0)
    }

    /// All persisted scheduled reminders, used by startup recovery.
    pub fn all_scheduled(&self) -> Result<Vec<ScheduledReminder>> {
        let connection = self.lock();
        let mut statement =
            connection.prepare("SELECT todo_id, fire_at, title FROM scheduled_reminders")?;
        let mut reminders = Vec::new();
        while let State::Row = statement.next()? {
            reminders.push(ScheduledReminder {
                todo_id: statement.read::<i64, _>(0)?,
                fire_at: from_millis(statement.read::<i64, _>(1)?),
                title: statement.read::<String, _>(2)?,
            });
        }
        Ok(reminders)
    }
}

fn read_todo(statement: &Statement<'_>) -> Result<Todo> {
    Ok(Todo {
        id: statement.read::<i64, _>(0)?,
        title: statement.read::<String, _>(1)?,
        created_at: from_millis(statement.read::<i64, _>(2)?),
        reminder_at: statement.read::<Option<i64>, _>(3)?.map(from_millis),
    })
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}
