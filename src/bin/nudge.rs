use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use dotenvy::dotenv;
use log::info;
use tokio::io::{AsyncBufReadExt, BufReader};

use nudge::core::{Config, SystemClock};
use nudge::database::Database;
use nudge::features::reminders::{LogDispatcher, ReminderScheduler};
use nudge::features::todos::TodoStore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env();
    info!("Opening database at {}", config.database_path.display());

    let db = Arc::new(Database::open(&config.database_path)?);
    let clock = Arc::new(SystemClock);
    let scheduler = Arc::new(ReminderScheduler::new(
        Arc::clone(&db),
        Arc::new(LogDispatcher),
        clock.clone(),
    ));

    // Re-arm persisted reminders before accepting any new ones.
    scheduler.recover_pending()?;

    let store = TodoStore::new(Arc::clone(&db), Arc::clone(&scheduler), clock)?;

    println!("nudge - commands: add <title> | list | remind <id> <seconds> | delete <id> | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, rest) = match line.split_once(' ') {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };
        match command {
            "" => {}
            "add" => match store.add(rest) {
                Ok(todo) => println!("added #{}: {}", todo.id, todo.title),
                Err(e) => eprintln!("error: {}", e),
            },
            "list" => {
                let rx = store.observe();
                for todo in rx.borrow().iter() {
                    let reminder = todo
                        .reminder_at
                        .map(|at| format!(" (reminder at {})", at))
                        .unwrap_or_default();
                    println!("#{} {}{}", todo.id, todo.title, reminder);
                }
            }
            "remind" => match parse_remind(rest) {
                Some((id, seconds)) => {
                    let when = Utc::now() + chrono::Duration::seconds(seconds);
                    match store.set_reminder(id, when) {
                        Ok(()) => println!("reminder set for #{} at {}", id, when),
                        Err(e) => eprintln!("error: {}", e),
                    }
                }
                None => eprintln!("usage: remind <id> <seconds>"),
            },
            "delete" => match rest.parse::<i64>() {
                Ok(id) => match store.delete(id) {
                    Ok(()) => println!("deleted #{}", id),
                    Err(e) => eprintln!("error: {}", e),
                },
                Err(_) => eprintln!("usage: delete <id>"),
            },
            "quit" | "exit" => break,
            other => eprintln!("unknown command: {}", other),
        }
    }

    scheduler.shutdown();
    Ok(())
}

fn parse_remind(rest: &str) -> Option<(i64, i64)> {
    let (id, seconds) = rest.split_once(' ')?;
    Some((id.trim().parse().ok()?, seconds.trim().parse().ok()?))
}
