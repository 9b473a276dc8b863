//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `verstore_core` linkage and schema bootstrap.
//! - Route core `event=...` logs to a rolling file before the walkthrough.
//! - Walk through one optimistic-lock conflict on an in-memory store and
//!   print each outcome in a stable `key=value` form.

use std::path::PathBuf;
use std::process::ExitCode;
use verstore_core::db::open_db_in_memory;
use verstore_core::{
    Column, NewUser, PageRequest, RepoError, SqliteUserRepository, UserQuery, UserRepository,
};

fn main() -> ExitCode {
    println!("verstore_core ping={}", verstore_core::ping());
    println!("verstore_core version={}", verstore_core::core_version());

    match run_demo() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("demo status=error error={err}");
            ExitCode::FAILURE
        }
    }
}

/// `VERSTORE_LOG_DIR`, or `verstore-logs` under the system temp dir.
fn log_dir() -> PathBuf {
    std::env::var_os("VERSTORE_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("verstore-logs"))
}

fn start_logging() {
    let dir = log_dir();
    let level = verstore_core::default_log_level();
    match verstore_core::init_logging(level, &dir.to_string_lossy()) {
        Ok(()) => println!("logging status=ok level={level} dir={}", dir.display()),
        Err(err) => eprintln!("logging status=error error={err}"),
    }
}

fn run_demo() -> Result<(), RepoError> {
    start_logging();
    let conn = open_db_in_memory()?;
    let repo = SqliteUserRepository::try_new(&conn)?;

    let id = repo.insert(&NewUser::new("Sun", 18).with_email("sun@example.com"))?;
    repo.insert(&NewUser::new("Yang", 21))?;

    // Two readers capture the same version; only the first writer wins.
    let mut first = repo.get(id)?;
    let mut second = repo.get(id)?;
    second.name = "Yang Qian".to_string();
    first.name = "Sun Yao".to_string();
    let second_applied = repo.update_conditional(&second)?;
    let first_applied = repo.update_conditional(&first)?;
    let current = repo.get(id)?;
    println!(
        "demo optimistic_lock second_applied={second_applied} first_applied={first_applied} name={} version={}",
        current.name, current.version
    );

    let adults = UserQuery::new()
        .ge(Column::Age, 18)
        .is_not_null(Column::Email);
    let page = repo.query_page(&PageRequest::new(1, 2), &adults)?;
    println!(
        "demo query_page rows={} total={}",
        page.records.len(),
        page.total.unwrap_or_default()
    );

    let deleted = repo.delete_logical(id)?;
    let visible = repo.get(id).is_ok();
    println!("demo delete_logical changed={deleted} still_visible={visible}");
    Ok(())
}
