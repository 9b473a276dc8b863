use std::cell::Cell;
use std::thread;
use verstore_core::db::{open_db, open_db_in_memory};
use verstore_core::{
    Clock, NewUser, RepoError, SqliteUserRepository, TimestampFill, UpdateOutcome, UserRepository,
    UserService, UserValidationError,
};

struct ManualClock(Cell<i64>);

impl ManualClock {
    fn at(epoch_ms: i64) -> Self {
        Self(Cell::new(epoch_ms))
    }

    fn set(&self, epoch_ms: i64) {
        self.0.set(epoch_ms);
    }
}

impl Clock for ManualClock {
    fn now_epoch_ms(&self) -> i64 {
        self.0.get()
    }
}

#[test]
fn each_successful_update_advances_version_by_one() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteUserRepository::try_new(&conn).unwrap();
    let id = repo
        .insert(&NewUser::new("counter", 0).with_version(3))
        .unwrap();

    for round in 1..=5 {
        let mut user = repo.get(id).unwrap();
        user.age += 1;
        assert!(repo.update_conditional(&user).unwrap());
        assert_eq!(repo.get(id).unwrap().version, 3 + round);
    }

    let user = repo.get(id).unwrap();
    assert_eq!(user.version, 8);
    assert_eq!(user.age, 5);
}

#[test]
fn stale_writer_loses_and_cannot_overwrite_winner() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteUserRepository::try_new(&conn).unwrap();
    repo.insert(&NewUser::new("Qi", 18).with_id(2)).unwrap();

    let mut thread_one = repo.get(2).unwrap();
    let mut thread_two = repo.get(2).unwrap();
    assert_eq!(thread_one.version, thread_two.version);

    thread_two.name = "Yang".to_string();
    assert!(repo.update_conditional(&thread_two).unwrap());

    thread_one.name = "Sun".to_string();
    thread_one.age = 99;
    assert!(!repo.update_conditional(&thread_one).unwrap());

    let current = repo.get(2).unwrap();
    assert_eq!(current.name, "Yang");
    assert_eq!(current.age, 18);
    assert_eq!(current.version, 1);

    let mut refreshed = repo.get(2).unwrap();
    refreshed.name = "Sun".to_string();
    assert!(repo.update_conditional(&refreshed).unwrap());
    assert_eq!(repo.get(2).unwrap().version, 2);
}

#[test]
fn update_of_deleted_or_missing_row_reports_false() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteUserRepository::try_new(&conn).unwrap();
    repo.insert(&NewUser::new("a", 1).with_id(1)).unwrap();

    let snapshot = repo.get(1).unwrap();
    repo.delete_logical(1).unwrap();
    assert!(!repo.update_conditional(&snapshot).unwrap());
    assert_eq!(repo.get_including_deleted(1).unwrap().unwrap().version, 0);

    let mut ghost = snapshot.clone();
    ghost.id = 404;
    assert!(!repo.update_conditional(&ghost).unwrap());
}

#[test]
fn update_validates_before_writing() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteUserRepository::try_new(&conn).unwrap();
    repo.insert(&NewUser::new("a", 1).with_id(1)).unwrap();

    let mut user = repo.get(1).unwrap();
    user.name.clear();
    assert!(matches!(
        repo.update_conditional(&user),
        Err(RepoError::Validation(_))
    ));
    assert_eq!(repo.get(1).unwrap().version, 0);
}

#[test]
fn fill_hook_sets_created_once_and_refreshes_updated() {
    let conn = open_db_in_memory().unwrap();
    let clock = ManualClock::at(1_000);
    let repo = SqliteUserRepository::try_new(&conn)
        .unwrap()
        .with_fill_hook(TimestampFill::new(&clock));

    let id = repo.insert(&NewUser::new("a", 1)).unwrap();
    let inserted = repo.get(id).unwrap();
    assert_eq!((inserted.created_at, inserted.updated_at), (1_000, 1_000));

    clock.set(2_500);
    assert!(repo.update_conditional(&inserted).unwrap());
    let updated = repo.get(id).unwrap();
    assert_eq!((updated.created_at, updated.updated_at), (1_000, 2_500));

    clock.set(10);
    assert!(repo.update_conditional(&updated).unwrap());
    let after_skew = repo.get(id).unwrap();
    assert_eq!(after_skew.created_at, 1_000);
    assert!(after_skew.updated_at >= after_skew.created_at);
}

#[test]
fn caller_cannot_move_created_at_through_update() {
    let conn = open_db_in_memory().unwrap();
    let clock = ManualClock::at(5_000);
    let repo = SqliteUserRepository::try_new(&conn)
        .unwrap()
        .with_fill_hook(TimestampFill::new(&clock));
    repo.insert(&NewUser::new("a", 1).with_id(1)).unwrap();

    let mut user = repo.get(1).unwrap();
    user.created_at = 1;
    clock.set(6_000);
    assert!(repo.update_conditional(&user).unwrap());
    assert_eq!(repo.get(1).unwrap().created_at, 5_000);
}

#[test]
fn update_with_retry_reports_attempts() {
    let conn = open_db_in_memory().unwrap();
    let service = UserService::new(SqliteUserRepository::try_new(&conn).unwrap());
    let id = service.create_user(&NewUser::new("a", 1)).unwrap();

    let outcome = service
        .update_with_retry(id, 3, |user| user.age = 40)
        .unwrap();
    assert_eq!(outcome, UpdateOutcome::Applied { attempts: 1 });
    assert!(outcome.is_applied());
    assert_eq!(service.get_user(id).unwrap().age, 40);

    let missing = service.update_with_retry(id + 1, 3, |user| user.age = 1);
    assert!(matches!(missing, Err(RepoError::NotFound(_))));
}

#[test]
fn update_with_retry_keeps_store_managed_fields() {
    let conn = open_db_in_memory().unwrap();
    let service = UserService::new(SqliteUserRepository::try_new(&conn).unwrap());
    service
        .create_user(&NewUser::new("target", 1).with_id(1))
        .unwrap();
    service
        .create_user(&NewUser::new("bystander", 2).with_id(2).with_version(7))
        .unwrap();

    let outcome = service
        .update_with_retry(1, 1, |user| {
            user.id = 2;
            user.version = 7;
            user.created_at = 0;
            user.name = "renamed".to_string();
        })
        .unwrap();
    assert_eq!(outcome, UpdateOutcome::Applied { attempts: 1 });

    let target = service.get_user(1).unwrap();
    assert_eq!(target.name, "renamed");
    assert_eq!(target.version, 1);
    assert!(target.created_at > 0);

    let bystander = service.get_user(2).unwrap();
    assert_eq!(bystander.name, "bystander");
    assert_eq!(bystander.version, 7);
}

#[test]
fn version_stops_at_the_integer_limit() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteUserRepository::try_new(&conn).unwrap();

    let err = repo
        .insert(&NewUser::new("maxed", 1).with_id(1).with_version(i64::MAX))
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(UserValidationError::VersionExhausted(1))
    ));

    repo.insert(&NewUser::new("nearly", 1).with_id(2).with_version(i64::MAX - 1))
        .unwrap();
    let mut user = repo.get(2).unwrap();
    user.age = 2;
    assert!(repo.update_conditional(&user).unwrap());

    let mut user = repo.get(2).unwrap();
    assert_eq!(user.version, i64::MAX);
    user.age = 3;
    let err = repo.update_conditional(&user).unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(UserValidationError::VersionExhausted(2))
    ));

    let stored = repo.get(2).unwrap();
    assert_eq!(stored.version, i64::MAX);
    assert_eq!(stored.age, 2);
}

#[test]
fn update_with_retry_exhausts_when_every_attempt_races() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteUserRepository::try_new(&conn).unwrap();
    let id = repo.insert(&NewUser::new("a", 1)).unwrap();
    let rival = SqliteUserRepository::try_new(&conn).unwrap();
    let service = UserService::new(repo);

    // A rival write lands between every read and write of the service.
    let outcome = service
        .update_with_retry(id, 2, |user| {
            let mut ahead = rival.get(user.id).unwrap();
            ahead.age += 1;
            assert!(rival.update_conditional(&ahead).unwrap());
            user.name = "loser".to_string();
        })
        .unwrap();

    assert_eq!(outcome, UpdateOutcome::Exhausted { attempts: 2 });
    let current = rival.get(id).unwrap();
    assert_eq!(current.name, "a");
    assert_eq!(current.age, 3);
    assert_eq!(current.version, 2);
}

#[test]
fn concurrent_writers_on_separate_connections_lose_no_updates() {
    const WRITERS: i32 = 4;
    const INCREMENTS: i32 = 10;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contended.db");
    let id = {
        let conn = open_db(&path).unwrap();
        let repo = SqliteUserRepository::try_new(&conn).unwrap();
        repo.insert(&NewUser::new("shared", 0).with_id(1)).unwrap()
    };

    let handles: Vec<_> = (0..WRITERS)
        .map(|_| {
            let path = path.clone();
            thread::spawn(move || {
                let conn = open_db(&path).unwrap();
                let service = UserService::new(SqliteUserRepository::try_new(&conn).unwrap());
                for _ in 0..INCREMENTS {
                    let outcome = service
                        .update_with_retry(id, 1_000, |user| user.age += 1)
                        .unwrap();
                    assert!(outcome.is_applied());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let conn = open_db(&path).unwrap();
    let repo = SqliteUserRepository::try_new(&conn).unwrap();
    let user = repo.get(id).unwrap();
    assert_eq!(user.age, WRITERS * INCREMENTS);
    assert_eq!(user.version, i64::from(WRITERS * INCREMENTS));
}
