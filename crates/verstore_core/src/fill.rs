//! Audit timestamp fill-in.
//!
//! # Responsibility
//! - Provide the clock collaborator used for `created_at` / `updated_at`.
//! - Run explicit pre-insert and pre-update hooks on user rows.
//!
//! # Invariants
//! - `before_insert` sets both timestamps to the same instant.
//! - `before_update` never touches `created_at`.

use crate::model::user::User;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current time in epoch milliseconds.
pub trait Clock {
    fn now_epoch_ms(&self) -> i64;
}

/// Wall clock backed by `SystemTime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_ms(&self) -> i64 {
        // A clock before 1970 is reported as the epoch itself.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_epoch_ms(&self) -> i64 {
        (**self).now_epoch_ms()
    }
}

/// Hook invoked by the store right before a row is written.
pub trait FillHook {
    fn before_insert(&self, user: &mut User);
    fn before_update(&self, user: &mut User);
}

/// Default hook: stamps `created_at` on insert and `updated_at` on every write.
#[derive(Debug, Clone, Default)]
pub struct TimestampFill<C: Clock = SystemClock> {
    clock: C,
}

impl<C: Clock> TimestampFill<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> FillHook for TimestampFill<C> {
    fn before_insert(&self, user: &mut User) {
        let now = self.clock.now_epoch_ms();
        user.created_at = now;
        user.updated_at = now;
    }

    fn before_update(&self, user: &mut User) {
        user.updated_at = self.clock.now_epoch_ms().max(user.created_at);
    }
}

#[cfg(test)]
mod tests {
    use super::{Clock, FillHook, SystemClock, TimestampFill};
    use crate::model::user::User;
    use std::cell::Cell;

    struct StepClock(Cell<i64>);

    impl Clock for StepClock {
        fn now_epoch_ms(&self) -> i64 {
            self.0.get()
        }
    }

    fn blank_user() -> User {
        User {
            id: 1,
            name: "a".to_string(),
            age: 1,
            email: None,
            created_at: 0,
            updated_at: 0,
            version: 0,
            deleted: false,
        }
    }

    #[test]
    fn insert_fill_sets_both_timestamps() {
        let fill = TimestampFill::new(StepClock(Cell::new(1_000)));
        let mut user = blank_user();
        fill.before_insert(&mut user);
        assert_eq!(user.created_at, 1_000);
        assert_eq!(user.updated_at, 1_000);
    }

    #[test]
    fn update_fill_keeps_created_at_and_never_goes_backwards() {
        let clock = StepClock(Cell::new(5_000));
        let fill = TimestampFill::new(&clock);
        let mut user = blank_user();
        fill.before_insert(&mut user);

        clock.0.set(7_000);
        fill.before_update(&mut user);
        assert_eq!(user.created_at, 5_000);
        assert_eq!(user.updated_at, 7_000);

        clock.0.set(1_000);
        fill.before_update(&mut user);
        assert_eq!(user.updated_at, 5_000);
    }

    #[test]
    fn system_clock_is_after_2024() {
        assert!(SystemClock.now_epoch_ms() > 1_704_067_200_000);
    }
}
