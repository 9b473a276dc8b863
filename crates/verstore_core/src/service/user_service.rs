//! User use-case service.
//!
//! # Responsibility
//! - Provide stable entry points for store callers.
//! - Own the read-modify-write loop that callers of the conditional update
//!   would otherwise each re-implement.
//!
//! # Invariants
//! - Service APIs never bypass repository validation or version checks.
//! - A retry always starts from a fresh read; stale snapshots are discarded.

use crate::model::query::{Page, PageRequest, UserQuery};
use crate::model::user::{NewUser, User, UserId};
use crate::repo::user_repo::{RepoResult, UserRepository};
use log::{debug, warn};

/// Result of [`UserService::update_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The write landed on the given attempt (1-based).
    Applied { attempts: u32 },
    /// Every attempt lost the version race.
    Exhausted { attempts: u32 },
}

impl UpdateOutcome {
    pub fn is_applied(self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Use-case service wrapper over a [`UserRepository`].
pub struct UserService<R: UserRepository> {
    repo: R,
}

impl<R: UserRepository> UserService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn create_user(&self, user: &NewUser) -> RepoResult<UserId> {
        self.repo.insert(user)
    }

    pub fn get_user(&self, id: UserId) -> RepoResult<User> {
        self.repo.get(id)
    }

    pub fn get_users(&self, ids: &[UserId]) -> RepoResult<Vec<User>> {
        self.repo.get_batch(ids)
    }

    pub fn find_users(&self, query: &UserQuery) -> RepoResult<Vec<User>> {
        self.repo.query(query)
    }

    pub fn find_users_page(&self, request: &PageRequest, query: &UserQuery) -> RepoResult<Page> {
        self.repo.query_page(request, query)
    }

    /// Single conditional write; `false` means the snapshot was stale.
    pub fn update_user(&self, user: &User) -> RepoResult<bool> {
        self.repo.update_conditional(user)
    }

    pub fn delete_user(&self, id: UserId) -> RepoResult<bool> {
        Ok(self.repo.delete_logical(id)? == 1)
    }

    /// Re-reads, mutates and conditionally writes until one write lands.
    ///
    /// `mutate` receives a fresh snapshot on every attempt. Store-managed
    /// fields (`id`, `version`, `created_at`, `deleted`) are reset from that
    /// snapshot afterwards, so the write always targets the row that was read.
    ///
    /// # Errors
    /// - `NotFound` when the user is missing or deleted at the start of an attempt.
    /// - Any repository error from the read or the write.
    pub fn update_with_retry<F>(
        &self,
        id: UserId,
        max_attempts: u32,
        mut mutate: F,
    ) -> RepoResult<UpdateOutcome>
    where
        F: FnMut(&mut User),
    {
        let max_attempts = max_attempts.max(1);
        for attempt in 1..=max_attempts {
            let snapshot = self.repo.get(id)?;
            let mut user = snapshot.clone();
            mutate(&mut user);
            user.id = snapshot.id;
            user.version = snapshot.version;
            user.created_at = snapshot.created_at;
            user.deleted = snapshot.deleted;
            if self.repo.update_conditional(&user)? {
                debug!(
                    "event=user_update_retry module=service status=ok id={id} attempts={attempt}"
                );
                return Ok(UpdateOutcome::Applied { attempts: attempt });
            }
        }

        warn!(
            "event=user_update_retry module=service status=exhausted id={id} attempts={max_attempts}"
        );
        Ok(UpdateOutcome::Exhausted {
            attempts: max_attempts,
        })
    }
}
