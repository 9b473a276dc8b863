//! Primary key generation for users inserted without an explicit id.
//!
//! # Responsibility
//! - Define the id generator collaborator used by the store on insert.
//! - Provide a time-ordered snowflake implementation.
//!
//! # Invariants
//! - Ids from one generator are unique and strictly increasing.
//! - Generated ids are always positive.
//! - Generators with distinct worker ids never collide.

use crate::model::user::UserId;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of fresh primary keys.
pub trait IdGenerator {
    fn next_id(&self) -> Result<UserId, IdError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    InvalidWorkerId { worker_id: u16, max: u16 },
    ClockMovedBackwards { by_ms: u64 },
    ClockBeforeEpoch,
    StatePoisoned,
}

impl Display for IdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidWorkerId { worker_id, max } => {
                write!(f, "worker id {worker_id} exceeds maximum {max}")
            }
            Self::ClockMovedBackwards { by_ms } => {
                write!(f, "clock moved backwards by {by_ms} ms; refusing to generate id")
            }
            Self::ClockBeforeEpoch => write!(f, "system clock is before the generator epoch"),
            Self::StatePoisoned => write!(f, "id generator state lock is poisoned"),
        }
    }
}

impl Error for IdError {}

/// Snowflake layout, most significant first:
/// 41 bits of milliseconds since `epoch`, 10 bits of worker id, 12 bits of sequence.
#[derive(Debug)]
pub struct SnowflakeGenerator {
    worker_id: u16,
    epoch: u64,
    state: Mutex<SnowflakeState>,
}

#[derive(Debug, Default)]
struct SnowflakeState {
    last_timestamp: u64,
    sequence: u16,
}

impl SnowflakeGenerator {
    /// 2024-01-01T00:00:00Z.
    pub const DEFAULT_EPOCH: u64 = 1_704_067_200_000;
    pub const MAX_WORKER_ID: u16 = 1023;
    const MAX_SEQUENCE: u16 = 4095;
    const WORKER_SHIFT: u32 = 12;
    const TIMESTAMP_SHIFT: u32 = 22;

    pub fn new(worker_id: u16) -> Result<Self, IdError> {
        Self::with_epoch(worker_id, Self::DEFAULT_EPOCH)
    }

    pub fn with_epoch(worker_id: u16, epoch: u64) -> Result<Self, IdError> {
        if worker_id > Self::MAX_WORKER_ID {
            return Err(IdError::InvalidWorkerId {
                worker_id,
                max: Self::MAX_WORKER_ID,
            });
        }
        Ok(Self {
            worker_id,
            epoch,
            state: Mutex::new(SnowflakeState::default()),
        })
    }

    pub fn worker_id(&self) -> u16 {
        self.worker_id
    }

    /// Milliseconds since Unix epoch encoded in `id`.
    pub fn extract_timestamp(&self, id: UserId) -> u64 {
        ((id as u64) >> Self::TIMESTAMP_SHIFT) + self.epoch
    }

    pub fn extract_worker_id(id: UserId) -> u16 {
        (((id as u64) >> Self::WORKER_SHIFT) & u64::from(Self::MAX_WORKER_ID)) as u16
    }

    pub fn extract_sequence(id: UserId) -> u16 {
        ((id as u64) & u64::from(Self::MAX_SEQUENCE)) as u16
    }

    fn current_timestamp(&self) -> Result<u64, IdError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| IdError::ClockBeforeEpoch)?
            .as_millis() as u64;
        if now < self.epoch {
            return Err(IdError::ClockBeforeEpoch);
        }
        Ok(now)
    }

    fn wait_next_millis(&self, last_timestamp: u64) -> Result<u64, IdError> {
        let mut timestamp = self.current_timestamp()?;
        while timestamp <= last_timestamp {
            std::hint::spin_loop();
            timestamp = self.current_timestamp()?;
        }
        Ok(timestamp)
    }
}

impl IdGenerator for SnowflakeGenerator {
    fn next_id(&self) -> Result<UserId, IdError> {
        let mut state = self.state.lock().map_err(|_| IdError::StatePoisoned)?;
        let mut timestamp = self.current_timestamp()?;

        if timestamp < state.last_timestamp {
            return Err(IdError::ClockMovedBackwards {
                by_ms: state.last_timestamp - timestamp,
            });
        }

        if timestamp == state.last_timestamp {
            state.sequence = (state.sequence + 1) & Self::MAX_SEQUENCE;
            if state.sequence == 0 {
                timestamp = self.wait_next_millis(state.last_timestamp)?;
            }
        } else {
            state.sequence = 0;
        }
        state.last_timestamp = timestamp;

        let id = ((timestamp - self.epoch) << Self::TIMESTAMP_SHIFT)
            | (u64::from(self.worker_id) << Self::WORKER_SHIFT)
            | u64::from(state.sequence);
        // 41 timestamp bits keep the sign bit clear until 2093.
        Ok(id as UserId)
    }
}
