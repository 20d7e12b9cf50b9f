//! Human readable copy identifiers (`AA-000001`, `AA-000002`, ...).
//!
//! A counter is a two-letter prefix plus a number. The number runs to
//! [`MAX_NUMBER`]; past that it resets to zero and the prefix advances like an
//! odometer (`AZ` is followed by `BA`). The last id is `ZZ-999999`.

use shelf_db::{SequenceCounter, SharedStore};

use crate::error::{LendingError, LendingResult};

pub const INITIAL_PREFIX: &str = "AA";
pub const MAX_NUMBER: u32 = 999_999;

/// The prefix after `prefix`, or `None` once `ZZ` is reached.
pub fn next_prefix(prefix: &str) -> Option<String> {
    let mut letters: Vec<u8> = prefix.bytes().collect();
    for letter in letters.iter_mut().rev() {
        if *letter < b'Z' {
            *letter += 1;
            return String::from_utf8(letters).ok();
        }
        *letter = b'A';
    }
    None
}

fn valid_prefix(prefix: &str) -> bool {
    prefix.len() == 2 && prefix.bytes().all(|b| b.is_ascii_uppercase())
}

/// The counter state that follows `current`.
pub fn successor(name: &str, current: Option<&SequenceCounter>) -> LendingResult<SequenceCounter> {
    let (prefix, number) = match current {
        Some(counter) => {
            if !valid_prefix(&counter.prefix) || counter.number > MAX_NUMBER {
                return Err(LendingError::Integrity(format!(
                    "counter '{}' holds invalid state {}-{}",
                    name, counter.prefix, counter.number
                )));
            }
            (counter.prefix.clone(), counter.number)
        }
        None => (INITIAL_PREFIX.to_string(), 0),
    };

    let next = number + 1;
    let (prefix, number) = if next > MAX_NUMBER {
        let prefix = next_prefix(&prefix).ok_or_else(|| {
            LendingError::conflict(format!("counter '{name}' exhausted every identifier"))
        })?;
        (prefix, 0)
    } else {
        (prefix, next)
    };

    Ok(SequenceCounter {
        name: name.to_string(),
        prefix,
        number,
    })
}

pub fn format_copy_id(counter: &SequenceCounter) -> String {
    format!("{}-{:06}", counter.prefix, counter.number)
}

/// Mints identifiers from a persistent counter.
///
/// Allocation is a compare-and-swap loop against the store: a caller that
/// loses the race re-reads the counter and tries again, so every successful
/// call observes and publishes a distinct state.
#[derive(Clone)]
pub struct SequenceAllocator {
    store: SharedStore,
}

impl SequenceAllocator {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn allocate_next(&self, counter_name: &str) -> LendingResult<String> {
        let mut attempts: u32 = 0;
        loop {
            let current = self.store.load_counter(counter_name).await?;
            let next = successor(counter_name, current.as_ref())?;
            if self.store.swap_counter(current.as_ref(), &next).await? {
                if attempts > 0 {
                    tracing::debug!(counter = counter_name, attempts, "counter swap contended");
                }
                if next.number == 0 {
                    tracing::info!(counter = counter_name, prefix = %next.prefix, "counter rolled over");
                }
                return Ok(format_copy_id(&next));
            }
            attempts += 1;
        }
    }

    /// `count` consecutive allocations; stops at the first failure.
    pub async fn allocate_many(&self, counter_name: &str, count: usize) -> LendingResult<Vec<String>> {
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            ids.push(self.allocate_next(counter_name).await?);
        }
        Ok(ids)
    }
}
