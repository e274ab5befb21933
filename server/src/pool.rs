//! Fixed-capacity connection pool (§5, §5.1): slot claims go through an
//! atomic compare-exchange bitmap rather than a mutex, so a future
//! multi-threaded dispatch path can claim slots without blocking on the
//! engine lock.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const BITS_PER_WORD: usize = 64;
const FREE_CONN_RETRY_BACKOFF: Duration = Duration::from_secs(15);
const FREE_CONN_RETRY_BUDGET: u32 = 4;

/// A fixed-size bitmap of claimed/free connection slots, one bit per slot.
pub struct ConnPool {
	bits: Vec<AtomicU64>,
	capacity: usize,
}

impl ConnPool {
	pub fn new(capacity: usize) -> Self {
		let words = capacity.div_ceil(BITS_PER_WORD).max(1);
		Self { bits: (0..words).map(|_| AtomicU64::new(0)).collect(), capacity }
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	/// Attempts to claim one free slot, returning its index. Scans the
	/// bitmap word-by-word, retrying the compare-exchange on contention from
	/// another claimant racing the same word.
	pub fn try_claim(&self) -> Option<usize> {
		for (word_idx, word) in self.bits.iter().enumerate() {
			let mut current = word.load(Ordering::Acquire);
			loop {
				let free_bit = (!current).trailing_zeros() as usize;
				let slot = word_idx * BITS_PER_WORD + free_bit;
				if free_bit >= BITS_PER_WORD || slot >= self.capacity {
					break;
				}
				let desired = current | (1u64 << free_bit);
				match word.compare_exchange_weak(current, desired, Ordering::AcqRel, Ordering::Acquire) {
					Ok(_) => return Some(slot),
					Err(observed) => current = observed,
				}
			}
		}
		None
	}

	pub fn release(&self, slot: usize) {
		let word_idx = slot / BITS_PER_WORD;
		let bit = slot % BITS_PER_WORD;
		self.bits[word_idx].fetch_and(!(1u64 << bit), Ordering::AcqRel);
	}

	/// Waits for a free slot with the fixed 15-second backoff from §5.1,
	/// giving up after a bounded number of retries rather than blocking
	/// forever on a pool that never frees up.
	pub async fn claim_with_retry(&self) -> Option<usize> {
		if let Some(slot) = self.try_claim() {
			return Some(slot);
		}
		for attempt in 1..=FREE_CONN_RETRY_BUDGET {
			tokio::time::sleep(FREE_CONN_RETRY_BACKOFF).await;
			if let Some(slot) = self.try_claim() {
				return Some(slot);
			}
			warn!(attempt, budget = FREE_CONN_RETRY_BUDGET, "still no free connection slot");
		}
		warn!("connection pool retry budget exhausted, rejecting new connection");
		None
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn claims_are_distinct_until_capacity_is_exhausted() {
		let pool = ConnPool::new(3);
		let a = pool.try_claim().unwrap();
		let b = pool.try_claim().unwrap();
		let c = pool.try_claim().unwrap();
		assert_ne!(a, b);
		assert_ne!(b, c);
		assert!(pool.try_claim().is_none());
	}

	#[test]
	fn releasing_a_slot_makes_it_claimable_again() {
		let pool = ConnPool::new(1);
		let slot = pool.try_claim().unwrap();
		assert!(pool.try_claim().is_none());
		pool.release(slot);
		assert_eq!(pool.try_claim(), Some(slot));
	}
}
