//! Traversal transaction labels (C2, §4.2).
//!
//! Repeated traversals over the same hierarchy need to mark "visited in this
//! traversal" without a bulk-clear pass over every node between traversals.
//! We allocate one bit ("lane") per concurrently in-flight traversal out of a
//! machine-word bitmap; a node's label records which generation and which
//! lanes have touched it. When every lane that was live in a generation has
//! ended, the generation rolls over and the bitmaps reset for free.
use crate::cnf::TRAVERSAL_LANE_WIDTH;
use crate::err::Error;

pub type Lanes = u64;

/// Per-hierarchy visitation state.
#[derive(Debug, Default)]
pub struct TrxState {
	id: u64,
	cl: Lanes,
	ex: Lanes,
}

/// A single in-flight traversal's lane handle.
#[derive(Debug, Clone, Copy)]
pub struct Trx {
	id: u64,
	lane: Lanes,
}

/// Per-node visitation label.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrxLabel {
	id: u64,
	cl: Lanes,
}

impl TrxState {
	pub fn new() -> Self {
		Self::default()
	}

	/// Allocates the lowest unset lane bit. Fails once the configured lane
	/// width is exhausted (§8: "Traversal color lanes exhausted").
	pub fn begin(&mut self) -> Result<Trx, Error> {
		let width = *TRAVERSAL_LANE_WIDTH;
		let free = self.cl.trailing_ones();
		if free >= width || free >= Lanes::BITS {
			return Err(Error::TraversalLanesExhausted);
		}
		let lane: Lanes = 1 << free;
		self.cl |= lane;
		Ok(Trx {
			id: self.id,
			lane,
		})
	}

	/// Ends a traversal, recording its lane as exited. Once every lane that
	/// was allocated in this generation has exited, the generation rolls
	/// over and both bitmaps reset — no per-node clearing is ever needed.
	pub fn end(&mut self, trx: Trx) {
		if trx.id != self.id {
			// The generation already rolled over past this traversal; its
			// lane bit no longer means anything.
			return;
		}
		self.ex |= trx.lane;
		if self.ex == self.cl {
			self.id = self.id.wrapping_add(1);
			self.cl = 0;
			self.ex = 0;
		}
	}

	/// Marks `label` visited under `trx`, returning `true` if this is the
	/// first time it has been visited in this traversal.
	pub fn visit(&self, trx: Trx, label: &mut TrxLabel) -> bool {
		if label.id != trx.id {
			label.id = trx.id;
			label.cl = trx.lane;
			true
		} else if label.cl & trx.lane == 0 {
			label.cl |= trx.lane;
			true
		} else {
			false
		}
	}

	pub fn has_visited(&self, trx: Trx, label: &TrxLabel) -> bool {
		label.id == trx.id && (label.cl & trx.lane) == trx.lane
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn first_visit_marks_and_reports_true() {
		let mut state = TrxState::new();
		let trx = state.begin().unwrap();
		let mut label = TrxLabel::default();
		assert!(state.visit(trx, &mut label));
		assert!(!state.visit(trx, &mut label));
		assert!(state.has_visited(trx, &label));
	}

	#[test]
	fn stale_generation_label_is_revisited() {
		let mut state = TrxState::new();
		let trx1 = state.begin().unwrap();
		let mut label = TrxLabel::default();
		assert!(state.visit(trx1, &mut label));
		state.end(trx1);

		let trx2 = state.begin().unwrap();
		// New generation: even though the bit pattern may coincide, the
		// generation id differs, so the node is revisited.
		assert!(state.visit(trx2, &mut label));
	}

	#[test]
	fn concurrent_lanes_are_independent() {
		let mut state = TrxState::new();
		let trx1 = state.begin().unwrap();
		let trx2 = state.begin().unwrap();
		let mut label = TrxLabel::default();
		assert!(state.visit(trx1, &mut label));
		// Same generation, different lane: still a first visit for trx2.
		assert!(state.visit(trx2, &mut label));
		assert!(!state.visit(trx1, &mut label));
	}

	#[test]
	fn generation_rolls_over_once_all_lanes_exit() {
		let mut state = TrxState::new();
		let trx1 = state.begin().unwrap();
		let trx2 = state.begin().unwrap();
		state.end(trx1);
		assert_eq!(state.cl, trx2.lane);
		state.end(trx2);
		assert_eq!(state.cl, 0);
		assert_eq!(state.ex, 0);
	}

	#[test]
	fn lane_exhaustion_is_an_error() {
		let mut state = TrxState::new();
		let mut held = Vec::new();
		for _ in 0..*TRAVERSAL_LANE_WIDTH {
			held.push(state.begin().unwrap());
		}
		assert!(matches!(state.begin(), Err(Error::TraversalLanesExhausted)));
	}
}
