//! The in-process database state one connection's command dispatch runs
//! against (§5: wrapped in a single `tokio::sync::Mutex` by the caller,
//! never accessed from two tasks at once).
use std::sync::Arc;

use graphdb_core::alias::AliasTable;
use graphdb_core::hierarchy::Hierarchy;
use graphdb_core::index::IndexRegistry;
use graphdb_core::snapshot::ReplicationSink;
use graphdb_core::sub::{DeferredEvents, SubscriptionRegistry};
use graphdb_core::Error;

pub struct Engine {
	pub hierarchy: Hierarchy,
	pub aliases: AliasTable,
	pub subs: SubscriptionRegistry,
	pub deferred: DeferredEvents,
	pub index: IndexRegistry,
	pub replication: Arc<dyn ReplicationSink>,
}

impl Engine {
	pub fn new(replication: Arc<dyn ReplicationSink>) -> Self {
		Self {
			hierarchy: Hierarchy::new(),
			aliases: AliasTable::new(),
			subs: SubscriptionRegistry::new(),
			deferred: DeferredEvents::new(),
			index: IndexRegistry::new(),
			replication,
		}
	}

	/// Restores hierarchy state from a snapshot (§4.11); alias/subscription
	/// state is never persisted (it is recomputed/re-registered by clients
	/// after a restart), matching the "durably restore all user-visible
	/// [node] state" contract in §1's out-of-scope note.
	pub fn from_snapshot(bytes: &[u8], replication: Arc<dyn ReplicationSink>) -> Result<Self, Error> {
		let hierarchy = graphdb_core::snapshot::load(bytes)?;
		Ok(Self {
			hierarchy,
			aliases: AliasTable::new(),
			subs: SubscriptionRegistry::new(),
			deferred: DeferredEvents::new(),
			index: IndexRegistry::new(),
			replication,
		})
	}

	pub fn save_snapshot(&self) -> Result<Vec<u8>, Error> {
		graphdb_core::snapshot::save(&self.hierarchy)
	}
}
