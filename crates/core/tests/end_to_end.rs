//! End-to-end scenarios exercising the public `graphdb_core` API the way a
//! single connection's command dispatch would: hierarchy + modify + query +
//! subscriptions wired together against one `Hierarchy`/`AliasTable`/
//! `SubscriptionRegistry`, with no wire protocol involved.
use graphdb_core::alias::AliasTable;
use graphdb_core::hierarchy::{Hierarchy, RootPolicy};
use graphdb_core::id::NodeId;
use graphdb_core::index::IndexRegistry;
use graphdb_core::modify::{self, ModifyFlags, ModifyOutcome, Role, Triplet, TripletOp, ALIAS_FIELD};
use graphdb_core::query::{self, FieldsSpec, FindRequest, MergeSpec, MergeStrategy, OrderDirection, OrderSpec};
use graphdb_core::rpn;
use graphdb_core::sub::{DeferredEvents, MarkerKind, SubscriptionId, SubscriptionRegistry};
use graphdb_core::val::{ReplyValue, Value};
use graphdb_core::hierarchy::TraverseMode;

fn id(s: &str) -> NodeId {
	NodeId::parse(s.as_bytes()).unwrap()
}

/// A throwaway harness bundling the four pieces of state one connection's
/// `Engine` would hold, so each scenario reads like the sequence of
/// commands a client actually issued.
struct Harness {
	hierarchy: Hierarchy,
	aliases: AliasTable,
	subs: SubscriptionRegistry,
	deferred: DeferredEvents,
	index: IndexRegistry,
}

impl Harness {
	fn new() -> Self {
		Self {
			hierarchy: Hierarchy::new(),
			aliases: AliasTable::new(),
			subs: SubscriptionRegistry::new(),
			deferred: DeferredEvents::new(),
			index: IndexRegistry::new(),
		}
	}

	fn modify(&mut self, key: NodeId, flags: &str, triplets: Vec<Triplet>) -> ModifyOutcome {
		modify::modify(
			&mut self.hierarchy,
			&mut self.aliases,
			&self.subs,
			&mut self.deferred,
			key,
			ModifyFlags::parse(flags).unwrap(),
			triplets,
			Role::Primary,
			1_700_000_000_000,
		)
		.unwrap()
	}

	fn find(&mut self, request: &FindRequest) -> Vec<ReplyValue> {
		let mut out = Vec::new();
		query::find(&mut self.hierarchy, &mut self.index, request, &mut out).unwrap();
		out
	}
}

fn applied(outcome: ModifyOutcome) -> modify::ModifyResult {
	match outcome {
		ModifyOutcome::Applied(r) => r,
		ModifyOutcome::Gated => panic!("expected the modify to apply, not gate"),
	}
}

/// Scenario 1: create a node with no triplets, link a child under it, and
/// confirm both directions of the parent/child relation plus `heads`.
#[test]
fn scenario_create_and_hierarchy() {
	let mut h = Harness::new();

	// No `N` flag: `modify` defaults the new node's missing-parent case to
	// [ROOT] (§4.3), so K1 itself never becomes a head.
	applied(h.modify(id("k1"), "", vec![]));
	h.hierarchy.add(id("k2"), &[id("k1")], &[], RootPolicy::NoRoot).unwrap();

	let children: Vec<NodeId> = h.hierarchy.get(&id("k1")).unwrap().children().copied().collect();
	assert_eq!(children, vec![id("k2")]);
	let parents: Vec<NodeId> = h.hierarchy.get(&id("k2")).unwrap().parents().copied().collect();
	assert_eq!(parents, vec![id("k1")]);

	let heads: Vec<NodeId> = h.hierarchy.get_heads().copied().collect();
	assert!(heads.iter().any(|n| n.is_root()));
	assert!(!heads.contains(&id("k1")));
	assert!(!heads.contains(&id("k2")));
}

/// Scenario 2: a `modify` carrying `$alias` candidates where one already
/// resolves to an existing node redirects to that node and binds only the
/// still-unbound alias, rather than overwriting the existing one.
#[test]
fn scenario_alias_override() {
	let mut h = Harness::new();
	h.hierarchy.add(id("n42"), &[], &[], RootPolicy::NoRoot).unwrap();
	h.aliases.bind("a1", id("n42"));

	let result = applied(h.modify(
		id("new"),
		"",
		vec![Triplet::new(ALIAS_FIELD, TripletOp::StringArray(vec!["a1".into(), "a2".into()]))],
	));

	assert_eq!(result.node, id("n42"));
	assert_eq!(h.aliases.resolve("a1"), Some(id("n42")));
	assert_eq!(h.aliases.resolve("a2"), Some(id("n42")));
	assert!(!h.hierarchy.contains(&id("new")));

	// "aliases" holds exactly the newly-bound alias, not a re-added "a1".
	use graphdb_core::val::SetElement;
	let exists_a2 = h
		.hierarchy
		.get_mut(&id("n42"))
		.unwrap()
		.object
		.set_remove("aliases", &SetElement::String("a2".into()))
		.unwrap();
	assert!(exists_a2);
	let exists_a1_twice = h
		.hierarchy
		.get_mut(&id("n42"))
		.unwrap()
		.object
		.set_remove("aliases", &SetElement::String("a1".into()))
		.unwrap();
	assert!(!exists_a1_twice, "a1 was never re-added to the set by this modify");
}

/// Scenario 3: BFS over K's descendants, filtered by an RPN expression,
/// ordered ascending by a numeric field, and capped with `limit`.
#[test]
fn scenario_find_with_filter_and_order() {
	let mut h = Harness::new();
	h.hierarchy.add(id("k"), &[], &[], RootPolicy::NoRoot).unwrap();
	h.hierarchy.add(id("n1"), &[id("k")], &[], RootPolicy::NoRoot).unwrap();
	h.hierarchy.add(id("n2"), &[id("k")], &[], RootPolicy::NoRoot).unwrap();
	h.hierarchy.add(id("n3"), &[id("k")], &[], RootPolicy::NoRoot).unwrap();
	h.hierarchy.get_mut(&id("n1")).unwrap().object.set("score", Value::Double(3.0)).unwrap();
	h.hierarchy.get_mut(&id("n2")).unwrap().object.set("score", Value::Double(1.0)).unwrap();
	h.hierarchy.get_mut(&id("n3")).unwrap().object.set("score", Value::Double(2.0)).unwrap();

	let request = FindRequest {
		mode: TraverseMode::BfsDescendants,
		seeds: vec![id("k")],
		filter: Some(rpn::compile(r#""score" field 0 >"#).unwrap()),
		order: Some(OrderSpec { field: "score".into(), direction: OrderDirection::Asc }),
		offset: 0,
		limit: 2,
		fields: FieldsSpec::NodeIdOnly,
		..Default::default()
	};
	let out = h.find(&request);
	assert_eq!(out, vec![ReplyValue::String(None, "n2".into()), ReplyValue::String(None, "n3".into())]);
}

/// Scenario 4: two seeds each carrying a distinct nested field under the
/// same top-level `stats` key; `merge deep stats` flattens both children's
/// fields into `[nodeId, path, value]` triples rather than returning one
/// reply entry per node.
#[test]
fn scenario_merge_deep_flattens_both_seeds_fields() {
	let mut h = Harness::new();
	h.hierarchy.add(id("seed1"), &[], &[], RootPolicy::NoRoot).unwrap();
	h.hierarchy.add(id("seed2"), &[], &[], RootPolicy::NoRoot).unwrap();
	h.hierarchy.get_mut(&id("seed1")).unwrap().object.set("stats.x", Value::Long(1)).unwrap();
	h.hierarchy.get_mut(&id("seed2")).unwrap().object.set("stats.y", Value::Long(2)).unwrap();
	h.hierarchy.add(id("root"), &[], &[id("seed1"), id("seed2")], RootPolicy::NoRoot).unwrap();

	let request = FindRequest {
		mode: TraverseMode::Children,
		seeds: vec![id("root")],
		merge: Some(MergeSpec { strategy: MergeStrategy::Deep, path: "stats".to_string() }),
		..Default::default()
	};
	let out = h.find(&request);

	// The `Vec<ReplyValue>` sink used by tests doesn't represent array
	// nesting (its `write_array_start`/`write_array_end` are no-ops, see
	// `val::reply`'s tests), so the two `[nodeId, path, value]` triples
	// appear back to back rather than as nested arrays.
	assert_eq!(
		out,
		vec![
			ReplyValue::String(None, "seed1".into()),
			ReplyValue::String(None, "stats.x".into()),
			ReplyValue::Long(1),
			ReplyValue::String(None, "seed2".into()),
			ReplyValue::String(None, "stats.y".into()),
			ReplyValue::Long(2),
		]
	);
}

/// Scenario 5: a descendants marker fires exactly once when a field
/// actually changes, and produces nothing on a repeat with the same value.
#[test]
fn scenario_subscription_trigger_on_descendant_update() {
	let mut h = Harness::new();
	h.hierarchy.add(id("k"), &[], &[], RootPolicy::NoRoot).unwrap();
	h.hierarchy.add(id("child"), &[id("k")], &[], RootPolicy::NoRoot).unwrap();
	h.subs.register(SubscriptionId([9; 32]), id("k"), MarkerKind::Descendants);

	applied(h.modify(id("child"), "", vec![Triplet::new("title", TripletOp::SetString("hello".into()))]));
	let dispatched = h.deferred.dispatch_deferred();
	assert_eq!(dispatched.len(), 1);
	assert_eq!(dispatched[0].subscription, SubscriptionId([9; 32]));

	applied(h.modify(id("child"), "", vec![Triplet::new("title", TripletOp::SetString("hello".into()))]));
	let dispatched_again = h.deferred.dispatch_deferred();
	assert!(dispatched_again.is_empty(), "repeating an identical set must not re-fire the marker");
}

/// Scenario 6: deleting the root of `A -> B -> C`, `B -> D` cascades to
/// every single-parented descendant, leaving `heads` untouched apart from
/// the removal of `A` itself.
#[test]
fn scenario_cascade_delete() {
	let mut h = Harness::new();
	h.hierarchy.add(id("a"), &[], &[], RootPolicy::NoRoot).unwrap();
	h.hierarchy.add(id("b"), &[id("a")], &[], RootPolicy::NoRoot).unwrap();
	h.hierarchy.add(id("c"), &[id("b")], &[], RootPolicy::NoRoot).unwrap();
	h.hierarchy.add(id("d"), &[id("b")], &[], RootPolicy::NoRoot).unwrap();

	let heads_before: Vec<NodeId> = h.hierarchy.get_heads().copied().collect();
	assert!(heads_before.contains(&id("a")));

	h.hierarchy.del_node(id("a")).unwrap();

	for n in ["a", "b", "c", "d"] {
		assert!(!h.hierarchy.contains(&id(n)), "{n} should have been cascaded away");
	}
	let heads_after: Vec<NodeId> = h.hierarchy.get_heads().copied().collect();
	assert!(!heads_after.contains(&id("a")));
	for n in heads_before {
		if n != id("a") {
			assert!(heads_after.contains(&n));
		}
	}
}
