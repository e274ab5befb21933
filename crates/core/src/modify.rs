//! The modify executor (C10, §4.6): applies an atomic list of typed
//! operation triplets to one node, producing a per-triplet reply and a
//! replication bitmap, with `$alias` resolution folded in as a
//! preprocessing step.
use crate::alias::AliasTable;
use crate::err::Error;
use crate::hierarchy::{Hierarchy, Node, RootPolicy};
use crate::id::NodeId;
use crate::sub::{DeferredEvents, SubscriptionRegistry, TriggerKind};
use crate::val::{SetElement, SetOutcome, TypedObject, Value, ValueArray, ValueSet};

/// The reserved triplet field name carrying `$alias` candidates (§4.6 step
/// 2); stripped out of `triplets` before dispatch regardless of outcome.
pub const ALIAS_FIELD: &str = "$alias";
const ALIASES_SET_FIELD: &str = "aliases";

/// `N`/`M`/`C`/`U` from §4.6.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct ModifyFlags {
	pub no_root: bool,
	pub clear_existing: bool,
	pub fail_if_exists: bool,
	pub fail_if_missing: bool,
}

impl ModifyFlags {
	pub fn parse(raw: &str) -> Result<Self, Error> {
		let mut flags = Self::default();
		for ch in raw.chars() {
			match ch {
				'N' => flags.no_root = true,
				'M' => flags.clear_existing = true,
				'C' => flags.fail_if_exists = true,
				'U' => flags.fail_if_missing = true,
				other => return Err(Error::InvalidArgument(format!("unknown modify flag '{other}'"))),
			}
		}
		Ok(flags)
	}
}

/// The sub-operation carried by an edge-meta-op triplet's value: `(dst, op,
/// meta_field, meta_value)` from §4.6's type code table, with `meta_value`
/// folded into `Set` since `Del` never carries one.
#[derive(Debug)]
pub enum EdgeMetaWrite {
	Set(Value),
	Del,
}

/// One triplet's operation, already parsed out of its wire `value_blob` by
/// the caller (the server's TLV decoder, §6) into the shape each op needs.
///
/// Not `Clone`: several variants carry a `Value`, which is deliberately not
/// `Clone` itself (a pointer-tagged `Value` owns a single-destructor handle
/// via `PointerSlot`). `modify()` consumes `Vec<Triplet>` by value instead
/// of cloning it.
#[derive(Debug)]
pub enum TripletOp {
	SetString(String),
	SetStringDefault(String),
	SetDouble(f64),
	SetDoubleDefault(f64),
	SetLong(i64),
	SetLongDefault(i64),
	IncrementLong { default: i64, delta: i64 },
	IncrementDouble { default: f64, delta: f64 },
	SetOp {
		adds: Vec<SetElement>,
		deletes: Vec<SetElement>,
		replaces: Vec<SetElement>,
	},
	DelField,
	UserMetaSet(u32),
	ArrayPush(Value),
	ArrayInsertAt(usize, Value),
	ArrayRemoveAt(usize),
	/// A plain string-array field write. The `$alias` triplet also carries
	/// this variant but is consumed during preprocessing and never reaches
	/// [`apply_triplet`].
	StringArray(Vec<String>),
	EdgeMetaOp {
		dst: NodeId,
		meta_field: String,
		write: EdgeMetaWrite,
	},
}

#[derive(Debug)]
pub struct Triplet {
	pub field: String,
	pub op: TripletOp,
}

impl Triplet {
	pub fn new(field: impl Into<String>, op: TripletOp) -> Self {
		Self { field: field.into(), op }
	}
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum ReplState {
	Unchanged,
	Updated,
	Replicate,
}

fn state_of(outcome: SetOutcome) -> ReplState {
	match outcome {
		SetOutcome::Set => ReplState::Updated,
		SetOutcome::AlreadyExists => ReplState::Unchanged,
	}
}

fn state_of_bool(changed: bool) -> ReplState {
	if changed {
		ReplState::Updated
	} else {
		ReplState::Unchanged
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum TripletReply {
	Ok,
	Updated,
	Error(String),
}

fn reply_for(state: ReplState) -> TripletReply {
	match state {
		ReplState::Unchanged => TripletReply::Ok,
		ReplState::Updated | ReplState::Replicate => TripletReply::Updated,
	}
}

/// Whether this invocation is the authoritative source for the mutation
/// (§4.6 step 10) or a replica replaying an already-stamped command.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Role {
	Primary,
	Replica,
}

pub enum ModifyOutcome {
	/// `C`/`U` gating rejected the command outright (§4.6 step 3).
	Gated,
	Applied(ModifyResult),
}

pub struct ModifyResult {
	pub node: NodeId,
	pub created: bool,
	pub triplet_replies: Vec<TripletReply>,
	/// Parallel to `triplet_replies` and `field_names`; true iff that
	/// triplet's `repl_state` was `updated` or `replicate` (§4.6 step 7).
	pub replication_bitmap: Vec<bool>,
	/// Parallel to `triplet_replies`/`replication_bitmap`: the field each
	/// triplet targeted. The caller re-reads the post-mutation value out of
	/// `hierarchy` for any index marked in `replication_bitmap` rather than
	/// carrying a `Value` here, since `Value` is deliberately not `Clone`
	/// (see [`crate::snapshot::build_replication_command`]).
	pub field_names: Vec<String>,
	/// Present only when `role` was [`Role::Primary`]: the synthetic
	/// `createdAt`/`updatedAt` field name(s) stamped in step 10, to ship
	/// alongside the marked triplets via `replicate()`.
	pub synthetic_replication_fields: Vec<String>,
}

/// Applies one modify command to `hierarchy` (§4.6). Per-triplet errors are
/// caught and reported inline in `triplet_replies`; they never abort the
/// remaining triplets (§7 propagation rule). `now_ms` is the caller's
/// wall-clock reading, threaded in rather than read from `SystemTime` here
/// so the executor stays deterministic and unit-testable.
pub fn modify(
	hierarchy: &mut Hierarchy,
	aliases: &mut AliasTable,
	subs: &SubscriptionRegistry,
	deferred: &mut DeferredEvents,
	key: NodeId,
	flags: ModifyFlags,
	mut triplets: Vec<Triplet>,
	role: Role,
	now_ms: i64,
) -> Result<ModifyOutcome, Error> {
	let mut key = key;

	// Step 2: resolve $alias before anything else observes hierarchy state.
	// Every candidate is bound to the resolved node at step 8 below, not
	// only the unmatched ones: a match only overrides the candidate
	// NodeId, it does not drop the other aliases in the same list (§8
	// scenario 2: a pre-existing alias redirects `key`, and the still-
	// unbound alias in the same `$alias` list is added to that node).
	let mut pending_aliases: Vec<String> = Vec::new();
	if let Some(pos) = triplets.iter().position(|t| t.field == ALIAS_FIELD) {
		let Triplet { op, .. } = triplets.remove(pos);
		if let TripletOp::StringArray(candidates) = op {
			if let Some(existing) = aliases.resolve_first_existing(candidates.iter().map(String::as_str)) {
				key = existing;
			}
			pending_aliases = candidates;
		}
	}

	let existed = hierarchy.contains(&key);

	// Step 3: C/U gating.
	if existed && flags.fail_if_exists {
		return Ok(ModifyOutcome::Gated);
	}
	if !existed && flags.fail_if_missing {
		return Ok(ModifyOutcome::Gated);
	}

	// Step 4: ensure the node exists; a no-op on an existing node.
	let root_policy = if flags.no_root { RootPolicy::NoRoot } else { RootPolicy::DefaultToRoot };
	hierarchy.add(key, &[], &[], root_policy)?;
	let created = !existed;

	// Subscriptions are prechecked once the node's links are settled but
	// before any field mutation (§4.9 step 1).
	let matched = subs.precheck(hierarchy, key);

	let node = hierarchy.get_mut(&key).expect("just ensured by add() above");

	// Step 5: M clears all existing fields of a pre-existing node.
	if flags.clear_existing && existed {
		node.object = TypedObject::new();
	}

	// Steps 6-7: dispatch each triplet, building the reply + bitmap.
	let mut triplet_replies = Vec::with_capacity(triplets.len());
	let mut replication_bitmap = Vec::with_capacity(triplets.len());
	let mut field_names = Vec::with_capacity(triplets.len());
	let mut any_mutation = false;
	for triplet in triplets.drain(..) {
		let field_name = triplet.field.clone();
		let (reply, state) = match apply_triplet(node, triplet) {
			Ok(outcome) => outcome,
			Err(e) => (TripletReply::Error(e.to_string()), ReplState::Unchanged),
		};
		if state != ReplState::Unchanged {
			any_mutation = true;
			if field_name != "parents" && field_name != "children" {
				deferred.defer_field_change_events(&matched, &field_name);
			}
		}
		replication_bitmap.push(state != ReplState::Unchanged);
		triplet_replies.push(reply);
		field_names.push(field_name);
	}

	// Step 8: leftover aliases bind to this node and join its `aliases` set.
	for alias in &pending_aliases {
		aliases.bind(alias.clone(), key);
		node.object.set_add(ALIASES_SET_FIELD, SetElement::String(alias.clone()))?;
		any_mutation = true;
	}

	// Step 9: fire the created/updated trigger, but only when something
	// actually changed — an `updated` trigger on a no-op replay would let a
	// subscriber observe a mutation that never happened (§8 "applying the
	// same modify twice" idempotence property extends to triggers too).
	if created || any_mutation {
		deferred.defer_trigger_events(&matched, key, if created { TriggerKind::Created } else { TriggerKind::Updated });
	}

	// Step 10: stamp timestamps only when acting as the authoritative source.
	let mut synthetic_replication_fields = Vec::new();
	if role == Role::Primary {
		if created {
			node.object.set_default("createdAt", Value::Long(now_ms))?;
			synthetic_replication_fields.push("createdAt".to_string());
		}
		node.object.set("updatedAt", Value::Long(now_ms))?;
		synthetic_replication_fields.push("updatedAt".to_string());
	}

	Ok(ModifyOutcome::Applied(ModifyResult {
		node: key,
		created,
		triplet_replies,
		replication_bitmap,
		field_names,
		synthetic_replication_fields,
	}))
}

/// Dispatches one triplet against `node`'s object (and, for edge-meta-op,
/// its edge store). A del-field/edge-meta-del against an already-absent
/// field is `Unchanged` rather than an error, matching the idempotence
/// property in §8 ("applying the same modify twice ... yields OK").
fn apply_triplet(node: &mut Node, triplet: Triplet) -> Result<(TripletReply, ReplState), Error> {
	let Triplet { field, op } = triplet;
	let state = match op {
		TripletOp::SetString(s) => state_of(node.object.update(&field, Value::from_string(s))?),
		TripletOp::SetStringDefault(s) => state_of(node.object.set_default(&field, Value::from_string(s))?),
		TripletOp::SetDouble(v) => state_of(node.object.update(&field, Value::Double(v))?),
		TripletOp::SetDoubleDefault(v) => state_of(node.object.set_default(&field, Value::Double(v))?),
		TripletOp::SetLong(v) => state_of(node.object.update(&field, Value::Long(v))?),
		TripletOp::SetLongDefault(v) => state_of(node.object.set_default(&field, Value::Long(v))?),
		TripletOp::IncrementLong { default, delta } => {
			node.object.increment_long(&field, default, delta)?;
			ReplState::Replicate
		}
		TripletOp::IncrementDouble { default, delta } => {
			node.object.increment_double(&field, default, delta)?;
			ReplState::Replicate
		}
		TripletOp::SetOp { adds, deletes, replaces } => {
			let mut changed = false;
			if !replaces.is_empty() {
				let mut set = ValueSet::new();
				for e in replaces {
					set.insert(e)?;
				}
				node.object.set(&field, Value::Set(set))?;
				changed = true;
			} else {
				for e in adds {
					node.object.set_add(&field, e)?;
					changed = true;
				}
				for e in deletes {
					if node.object.set_remove(&field, &e)? {
						changed = true;
					}
				}
			}
			state_of_bool(changed)
		}
		TripletOp::DelField => match node.object.del(&field) {
			Ok(()) => ReplState::Updated,
			Err(Error::FieldNotFound(_)) => ReplState::Unchanged,
			Err(e) => return Err(e),
		},
		TripletOp::UserMetaSet(meta) => {
			node.object.user_meta_set(&field, meta)?;
			ReplState::Updated
		}
		TripletOp::ArrayPush(value) => {
			node.object.with_array_mut(&field, |arr| arr.append(value))??;
			ReplState::Updated
		}
		TripletOp::ArrayInsertAt(index, value) => {
			node.object.with_array_mut(&field, |arr| arr.insert_at(index, value))??;
			ReplState::Updated
		}
		TripletOp::ArrayRemoveAt(index) => {
			node.object.with_array_mut(&field, |arr: &mut ValueArray| arr.remove_at(index))??;
			ReplState::Updated
		}
		TripletOp::StringArray(values) => {
			let mut arr = ValueArray::new();
			for v in values {
				arr.append(Value::from_string(v))?;
			}
			state_of(node.object.update(&field, Value::Array(arr))?)
		}
		TripletOp::EdgeMetaOp { dst, meta_field, write } => {
			let meta = node.edges.get_edge_metadata(&field, dst, true)?;
			match write {
				EdgeMetaWrite::Set(value) => state_of(meta.update(&meta_field, value)?),
				EdgeMetaWrite::Del => match meta.del(&meta_field) {
					Ok(()) => ReplState::Updated,
					Err(Error::FieldNotFound(_)) => ReplState::Unchanged,
					Err(e) => return Err(e),
				},
			}
		}
	};
	Ok((reply_for(state), state))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::hierarchy::edge::{EdgeConstraint, EdgeDirection, OnDelete};
	use crate::sub::MarkerKind;

	fn id(s: &str) -> NodeId {
		NodeId::parse(s.as_bytes()).unwrap()
	}

	fn run(hierarchy: &mut Hierarchy, key: NodeId, flags: &str, triplets: Vec<Triplet>) -> ModifyOutcome {
		let mut aliases = AliasTable::new();
		let subs = SubscriptionRegistry::new();
		let mut deferred = DeferredEvents::new();
		modify(hierarchy, &mut aliases, &subs, &mut deferred, key, ModifyFlags::parse(flags).unwrap(), triplets, Role::Primary, 1_000).unwrap()
	}

	#[test]
	fn creates_node_and_reports_updated_for_a_new_field() {
		let mut h = Hierarchy::new();
		let outcome = run(&mut h, id("a"), "", vec![Triplet::new("title", TripletOp::SetString("hello".into()))]);
		match outcome {
			ModifyOutcome::Applied(r) => {
				assert!(r.created);
				assert_eq!(r.triplet_replies, vec![TripletReply::Updated]);
				assert_eq!(r.replication_bitmap, vec![true]);
			}
			ModifyOutcome::Gated => panic!("should not gate"),
		}
		assert_eq!(h.get(&id("a")).unwrap().object.get_string("title").unwrap(), "hello");
	}

	#[test]
	fn repeated_identical_set_reports_ok_not_updated() {
		let mut h = Hierarchy::new();
		run(&mut h, id("a"), "", vec![Triplet::new("title", TripletOp::SetString("hello".into()))]);
		let outcome = run(&mut h, id("a"), "", vec![Triplet::new("title", TripletOp::SetString("hello".into()))]);
		match outcome {
			ModifyOutcome::Applied(r) => {
				assert_eq!(r.triplet_replies, vec![TripletReply::Ok]);
				assert_eq!(r.replication_bitmap, vec![false]);
			}
			ModifyOutcome::Gated => panic!("should not gate"),
		}
	}

	#[test]
	fn default_setter_does_not_overwrite_existing_value() {
		let mut h = Hierarchy::new();
		run(&mut h, id("a"), "", vec![Triplet::new("title", TripletOp::SetString("first".into()))]);
		run(&mut h, id("a"), "", vec![Triplet::new("title", TripletOp::SetStringDefault("second".into()))]);
		assert_eq!(h.get(&id("a")).unwrap().object.get_string("title").unwrap(), "first");
	}

	#[test]
	fn c_flag_gates_on_existing_node() {
		let mut h = Hierarchy::new();
		run(&mut h, id("a"), "", vec![]);
		let outcome = run(&mut h, id("a"), "C", vec![]);
		assert!(matches!(outcome, ModifyOutcome::Gated));
	}

	#[test]
	fn u_flag_gates_on_missing_node() {
		let mut h = Hierarchy::new();
		let outcome = run(&mut h, id("missing"), "U", vec![]);
		assert!(matches!(outcome, ModifyOutcome::Gated));
	}

	#[test]
	fn m_flag_clears_fields_not_reassigned() {
		let mut h = Hierarchy::new();
		run(&mut h, id("a"), "", vec![Triplet::new("keep", TripletOp::SetString("x".into())), Triplet::new("drop", TripletOp::SetString("y".into()))]);
		run(&mut h, id("a"), "M", vec![Triplet::new("keep", TripletOp::SetString("x".into()))]);
		let obj = &h.get(&id("a")).unwrap().object;
		assert!(obj.exists("keep").unwrap());
		assert!(!obj.exists("drop").unwrap());
	}

	#[test]
	fn increment_always_reports_updated_and_replicates() {
		let mut h = Hierarchy::new();
		let outcome = run(&mut h, id("a"), "", vec![Triplet::new("views", TripletOp::IncrementLong { default: 0, delta: 1 })]);
		match outcome {
			ModifyOutcome::Applied(r) => {
				assert_eq!(r.triplet_replies, vec![TripletReply::Updated]);
				assert_eq!(r.replication_bitmap, vec![true]);
			}
			ModifyOutcome::Gated => panic!("should not gate"),
		}
		assert_eq!(h.get(&id("a")).unwrap().object.get_long("views").unwrap(), 1);
	}

	#[test]
	fn alias_override_redirects_to_existing_node_and_adds_remaining_alias() {
		let mut h = Hierarchy::new();
		let mut aliases = AliasTable::new();
		aliases.bind("a1", id("n42"));
		h.add(id("n42"), &[], &[], RootPolicy::NoRoot).unwrap();

		let subs = SubscriptionRegistry::new();
		let mut deferred = DeferredEvents::new();
		let triplets = vec![Triplet::new(ALIAS_FIELD, TripletOp::StringArray(vec!["a1".into(), "a2".into()]))];
		let outcome = modify(&mut h, &mut aliases, &subs, &mut deferred, id("new"), ModifyFlags::default(), triplets, Role::Primary, 1_000).unwrap();

		let result = match outcome {
			ModifyOutcome::Applied(r) => r,
			ModifyOutcome::Gated => panic!("should not gate"),
		};
		assert_eq!(result.node, id("n42"));
		assert_eq!(aliases.resolve("a2"), Some(id("n42")));
		assert!(h
			.get_mut(&id("n42"))
			.unwrap()
			.object
			.set_remove("aliases", &SetElement::String("a2".into()))
			.unwrap());
	}

	#[test]
	fn array_push_then_remove_round_trips() {
		let mut h = Hierarchy::new();
		run(&mut h, id("a"), "", vec![Triplet::new("tags", TripletOp::ArrayPush(Value::from_string("x")))]);
		run(&mut h, id("a"), "", vec![Triplet::new("tags", TripletOp::ArrayPush(Value::from_string("y")))]);
		assert_eq!(h.get(&id("a")).unwrap().object.len(Some("tags")).unwrap(), 2);
		run(&mut h, id("a"), "", vec![Triplet::new("tags", TripletOp::ArrayRemoveAt(0))]);
		assert_eq!(h.get(&id("a")).unwrap().object.len(Some("tags")).unwrap(), 1);
	}

	#[test]
	fn edge_meta_op_sets_and_deletes_metadata() {
		let mut h = Hierarchy::new();
		h.register_edge_constraint("friends", EdgeConstraint::multi(OnDelete::RemoveReverse));
		h.add(id("a"), &[], &[], RootPolicy::NoRoot).unwrap();
		h.add(id("b"), &[], &[], RootPolicy::NoRoot).unwrap();
		h.get_mut(&id("a")).unwrap().edges.add("friends", id("b"), EdgeDirection::Multi);

		run(
			&mut h,
			id("a"),
			"",
			vec![Triplet::new(
				"friends",
				TripletOp::EdgeMetaOp {
					dst: id("b"),
					meta_field: "since".into(),
					write: EdgeMetaWrite::Set(Value::Long(2020)),
				},
			)],
		);
		let meta = h.get_mut(&id("a")).unwrap().edges.get_edge_metadata("friends", id("b"), false).unwrap();
		assert_eq!(meta.get_long("since").unwrap(), 2020);

		run(
			&mut h,
			id("a"),
			"",
			vec![Triplet::new(
				"friends",
				TripletOp::EdgeMetaOp {
					dst: id("b"),
					meta_field: "since".into(),
					write: EdgeMetaWrite::Del,
				},
			)],
		);
		let meta = h.get_mut(&id("a")).unwrap().edges.get_edge_metadata("friends", id("b"), false).unwrap();
		assert!(!meta.exists("since").unwrap());
	}

	#[test]
	fn subscription_trigger_fires_once_on_created_then_updated() {
		let mut h = Hierarchy::new();
		let mut aliases = AliasTable::new();
		let mut subs = SubscriptionRegistry::new();
		subs.register(crate::sub::SubscriptionId([7; 32]), id("a"), MarkerKind::ThisNode);
		let mut deferred = DeferredEvents::new();

		modify(&mut h, &mut aliases, &subs, &mut deferred, id("a"), ModifyFlags::default(), vec![], Role::Primary, 1_000).unwrap();
		let dispatched = deferred.dispatch_deferred();
		assert_eq!(dispatched.len(), 1);
	}
}
