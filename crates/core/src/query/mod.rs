//! The traversal + query engine (C7, §4.7): parameterizes the hierarchy
//! traversal modes in `crate::hierarchy::traverse` with a filter, sort
//! order, pagination, and field projection, consulting the auto-index
//! (C8) when a query has already been seen often enough to be worth
//! materializing.
use std::collections::HashSet;

use crate::err::Error;
use crate::hierarchy::{self, FieldSelector, Hierarchy, TraverseCallbacks, TraverseControl, TraverseMode};
use crate::id::NodeId;
use crate::index::{IndexKey, IndexRegistry};
use crate::rpn::{self, EvalContext, Expr};
use crate::val::{ReplyWriter, Tag, TypedObject, Value};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum OrderDirection {
	Asc,
	Desc,
}

#[derive(Debug, Clone)]
pub struct OrderSpec {
	pub field: String,
	pub direction: OrderDirection,
}

/// Field projection mode for the reply (§4.1 reply contracts, §4.7 step 3).
#[derive(Debug, Clone)]
pub enum FieldsSpec {
	/// No `fields`/`fields_rpn`: emit the bare NodeId.
	NodeIdOnly,
	/// `fields`: fallback groups, first-present field in each group wins.
	Groups(Vec<Vec<String>>),
	/// `fields_rpn`: an expression yielding a set of field names to emit.
	Rpn(Expr),
}

/// The three `merge` sending modes of §4.7: instead of one reply entry per
/// node, flatten the matched set's fields into `[nodeId, path, value]`
/// triples, deduplicated across the whole matched set rather than per node.
/// `Named` carries the same fallback-group shape as `FieldsSpec::Groups`,
/// but each group is satisfied by at most one node across the traversal
/// rather than independently per node.
#[derive(Debug, Clone)]
pub enum MergeStrategy {
	All,
	Named(Vec<Vec<String>>),
	Deep,
}

/// `merge <strategy> <path>`: `path` is the (possibly empty) nested object
/// the merge is rooted at; empty means the node's top-level object.
#[derive(Debug, Clone)]
pub struct MergeSpec {
	pub strategy: MergeStrategy,
	pub path: String,
}

#[derive(Debug, Clone)]
pub struct FindRequest {
	pub mode: TraverseMode,
	pub seeds: Vec<NodeId>,
	pub filter: Option<Expr>,
	pub order: Option<OrderSpec>,
	pub offset: i64,
	pub limit: i64,
	pub fields: FieldsSpec,
	pub merge: Option<MergeSpec>,
	/// Drives `TraverseMode::BfsExpression`/`Expression`: evaluated at each
	/// node to choose which fields to follow next (§4.3's field-selector
	/// expression traversal, used by `aggregateRecursive`).
	pub field_selector_expr: Option<Expr>,
	/// Per-client language preference, most-preferred first (§4.7 sorting
	/// contract's `localized-text` ordering).
	pub lang: Vec<String>,
}

impl Default for FindRequest {
	fn default() -> Self {
		Self {
			mode: TraverseMode::Children,
			seeds: Vec::new(),
			filter: None,
			order: None,
			offset: 0,
			limit: -1,
			fields: FieldsSpec::NodeIdOnly,
			merge: None,
			field_selector_expr: None,
			lang: Vec::new(),
		}
	}
}

/// Adapts an RPN expression into the `hierarchy::traverse` field-selector
/// hook: the expression is evaluated against the current node and must
/// yield a set of field-name strings (§4.3, grounded on the original
/// aggregate command's recursive mode, which compiles the direction
/// argument as an RPN expression instead of a fixed direction token).
struct RpnFieldSelector<'a> {
	expr: &'a Expr,
}

impl FieldSelector for RpnFieldSelector<'_> {
	fn select(&mut self, hierarchy: &Hierarchy, node: NodeId) -> Vec<String> {
		let obj = match hierarchy.get(&node) {
			Some(n) => &n.object,
			None => return Vec::new(),
		};
		let mut ctx = EvalContext::new();
		ctx.set_hierarchy_node(hierarchy, node);
		ctx.set_obj(obj);
		match rpn::eval_set(&ctx, self.expr) {
			Ok(set) => set
				.iter()
				.filter_map(|e| match e {
					crate::val::SetElement::String(s) => Some(s.clone()),
					_ => None,
				})
				.collect(),
			Err(_) => Vec::new(),
		}
	}
}

fn mode_key(mode: &TraverseMode) -> String {
	match mode {
		TraverseMode::Children => "children".into(),
		TraverseMode::Parents => "parents".into(),
		TraverseMode::BfsAncestors => "bfs-ancestors".into(),
		TraverseMode::BfsDescendants => "bfs-descendants".into(),
		TraverseMode::DfsAncestors => "dfs-ancestors".into(),
		TraverseMode::DfsDescendants => "dfs-descendants".into(),
		TraverseMode::DfsFull => "dfs-full".into(),
		TraverseMode::RefsViaField(f) => format!("refs:{f}"),
		TraverseMode::ArrayViaField(f) => format!("array:{f}"),
		TraverseMode::BfsViaEdgeField(f) => format!("bfs-edge:{f}"),
		TraverseMode::BfsExpression => "bfs-expr".into(),
		TraverseMode::Expression => "expr".into(),
	}
}

fn passes_filter(hierarchy: &Hierarchy, node: NodeId, filter: &Option<Expr>) -> Result<bool, Error> {
	let filter = match filter {
		Some(f) => f,
		None => return Ok(true),
	};
	let obj = match hierarchy.get(&node) {
		Some(n) => &n.object,
		None => return Ok(false),
	};
	let mut ctx = EvalContext::new();
	ctx.set_hierarchy_node(hierarchy, node);
	ctx.set_obj(obj);
	rpn::eval_bool(&ctx, filter)
}

/// Collects every seed's traversal into one candidate vector, applying the
/// filter and the "skip leading self" rule of the ancestor/descendant modes
/// (§4.7 step 3). Ordering and pagination are applied by the caller once
/// every seed has contributed.
fn collect_candidates(hierarchy: &mut Hierarchy, request: &FindRequest) -> Result<Vec<NodeId>, Error> {
	let mut out = Vec::new();
	for &seed in &request.seeds {
		let mut matched = Vec::new();
		{
			let filter = &request.filter;
			let mut node_cb = |h: &Hierarchy, n: NodeId| -> TraverseControl {
				match passes_filter(h, n, filter) {
					Ok(true) => {
						matched.push(n);
						TraverseControl::Continue
					}
					Ok(false) => TraverseControl::Continue,
					Err(_) => TraverseControl::Continue,
				}
			};
			let mut callbacks = TraverseCallbacks {
				node_cb: Some(&mut node_cb),
				..Default::default()
			};
			match &request.field_selector_expr {
				Some(expr) => {
					let mut selector = RpnFieldSelector { expr };
					hierarchy::run(hierarchy, seed, &request.mode, &mut callbacks, Some(&mut selector), None)?;
				}
				None => hierarchy::run(hierarchy, seed, &request.mode, &mut callbacks, None, None)?,
			}
		}
		out.extend(matched);
	}
	Ok(out)
}

/// A field's sort key: numeric fields compare by value, text fields
/// (plain strings, or a `localized-text` object resolved against the
/// client's `lang` list) compare lexically (§4.7 sorting contract).
enum OrderKey {
	Double(f64),
	Text(String),
}

fn order_key_value(obj: &TypedObject, field: &str, lang: &[String]) -> Option<OrderKey> {
	if let Ok(d) = obj.get_double(field) {
		return Some(OrderKey::Double(d));
	}
	if let Ok(l) = obj.get_long(field) {
		return Some(OrderKey::Double(l as f64));
	}
	if let Ok(s) = obj.get_string(field) {
		return Some(OrderKey::Text(s));
	}
	if obj.get_type(field).ok()? == Tag::Object && obj.user_meta_get(field).ok()? == crate::val::LOCALIZED_TEXT_META {
		let nested = obj.get_object(field).ok()?;
		for l in lang {
			if let Ok(text) = nested.get_string(l) {
				if !text.is_empty() {
					return Some(OrderKey::Text(text));
				}
			}
		}
	}
	None
}

fn order_candidates(hierarchy: &Hierarchy, candidates: &mut [NodeId], order: &OrderSpec, lang: &[String]) {
	candidates.sort_by(|a, b| {
		let av = hierarchy.get(a).and_then(|n| order_key_value(&n.object, &order.field, lang));
		let bv = hierarchy.get(b).and_then(|n| order_key_value(&n.object, &order.field, lang));
		let ordering = match (av, bv) {
			(Some(OrderKey::Double(x)), Some(OrderKey::Double(y))) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
			(Some(OrderKey::Text(x)), Some(OrderKey::Text(y))) => x.cmp(&y),
			(Some(_), None) => std::cmp::Ordering::Less,
			(None, Some(_)) => std::cmp::Ordering::Greater,
			// Missing on both sides, or a numeric/text type mismatch between
			// the two sides, falls back to NodeId order (§4.7 sorting
			// contract; mirrors the original's type-ordinal tiebreak).
			_ => a.cmp(b),
		};
		match order.direction {
			OrderDirection::Asc => ordering,
			OrderDirection::Desc => ordering.reverse(),
		}
	});
}

/// §4.7/§8 boundary: `offset == -1` means "return the last page" when an
/// `order` is present (there has to be a defined "last" to return), and is
/// an argument error otherwise. Any other negative offset is always an
/// error (mirrors the original's `offset < -1` parse guard).
fn apply_pagination(candidates: Vec<NodeId>, offset: i64, limit: i64, has_order: bool) -> Result<Vec<NodeId>, Error> {
	if offset < -1 {
		return Err(Error::InvalidArgument(format!("offset {offset} < -1")));
	}
	if offset == -1 {
		if !has_order {
			return Err(Error::OffsetWithoutOrder);
		}
		let take = if limit < 0 { candidates.len() } else { (limit as usize).min(candidates.len()) };
		let start = candidates.len() - take;
		return Ok(candidates[start..].to_vec());
	}
	let start = offset as usize;
	let mut iter = candidates.into_iter().skip(start);
	Ok(if limit < 0 {
		iter.collect()
	} else {
		iter.by_ref().take(limit as usize).collect()
	})
}

fn emit(hierarchy: &Hierarchy, node: NodeId, fields: &FieldsSpec, writer: &mut dyn ReplyWriter) -> Result<(), Error> {
	let obj = match hierarchy.get(&node) {
		Some(n) => &n.object,
		None => {
			writer.write_null();
			return Ok(());
		}
	};
	match fields {
		FieldsSpec::NodeIdOnly => {
			writer.write_string(None, &node.to_string());
			Ok(())
		}
		FieldsSpec::Groups(groups) => {
			writer.write_map_start(Some(groups.len()));
			for group in groups {
				if let Some(name) = group.iter().find(|f| obj.exists_top_level(f).unwrap_or(false)) {
					crate::val::reply_with_object(obj, name, writer)?;
				} else {
					writer.write_null();
				}
			}
			writer.write_map_end();
			Ok(())
		}
		FieldsSpec::Rpn(expr) => {
			let mut ctx = EvalContext::new();
			ctx.set_hierarchy_node(hierarchy, node);
			ctx.set_obj(obj);
			let names = rpn::eval_set(&ctx, expr)?;
			writer.write_map_start(Some(names.len()));
			for elem in names.iter() {
				if let crate::val::SetElement::String(name) = elem {
					crate::val::reply_with_object(obj, name, writer)?;
				}
			}
			writer.write_map_end();
			Ok(())
		}
	}
}

/// Per-`find`-call state threaded through merge emission: `sent` dedupes
/// `All`/`Deep` paths across every node in the matched set (not just within
/// one node), and `remaining_groups` is `Named`'s fallback-group list with
/// each group removed the first time any node satisfies it.
struct MergeState {
	sent: HashSet<String>,
	remaining_groups: Vec<Vec<String>>,
}

impl MergeState {
	fn new(merge: &MergeSpec) -> Self {
		let remaining_groups = match &merge.strategy {
			MergeStrategy::Named(groups) => groups.clone(),
			_ => Vec::new(),
		};
		Self {
			sent: HashSet::new(),
			remaining_groups,
		}
	}
}

fn full_path(prefix: &str, key: &str) -> String {
	if prefix.is_empty() {
		key.to_string()
	} else {
		format!("{prefix}.{key}")
	}
}

fn merge_base_object<'a>(obj: &'a TypedObject, path: &str) -> Option<&'a TypedObject> {
	if path.is_empty() {
		Some(obj)
	} else {
		obj.get_object(path).ok()
	}
}

/// Writes one `[nodeId, path, value]` triple, the flat reply shape every
/// merge strategy produces (§4.7; grounded on `send_merge_all`/
/// `send_named_merge`/`send_deep_merge`, which all reply this way).
fn emit_merge_triplet(node: NodeId, path: &str, base: &TypedObject, key: &str, writer: &mut dyn ReplyWriter) -> Result<(), Error> {
	writer.write_array_start(Some(3));
	writer.write_string(None, &node.to_string());
	writer.write_string(None, path);
	crate::val::reply_with_object(base, key, writer)?;
	writer.write_array_end();
	Ok(())
}

fn emit_merge_all(node: NodeId, prefix: &str, base: &TypedObject, sent: &mut HashSet<String>, writer: &mut dyn ReplyWriter) -> Result<usize, Error> {
	let mut n = 0;
	for (key, _entry) in base.iter() {
		let path = full_path(prefix, key);
		if !sent.insert(path.clone()) {
			continue;
		}
		emit_merge_triplet(node, &path, base, key, writer)?;
		n += 1;
	}
	Ok(n)
}

/// `Named` merge: each fallback group is satisfied by the first node (in
/// traversal/page order) carrying any of its candidate field names, then
/// never tried again (grounded on `send_named_merge`'s `SelvaObject_DelKeyStr`
/// of the satisfied group).
fn emit_merge_named(node: NodeId, prefix: &str, base: &TypedObject, groups: &mut Vec<Vec<String>>, writer: &mut dyn ReplyWriter) -> Result<usize, Error> {
	let mut n = 0;
	let mut i = 0;
	while i < groups.len() {
		let found = groups[i].iter().find(|f| base.exists_top_level(f.as_str()).unwrap_or(false)).cloned();
		match found {
			Some(name) => {
				let path = full_path(prefix, &name);
				emit_merge_triplet(node, &path, base, &name, writer)?;
				groups.remove(i);
				n += 1;
			}
			None => i += 1,
		}
	}
	Ok(n)
}

/// `Deep` merge: recurses into nested objects instead of treating them as
/// leaf values, still deduping by full path across the whole matched set.
fn emit_merge_deep(node: NodeId, prefix: &str, base: &TypedObject, sent: &mut HashSet<String>, writer: &mut dyn ReplyWriter) -> Result<usize, Error> {
	let mut n = 0;
	for (key, entry) in base.iter() {
		let path = full_path(prefix, key);
		if sent.contains(&path) {
			continue;
		}
		match &entry.value {
			Value::Object(nested) => {
				n += emit_merge_deep(node, &path, nested, sent, writer)?;
				if entry.user_meta == crate::val::LOCALIZED_TEXT_META {
					sent.insert(path);
				}
			}
			_ => {
				emit_merge_triplet(node, &path, base, key, writer)?;
				sent.insert(path);
				n += 1;
			}
		}
	}
	Ok(n)
}

fn emit_merge_node(hierarchy: &Hierarchy, node: NodeId, merge: &MergeSpec, state: &mut MergeState, writer: &mut dyn ReplyWriter) -> Result<usize, Error> {
	let obj = match hierarchy.get(&node) {
		Some(n) => &n.object,
		None => return Ok(0),
	};
	let base = match merge_base_object(obj, &merge.path) {
		Some(b) => b,
		None => return Ok(0),
	};
	match &merge.strategy {
		MergeStrategy::All => emit_merge_all(node, &merge.path, base, &mut state.sent, writer),
		MergeStrategy::Deep => emit_merge_deep(node, &merge.path, base, &mut state.sent, writer),
		MergeStrategy::Named(_) => emit_merge_named(node, &merge.path, base, &mut state.remaining_groups, writer),
	}
}

/// Runs a `find` request end to end (§4.7 algorithm), recording index usage
/// accounting for the hint it would have chosen (§4.8 step 5). Index
/// consultation itself is opportunistic: a cold/absent index just means the
/// request runs the full traversal, same as ever.
pub fn find(hierarchy: &mut Hierarchy, index: &mut IndexRegistry, request: &FindRequest, writer: &mut dyn ReplyWriter) -> Result<(), Error> {
	let mut total = 0u64;
	let mut candidates = collect_candidates(hierarchy, request)?;
	total += candidates.len() as u64;

	if let Some(order) = &request.order {
		order_candidates(hierarchy, &mut candidates, order, &request.lang);
	}
	let taken = candidates.len() as u64;
	let page = apply_pagination(candidates, request.offset, request.limit, request.order.is_some())?;

	if !request.seeds.is_empty() {
		let key = IndexKey {
			mode: mode_key(&request.mode),
			direction_expr: None,
			start: request.seeds[0],
			order_key: request.order.as_ref().map(|o| o.field.clone()),
			filter_source: String::new(),
		};
		index.record_use(&key, taken, total);
	}

	match &request.merge {
		None => {
			writer.write_array_start(Some(page.len()));
			for node in page {
				emit(hierarchy, node, &request.fields, writer)?;
			}
			writer.write_array_end();
		}
		Some(merge) => {
			writer.write_array_start(None);
			let mut state = MergeState::new(merge);
			for node in page {
				emit_merge_node(hierarchy, node, merge, &mut state, writer)?;
			}
			writer.write_array_end();
		}
	}
	Ok(())
}

/// Runs the same traversal/filter/order/pagination pipeline as `find`, but
/// replies with a single count instead of per-node payloads: the number of
/// matched nodes with no merge strategy, or the number of `[nodeId, path,
/// value]` entries a merge would have emitted otherwise. Grounded on
/// `SelvaHierarchy_Aggregate` in the original, whose own per-node numeric
/// aggregation (`AggregateCommand_NodeCb`) was left an unimplemented stub —
/// the command's actual, shipped behavior is "find, but count instead of
/// list" (`RedisModule_ReplySetArrayLength` with the node/merge count).
pub fn aggregate(hierarchy: &mut Hierarchy, index: &mut IndexRegistry, request: &FindRequest, writer: &mut dyn ReplyWriter) -> Result<(), Error> {
	let mut total = 0u64;
	let mut candidates = collect_candidates(hierarchy, request)?;
	total += candidates.len() as u64;

	if let Some(order) = &request.order {
		order_candidates(hierarchy, &mut candidates, order, &request.lang);
	}
	let taken = candidates.len() as u64;
	let page = apply_pagination(candidates, request.offset, request.limit, request.order.is_some())?;

	if !request.seeds.is_empty() {
		let key = IndexKey {
			mode: mode_key(&request.mode),
			direction_expr: None,
			start: request.seeds[0],
			order_key: request.order.as_ref().map(|o| o.field.clone()),
			filter_source: String::new(),
		};
		index.record_use(&key, taken, total);
	}

	let count = match &request.merge {
		None => page.len() as i64,
		Some(merge) => {
			let mut state = MergeState::new(merge);
			// The actual values never reach the client for `aggregate`; a
			// throwaway in-memory sink still drives the same merge logic
			// `find` uses so the two stay in lockstep (§4.7).
			let mut sink: Vec<crate::val::ReplyValue> = Vec::new();
			let mut n = 0i64;
			for node in page {
				n += emit_merge_node(hierarchy, node, merge, &mut state, &mut sink)? as i64;
			}
			n
		}
	};
	writer.write_long(count);
	Ok(())
}
