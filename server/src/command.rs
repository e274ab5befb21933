//! Command dispatch (§4.10, §6): a single-byte command id selects a plain
//! function pointer out of a flat table; each handler decodes its own
//! argument shape out of the already-reassembled [`WireValue`] list and
//! writes its reply straight onto the wire via a [`FrameValueWriter`].
use graphdb_core::hierarchy::RootPolicy;
use graphdb_core::id::NodeId;
use graphdb_core::modify::{self, EdgeMetaWrite, ModifyFlags, ModifyOutcome, Role, Triplet, TripletOp, TripletReply};
use graphdb_core::query::{FieldsSpec, FindRequest, MergeSpec, MergeStrategy, OrderDirection, OrderSpec};
use graphdb_core::rpn::{self, EvalContext};
use graphdb_core::val::{LocalizedString, ReplyWriter, SetElement, Value};
use graphdb_core::Error;

use crate::engine::Engine;
use crate::proto::value::WireValue;

pub const CMD_PING: u8 = 0;
pub const CMD_ECHO: u8 = 1;
pub const CMD_LSCMD: u8 = 2;
pub const CMD_OBJECT_GET: u8 = 10;
pub const CMD_OBJECT_SET: u8 = 11;
pub const CMD_OBJECT_DEL: u8 = 12;
pub const CMD_OBJECT_EXISTS: u8 = 13;
pub const CMD_OBJECT_INCRBY: u8 = 14;
pub const CMD_OBJECT_INCRBYDOUBLE: u8 = 15;
pub const CMD_OBJECT_TYPE: u8 = 16;
pub const CMD_OBJECT_LEN: u8 = 17;
pub const CMD_OBJECT_GETMETA: u8 = 18;
pub const CMD_OBJECT_SETMETA: u8 = 19;
pub const CMD_MODIFY: u8 = 20;
pub const CMD_HIERARCHY_ADD: u8 = 30;
pub const CMD_HIERARCHY_DEL: u8 = 31;
pub const CMD_HIERARCHY_DELREF: u8 = 32;
pub const CMD_HIERARCHY_PARENTS: u8 = 33;
pub const CMD_HIERARCHY_CHILDREN: u8 = 34;
pub const CMD_HIERARCHY_FIND: u8 = 35;
pub const CMD_HIERARCHY_FINDIN: u8 = 36;
pub const CMD_HIERARCHY_DUMP: u8 = 37;
pub const CMD_AGGREGATE: u8 = 38;
pub const CMD_AGGREGATE_RECURSIVE: u8 = 39;
pub const CMD_RPN_EVALBOOL: u8 = 40;
pub const CMD_RPN_EVALDOUBLE: u8 = 41;
pub const CMD_RPN_EVALSTRING: u8 = 42;
pub const CMD_RPN_EVALSET: u8 = 43;

type Handler = fn(&mut Engine, &[WireValue], &mut dyn ReplyWriter) -> Result<(), Error>;

pub const COMMANDS: &[(u8, &str, Handler)] = &[
	(CMD_PING, "ping", cmd_ping),
	(CMD_ECHO, "echo", cmd_echo),
	(CMD_LSCMD, "lscmd", cmd_lscmd),
	(CMD_OBJECT_GET, "object.get", cmd_object_get),
	(CMD_OBJECT_SET, "object.set", cmd_object_set),
	(CMD_OBJECT_DEL, "object.del", cmd_object_del),
	(CMD_OBJECT_EXISTS, "object.exists", cmd_object_exists),
	(CMD_OBJECT_INCRBY, "object.incrby", cmd_object_incrby),
	(CMD_OBJECT_INCRBYDOUBLE, "object.incrbydouble", cmd_object_incrbydouble),
	(CMD_OBJECT_TYPE, "object.type", cmd_object_type),
	(CMD_OBJECT_LEN, "object.len", cmd_object_len),
	(CMD_OBJECT_GETMETA, "object.getMeta", cmd_object_getmeta),
	(CMD_OBJECT_SETMETA, "object.setMeta", cmd_object_setmeta),
	(CMD_MODIFY, "selva.modify", cmd_modify),
	(CMD_HIERARCHY_ADD, "selva.hierarchy.add", cmd_hierarchy_add),
	(CMD_HIERARCHY_DEL, "selva.hierarchy.del", cmd_hierarchy_del),
	(CMD_HIERARCHY_DELREF, "selva.hierarchy.delref", cmd_hierarchy_delref),
	(CMD_HIERARCHY_PARENTS, "selva.hierarchy.parents", cmd_hierarchy_parents),
	(CMD_HIERARCHY_CHILDREN, "selva.hierarchy.children", cmd_hierarchy_children),
	(CMD_HIERARCHY_FIND, "selva.hierarchy.find", cmd_hierarchy_find),
	(CMD_HIERARCHY_FINDIN, "selva.hierarchy.findIn", cmd_hierarchy_findin),
	(CMD_HIERARCHY_DUMP, "selva.hierarchy.dump", cmd_hierarchy_dump),
	(CMD_AGGREGATE, "selva.aggregate", cmd_aggregate),
	(CMD_AGGREGATE_RECURSIVE, "selva.aggregateRecursive", cmd_aggregate_recursive),
	(CMD_RPN_EVALBOOL, "selva.rpn.evalbool", cmd_rpn_evalbool),
	(CMD_RPN_EVALDOUBLE, "selva.rpn.evaldouble", cmd_rpn_evaldouble),
	(CMD_RPN_EVALSTRING, "selva.rpn.evalstring", cmd_rpn_evalstring),
	(CMD_RPN_EVALSET, "selva.rpn.evalset", cmd_rpn_evalset),
];

/// Decodes the reassembled message body and dispatches it table-driven by
/// `cmd` (§4.10). Returns the reply body bytes; the caller frames them.
pub fn dispatch(engine: &mut Engine, cmd: u8, message: &[u8]) -> Result<Vec<u8>, Error> {
	let args = crate::proto::value::decode_message(message)?;
	let handler = COMMANDS.iter().find(|c| c.0 == cmd).map(|c| c.2).ok_or(Error::UnknownCommand(cmd))?;
	let mut out = Vec::new();
	let mut writer = crate::proto::value::FrameValueWriter::new(&mut out);
	handler(engine, &args, &mut writer)?;
	Ok(out)
}

fn arg(args: &[WireValue], idx: usize) -> Result<&WireValue, Error> {
	args.get(idx).ok_or(Error::WrongArity)
}

fn arg_node_id(args: &[WireValue], idx: usize) -> Result<NodeId, Error> {
	NodeId::try_from(arg(args, idx)?.as_str()?)
}

fn arg_node_ids(v: &WireValue) -> Result<Vec<NodeId>, Error> {
	v.as_array()?.iter().map(|e| NodeId::try_from(e.as_str()?)).collect()
}

fn wire_to_value(v: &WireValue) -> Result<Value, Error> {
	match v {
		WireValue::Null => Ok(Value::Null),
		WireValue::Double(d) => Ok(Value::Double(*d)),
		WireValue::Long(l) => Ok(Value::Long(*l)),
		WireValue::String(s) => Ok(Value::Str(LocalizedString { lang: None, text: s.clone() })),
		WireValue::Array(_) | WireValue::Error(..) => Err(Error::InvalidArgument("expected a scalar value".into())),
	}
}

// -- ping / echo / lscmd --

fn cmd_ping(_e: &mut Engine, _args: &[WireValue], w: &mut dyn ReplyWriter) -> Result<(), Error> {
	w.write_string(None, "PONG");
	Ok(())
}

fn cmd_echo(_e: &mut Engine, args: &[WireValue], w: &mut dyn ReplyWriter) -> Result<(), Error> {
	w.write_array_start(Some(args.len()));
	for a in args {
		w.write_string(None, a.as_str()?);
	}
	w.write_array_end();
	Ok(())
}

fn cmd_lscmd(_e: &mut Engine, _args: &[WireValue], w: &mut dyn ReplyWriter) -> Result<(), Error> {
	w.write_array_start(Some(COMMANDS.len()));
	for (id, name, _) in COMMANDS {
		w.write_array_start(Some(2));
		w.write_long(*id as i64);
		w.write_string(None, name);
		w.write_array_end();
	}
	w.write_array_end();
	Ok(())
}

// -- object.* (§4.1, §6) --
//
// Mutating object.* commands are implemented as single-triplet calls into
// the same `modify` executor selva.modify uses (§4.6), rather than
// hand-rolling a second mutation-plus-replication path: the triplet
// executor is already the one place that knows how to produce a
// `ModifyResult` a `ReplicationCommand` can be built from.

fn apply_single_triplet(engine: &mut Engine, key: NodeId, field: &str, op: TripletOp) -> Result<TripletReply, Error> {
	let now_ms = now_ms();
	let triplets = vec![Triplet::new(field, op)];
	let outcome = modify::modify(
		&mut engine.hierarchy,
		&mut engine.aliases,
		&engine.subs,
		&mut engine.deferred,
		key,
		ModifyFlags::default(),
		triplets,
		Role::Primary,
		now_ms,
	)?;
	match outcome {
		ModifyOutcome::Gated => Err(Error::AlreadyExists),
		ModifyOutcome::Applied(result) => {
			if let Some(command) = graphdb_core::snapshot::build_replication_command(&engine.hierarchy, &result)? {
				graphdb_core::snapshot::replicate(engine.replication.as_ref(), Some(command))?;
			}
			for event in engine.deferred.dispatch_deferred() {
				trace!(?event, "dispatched subscription event");
			}
			result.triplet_replies.into_iter().next().ok_or(Error::WrongArity)
		}
	}
}

fn now_ms() -> i64 {
	use std::time::{SystemTime, UNIX_EPOCH};
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

fn write_triplet_reply(reply: TripletReply, w: &mut dyn ReplyWriter) {
	match reply {
		TripletReply::Ok => w.write_string(None, "OK"),
		TripletReply::Updated => w.write_string(None, "UPDATED"),
		TripletReply::Error(msg) => w.write_error(&msg),
	}
}

fn cmd_object_get(e: &mut Engine, args: &[WireValue], w: &mut dyn ReplyWriter) -> Result<(), Error> {
	let key = arg_node_id(args, 0)?;
	let field = arg(args, 1)?.as_str()?;
	let node = e.hierarchy.get(&key).ok_or(Error::NodeNotFound(key))?;
	graphdb_core::val::reply_with_object(&node.object, field, w)
}

fn cmd_object_set(e: &mut Engine, args: &[WireValue], w: &mut dyn ReplyWriter) -> Result<(), Error> {
	let key = arg_node_id(args, 0)?;
	let field = arg(args, 1)?.as_str()?.to_string();
	let op = match wire_to_value(arg(args, 2)?)? {
		Value::Str(s) => TripletOp::SetString(s.text),
		Value::Long(n) => TripletOp::SetLong(n),
		Value::Double(d) => TripletOp::SetDouble(d),
		_ => return Err(Error::InvalidArgument("object.set expects a string/long/double value".into())),
	};
	let reply = apply_single_triplet(e, key, &field, op)?;
	write_triplet_reply(reply, w);
	Ok(())
}

fn cmd_object_del(e: &mut Engine, args: &[WireValue], w: &mut dyn ReplyWriter) -> Result<(), Error> {
	let key = arg_node_id(args, 0)?;
	let field = arg(args, 1)?.as_str()?.to_string();
	let reply = apply_single_triplet(e, key, &field, TripletOp::DelField)?;
	write_triplet_reply(reply, w);
	Ok(())
}

fn cmd_object_exists(e: &mut Engine, args: &[WireValue], w: &mut dyn ReplyWriter) -> Result<(), Error> {
	let key = arg_node_id(args, 0)?;
	let field = arg(args, 1)?.as_str()?;
	let node = e.hierarchy.get(&key).ok_or(Error::NodeNotFound(key))?;
	w.write_long(node.object.exists(field)? as i64);
	Ok(())
}

fn cmd_object_incrby(e: &mut Engine, args: &[WireValue], w: &mut dyn ReplyWriter) -> Result<(), Error> {
	let key = arg_node_id(args, 0)?;
	let field = arg(args, 1)?.as_str()?.to_string();
	let delta = arg(args, 2)?.as_long()?;
	let default = args.get(3).map(WireValue::as_long).transpose()?.unwrap_or(0);
	let reply = apply_single_triplet(e, key, &field, TripletOp::IncrementLong { default, delta })?;
	write_triplet_reply(reply, w);
	Ok(())
}

fn cmd_object_incrbydouble(e: &mut Engine, args: &[WireValue], w: &mut dyn ReplyWriter) -> Result<(), Error> {
	let key = arg_node_id(args, 0)?;
	let field = arg(args, 1)?.as_str()?.to_string();
	let delta = arg(args, 2)?.as_double()?;
	let default = args.get(3).map(WireValue::as_double).transpose()?.unwrap_or(0.0);
	let reply = apply_single_triplet(e, key, &field, TripletOp::IncrementDouble { default, delta })?;
	write_triplet_reply(reply, w);
	Ok(())
}

fn cmd_object_type(e: &mut Engine, args: &[WireValue], w: &mut dyn ReplyWriter) -> Result<(), Error> {
	let key = arg_node_id(args, 0)?;
	let field = arg(args, 1)?.as_str()?;
	let node = e.hierarchy.get(&key).ok_or(Error::NodeNotFound(key))?;
	w.write_string(None, node.object.get_type(field)?.name());
	Ok(())
}

fn cmd_object_len(e: &mut Engine, args: &[WireValue], w: &mut dyn ReplyWriter) -> Result<(), Error> {
	let key = arg_node_id(args, 0)?;
	let field = args.get(1).map(WireValue::as_str).transpose()?;
	let node = e.hierarchy.get(&key).ok_or(Error::NodeNotFound(key))?;
	w.write_long(node.object.len(field)? as i64);
	Ok(())
}

fn cmd_object_getmeta(e: &mut Engine, args: &[WireValue], w: &mut dyn ReplyWriter) -> Result<(), Error> {
	let key = arg_node_id(args, 0)?;
	let field = arg(args, 1)?.as_str()?;
	let node = e.hierarchy.get(&key).ok_or(Error::NodeNotFound(key))?;
	w.write_long(node.object.user_meta_get(field)? as i64);
	Ok(())
}

fn cmd_object_setmeta(e: &mut Engine, args: &[WireValue], w: &mut dyn ReplyWriter) -> Result<(), Error> {
	let key = arg_node_id(args, 0)?;
	let field = arg(args, 1)?.as_str()?.to_string();
	let meta = arg(args, 2)?.as_long()? as u32;
	let reply = apply_single_triplet(e, key, &field, TripletOp::UserMetaSet(meta))?;
	write_triplet_reply(reply, w);
	Ok(())
}

// -- selva.modify (§4.6) --
//
// Wire shape: `[key, flags, (type_code, field, value)...]`. `type_code` is
// this engine's own single-character contract (not fixed by the distilled
// spec, see DESIGN.md Open Questions):
//   0/s set-string   S set-string-default   f set-double   F set-double-default
//   i set-long       I set-long-default     c incr-long    C incr-double
//   o set-op (adds, deletes, replaces)      D del-field    m user-meta-set
//   p array-push     n array-insert-at      r array-remove-at
//   a string-array ($alias carries this)    e edge-meta-op
fn wire_to_set_element(v: &WireValue) -> Result<SetElement, Error> {
	let pair = v.as_array()?;
	let kind = pair.first().ok_or(Error::WrongArity)?.as_long()?;
	let payload = pair.get(1).ok_or(Error::WrongArity)?;
	match kind {
		0 => Ok(SetElement::Double(graphdb_core::val::OrderedFloat(payload.as_double()?))),
		1 => Ok(SetElement::Long(payload.as_long()?)),
		2 => Ok(SetElement::String(payload.as_str()?.to_string())),
		3 => Ok(SetElement::NodeId(NodeId::try_from(payload.as_str()?)?)),
		_ => Err(Error::InvalidArgument(format!("unknown set element kind {kind}"))),
	}
}

fn wire_to_set_elements(v: &WireValue) -> Result<Vec<SetElement>, Error> {
	v.as_array()?.iter().map(wire_to_set_element).collect()
}

fn parse_triplet_op(type_code: &str, value: &WireValue) -> Result<TripletOp, Error> {
	let code = type_code.chars().next().ok_or_else(|| Error::InvalidTypeCode('\0'))?;
	match code {
		'0' | 's' => Ok(TripletOp::SetString(value.as_str()?.to_string())),
		'S' => Ok(TripletOp::SetStringDefault(value.as_str()?.to_string())),
		'f' => Ok(TripletOp::SetDouble(value.as_double()?)),
		'F' => Ok(TripletOp::SetDoubleDefault(value.as_double()?)),
		'i' => Ok(TripletOp::SetLong(value.as_long()?)),
		'I' => Ok(TripletOp::SetLongDefault(value.as_long()?)),
		'c' => {
			let pair = value.as_array()?;
			Ok(TripletOp::IncrementLong {
				default: pair.first().ok_or(Error::WrongArity)?.as_long()?,
				delta: pair.get(1).ok_or(Error::WrongArity)?.as_long()?,
			})
		}
		'C' => {
			let pair = value.as_array()?;
			Ok(TripletOp::IncrementDouble {
				default: pair.first().ok_or(Error::WrongArity)?.as_double()?,
				delta: pair.get(1).ok_or(Error::WrongArity)?.as_double()?,
			})
		}
		'o' => {
			let triple = value.as_array()?;
			Ok(TripletOp::SetOp {
				adds: triple.first().map(wire_to_set_elements).transpose()?.unwrap_or_default(),
				deletes: triple.get(1).map(wire_to_set_elements).transpose()?.unwrap_or_default(),
				replaces: triple.get(2).map(wire_to_set_elements).transpose()?.unwrap_or_default(),
			})
		}
		'D' => Ok(TripletOp::DelField),
		'm' => Ok(TripletOp::UserMetaSet(value.as_long()? as u32)),
		'p' => Ok(TripletOp::ArrayPush(wire_to_value(value)?)),
		'n' => {
			let pair = value.as_array()?;
			let index = pair.first().ok_or(Error::WrongArity)?.as_long()? as usize;
			Ok(TripletOp::ArrayInsertAt(index, wire_to_value(pair.get(1).ok_or(Error::WrongArity)?)?))
		}
		'r' => Ok(TripletOp::ArrayRemoveAt(value.as_long()? as usize)),
		'a' => {
			let items = value.as_array()?;
			Ok(TripletOp::StringArray(items.iter().map(|v| v.as_str().map(str::to_string)).collect::<Result<_, _>>()?))
		}
		'e' => {
			let quad = value.as_array()?;
			let dst = NodeId::try_from(quad.first().ok_or(Error::WrongArity)?.as_str()?)?;
			let op_code = quad.get(1).ok_or(Error::WrongArity)?.as_long()?;
			let meta_field = quad.get(2).ok_or(Error::WrongArity)?.as_str()?.to_string();
			let write = match op_code {
				0 => EdgeMetaWrite::Set(wire_to_value(quad.get(3).ok_or(Error::WrongArity)?)?),
				1 => EdgeMetaWrite::Del,
				_ => return Err(Error::InvalidArgument(format!("unknown edge-meta op {op_code}"))),
			};
			Ok(TripletOp::EdgeMetaOp { dst, meta_field, write })
		}
		other => Err(Error::InvalidTypeCode(other)),
	}
}

fn cmd_modify(e: &mut Engine, args: &[WireValue], w: &mut dyn ReplyWriter) -> Result<(), Error> {
	let key = arg_node_id(args, 0)?;
	let flags = ModifyFlags::parse(arg(args, 1)?.as_str()?)?;
	let mut triplets = Vec::new();
	let mut rest = &args[2.min(args.len())..];
	while rest.len() >= 3 {
		let field = rest[1].as_str()?.to_string();
		let op = parse_triplet_op(rest[0].as_str()?, &rest[2])?;
		triplets.push(Triplet::new(field, op));
		rest = &rest[3..];
	}
	if !rest.is_empty() {
		return Err(Error::WrongArity);
	}

	let outcome = modify::modify(
		&mut e.hierarchy,
		&mut e.aliases,
		&e.subs,
		&mut e.deferred,
		key,
		flags,
		triplets,
		Role::Primary,
		now_ms(),
	)?;
	match outcome {
		ModifyOutcome::Gated => {
			w.write_null();
			Ok(())
		}
		ModifyOutcome::Applied(result) => {
			if let Some(command) = graphdb_core::snapshot::build_replication_command(&e.hierarchy, &result)? {
				graphdb_core::snapshot::replicate(e.replication.as_ref(), Some(command))?;
			}
			for event in e.deferred.dispatch_deferred() {
				trace!(?event, "dispatched subscription event");
			}
			w.write_array_start(Some(result.triplet_replies.len()));
			for reply in result.triplet_replies {
				write_triplet_reply(reply, w);
			}
			w.write_array_end();
			Ok(())
		}
	}
}

// -- selva.hierarchy.* (§4.3, §6.1) --

fn cmd_hierarchy_add(e: &mut Engine, args: &[WireValue], w: &mut dyn ReplyWriter) -> Result<(), Error> {
	let key = arg_node_id(args, 0)?;
	let parents = arg_node_ids(arg(args, 1)?)?;
	let children = arg_node_ids(arg(args, 2)?)?;
	e.hierarchy.add(key, &parents, &children, RootPolicy::DefaultToRoot)?;
	w.write_long(1);
	Ok(())
}

fn cmd_hierarchy_del(e: &mut Engine, args: &[WireValue], w: &mut dyn ReplyWriter) -> Result<(), Error> {
	let key = arg_node_id(args, 0)?;
	e.hierarchy.del_node(key)?;
	w.write_long(1);
	Ok(())
}

fn cmd_hierarchy_delref(e: &mut Engine, args: &[WireValue], w: &mut dyn ReplyWriter) -> Result<(), Error> {
	let key = arg_node_id(args, 0)?;
	let parents = arg_node_ids(arg(args, 1)?)?;
	let children = arg_node_ids(arg(args, 2)?)?;
	e.hierarchy.del_edges(key, &parents, &children)?;
	w.write_long(1);
	Ok(())
}

fn cmd_hierarchy_parents(e: &mut Engine, args: &[WireValue], w: &mut dyn ReplyWriter) -> Result<(), Error> {
	let key = arg_node_id(args, 0)?;
	let node = e.hierarchy.get(&key).ok_or(Error::NodeNotFound(key))?;
	let parents: Vec<NodeId> = node.parents().copied().collect();
	w.write_array_start(Some(parents.len()));
	for p in parents {
		w.write_string(None, &p.to_string());
	}
	w.write_array_end();
	Ok(())
}

fn cmd_hierarchy_children(e: &mut Engine, args: &[WireValue], w: &mut dyn ReplyWriter) -> Result<(), Error> {
	let key = arg_node_id(args, 0)?;
	let node = e.hierarchy.get(&key).ok_or(Error::NodeNotFound(key))?;
	let children: Vec<NodeId> = node.children().copied().collect();
	w.write_array_start(Some(children.len()));
	for c in children {
		w.write_string(None, &c.to_string());
	}
	w.write_array_end();
	Ok(())
}

fn parse_mode(token: &str) -> Result<graphdb_core::hierarchy::TraverseMode, Error> {
	use graphdb_core::hierarchy::TraverseMode;
	if let Some(field) = token.strip_prefix("refs:") {
		return Ok(TraverseMode::RefsViaField(field.to_string()));
	}
	if let Some(field) = token.strip_prefix("array:") {
		return Ok(TraverseMode::ArrayViaField(field.to_string()));
	}
	if let Some(field) = token.strip_prefix("bfs-edge:") {
		return Ok(TraverseMode::BfsViaEdgeField(field.to_string()));
	}
	match token {
		"children" => Ok(TraverseMode::Children),
		"parents" => Ok(TraverseMode::Parents),
		"bfs-ancestors" => Ok(TraverseMode::BfsAncestors),
		"bfs-descendants" => Ok(TraverseMode::BfsDescendants),
		"dfs-ancestors" => Ok(TraverseMode::DfsAncestors),
		"dfs-descendants" => Ok(TraverseMode::DfsDescendants),
		"dfs-full" => Ok(TraverseMode::DfsFull),
		other => Err(Error::InvalidDirection(other.to_string())),
	}
}

fn parse_fields_spec(v: &WireValue) -> Result<FieldsSpec, Error> {
	match v {
		WireValue::Null => Ok(FieldsSpec::NodeIdOnly),
		WireValue::String(expr) => Ok(FieldsSpec::Rpn(rpn::compile(expr)?)),
		WireValue::Array(groups) => {
			let groups = groups
				.iter()
				.map(|g| g.as_array()?.iter().map(|f| f.as_str().map(str::to_string)).collect::<Result<Vec<_>, _>>())
				.collect::<Result<Vec<_>, Error>>()?;
			Ok(FieldsSpec::Groups(groups))
		}
		_ => Err(Error::InvalidArgument("invalid fields spec".into())),
	}
}

fn parse_order(v: &WireValue) -> Result<Option<OrderSpec>, Error> {
	match v {
		WireValue::Null => Ok(None),
		WireValue::Array(pair) => {
			let field = pair.first().ok_or(Error::WrongArity)?.as_str()?.to_string();
			let dir = pair.get(1).ok_or(Error::WrongArity)?.as_str()?;
			let direction = match dir {
				"asc" => OrderDirection::Asc,
				"desc" => OrderDirection::Desc,
				other => return Err(Error::InvalidOrder(other.to_string())),
			};
			Ok(Some(OrderSpec { field, direction }))
		}
		_ => Err(Error::InvalidArgument("invalid order spec".into())),
	}
}

/// `merge` wire shape: `null`, or `[strategy, path, groups?]` where
/// `strategy` is `"all"`/`"named"`/`"deep"` and `groups` (named only) is an
/// array of fallback-group arrays, matching `fields`'s `Groups` shape.
fn parse_merge(v: &WireValue) -> Result<Option<MergeSpec>, Error> {
	match v {
		WireValue::Null => Ok(None),
		WireValue::Array(parts) => {
			let kind = parts.first().ok_or(Error::WrongArity)?.as_str()?;
			let path = parts.get(1).ok_or(Error::WrongArity)?.as_str()?.to_string();
			let strategy = match kind {
				"all" => MergeStrategy::All,
				"deep" => MergeStrategy::Deep,
				"named" => {
					let groups = parts
						.get(2)
						.ok_or(Error::WrongArity)?
						.as_array()?
						.iter()
						.map(|g| g.as_array()?.iter().map(|f| f.as_str().map(str::to_string)).collect::<Result<Vec<_>, _>>())
						.collect::<Result<Vec<_>, Error>>()?;
					MergeStrategy::Named(groups)
				}
				other => return Err(Error::InvalidArgument(format!("unknown merge strategy {other}"))),
			};
			Ok(Some(MergeSpec { strategy, path }))
		}
		_ => Err(Error::InvalidArgument("invalid merge spec".into())),
	}
}

/// Shared body of `find`/`findIn` (§4.7): they differ only in how many
/// seeds the wire call supplies. The trailing `merge` argument is optional
/// so existing callers that only pass through arg 6 keep working.
fn run_find(e: &mut Engine, seeds: Vec<NodeId>, args: &[WireValue], w: &mut dyn ReplyWriter) -> Result<(), Error> {
	let request = parse_find_request(seeds, args)?;
	graphdb_core::query::find(&mut e.hierarchy, &mut e.index, &request, w)
}

fn parse_find_request(seeds: Vec<NodeId>, args: &[WireValue]) -> Result<FindRequest, Error> {
	let mode = parse_mode(arg(args, 1)?.as_str()?)?;
	parse_find_request_with_mode(seeds, mode, args)
}

/// Shared by both `find` and `aggregateRecursive`: the latter derives `mode`
/// from a compiled field-selector expression instead of arg 1's token, so
/// it skips straight to the shared filter/order/pagination/fields parsing.
fn parse_find_request_with_mode(seeds: Vec<NodeId>, mode: graphdb_core::hierarchy::TraverseMode, args: &[WireValue]) -> Result<FindRequest, Error> {
	let filter = match arg(args, 2)? {
		WireValue::Null => None,
		WireValue::String(expr) => Some(rpn::compile(expr)?),
		_ => return Err(Error::InvalidArgument("invalid filter expression".into())),
	};
	let order = parse_order(arg(args, 3)?)?;
	let offset = arg(args, 4)?.as_long()?;
	let limit = arg(args, 5)?.as_long()?;
	let fields = parse_fields_spec(arg(args, 6)?)?;
	let merge = args.get(7).map(parse_merge).transpose()?.flatten();
	Ok(FindRequest {
		mode,
		seeds,
		filter,
		order,
		offset,
		limit,
		fields,
		merge,
		..Default::default()
	})
}

fn cmd_hierarchy_find(e: &mut Engine, args: &[WireValue], w: &mut dyn ReplyWriter) -> Result<(), Error> {
	let seed = arg_node_id(args, 0)?;
	run_find(e, vec![seed], args, w)
}

fn cmd_hierarchy_findin(e: &mut Engine, args: &[WireValue], w: &mut dyn ReplyWriter) -> Result<(), Error> {
	let seeds = arg_node_ids(arg(args, 0)?)?;
	run_find(e, seeds, args, w)
}

// -- selva.aggregate / selva.aggregateRecursive (§4.7) --
//
// Same wire shape as find/findIn; the reply is a single count rather than
// the matched set itself.

fn cmd_aggregate(e: &mut Engine, args: &[WireValue], w: &mut dyn ReplyWriter) -> Result<(), Error> {
	let seed = arg_node_id(args, 0)?;
	let request = parse_find_request(vec![seed], args)?;
	graphdb_core::query::aggregate(&mut e.hierarchy, &mut e.index, &request, w)
}

/// Differs from `cmd_aggregate` only in how direction is chosen: arg 1 is
/// compiled as an RPN field-selector expression evaluated at every node,
/// driving `BfsExpression` traversal instead of a fixed mode token
/// (grounded on the original's recursive aggregate command).
fn cmd_aggregate_recursive(e: &mut Engine, args: &[WireValue], w: &mut dyn ReplyWriter) -> Result<(), Error> {
	use graphdb_core::hierarchy::TraverseMode;

	let seed = arg_node_id(args, 0)?;
	let field_selector_expr = rpn::compile(arg(args, 1)?.as_str()?)?;
	let mut request = parse_find_request_with_mode(vec![seed], TraverseMode::BfsExpression, args)?;
	request.field_selector_expr = Some(field_selector_expr);
	graphdb_core::query::aggregate(&mut e.hierarchy, &mut e.index, &request, w)
}

/// Read-only introspection used by the debugger tool referenced in §1's
/// out-of-scope note (we expose the command the CLI would call, not the
/// CLI itself): every live node id plus its direct children.
fn cmd_hierarchy_dump(e: &mut Engine, _args: &[WireValue], w: &mut dyn ReplyWriter) -> Result<(), Error> {
	let ids: Vec<NodeId> = e.hierarchy.node_ids().copied().collect();
	w.write_array_start(Some(ids.len()));
	for id in ids {
		let node = e.hierarchy.get(&id).expect("node_ids() only yields live ids");
		let children: Vec<NodeId> = node.children().copied().collect();
		w.write_array_start(Some(2));
		w.write_string(None, &id.to_string());
		w.write_array_start(Some(children.len()));
		for c in children {
			w.write_string(None, &c.to_string());
		}
		w.write_array_end();
		w.write_array_end();
	}
	w.write_array_end();
	Ok(())
}

// -- selva.rpn.eval* (§4.5, §6) --

fn eval_args(e: &Engine, args: &[WireValue]) -> Result<(NodeId, rpn::Expr, Vec<(Vec<u8>, bool)>), Error> {
	let key = arg_node_id(args, 0)?;
	let expr_src = arg(args, 1)?.as_str()?;
	let expr = rpn::compile(expr_src)?;
	let mut regs = Vec::new();
	for a in &args[2.min(args.len())..] {
		match a {
			WireValue::String(s) => regs.push((s.clone().into_bytes(), true)),
			WireValue::Long(l) => regs.push((l.to_string().into_bytes(), false)),
			WireValue::Double(d) => regs.push((d.to_string().into_bytes(), false)),
			_ => return Err(Error::InvalidArgument("rpn register args must be scalar".into())),
		}
	}
	if !e.hierarchy.contains(&key) {
		return Err(Error::NodeNotFound(key));
	}
	Ok((key, expr, regs))
}

fn build_ctx<'a>(e: &'a Engine, key: NodeId, regs: &[(Vec<u8>, bool)]) -> EvalContext<'a> {
	let mut ctx = EvalContext::new();
	ctx.set_hierarchy_node(&e.hierarchy, key);
	if let Some(node) = e.hierarchy.get(&key) {
		ctx.set_obj(&node.object);
	}
	for (i, (bytes, is_nan)) in regs.iter().enumerate() {
		// Register 0 is reserved for the current node id (§4.5); user
		// register arguments start at 1.
		ctx.set_reg((i + 1) as u8, bytes, *is_nan);
	}
	ctx
}

fn cmd_rpn_evalbool(e: &mut Engine, args: &[WireValue], w: &mut dyn ReplyWriter) -> Result<(), Error> {
	let (key, expr, regs) = eval_args(e, args)?;
	let ctx = build_ctx(e, key, &regs);
	w.write_long(rpn::eval_bool(&ctx, &expr)? as i64);
	Ok(())
}

fn cmd_rpn_evaldouble(e: &mut Engine, args: &[WireValue], w: &mut dyn ReplyWriter) -> Result<(), Error> {
	let (key, expr, regs) = eval_args(e, args)?;
	let ctx = build_ctx(e, key, &regs);
	w.write_double(rpn::eval_double(&ctx, &expr)?);
	Ok(())
}

fn cmd_rpn_evalstring(e: &mut Engine, args: &[WireValue], w: &mut dyn ReplyWriter) -> Result<(), Error> {
	let (key, expr, regs) = eval_args(e, args)?;
	let ctx = build_ctx(e, key, &regs);
	w.write_string(None, &rpn::eval_string(&ctx, &expr)?);
	Ok(())
}

fn cmd_rpn_evalset(e: &mut Engine, args: &[WireValue], w: &mut dyn ReplyWriter) -> Result<(), Error> {
	let (key, expr, regs) = eval_args(e, args)?;
	let ctx = build_ctx(e, key, &regs);
	let set = rpn::eval_set(&ctx, &expr)?;
	w.write_array_start(Some(set.len()));
	for elem in set.iter() {
		match elem {
			SetElement::Double(d) => w.write_double(d.0),
			SetElement::Long(l) => w.write_long(*l),
			SetElement::String(s) => w.write_string(None, s),
			SetElement::NodeId(n) => w.write_string(None, &n.to_string()),
		}
	}
	w.write_array_end();
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;

	fn engine() -> Engine {
		Engine::new(Arc::new(graphdb_core::snapshot::InMemoryReplicationSink::new()))
	}

	#[test]
	fn ping_replies_pong() {
		let mut e = engine();
		let mut out = Vec::new();
		let mut w = crate::proto::value::FrameValueWriter::new(&mut out);
		cmd_ping(&mut e, &[], &mut w).unwrap();
		let decoded = crate::proto::value::decode_message(&out).unwrap();
		assert_eq!(decoded, vec![WireValue::String("PONG".into())]);
	}

	#[test]
	fn lscmd_lists_every_registered_command() {
		let mut e = engine();
		let mut out = Vec::new();
		let mut w = crate::proto::value::FrameValueWriter::new(&mut out);
		cmd_lscmd(&mut e, &[], &mut w).unwrap();
		let decoded = crate::proto::value::decode_message(&out).unwrap();
		let WireValue::Array(rows) = &decoded[0] else { panic!("expected array") };
		assert_eq!(rows.len(), COMMANDS.len());
	}

	#[test]
	fn modify_creates_a_node_and_reports_updated() {
		let mut e = engine();
		let args = vec![
			WireValue::String("n1".into()),
			WireValue::String("".into()),
			WireValue::String("s".into()),
			WireValue::String("name".into()),
			WireValue::String("alice".into()),
		];
		let mut out = Vec::new();
		let mut w = crate::proto::value::FrameValueWriter::new(&mut out);
		cmd_modify(&mut e, &args, &mut w).unwrap();
		let decoded = crate::proto::value::decode_message(&out).unwrap();
		assert_eq!(decoded, vec![WireValue::Array(vec![WireValue::String("UPDATED".into())])]);
		assert!(e.hierarchy.contains(&NodeId::try_from("n1").unwrap()));
	}

	#[test]
	fn object_get_reads_back_a_field_set_via_modify() {
		let mut e = engine();
		apply_single_triplet(&mut e, NodeId::try_from("n1").unwrap(), "name", TripletOp::SetString("bob".into())).unwrap();
		let args = vec![WireValue::String("n1".into()), WireValue::String("name".into())];
		let mut out = Vec::new();
		let mut w = crate::proto::value::FrameValueWriter::new(&mut out);
		cmd_object_get(&mut e, &args, &mut w).unwrap();
		let decoded = crate::proto::value::decode_message(&out).unwrap();
		assert_eq!(decoded, vec![WireValue::String("bob".into())]);
	}

	#[test]
	fn unknown_command_id_is_rejected() {
		let mut e = engine();
		let err = dispatch(&mut e, 255, &[]).unwrap_err();
		assert!(matches!(err, Error::UnknownCommand(255)));
	}
}
