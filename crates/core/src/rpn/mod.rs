//! The RPN filter/expression engine (C6, §4.5): a small postfix language
//! evaluated against a typed value stack, a register file, and handles to
//! the current node/object/hierarchy.
mod compile;
mod value;

pub use compile::{compile, Expr};
pub use value::RpnValue;

use crate::err::Error;
use crate::hierarchy::Hierarchy;
use crate::id::NodeId;
use crate::val::TypedObject;
use compile::Op;

/// Register 0 is reserved for the current node id (§4.5).
pub const CURRENT_NODE_REGISTER: u8 = 0;

#[derive(Debug, Clone, Default)]
struct Register {
	value: RpnValue,
}

impl Default for RpnValue {
	fn default() -> Self {
		RpnValue::Nil
	}
}

/// Execution context threaded through `eval_*`: the register file plus
/// optional handles to the node being evaluated, its object, and the
/// hierarchy it lives in (needed by `field`, `ancestor`, `descendant`).
pub struct EvalContext<'a> {
	registers: Vec<Register>,
	hierarchy: Option<&'a Hierarchy>,
	node: Option<NodeId>,
	obj: Option<&'a TypedObject>,
}

impl<'a> Default for EvalContext<'a> {
	fn default() -> Self {
		Self {
			registers: Vec::new(),
			hierarchy: None,
			node: None,
			obj: None,
		}
	}
}

impl<'a> EvalContext<'a> {
	pub fn new() -> Self {
		Self::default()
	}

	/// Stores a register value. `is_nan` marks `bytes` as not convertible to
	/// a number (§4.5 `set_reg`); otherwise a numeric parse is attempted
	/// first and the raw text is kept only as a fallback.
	pub fn set_reg(&mut self, index: u8, bytes: &[u8], is_nan: bool) {
		let idx = index as usize;
		if self.registers.len() <= idx {
			self.registers.resize_with(idx + 1, Register::default);
		}
		let text = String::from_utf8_lossy(bytes).into_owned();
		self.registers[idx].value = if is_nan {
			RpnValue::String(text)
		} else {
			match text.parse::<i64>() {
				Ok(n) => RpnValue::Long(n),
				Err(_) => match text.parse::<f64>() {
					Ok(n) => RpnValue::Double(n),
					Err(_) => RpnValue::String(text),
				},
			}
		};
	}

	pub fn set_hierarchy_node(&mut self, hierarchy: &'a Hierarchy, node: NodeId) {
		self.hierarchy = Some(hierarchy);
		self.node = Some(node);
		self.set_reg(CURRENT_NODE_REGISTER, node.to_string().as_bytes(), true);
	}

	pub fn set_obj(&mut self, obj: &'a TypedObject) {
		self.obj = Some(obj);
	}

	fn register(&self, index: u8) -> Result<&RpnValue, Error> {
		self.registers.get(index as usize).map(|r| &r.value).ok_or(Error::UndefinedRegister(index))
	}
}

struct Machine<'ctx, 'a> {
	ctx: &'ctx EvalContext<'a>,
	stack: Vec<RpnValue>,
}

impl<'ctx, 'a> Machine<'ctx, 'a> {
	fn pop(&mut self) -> Result<RpnValue, Error> {
		self.stack.pop().ok_or(Error::StackUnderflow)
	}

	fn pop_double(&mut self) -> Result<f64, Error> {
		let v = self.pop()?;
		v.as_double().ok_or_else(|| Error::TypeMismatch {
			expected: "double",
			found: v.type_name(),
		})
	}

	fn pop_string(&mut self) -> Result<String, Error> {
		let v = self.pop()?;
		match v {
			RpnValue::String(s) => Ok(s),
			other => Err(Error::TypeMismatch {
				expected: "string",
				found: other.type_name(),
			}),
		}
	}

	fn run(&mut self, ops: &[Op]) -> Result<(), Error> {
		for op in ops {
			self.step(op)?;
		}
		Ok(())
	}

	fn step(&mut self, op: &Op) -> Result<(), Error> {
		match op {
			Op::PushDouble(v) => self.stack.push(RpnValue::Double(*v)),
			Op::PushLong(v) => self.stack.push(RpnValue::Long(*v)),
			Op::PushString(s) => self.stack.push(RpnValue::String(s.clone())),
			Op::PushReg(i) => self.stack.push(self.ctx.register(*i)?.clone()),
			Op::Add => self.binary_arith(|a, b| a + b)?,
			Op::Sub => self.binary_arith(|a, b| a - b)?,
			Op::Mul => self.binary_arith(|a, b| a * b)?,
			Op::Div => {
				let b = self.pop_double()?;
				let a = self.pop_double()?;
				if b == 0.0 {
					return Err(Error::ArithmeticDomain);
				}
				self.stack.push(RpnValue::Double(a / b));
			}
			Op::Neg => {
				let a = self.pop_double()?;
				self.stack.push(RpnValue::Double(-a));
			}
			Op::Eq => self.compare(|o| o == std::cmp::Ordering::Equal)?,
			Op::Ne => self.compare(|o| o != std::cmp::Ordering::Equal)?,
			Op::Lt => self.compare(|o| o == std::cmp::Ordering::Less)?,
			Op::Le => self.compare(|o| o != std::cmp::Ordering::Greater)?,
			Op::Gt => self.compare(|o| o == std::cmp::Ordering::Greater)?,
			Op::Ge => self.compare(|o| o != std::cmp::Ordering::Less)?,
			Op::StrEq => {
				let b = self.pop_string()?;
				let a = self.pop_string()?;
				self.stack.push(bool_value(a == b));
			}
			Op::StrContains => {
				let needle = self.pop_string()?;
				let haystack = self.pop_string()?;
				self.stack.push(bool_value(haystack.contains(&needle)));
			}
			Op::Field => {
				let name = self.pop_string()?;
				let obj = self.ctx.obj.ok_or_else(|| Error::Other("field: no object installed in evaluation context".into()))?;
				let value = obj
					.get_type(&name)
					.ok()
					.filter(|t| *t != crate::val::Tag::Null)
					.and(obj_value(obj, &name));
				self.stack.push(value.unwrap_or(RpnValue::Nil));
			}
			Op::SetUnion => {
				let b = self.pop()?;
				let a = self.pop()?;
				match (a, b) {
					(RpnValue::Set(mut a), RpnValue::Set(b)) => {
						a.union(&b).map_err(|_| Error::TypeMismatch {
							expected: "set",
							found: "set",
						})?;
						self.stack.push(RpnValue::Set(a));
					}
					_ => {
						return Err(Error::TypeMismatch {
							expected: "set",
							found: "non-set",
						})
					}
				}
			}
			Op::SetHasMember => {
				let member = self.pop()?;
				let set = self.pop()?;
				let set = match set {
					RpnValue::Set(s) => s,
					other => {
						return Err(Error::TypeMismatch {
							expected: "set",
							found: other.type_name(),
						})
					}
				};
				let elem = rpn_value_to_set_element(&member)?;
				self.stack.push(bool_value(set.contains(&elem)));
			}
			Op::HasAncestor | Op::HasDescendant => {
				let target = self.pop_string()?;
				let target_id = NodeId::try_from(target.as_str())?;
				let hierarchy = self.ctx.hierarchy.ok_or_else(|| Error::Other("ancestor/descendant test requires an installed hierarchy".into()))?;
				let node = self.ctx.node.ok_or_else(|| Error::Other("ancestor/descendant test requires an installed node".into()))?;
				let found = if matches!(op, Op::HasAncestor) {
					hierarchy.find_ancestors(node)?.contains(&target_id)
				} else {
					hierarchy.find_descendants(node)?.contains(&target_id)
				};
				self.stack.push(bool_value(found));
			}
			Op::And => {
				let b = self.pop()?;
				let a = self.pop()?;
				self.stack.push(bool_value(a.truthy() && b.truthy()));
			}
			Op::Or => {
				let b = self.pop()?;
				let a = self.pop()?;
				self.stack.push(bool_value(a.truthy() || b.truthy()));
			}
			Op::Not => {
				let a = self.pop()?;
				self.stack.push(bool_value(!a.truthy()));
			}
		}
		Ok(())
	}

	fn binary_arith(&mut self, f: impl Fn(f64, f64) -> f64) -> Result<(), Error> {
		let b = self.pop_double()?;
		let a = self.pop_double()?;
		self.stack.push(RpnValue::Double(f(a, b)));
		Ok(())
	}

	fn compare(&mut self, pred: impl Fn(std::cmp::Ordering) -> bool) -> Result<(), Error> {
		let b = self.pop()?;
		let a = self.pop()?;
		let ordering = match (&a, &b) {
			(RpnValue::String(a), RpnValue::String(b)) => a.cmp(b),
			_ => {
				let a = a.as_double().ok_or_else(|| Error::TypeMismatch {
					expected: "double",
					found: a.type_name(),
				})?;
				let b = b.as_double().ok_or_else(|| Error::TypeMismatch {
					expected: "double",
					found: b.type_name(),
				})?;
				a.partial_cmp(&b).ok_or(Error::ArithmeticDomain)?
			}
		};
		self.stack.push(bool_value(pred(ordering)));
		Ok(())
	}
}

fn bool_value(b: bool) -> RpnValue {
	RpnValue::Long(b as i64)
}

fn obj_value(obj: &TypedObject, name: &str) -> Option<RpnValue> {
	let tag = obj.get_type(name).ok()?;
	if tag == crate::val::Tag::Double {
		obj.get_double(name).ok().map(RpnValue::Double)
	} else if tag == crate::val::Tag::Long {
		obj.get_long(name).ok().map(RpnValue::Long)
	} else if tag == crate::val::Tag::String {
		obj.get_string(name).ok().map(RpnValue::String)
	} else {
		None
	}
}

fn rpn_value_to_set_element(v: &RpnValue) -> Result<crate::val::SetElement, Error> {
	use crate::val::{OrderedFloat, SetElement};
	Ok(match v {
		RpnValue::Long(n) => SetElement::Long(*n),
		RpnValue::Double(n) => SetElement::Double(OrderedFloat(*n)),
		RpnValue::String(s) => SetElement::String(s.clone()),
		_ => {
			return Err(Error::TypeMismatch {
				expected: "set element",
				found: v.type_name(),
			})
		}
	})
}

fn run_and_pop(expr: &Expr, ctx: &EvalContext) -> Result<RpnValue, Error> {
	let mut machine = Machine {
		ctx,
		stack: Vec::new(),
	};
	machine.run(&expr.0)?;
	machine.stack.pop().ok_or(Error::StackUnderflow)
}

pub fn eval_bool(ctx: &EvalContext, expr: &Expr) -> Result<bool, Error> {
	Ok(run_and_pop(expr, ctx)?.truthy())
}

pub fn eval_double(ctx: &EvalContext, expr: &Expr) -> Result<f64, Error> {
	let v = run_and_pop(expr, ctx)?;
	v.as_double().ok_or_else(|| Error::TypeMismatch {
		expected: "double",
		found: v.type_name(),
	})
}

pub fn eval_string(ctx: &EvalContext, expr: &Expr) -> Result<String, Error> {
	let v = run_and_pop(expr, ctx)?;
	match v {
		RpnValue::String(s) => Ok(s),
		other => Err(Error::TypeMismatch {
			expected: "string",
			found: other.type_name(),
		}),
	}
}

pub fn eval_set(ctx: &EvalContext, expr: &Expr) -> Result<crate::val::ValueSet, Error> {
	let v = run_and_pop(expr, ctx)?;
	match v {
		RpnValue::Set(s) => Ok(s),
		other => Err(Error::TypeMismatch {
			expected: "set",
			found: other.type_name(),
		}),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::hierarchy::RootPolicy;
	use crate::val::Value;

	#[test]
	fn arithmetic_round_trips() {
		let expr = compile("2 3 +").unwrap();
		let ctx = EvalContext::new();
		assert_eq!(eval_double(&ctx, &expr).unwrap(), 5.0);
	}

	#[test]
	fn comparison_yields_bool_like_long() {
		let expr = compile("3 2 >").unwrap();
		let ctx = EvalContext::new();
		assert!(eval_bool(&ctx, &expr).unwrap());
	}

	#[test]
	fn field_fetch_reads_from_installed_object() {
		let mut obj = TypedObject::new();
		obj.set("score", Value::Double(9.5)).unwrap();
		let mut ctx = EvalContext::new();
		ctx.set_obj(&obj);
		let expr = compile(r#""score" field"#).unwrap();
		assert_eq!(eval_double(&ctx, &expr).unwrap(), 9.5);
	}

	#[test]
	fn stack_underflow_is_reported() {
		let expr = compile("+").unwrap();
		let ctx = EvalContext::new();
		assert!(matches!(eval_double(&ctx, &expr), Err(Error::StackUnderflow)));
	}

	#[test]
	fn divide_by_zero_is_an_arithmetic_domain_error() {
		let expr = compile("1 0 /").unwrap();
		let ctx = EvalContext::new();
		assert!(matches!(eval_double(&ctx, &expr), Err(Error::ArithmeticDomain)));
	}

	#[test]
	fn ancestor_test_consults_the_installed_hierarchy() {
		let mut h = Hierarchy::new();
		let a = NodeId::parse(b"a").unwrap();
		let b = NodeId::parse(b"b").unwrap();
		h.add(a, &[], &[], RootPolicy::NoRoot).unwrap();
		h.add(b, &[a], &[], RootPolicy::NoRoot).unwrap();

		let mut ctx = EvalContext::new();
		ctx.set_hierarchy_node(&h, b);
		let expr = compile(r#""a" ancestor"#).unwrap();
		assert!(eval_bool(&ctx, &expr).unwrap());
	}
}
