//! Pointer values with a pluggable ops vtable (Design Notes §9, §3.1).
//!
//! A POINTER value's payload is an opaque handle plus a reference to a
//! `PointerOps` trait object registered at process start by a stable `u16`
//! `type_id`. The slot owns the handle (and will call `free` on drop) iff
//! the ops were registered with a destructor; otherwise the pointer is a
//! borrowed reference whose lifetime is the caller's responsibility (§3
//! Ownership) and drop is a no-op.
use std::any::Any;
use std::fmt;
use std::io;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::err::Error;
use crate::val::ReplyWriter;

pub trait PointerOps: Send + Sync {
	fn type_id(&self) -> u16;
	fn len(&self, handle: &dyn Any) -> usize;
	fn reply(&self, handle: &dyn Any, out: &mut dyn ReplyWriter) -> Result<(), Error>;
	fn save(&self, handle: &dyn Any, out: &mut dyn io::Write) -> Result<(), Error>;
	fn load(&self, input: &mut dyn io::Read) -> Result<Box<dyn Any + Send + Sync>, Error>;
	/// Called exactly once when the owning key is deleted or overwritten, iff
	/// this pointer is owning (§3 invariant: "destructor is invoked exactly
	/// once"). Non-owning pointer types simply don't override this.
	fn free(&self, _handle: Box<dyn Any + Send + Sync>) {}
}

pub type PointerType = Arc<dyn PointerOps>;

/// Process-wide registry of pointer ops vtables keyed by `type_id`,
/// populated at startup (Design Notes §9: "registration occurs at startup
/// via a static table").
pub static REGISTRY: Lazy<PointerTypeRegistry> = Lazy::new(PointerTypeRegistry::new);

#[derive(Default)]
pub struct PointerTypeRegistry {
	types: DashMap<u16, PointerType>,
}

impl PointerTypeRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&self, ops: PointerType) {
		self.types.insert(ops.type_id(), ops);
	}

	pub fn get(&self, type_id: u16) -> Option<PointerType> {
		self.types.get(&type_id).map(|e| e.clone())
	}
}

pub struct PointerSlot {
	ops: PointerType,
	handle: Option<Box<dyn Any + Send + Sync>>,
	owning: bool,
}

impl PointerSlot {
	pub fn new(ops: PointerType, handle: Box<dyn Any + Send + Sync>, owning: bool) -> Self {
		Self {
			ops,
			handle: Some(handle),
			owning,
		}
	}

	pub fn type_id(&self) -> u16 {
		self.ops.type_id()
	}

	fn handle(&self) -> &dyn Any {
		self.handle.as_deref().expect("pointer slot handle taken before drop")
	}

	pub fn len(&self) -> usize {
		self.ops.len(self.handle())
	}

	pub fn reply(&self, out: &mut dyn ReplyWriter) -> Result<(), Error> {
		self.ops.reply(self.handle(), out)
	}

	pub fn save(&self, out: &mut dyn io::Write) -> Result<(), Error> {
		self.ops.save(self.handle(), out)
	}
}

impl Drop for PointerSlot {
	fn drop(&mut self) {
		if self.owning {
			if let Some(handle) = self.handle.take() {
				self.ops.free(handle);
			}
		}
	}
}

impl fmt::Debug for PointerSlot {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PointerSlot")
			.field("type_id", &self.type_id())
			.field("owning", &self.owning)
			.finish()
	}
}
