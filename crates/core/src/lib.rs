#[macro_use]
extern crate tracing;

#[macro_use]
mod mac;

pub mod alias;
pub mod cnf;
pub mod err;
pub mod hierarchy;
pub mod id;
pub mod index;
pub mod modify;
pub mod query;
pub mod rpn;
pub mod snapshot;
pub mod sub;
pub mod trx;
pub mod val;

pub use err::Error;
pub use hierarchy::{Hierarchy, Node};
pub use id::NodeId;
