//! Engine-wide tunables, overridable via environment variables at process start.
use crate::lazy_env_parse;
use once_cell::sync::Lazy;

/// Number of concurrent visitation lanes a single `Hierarchy` can allocate at
/// once (§4.2). Bounded by the width of the bitmap word we use for `cl`/`ex`.
pub static TRAVERSAL_LANE_WIDTH: Lazy<u32> =
	lazy_env_parse!("GRAPHDB_TRAVERSAL_LANE_WIDTH", u32, 64);

/// Maximum recursion depth for dotted-path object lookups, to bound pathological
/// inputs like `a.a.a.a...`.
pub static MAX_OBJECT_PATH_DEPTH: Lazy<usize> =
	lazy_env_parse!("GRAPHDB_MAX_OBJECT_PATH_DEPTH", usize, 128);

/// Default number of live auto-index control blocks before eviction kicks in.
pub static DEFAULT_MAX_INDICES: Lazy<usize> = lazy_env_parse!("GRAPHDB_MAX_INDICES", usize, 100);

/// Hit-rate threshold (hits per admission window) above which a cold filter
/// clause is promoted to `building` (§4.8).
pub static INDEX_ADMISSION_THRESHOLD: Lazy<u32> =
	lazy_env_parse!("GRAPHDB_INDEX_ADMISSION_THRESHOLD", u32, 3);
