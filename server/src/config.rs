//! Server-wide CLI configuration (§5.1, §6): everything the teacher's
//! engine tunables (`graphdb_core::cnf`) leave to the binary — bind
//! address, connection pool size, snapshot path, log verbosity.
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "graphdbd", about = "In-memory hierarchical graph database server")]
pub struct Config {
	/// Address to bind the TCP listener to.
	#[arg(long, default_value = "127.0.0.1:7777")]
	pub bind: String,

	/// Maximum number of concurrently open connections (§5.1's fixed-capacity
	/// connection pool).
	#[arg(long, default_value_t = 1024)]
	pub max_connections: usize,

	/// Maximum number of concurrently open outgoing streams per connection
	/// (§5.1's per-connection stream-slot bitmap, capped at 64 bits).
	#[arg(long, default_value_t = 64)]
	pub max_streams_per_conn: usize,

	/// Path to load a snapshot from at startup, if it exists (§4.11).
	#[arg(long)]
	pub snapshot_path: Option<String>,

	/// Seconds between automatic snapshot saves; 0 disables periodic saves.
	#[arg(long, default_value_t = 300)]
	pub snapshot_interval_secs: u64,

	/// Tracing env-filter directive, e.g. "info" or "graphdbd=debug".
	#[arg(long, default_value = "info")]
	pub log_filter: String,
}

impl Config {
	pub fn parse_args() -> Self {
		Self::parse()
	}
}
