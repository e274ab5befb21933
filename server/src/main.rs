//! `graphdbd`: the TCP front end for the in-memory hierarchical graph
//! database engine (C11, §4.10). Accepts connections up to a fixed-capacity
//! pool, serializes every command through one `tokio::sync::Mutex<Engine>`
//! (§5.1), and snapshots the hierarchy to disk on a timer and at shutdown.
#[macro_use]
extern crate tracing;

mod command;
mod config;
mod conn;
mod engine;
mod err;
mod pool;
mod proto;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Mutex;

use config::Config;
use engine::Engine;

#[tokio::main]
async fn main() {
	let config = Config::parse_args();
	tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::new(&config.log_filter)).init();

	let replication = Arc::new(graphdb_core::snapshot::InMemoryReplicationSink::new());

	let engine = match load_initial_engine(&config, replication.clone()) {
		Ok(engine) => engine,
		Err(e) => {
			error!(error = %e, "failed to load initial snapshot, starting empty");
			Engine::new(replication.clone())
		}
	};
	let engine = Arc::new(Mutex::new(engine));
	let pool = Arc::new(pool::ConnPool::new(config.max_connections));

	if config.snapshot_interval_secs > 0 {
		spawn_snapshot_timer(engine.clone(), config.clone());
	}

	let listener = match TcpListener::bind(&config.bind).await {
		Ok(l) => l,
		Err(e) => {
			error!(error = %e, addr = %config.bind, "failed to bind listener");
			return;
		}
	};
	info!(addr = %config.bind, max_connections = config.max_connections, "graphdbd listening");

	let mut shutdown = std::pin::pin!(shutdown_signal());
	loop {
		tokio::select! {
			accepted = listener.accept() => {
				let (socket, peer) = match accepted {
					Ok(v) => v,
					Err(e) => {
						warn!(error = %e, "accept failed");
						continue;
					}
				};
				let Some(slot) = pool.claim_with_retry().await else {
					warn!(%peer, "rejecting connection, pool exhausted");
					continue;
				};
				let engine = engine.clone();
				let pool = pool.clone();
				tokio::spawn(async move {
					debug!(%peer, slot, "connection accepted");
					conn::Connection::new(socket, engine).run().await;
					pool.release(slot);
					debug!(%peer, slot, "connection closed");
				});
			}
			_ = &mut shutdown => {
				info!("shutdown signal received");
				break;
			}
		}
	}

	save_snapshot(&engine, &config).await;
}

fn load_initial_engine(config: &Config, replication: Arc<dyn graphdb_core::snapshot::ReplicationSink>) -> Result<Engine, err::Error> {
	let Some(path) = &config.snapshot_path else {
		return Ok(Engine::new(replication));
	};
	match std::fs::read(path) {
		Ok(bytes) => Ok(Engine::from_snapshot(&bytes, replication)?),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Engine::new(replication)),
		Err(e) => Err(err::Error::Io(e)),
	}
}

async fn save_snapshot(engine: &Arc<Mutex<Engine>>, config: &Config) {
	let Some(path) = &config.snapshot_path else { return };
	let bytes = match engine.lock().await.save_snapshot() {
		Ok(b) => b,
		Err(e) => {
			error!(error = %e, "failed to serialize snapshot");
			return;
		}
	};
	if let Err(e) = std::fs::write(path, bytes) {
		error!(error = %e, %path, "failed to write snapshot file");
	} else {
		info!(%path, "snapshot saved");
	}
}

fn spawn_snapshot_timer(engine: Arc<Mutex<Engine>>, config: Config) {
	tokio::spawn(async move {
		let mut interval = tokio::time::interval(std::time::Duration::from_secs(config.snapshot_interval_secs));
		loop {
			interval.tick().await;
			save_snapshot(&engine, &config).await;
		}
	});
}

async fn shutdown_signal() {
	let ctrl_c = async {
		tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
	};
	#[cfg(unix)]
	let terminate = async {
		tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
			.expect("failed to install sigterm handler")
			.recv()
			.await;
	};
	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {}
		_ = terminate => {}
	}
}
