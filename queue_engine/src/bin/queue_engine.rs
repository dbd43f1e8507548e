use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::signal;
use tracing::info;
use uuid::Uuid;

use queue_engine::config::Config;
use queue_engine::coordinator::{Coordinator, LocalCoordinator, RedisCoordinator};
use queue_engine::engine::ConnectBackend;
use queue_engine::permissions::{PermissionAdapter, StaticPermissionAdapter};
use queue_engine::prober::BackendProbe;
use queue_engine::types::{PlayerId, ProxyId, ServerName};
use queue_engine::QueueSystem;

/// Stand-in for the real proxy's connection handoff, which lives outside this
/// crate entirely. Always accepts, so the CLI is immediately useful for
/// exercising the queue/admin surface without a Minecraft backend on the other
/// end.
struct NoopBackend;

#[async_trait]
impl ConnectBackend for NoopBackend {
	async fn connect(&self, player: PlayerId, server: &ServerName) -> bool {
		info!(%player, %server, "connect (noop backend, always succeeds)");
		true
	}
}

/// Stand-in for the real status-protocol/RCON probe. Reports every backend
/// reachable with no player count, so `queue_delay`'s WAITING -> ONLINE
/// progression is still observable end to end.
struct NoopProbe;

#[async_trait]
impl BackendProbe for NoopProbe {
	async fn ping(&self, _server: &ServerName) -> bool {
		true
	}

	async fn player_count(&self, _server: &ServerName) -> Option<usize> {
		None
	}
}

/// Map-valued config fields don't fit comfortably as repeated CLI flags; this
/// is the TOML shape merged on top of the flag/env-derived `Config` before the
/// engine is built.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
	#[serde(default)]
	no_queue_servers: Vec<String>,
	#[serde(default)]
	master_proxy_ids: Vec<String>,
	#[serde(default)]
	player_caps: HashMap<String, usize>,
}

fn merge_config_file(config: &mut Config, file: ConfigFile) {
	config.no_queue_servers = file.no_queue_servers;
	config.master_proxy_ids = file.master_proxy_ids.into_iter().map(|id| ProxyId::from(id.as_str())).collect();
	config.player_caps = file.player_caps;
}

#[derive(Parser)]
#[command(name = "queue_engine", about = "Priority-ordered, cross-proxy-coordinated backend queueing engine")]
struct Cli {
	#[command(flatten)]
	config: Config,

	#[arg(long, env = "CLUSTER", default_value_t = false, help = "Use a Redis-backed coordinator instead of the single-proxy in-process one")]
	cluster: bool,

	#[arg(long, env = "REDIS_URL", help = "Redis connection string; required when --cluster is set")]
	redis_url: Option<String>,

	#[arg(long, env = "PROXY_ID", default_value = "proxy-1", help = "This proxy instance's id, used for master election and message routing")]
	proxy_id: String,

	#[arg(long, env = "CONFIG_FILE", help = "TOML file providing no_queue_servers/master_proxy_ids/player_caps")]
	config_file: Option<PathBuf>,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
	/// Start the send/prober/feedback ticks and the disconnect-timeout
	/// scheduler, and run until interrupted. This is the default.
	Run,
	/// Drive the Control Surface directly against a freshly constructed
	/// engine, then exit. Useful for operators and for exercising the engine
	/// without a running proxy; state does not persist between invocations.
	Queueadmin {
		#[command(subcommand)]
		action: AdminAction,
	},
}

#[derive(Subcommand)]
enum AdminAction {
	Listqueues,
	Pause { server: String },
	Unpause { server: String },
	Add { player: Uuid, server: String },
	Addall { from: String, to: String },
	Remove { player: Uuid, server: Option<String> },
	Removeall { server: String },
}

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

	let mut cli = Cli::parse();
	if let Some(path) = cli.config_file.clone() {
		let raw = std::fs::read_to_string(&path).with_context(|| format!("reading config file {}", path.display()))?;
		let file: ConfigFile = toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))?;
		merge_config_file(&mut cli.config, file);
	}

	let self_id = ProxyId::from(cli.proxy_id.as_str());
	let eligible_masters = if cli.config.master_proxy_ids.is_empty() {
		vec![self_id.clone()]
	} else {
		cli.config.master_proxy_ids.clone()
	};

	let coordinator: Arc<dyn Coordinator> = if cli.cluster {
		let url = cli.redis_url.clone().context("--redis-url is required when --cluster is set")?;
		Arc::new(RedisCoordinator::connect(&url).await?)
	} else {
		Arc::new(LocalCoordinator::new())
	};
	let permissions: Arc<dyn PermissionAdapter> = Arc::new(StaticPermissionAdapter::default());

	let system = QueueSystem::new(
		self_id,
		eligible_masters,
		coordinator,
		Arc::new(NoopBackend),
		Arc::new(NoopProbe),
		permissions,
		cli.config,
		prometheus::Registry::new(),
	)?;

	match cli.command.unwrap_or(Command::Run) {
		Command::Run => run(system).await,
		Command::Queueadmin { action } => queueadmin(&system, action).await,
	}
}

async fn run(system: QueueSystem<NoopBackend, NoopProbe>) -> Result<()> {
	info!("starting queue engine");
	let tasks = system.start().await;

	wait_for_shutdown_signal().await;
	info!("shutdown signal received, stopping ticks");
	system.shutdown().await;

	let _ = tokio::join!(tasks.engine, tasks.prober, tasks.feedback, tasks.inbound, tasks.disconnect_timeouts);
	info!("queue engine stopped");
	Ok(())
}

async fn wait_for_shutdown_signal() {
	let ctrl_c = async {
		signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		signal::unix::signal(signal::unix::SignalKind::terminate())
			.expect("failed to install SIGTERM handler")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		() = ctrl_c => {},
		() = terminate => {},
	}
}

async fn queueadmin(system: &QueueSystem<NoopBackend, NoopProbe>, action: AdminAction) -> Result<()> {
	let handle = &system.handle;
	match action {
		AdminAction::Listqueues => {
			for listing in handle.list().await {
				println!("{:<24} size={:<5} paused={:<5} online={}", listing.server.to_string(), listing.size, listing.paused, listing.online);
			}
		}
		AdminAction::Pause { server } => {
			handle.pause(&ServerName::from(server.as_str())).await?;
			println!("paused {server}");
		}
		AdminAction::Unpause { server } => {
			handle.unpause(&ServerName::from(server.as_str())).await?;
			println!("unpaused {server}");
		}
		AdminAction::Add { player, server } => {
			let position = handle.add(PlayerId::from_uuid(player), ServerName::from(server.as_str())).await?;
			println!("queued {player} for {server} at position {position}");
		}
		AdminAction::Addall { from, to } => {
			let moved = handle.addall(&ServerName::from(from.as_str()), &ServerName::from(to.as_str())).await;
			println!("moved {moved} players from {from} to {to}");
		}
		AdminAction::Remove { player, server } => {
			let removed = handle.remove(PlayerId::from_uuid(player), server.as_deref().map(ServerName::from)).await?;
			println!("removed {player} from {removed} queue(s)");
		}
		AdminAction::Removeall { server } => {
			let removed = handle.removeall(&ServerName::from(server.as_str())).await;
			println!("cleared {removed} entries from {server}");
		}
	}
	Ok(())
}
