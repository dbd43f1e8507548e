use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::coordinator::{Coordinator, Message, Topic};
use crate::metrics::Metrics;
use crate::store::{QueueStore, ServerStatus};
use crate::types::{PlayerId, ProxyId, ServerName};

/// External collaborator that actually hands a player off to a backend. The
/// engine only ever learns success/failure; everything about the Minecraft
/// wire protocol, the player's current connection, and the backend's accept/
/// refuse decision lives behind this trait, outside this crate's scope.
#[async_trait]
pub trait ConnectBackend: Send + Sync {
	/// Attempt to connect `player` to `server`. Returns `true` on acceptance.
	async fn connect(&self, player: PlayerId, server: &ServerName) -> bool;
}

/// Ordered-list-intersect-live-peers master election. There is no lease and no
/// handoff: every call recomputes from the static eligibility list and the
/// coordinator's current peer set.
pub struct MasterElection {
	eligible: Vec<ProxyId>,
}

impl MasterElection {
	#[must_use]
	pub const fn new(eligible: Vec<ProxyId>) -> Self {
		Self { eligible }
	}

	/// The currently elected master, or `None` if no eligible id is live.
	pub async fn current_master(&self, coordinator: &dyn Coordinator) -> Option<ProxyId> {
		let live = coordinator.peer_set().await.ok()?;
		self.eligible.iter().find(|id| live.contains(id)).cloned()
	}

	pub async fn is_master(&self, self_id: &ProxyId, coordinator: &dyn Coordinator) -> bool {
		self.current_master(coordinator).await.as_ref() == Some(self_id)
	}
}

#[derive(Debug, Clone, Default)]
pub struct EngineTickStats {
	pub cycles_completed: u64,
	pub sends_issued: u64,
	pub sends_succeeded: u64,
	pub sends_failed: u64,
	pub max_retry_drops: u64,
	pub cluster_offline_drops: u64,
}

/// Head-of-line send tick, running only while this proxy considers itself
/// master. Per-queue decisions are made under that queue's own mutex (via
/// `QueueStore::with_queue`), released before the network round trip, and
/// re-acquired only to apply the completion — the same "decide, release,
/// await, reapply" shape the retry/backoff logic in `Worker::run` uses, just
/// scoped to one queue entry rather than a whole batch.
pub struct QueueEngine<B: ConnectBackend> {
	self_id: ProxyId,
	store: Arc<QueueStore>,
	coordinator: Arc<dyn Coordinator>,
	connect: Arc<B>,
	config: Arc<RwLock<Config>>,
	metrics: Metrics,
	election: RwLock<MasterElection>,
	shutdown: CancellationToken,
}

impl<B: ConnectBackend + 'static> QueueEngine<B> {
	pub fn new(
		self_id: ProxyId, eligible_masters: Vec<ProxyId>, store: Arc<QueueStore>, coordinator: Arc<dyn Coordinator>, connect: Arc<B>,
		config: Arc<RwLock<Config>>, metrics: Metrics, shutdown: CancellationToken,
	) -> Self {
		Self {
			election: RwLock::new(MasterElection::new(eligible_masters)),
			self_id,
			store,
			coordinator,
			connect,
			config,
			metrics,
			shutdown,
		}
	}

	/// Replace the master-eligibility list, e.g. after a config reload. Takes
	/// `&self` rather than `&mut self` since the engine is normally shared via
	/// `Arc` once its tick loop is spawned.
	pub async fn set_eligible_masters(&self, eligible: Vec<ProxyId>) {
		*self.election.write().await = MasterElection::new(eligible);
	}

	#[must_use]
	pub async fn is_master(&self) -> bool {
		self.election.read().await.is_master(&self.self_id, self.coordinator.as_ref()).await
	}

	/// Attempt an immediate connect for `player` to `server`, bypassing the
	/// queue store entirely. Used by the Control Surface's `join` for backends
	/// listed in `no_queue_servers`, which skip the waiting line.
	pub async fn direct_connect(&self, player: PlayerId, server: &ServerName) -> bool {
		self.connect.connect(player, server).await
	}

	/// Spawn the recurring send tick, driven by `send_delay`, until cancelled.
	pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<EngineTickStats> {
		tokio::spawn(async move { self.run().await })
	}

	async fn run(self: Arc<Self>) -> EngineTickStats {
		let mut stats = EngineTickStats::default();
		let mut period = self.config.read().await.send_delay;
		let mut ticker = interval(period);

		info!(period_ms = period.as_millis(), "send tick starting");
		loop {
			tokio::select! {
				() = self.shutdown.cancelled() => {
					info!("send tick received shutdown signal");
					break;
				}
				_ = ticker.tick() => {
					self.tick(&mut stats).await;
					stats.cycles_completed += 1;
					if stats.cycles_completed % 100 == 0 {
						debug!(cycles = stats.cycles_completed, "send tick heartbeat");
					}
					// `reload_config` may have changed `send_delay`; a config reload
					// is expected to restart affected ticks, so pick up the new
					// period on the next iteration rather than waiting for restart.
					let new_period = self.config.read().await.send_delay;
					if new_period != period {
						info!(old_ms = period.as_millis(), new_ms = new_period.as_millis(), "send tick period changed by reload");
						period = new_period;
						ticker = interval(period);
					}
				}
			}
		}
		info!(
			cycles = stats.cycles_completed,
			issued = stats.sends_issued,
			succeeded = stats.sends_succeeded,
			failed = stats.sends_failed,
			"send tick shutting down"
		);
		stats
	}

	/// Run one pass over every known queue. Public so scenario tests can step the
	/// engine deterministically instead of waiting on the real interval.
	pub async fn tick(&self, stats: &mut EngineTickStats) {
		if !self.config.read().await.enabled {
			return;
		}
		if !self.is_master().await {
			return;
		}
		for server in self.store.server_names() {
			self.restore_from_snapshot(&server).await;
			if let Err(error) = self.tick_one_queue(&server, stats).await {
				error!(%error, server = %server, "error in send tick for queue");
			}
			self.publish_snapshot(&server).await;
		}
	}

	/// If this queue is currently empty locally, try to resume it from the
	/// coordinator's last cached snapshot: a proxy newly elected master for a
	/// queue it has never served locally has no other record of who was waiting.
	async fn restore_from_snapshot(&self, server: &ServerName) {
		if self.store.peek_head(server).await.is_some() {
			return;
		}
		let Ok(Some(value)) = self.coordinator.snapshot_get(server.as_str()).await else {
			return;
		};
		let Ok(entries) = serde_json::from_value(value) else {
			return;
		};
		self.store.restore_if_empty(server, entries).await;
	}

	/// Cache the current ordered entries for `server` so a future master can
	/// resume it. Best-effort: a failed publish just means the next tick's
	/// snapshot is the next chance to catch up, consistent with the
	/// coordinator's "eventually consistent" contract.
	async fn publish_snapshot(&self, server: &ServerName) {
		let entries = self.store.snapshot(server).await;
		if let Ok(value) = serde_json::to_value(&entries) {
			let _ = self.coordinator.snapshot_put(server.as_str(), value).await;
		}
	}

	async fn tick_one_queue(&self, server: &ServerName, stats: &mut EngineTickStats) -> crate::error::Result<()> {
		let Some(head) = self
			.store
			.with_queue(server, |queue| {
				if queue.entries.is_empty() || queue.paused || !queue.server_status.is_online() {
					return None;
				}
				let head = queue.entries.front()?;
				if head.waiting_for_connection || (queue.full && !head.full_bypass) {
					return None;
				}
				Some(head.clone())
			})
			.await
			.flatten()
		else {
			return Ok(());
		};

		if matches!(self.coordinator.player_info(head.player_id).await?, None) {
			self.store.dequeue(head.player_id, server).await;
			stats.cluster_offline_drops += 1;
			warn!(player = %head.player_id, server = %server, "dropping entry for player unreachable anywhere in the cluster");
			return Ok(());
		}

		self.store
			.with_queue(server, |queue| {
				if let Some(entry) = queue.entries.front_mut() {
					if entry.player_id == head.player_id {
						entry.waiting_for_connection = true;
					}
				}
			})
			.await;

		self.metrics.record_send_issued(server);
		stats.sends_issued += 1;
		let success = self.issue_send(head.player_id, server).await;

		if success {
			self.store.dequeue(head.player_id, server).await;
			self.metrics.record_send_succeeded(server);
			stats.sends_succeeded += 1;
			let _ = self
				.coordinator
				.publish(Message::QueueLeave {
					player: head.player_id,
					server: server.clone(),
					user_initiated: false,
				})
				.await;
			let _ = self
				.coordinator
				.publish(Message::PlayerSetQueuedServer {
					player: head.player_id,
					server: None,
				})
				.await;
			return Ok(());
		}

		self.metrics.record_send_failed(server);
		stats.sends_failed += 1;
		let retries_exhausted = self
			.store
			.with_queue(server, |queue| {
				let entry = queue.entries.front_mut()?;
				if entry.player_id != head.player_id {
					return None;
				}
				entry.waiting_for_connection = false;
				entry.connection_attempts += 1;
				Some(entry.connection_attempts)
			})
			.await
			.flatten()
			.is_some_and(|attempts| attempts >= self.config.read().await.max_send_retries);

		if retries_exhausted {
			self.store.dequeue(head.player_id, server).await;
			self.metrics.record_max_retry_drop(server);
			stats.max_retry_drops += 1;
			let _ = self
				.coordinator
				.publish(Message::Chat {
					player: head.player_id,
					text: format!("Max connection retries reached for {server}."),
				})
				.await;
		}

		Ok(())
	}

	/// Locally connect, or route through the coordinator if the player is
	/// currently hosted on a different proxy.
	async fn issue_send(&self, player: PlayerId, server: &ServerName) -> bool {
		match self.coordinator.player_info(player).await {
			Ok(Some(info)) if info.proxy_id != self.self_id => self.remote_send(player, server).await,
			_ => self.connect.connect(player, server).await,
		}
	}

	async fn remote_send(&self, player: PlayerId, server: &ServerName) -> bool {
		let Ok(mut replies) = self.coordinator.subscribe(Topic::QueueSendResult).await else {
			return false;
		};
		if self
			.coordinator
			.publish(Message::QueueSend {
				player,
				server: server.clone(),
			})
			.await
			.is_err()
		{
			return false;
		}

		let timeout = self.config.read().await.send_delay.max(Duration::from_millis(1));
		let wait_for_reply = async {
			loop {
				match replies.recv().await {
					Ok(Message::QueueSendResult { player: p, server: s, success }) if p == player && &s == server => return success,
					Ok(_) => continue,
					Err(_) => return false,
				}
			}
		};
		tokio::time::timeout(timeout, wait_for_reply).await.unwrap_or(false)
	}
}
