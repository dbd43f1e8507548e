use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::engine::ConnectBackend;
use crate::metrics::Metrics;
use crate::store::{QueueStore, ServerStatus};
use crate::types::{ProxyId, ServerName};

/// External collaborator that actually pings a backend and, while it's
/// reachable, samples its current player count. Everything about how that
/// ping is performed (a status-protocol handshake, an RCON call, whatever the
/// deployment uses) lives outside this crate.
#[async_trait]
pub trait BackendProbe: Send + Sync {
	/// `true` if the backend answered a status probe within its timeout.
	async fn ping(&self, server: &ServerName) -> bool;

	/// Current player count, if obtainable while the backend is reachable.
	async fn player_count(&self, server: &ServerName) -> Option<usize>;
}

#[derive(Debug, Clone, Default)]
pub struct ProberStats {
	pub cycles_completed: u64,
	pub recoveries: u64,
	pub downgrades: u64,
	pub bypass_entries_drained: u64,
}

/// Backend health tick: classifies each known backend OFFLINE/WAITING/ONLINE per
/// the probe result and the `queue_delay` recovery grace period, updates the
/// `full` flag from a live player count, and drains any queue-bypass entries on
/// every cycle the backend is observed ONLINE (not just the recovery edge), plus
/// once more on the way out of ONLINE. Tick-loop shape grounded on
/// `TimeoutMonitor::run`.
pub struct BackendProber<P: BackendProbe, B: ConnectBackend> {
	self_id: ProxyId,
	store: Arc<QueueStore>,
	probe: Arc<P>,
	connect: Arc<B>,
	coordinator: Arc<dyn Coordinator>,
	config: Arc<RwLock<Config>>,
	metrics: Metrics,
	shutdown: CancellationToken,
}

impl<P: BackendProbe + 'static, B: ConnectBackend + 'static> BackendProber<P, B> {
	pub fn new(
		self_id: ProxyId, store: Arc<QueueStore>, probe: Arc<P>, connect: Arc<B>, coordinator: Arc<dyn Coordinator>, config: Arc<RwLock<Config>>,
		metrics: Metrics, shutdown: CancellationToken,
	) -> Self {
		Self {
			self_id,
			store,
			probe,
			connect,
			coordinator,
			config,
			metrics,
			shutdown,
		}
	}

	pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<ProberStats> {
		tokio::spawn(async move { self.run().await })
	}

	async fn run(self: Arc<Self>) -> ProberStats {
		let mut stats = ProberStats::default();
		let mut period = self.config.read().await.backend_ping_interval;
		let mut ticker = interval(period);

		info!(period_ms = period.as_millis(), "backend prober starting");
		loop {
			tokio::select! {
				() = self.shutdown.cancelled() => {
					info!("backend prober received shutdown signal");
					break;
				}
				_ = ticker.tick() => {
					self.tick(&mut stats).await;
					stats.cycles_completed += 1;
					if stats.cycles_completed % 20 == 0 {
						debug!(
							cycles = stats.cycles_completed,
							recoveries = stats.recoveries,
							downgrades = stats.downgrades,
							"backend prober health snapshot"
						);
					}
					let new_period = self.config.read().await.backend_ping_interval;
					if new_period != period {
						period = new_period;
						ticker = interval(period);
					}
				}
			}
		}
		info!(cycles = stats.cycles_completed, recoveries = stats.recoveries, "backend prober shutting down");
		stats
	}

	/// One pass over every known backend. Public so scenario tests can drive
	/// recovery transitions deterministically.
	pub async fn tick(&self, stats: &mut ProberStats) {
		if !self.config.read().await.enabled {
			return;
		}
		let _ = self.coordinator.heartbeat(&self.self_id).await;
		let queue_delay = self.config.read().await.queue_delay;

		for server in self.store.server_names() {
			self.probe_one(&server, queue_delay, stats).await;
		}
	}

	async fn probe_one(&self, server: &ServerName, queue_delay: std::time::Duration, stats: &mut ProberStats) {
		let reachable = self.probe.ping(server).await;
		let now = Instant::now();

		let (_transitioned_to_online, transitioned_from_online) = self
			.store
			.with_queue(server, |queue| {
				let previous = queue.server_status;
				queue.server_status = if !reachable {
					ServerStatus::Offline
				} else {
					match previous {
						ServerStatus::Offline => {
							queue.last_online_transition_time = Some(now);
							ServerStatus::Waiting
						}
						ServerStatus::Waiting => {
							let elapsed = queue.last_online_transition_time.map_or(std::time::Duration::ZERO, |since| now.duration_since(since));
							if elapsed >= queue_delay {
								ServerStatus::Online
							} else {
								ServerStatus::Waiting
							}
						}
						ServerStatus::Online => ServerStatus::Online,
					}
				};
				if !matches!(previous, ServerStatus::Online) && matches!(queue.server_status, ServerStatus::Online) {
					stats.recoveries += 1;
				}
				if matches!(previous, ServerStatus::Online) && !matches!(queue.server_status, ServerStatus::Online) {
					stats.downgrades += 1;
				}
				let to_online = previous != ServerStatus::Online && queue.server_status == ServerStatus::Online;
				let from_online = previous == ServerStatus::Online && queue.server_status != ServerStatus::Online;
				(to_online, from_online)
			})
			.await
			.unwrap_or((false, false));

		if reachable && self.store.with_queue(server, |q| q.server_status.is_online()).await == Some(true) {
			if let Some(count) = self.probe.player_count(server).await {
				let cap = self.config.read().await.player_caps.get(server.as_str()).copied();
				self.store.with_queue(server, |queue| {
					queue.full = cap.is_some_and(|cap| count >= cap);
				}).await;
			}
		}

		let length = self.store.snapshot(server).await.len();
		let (online, paused, full) = self
			.store
			.with_queue(server, |queue| (queue.server_status.is_online(), queue.paused, queue.full))
			.await
			.unwrap_or((false, false, false));
		self.metrics.observe_queue_state(server, length, online, paused, full);

		// Drain on every ONLINE observation, not only the transition edge: a `-1`
		// entry enqueued while the backend is already steadily ONLINE would
		// otherwise never reach the head of a non-empty queue (it sorts to the
		// tail) and would starve indefinitely. Also drain on the way out of
		// ONLINE so bypass entries are sent before the engine observes the
		// degraded status and would otherwise start withholding them too.
		if online || transitioned_from_online {
			self.drain_bypass_entries(server, stats).await;
		}
	}

	/// Send every queue-bypass entry currently present whenever a backend is
	/// observed ONLINE, or the instant its status crosses out of ONLINE,
	/// regardless of queue position, then dequeue each on success. This runs
	/// outside the engine's head-of-line discipline entirely: bypass entries are
	/// exempt from it by design.
	async fn drain_bypass_entries(&self, server: &ServerName, stats: &mut ProberStats) {
		let bypass_entries = self.store.snapshot(server).await.into_iter().filter(crate::store::QueueEntry::is_bypass).collect::<Vec<_>>();

		for entry in bypass_entries {
			if self.connect.connect(entry.player_id, server).await {
				self.store.dequeue(entry.player_id, server).await;
				self.metrics.record_send_succeeded(server);
				stats.bypass_entries_drained += 1;
			} else {
				self.metrics.record_send_failed(server);
				warn!(player = %entry.player_id, server = %server, "bypass drain send failed, left queued for next recovery");
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::coordinator::LocalCoordinator;
	use crate::types::{PlayerId, Priority};

	struct ScriptedProbe {
		reachable: std::sync::atomic::AtomicBool,
	}

	impl ScriptedProbe {
		fn new(reachable: bool) -> Self {
			Self {
				reachable: std::sync::atomic::AtomicBool::new(reachable),
			}
		}

		fn set(&self, reachable: bool) {
			self.reachable.store(reachable, std::sync::atomic::Ordering::SeqCst);
		}
	}

	#[async_trait]
	impl BackendProbe for ScriptedProbe {
		async fn ping(&self, _server: &ServerName) -> bool {
			self.reachable.load(std::sync::atomic::Ordering::SeqCst)
		}
		async fn player_count(&self, _server: &ServerName) -> Option<usize> {
			Some(0)
		}
	}

	struct AlwaysSucceeds;
	#[async_trait]
	impl ConnectBackend for AlwaysSucceeds {
		async fn connect(&self, _player: PlayerId, _server: &ServerName) -> bool {
			true
		}
	}

	fn test_prober(reachable: bool) -> (Arc<QueueStore>, Arc<ScriptedProbe>, BackendProber<ScriptedProbe, AlwaysSucceeds>) {
		let store = Arc::new(QueueStore::new(true, true));
		let probe = Arc::new(ScriptedProbe::new(reachable));
		let coordinator: Arc<dyn Coordinator> = Arc::new(LocalCoordinator::new());
		let config = Arc::new(RwLock::new(Config::test()));
		let metrics = Metrics::new(prometheus::Registry::new()).unwrap();
		let prober = BackendProber::new(
			ProxyId::from("proxy-a"),
			store.clone(),
			probe.clone(),
			Arc::new(AlwaysSucceeds),
			coordinator,
			config,
			metrics,
			CancellationToken::new(),
		);
		(store, probe, prober)
	}

	#[tokio::test]
	async fn offline_to_waiting_to_online_progression() {
		let (store, _probe, prober) = test_prober(true);
		let server = ServerName::from("survival");
		store.ensure_queue(&server);

		let mut stats = ProberStats::default();
		prober.tick(&mut stats).await;
		let status = store.with_queue(&server, |q| q.server_status).await;
		assert_eq!(status, Some(ServerStatus::Waiting));

        // Config::test() queue_delay is 20ms.
		tokio::time::sleep(std::time::Duration::from_millis(30)).await;
		prober.tick(&mut stats).await;
		let status = store.with_queue(&server, |q| q.server_status).await;
		assert_eq!(status, Some(ServerStatus::Online));
		assert_eq!(stats.recoveries, 1);
	}

	#[tokio::test]
	async fn unreachable_backend_is_offline() {
		let (store, _probe, prober) = test_prober(false);
		let server = ServerName::from("survival");
		store.ensure_queue(&server);

		let mut stats = ProberStats::default();
		prober.tick(&mut stats).await;
		let status = store.with_queue(&server, |q| q.server_status).await;
		assert_eq!(status, Some(ServerStatus::Offline));
	}

	#[tokio::test]
	async fn bypass_entries_drain_on_recovery() {
		let (store, _probe, prober) = test_prober(true);
		let server = ServerName::from("survival");
		store.ensure_queue(&server);
		let bypass_player = PlayerId::new();
		store.enqueue(bypass_player, server.clone(), Priority::BYPASS, false, true).await;

		let mut stats = ProberStats::default();
		prober.tick(&mut stats).await; // OFFLINE -> WAITING
		tokio::time::sleep(std::time::Duration::from_millis(30)).await;
		prober.tick(&mut stats).await; // WAITING -> ONLINE, drains bypass

		assert_eq!(stats.bypass_entries_drained, 1);
		assert!(store.snapshot(&server).await.is_empty());
	}

	#[tokio::test]
	async fn bypass_entries_drain_on_downgrade_from_online() {
		let (store, probe, prober) = test_prober(true);
		let server = ServerName::from("survival");
		store.ensure_queue(&server);

		let mut stats = ProberStats::default();
		prober.tick(&mut stats).await; // OFFLINE -> WAITING
		tokio::time::sleep(std::time::Duration::from_millis(30)).await;
		prober.tick(&mut stats).await; // WAITING -> ONLINE
		assert_eq!(store.with_queue(&server, |q| q.server_status).await, Some(ServerStatus::Online));

		let bypass_player = PlayerId::new();
		store.enqueue(bypass_player, server.clone(), Priority::BYPASS, false, true).await;

		probe.set(false);
		prober.tick(&mut stats).await; // ONLINE -> OFFLINE, drains bypass on the way out

		assert_eq!(stats.bypass_entries_drained, 1);
		assert!(store.snapshot(&server).await.is_empty());
		assert_eq!(store.with_queue(&server, |q| q.server_status).await, Some(ServerStatus::Offline));
	}

	/// A `-1` entry enqueued while the backend is already steadily ONLINE sorts
	/// to the tail behind any priority >= 0 entry (store.rs's insertion rule) and
	/// is never the engine's head while one is present, so it must be drained by
	/// the prober on a non-transition cycle or it would starve indefinitely.
	#[tokio::test]
	async fn bypass_entry_drains_while_steadily_online_behind_a_higher_priority_head() {
		let (store, _probe, prober) = test_prober(true);
		let server = ServerName::from("survival");
		store.ensure_queue(&server);

		let mut stats = ProberStats::default();
		prober.tick(&mut stats).await; // OFFLINE -> WAITING
		tokio::time::sleep(std::time::Duration::from_millis(30)).await;
		prober.tick(&mut stats).await; // WAITING -> ONLINE
		assert_eq!(store.with_queue(&server, |q| q.server_status).await, Some(ServerStatus::Online));

		let head_player = PlayerId::new();
		store.enqueue(head_player, server.clone(), Priority::DEFAULT, false, false).await;
		let bypass_player = PlayerId::new();
		store.enqueue(bypass_player, server.clone(), Priority::BYPASS, false, true).await;
		assert_eq!(store.position(head_player, &server).await, Some(1));
		assert_eq!(store.position(bypass_player, &server).await, Some(2));

		// No transition occurs here: the backend was already ONLINE before
		// either player joined.
		prober.tick(&mut stats).await;

		assert_eq!(stats.bypass_entries_drained, 1);
		assert_eq!(store.position(bypass_player, &server).await, None);
		assert_eq!(store.position(head_player, &server).await, Some(1));
	}
}
