use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::coordinator::{Coordinator, Message};
use crate::permissions::PermissionAdapter;
use crate::store::QueueStore;
use crate::types::{PlayerId, ServerName};

/// Clock / Scheduler component: owns the shared shutdown signal for every
/// recurring tick this crate runs, grounded on the same
/// `CancellationToken` discipline `TimeoutMonitor` uses for its own lifetime.
/// The three periodic ticks (send/feedback/prober) each manage their own
/// `Interval`; `Clock` exists to hand out child tokens so any one of them can
/// be torn down independently of the others during a config reload.
#[derive(Clone)]
pub struct Clock {
	shutdown: CancellationToken,
}

impl Clock {
	#[must_use]
	pub fn new() -> Self {
		Self {
			shutdown: CancellationToken::new(),
		}
	}

	#[must_use]
	pub fn child_token(&self) -> CancellationToken {
		self.shutdown.child_token()
	}

	pub fn shutdown(&self) {
		self.shutdown.cancel();
	}
}

impl Default for Clock {
	fn default() -> Self {
		Self::new()
	}
}

/// One armed per-player-per-queue expiration. Ordered by `deadline` only (via
/// `Reverse` in the heap, giving a min-heap by soonest-first) so the scheduler
/// tick only ever looks at the front of the heap.
#[derive(Debug, Clone, PartialEq, Eq)]
struct HeapEntry {
	deadline: Instant,
	generation: u64,
	player: PlayerId,
	server: ServerName,
}

impl Ord for HeapEntry {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self.deadline.cmp(&other.deadline)
	}
}

impl PartialOrd for HeapEntry {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

#[derive(Default)]
struct State {
	heap: BinaryHeap<Reverse<HeapEntry>>,
	generation: HashMap<(PlayerId, ServerName), u64>,
}

#[derive(Debug, Clone, Default)]
pub struct DisconnectTimeoutStats {
	pub armed: u64,
	pub cancelled: u64,
	pub expired: u64,
}

/// Per-player disconnect-timeout expirations, implemented as a single min-heap
/// instead of one timer task per player. An entry armed by
/// [`DisconnectTimeouts::schedule_player_disconnect`] is logically cancelled
/// by bumping its `(player, server)` generation counter in
/// [`DisconnectTimeouts::cancel_reconnect`]; a stale pop is simply discarded
/// rather than removed from the heap, avoiding an O(n) heap search.
pub struct DisconnectTimeouts {
	store: Arc<QueueStore>,
	coordinator: Arc<dyn Coordinator>,
	permissions: Arc<dyn PermissionAdapter>,
	state: Mutex<State>,
	shutdown: CancellationToken,
}

impl DisconnectTimeouts {
	#[must_use]
	pub fn new(store: Arc<QueueStore>, coordinator: Arc<dyn Coordinator>, permissions: Arc<dyn PermissionAdapter>, shutdown: CancellationToken) -> Self {
		Self {
			store,
			coordinator,
			permissions,
			state: Mutex::new(State::default()),
			shutdown,
		}
	}

	/// Arm an expiration for every queue `player` currently has an entry in,
	/// using `PermissionAdapter::disconnect_timeout_for` for the grace period.
	/// Called by the out-of-scope connection-lifecycle component on disconnect.
	pub async fn schedule_player_disconnect(&self, player: PlayerId, stats: &mut DisconnectTimeoutStats) {
		let timeout = self.permissions.disconnect_timeout_for(player).await;
		let deadline = Instant::now() + timeout;
		let servers = self.store.servers_for_player(player);

		let mut state = self.state.lock().await;
		for server in servers {
			let generation = state.generation.entry((player, server.clone())).or_insert(0);
			*generation += 1;
			state.heap.push(Reverse(HeapEntry {
				deadline,
				generation: *generation,
				player,
				server,
			}));
			stats.armed += 1;
		}
	}

	/// Invalidate every armed expiration for `player`. Called by the
	/// connection-lifecycle component when the player reconnects before their
	/// timeout fires, so their queue entries survive the disconnect.
	pub async fn cancel_reconnect(&self, player: PlayerId, stats: &mut DisconnectTimeoutStats) {
		let servers = self.store.servers_for_player(player);
		let mut state = self.state.lock().await;
		for server in servers {
			if let Some(generation) = state.generation.get_mut(&(player, server)) {
				*generation += 1;
				stats.cancelled += 1;
			}
		}
	}

	/// Pop and act on every expiration whose deadline has passed and whose
	/// generation is still current. Public so scenario tests can step it
	/// without a real `Instant::now()`-paced sleep.
	pub async fn tick(&self, stats: &mut DisconnectTimeoutStats) {
		let now = Instant::now();
		let ready = {
			let mut state = self.state.lock().await;
			let mut ready = Vec::new();
			while let Some(Reverse(top)) = state.heap.peek() {
				if top.deadline > now {
					break;
				}
				let Reverse(entry) = state.heap.pop().expect("peeked entry must be poppable");
				let current_generation = state.generation.get(&(entry.player, entry.server.clone())).copied().unwrap_or(0);
				if entry.generation == current_generation {
					ready.push(entry);
				}
			}
			ready
		};

		for entry in ready {
			self.store.dequeue(entry.player, &entry.server).await;
			stats.expired += 1;
			debug!(player = %entry.player, server = %entry.server, "disconnect timeout expired, entry removed");
			let _ = self
				.coordinator
				.publish(Message::PlayerSetQueuedServer {
					player: entry.player,
					server: None,
				})
				.await;
		}
	}

	/// Spawn the recurring poll that drives [`DisconnectTimeouts::tick`].
	pub fn start(self: Arc<Self>, poll_interval: Duration) -> tokio::task::JoinHandle<DisconnectTimeoutStats> {
		tokio::spawn(async move { self.run(poll_interval).await })
	}

	async fn run(self: Arc<Self>, poll_interval: Duration) -> DisconnectTimeoutStats {
		let mut stats = DisconnectTimeoutStats::default();
		let mut ticker = interval(poll_interval);

		info!(period_ms = poll_interval.as_millis(), "disconnect-timeout scheduler starting");
		loop {
			tokio::select! {
				() = self.shutdown.cancelled() => {
					info!("disconnect-timeout scheduler received shutdown signal");
					break;
				}
				_ = ticker.tick() => {
					self.tick(&mut stats).await;
				}
			}
		}
		info!(armed = stats.armed, cancelled = stats.cancelled, expired = stats.expired, "disconnect-timeout scheduler shutting down");
		stats
	}
}
