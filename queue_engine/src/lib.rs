pub mod config;
pub mod control;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod inbound;
pub mod metrics;
pub mod permissions;
pub mod prober;
pub mod scheduler;
pub mod store;
pub mod types;

use std::sync::Arc;

use tokio::sync::RwLock;

use config::Config;
use control::EngineHandle;
use coordinator::Coordinator;
use engine::{ConnectBackend, QueueEngine};
use feedback::PlayerFeedback;
use inbound::InboundDispatcher;
use metrics::Metrics;
use permissions::PermissionAdapter;
use prober::{BackendProbe, BackendProber};
use scheduler::{Clock, DisconnectTimeouts};
use store::QueueStore;

/// Everything a deployment wires up to run the queue subsystem: the shared
/// store, the three recurring ticks (send/prober/feedback), the inbound
/// cross-proxy dispatcher, the disconnect-timeout scheduler, and a
/// [`control::EngineHandle`] front-end for an admin command surface.
/// Construction only builds the pieces; call [`QueueSystem::start`] to spawn
/// the recurring ticks and the dispatcher.
///
/// Generalizes a single `WorkerPool::new(...).run()` entry point into one
/// struct per concern, since this system has multiple independent tick loops
/// rather than one worker pool.
pub struct QueueSystem<B: ConnectBackend, P: BackendProbe> {
	pub store: Arc<QueueStore>,
	pub coordinator: Arc<dyn Coordinator>,
	pub config: Arc<RwLock<Config>>,
	pub engine: Arc<QueueEngine<B>>,
	pub prober: Arc<BackendProber<P, B>>,
	pub feedback: Arc<PlayerFeedback>,
	pub inbound: Arc<InboundDispatcher<B>>,
	pub disconnect_timeouts: Arc<DisconnectTimeouts>,
	pub handle: EngineHandle<B>,
	clock: Clock,
}

/// Handles returned by [`QueueSystem::start`], one per spawned tick. Dropping
/// these without awaiting them is fine; [`QueueSystem::shutdown`] cancels the
/// shared token that every tick loop selects on, and each loop exits on its
/// own once it observes the cancellation.
pub struct QueueSystemTasks {
	pub engine: tokio::task::JoinHandle<engine::EngineTickStats>,
	pub prober: tokio::task::JoinHandle<prober::ProberStats>,
	pub feedback: tokio::task::JoinHandle<feedback::FeedbackStats>,
	pub inbound: tokio::task::JoinHandle<inbound::InboundDispatchStats>,
	pub disconnect_timeouts: tokio::task::JoinHandle<scheduler::DisconnectTimeoutStats>,
}

impl<B: ConnectBackend + 'static, P: BackendProbe + 'static> QueueSystem<B, P> {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		self_id: types::ProxyId, eligible_masters: Vec<types::ProxyId>, coordinator: Arc<dyn Coordinator>, connect: Arc<B>, probe: Arc<P>,
		permissions: Arc<dyn PermissionAdapter>, config: Config, registry: prometheus::Registry,
	) -> error::Result<Self> {
		let store = Arc::new(QueueStore::new(config.allow_multi_queue, config.allow_paused_queue_joining));
		let config = Arc::new(RwLock::new(config));
		let metrics = Metrics::new(registry)?;
		let clock = Clock::new();

		let engine = Arc::new(QueueEngine::new(
			self_id.clone(),
			eligible_masters,
			store.clone(),
			coordinator.clone(),
			connect.clone(),
			config.clone(),
			metrics.clone(),
			clock.child_token(),
		));
		let prober = Arc::new(BackendProber::new(
			self_id,
			store.clone(),
			probe,
			connect.clone(),
			coordinator.clone(),
			config.clone(),
			metrics,
			clock.child_token(),
		));
		let feedback = Arc::new(PlayerFeedback::new(store.clone(), coordinator.clone(), config.clone(), clock.child_token()));
		let inbound = Arc::new(InboundDispatcher::new(store.clone(), coordinator.clone(), connect, clock.child_token()));
		let disconnect_timeouts = Arc::new(DisconnectTimeouts::new(store.clone(), coordinator.clone(), permissions, clock.child_token()));
		let handle = EngineHandle::new(store.clone(), coordinator.clone(), config.clone(), engine.clone());

		Ok(Self {
			store,
			coordinator,
			config,
			engine,
			prober,
			feedback,
			inbound,
			disconnect_timeouts,
			handle,
			clock,
		})
	}

	/// Spawn every recurring tick plus the inbound cross-proxy dispatcher. The
	/// disconnect-timeout poll runs on `send_delay`, since both are driven off
	/// the same "how fast does this proxy notice state change" budget.
	pub async fn start(&self) -> QueueSystemTasks {
		let poll_interval = self.config.read().await.send_delay;
		QueueSystemTasks {
			engine: self.engine.clone().start(),
			prober: self.prober.clone().start(),
			feedback: self.feedback.clone().start(),
			inbound: self.inbound.clone().start(),
			disconnect_timeouts: self.disconnect_timeouts.clone().start(poll_interval),
		}
	}

	/// Signal every tick loop to stop and clear all queues. Tasks returned by
	/// `start` still need to be awaited by the caller to observe their final
	/// stats.
	pub async fn shutdown(&self) {
		self.clock.shutdown();
		self.handle.shutdown().await;
	}
}
