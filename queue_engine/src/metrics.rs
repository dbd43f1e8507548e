use prometheus::{CounterVec, GaugeVec, Opts, Registry};

use crate::error::Result;
use crate::types::ServerName;

/// Prometheus metrics for the queue engine, registered once at startup and
/// cloned (all `prometheus` metric handles are cheap `Arc`-backed clones) into
/// every tick. Grounded on `WorkerPool`'s registration pattern, generalized from
/// plain `Counter`/`Gauge` to label-vectors keyed by server name since this
/// engine tracks per-backend state rather than one pool-wide total.
#[derive(Clone)]
pub struct Metrics {
	registry: Registry,
	queue_length: GaugeVec,
	online: GaugeVec,
	paused: GaugeVec,
	full: GaugeVec,
	sends_issued: CounterVec,
	sends_succeeded: CounterVec,
	sends_failed: CounterVec,
	max_retry_drops: CounterVec,
}

impl Metrics {
	/// # Errors
	/// Returns an error if metric construction or registration fails (e.g. a name
	/// collision against an existing registry).
	pub fn new(registry: Registry) -> Result<Self> {
		let queue_length = GaugeVec::new(Opts::new("queue_engine_queue_length", "Current number of entries waiting per backend"), &["server"])?;
		let online = GaugeVec::new(Opts::new("queue_engine_server_online", "1 if the backend is ONLINE, else 0"), &["server"])?;
		let paused = GaugeVec::new(Opts::new("queue_engine_server_paused", "1 if the backend's queue is paused, else 0"), &["server"])?;
		let full = GaugeVec::new(Opts::new("queue_engine_server_full", "1 if the backend is reporting full, else 0"), &["server"])?;
		let sends_issued = CounterVec::new(Opts::new("queue_engine_sends_issued_total", "Connection attempts issued"), &["server"])?;
		let sends_succeeded = CounterVec::new(Opts::new("queue_engine_sends_succeeded_total", "Connection attempts that succeeded"), &["server"])?;
		let sends_failed = CounterVec::new(Opts::new("queue_engine_sends_failed_total", "Connection attempts that failed"), &["server"])?;
		let max_retry_drops = CounterVec::new(Opts::new("queue_engine_max_retry_drops_total", "Entries dropped after exhausting retries"), &["server"])?;

		registry.register(Box::new(queue_length.clone()))?;
		registry.register(Box::new(online.clone()))?;
		registry.register(Box::new(paused.clone()))?;
		registry.register(Box::new(full.clone()))?;
		registry.register(Box::new(sends_issued.clone()))?;
		registry.register(Box::new(sends_succeeded.clone()))?;
		registry.register(Box::new(sends_failed.clone()))?;
		registry.register(Box::new(max_retry_drops.clone()))?;

		Ok(Self {
			registry,
			queue_length,
			online,
			paused,
			full,
			sends_issued,
			sends_succeeded,
			sends_failed,
			max_retry_drops,
		})
	}

	#[must_use]
	pub fn registry(&self) -> &Registry {
		&self.registry
	}

	pub fn observe_queue_state(&self, server: &ServerName, length: usize, online: bool, paused: bool, full: bool) {
		let label = server.as_str();
		self.queue_length.with_label_values(&[label]).set(length as f64);
		self.online.with_label_values(&[label]).set(f64::from(u8::from(online)));
		self.paused.with_label_values(&[label]).set(f64::from(u8::from(paused)));
		self.full.with_label_values(&[label]).set(f64::from(u8::from(full)));
	}

	pub fn record_send_issued(&self, server: &ServerName) {
		self.sends_issued.with_label_values(&[server.as_str()]).inc();
	}

	pub fn record_send_succeeded(&self, server: &ServerName) {
		self.sends_succeeded.with_label_values(&[server.as_str()]).inc();
	}

	pub fn record_send_failed(&self, server: &ServerName) {
		self.sends_failed.with_label_values(&[server.as_str()]).inc();
	}

	pub fn record_max_retry_drop(&self, server: &ServerName) {
		self.max_retry_drops.with_label_values(&[server.as_str()]).inc();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn metrics_register_without_collision() {
		let registry = Registry::new();
		let metrics = Metrics::new(registry).unwrap();
		let server = ServerName::from("survival");
		metrics.observe_queue_state(&server, 3, true, false, false);
		metrics.record_send_issued(&server);
		metrics.record_send_succeeded(&server);
		assert!(!metrics.registry().gather().is_empty());
	}
}
