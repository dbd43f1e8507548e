use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable opaque identifier for a player, independent of the wire protocol's own
/// representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerId(Uuid);

impl PlayerId {
	#[must_use]
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}

	#[must_use]
	pub const fn from_uuid(uuid: Uuid) -> Self {
		Self(uuid)
	}

	#[must_use]
	pub const fn as_uuid(&self) -> &Uuid {
		&self.0
	}
}

impl Default for PlayerId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for PlayerId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// A backend server name. Cheap to clone since queue lookups pass it around
/// constantly (as a `DashMap` key and as part of every cross-proxy message).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerName(Arc<str>);

impl ServerName {
	pub fn new(name: impl Into<Arc<str>>) -> Self {
		Self(name.into())
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ServerName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<&str> for ServerName {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}

impl From<String> for ServerName {
	fn from(value: String) -> Self {
		Self::new(value)
	}
}

/// Identifier of a proxy instance within the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProxyId(Arc<str>);

impl ProxyId {
	pub fn new(id: impl Into<Arc<str>>) -> Self {
		Self(id.into())
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ProxyId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<&str> for ProxyId {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}

/// Entry priority. Larger sorts earlier; [`Priority::BYPASS`] (`-1`) is the
/// reserved "admin-queued / queue-bypass" tier, exempt from the pause/offline/full
/// gates in the engine (but not from the priority-ordered insertion rule itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Priority(i32);

impl Priority {
	pub const BYPASS: Self = Self(-1);
	pub const DEFAULT: Self = Self(0);
	/// Priority tier used by the administrative `add` operation: high enough to
	/// overtake any tier an ordinary player-facing priority adapter would hand
	/// out, without claiming the reserved `-1` bypass tier.
	pub const ADMIN: Self = Self(1_000);

	#[must_use]
	pub const fn new(value: i32) -> Self {
		Self(value)
	}

	#[must_use]
	pub const fn value(self) -> i32 {
		self.0
	}

	#[must_use]
	pub const fn is_bypass(self) -> bool {
		self.0 == Self::BYPASS.0
	}
}

impl Default for Priority {
	fn default() -> Self {
		Self::DEFAULT
	}
}

impl fmt::Display for Priority {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bypass_priority_is_minus_one() {
		assert_eq!(Priority::BYPASS.value(), -1);
		assert!(Priority::BYPASS.is_bypass());
		assert!(!Priority::DEFAULT.is_bypass());
	}

	#[test]
	fn priority_orders_numerically() {
		assert!(Priority::new(5) > Priority::new(0));
		assert!(Priority::new(0) > Priority::BYPASS);
	}

	#[test]
	fn admin_priority_outranks_ordinary_tiers_but_is_not_bypass() {
		assert!(Priority::ADMIN > Priority::new(5));
		assert!(!Priority::ADMIN.is_bypass());
	}

	#[test]
	fn server_name_displays_as_str() {
		let name = ServerName::from("survival");
		assert_eq!(name.as_str(), "survival");
		assert_eq!(name.to_string(), "survival");
	}
}
