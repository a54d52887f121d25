//! Session admission control.
//!
//! Gates creation of remote browser sessions against two independent
//! budgets: a sliding-window creation rate and a concurrent-session count.
//! Requests are never denied outright; they queue until capacity exists.
//!
//! The controller is an explicitly constructed, injectable instance owned by
//! the composition root. Tests instantiate their own with explicit budgets.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::config::AdmissionConfig;

/// Diagnostic snapshot of controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionStats {
	/// Grants inside the trailing creation window.
	pub window_len: usize,
	/// Confirmed active sessions.
	pub active: usize,
	/// Leases granted but not yet confirmed or cancelled.
	pub pending: usize,
	/// Requests still waiting for capacity.
	pub queued: usize,
}

struct Waiter {
	source: String,
	tx: oneshot::Sender<Lease>,
}

struct State {
	window: VecDeque<Instant>,
	active: HashSet<String>,
	pending: usize,
	queue: VecDeque<Waiter>,
	wake_scheduled: bool,
}

struct Inner {
	config: AdmissionConfig,
	state: Mutex<State>,
}

/// Admission controller issuing [`Lease`]s under dual budgets.
#[derive(Clone)]
pub struct AdmissionController {
	inner: Arc<Inner>,
}

/// A reservation for one session-creation slot.
///
/// Exactly one of [`Lease::confirm_created`] / [`Lease::cancel`] settles the
/// lease; repeated calls are no-ops. A lease dropped without settling keeps
/// its reservation counted against the concurrency budget indefinitely.
pub struct Lease {
	inner: Arc<Inner>,
	source: String,
	granted_at: Instant,
	settled: bool,
}

impl AdmissionController {
	/// Creates a controller with explicit budgets.
	pub fn new(config: AdmissionConfig) -> Self {
		Self {
			inner: Arc::new(Inner {
				config,
				state: Mutex::new(State {
					window: VecDeque::new(),
					active: HashSet::new(),
					pending: 0,
					queue: VecDeque::new(),
					wake_scheduled: false,
				}),
			}),
		}
	}

	/// Creates a controller with budgets read from the environment.
	pub fn from_env() -> Self {
		Self::new(AdmissionConfig::from_env())
	}

	/// Acquires a creation lease for `source`.
	///
	/// Resolves immediately when both budgets have headroom; otherwise the
	/// request joins a FIFO queue and resolves once capacity frees up. There
	/// is no expiry on queued requests.
	pub async fn acquire_lease(&self, source: &str) -> Lease {
		let rx = {
			let mut state = self.inner.state.lock();
			prune_window(&mut state, &self.inner.config);
			if fits(&state, &self.inner.config) {
				debug!(target = "scribe.admission", source, "lease granted immediately");
				return grant_locked(&self.inner, &mut state, source);
			}
			let (tx, rx) = oneshot::channel();
			state.queue.push_back(Waiter { source: source.to_string(), tx });
			debug!(target = "scribe.admission", source, queued = state.queue.len(), "lease request queued");
			schedule_wake(&self.inner, &mut state);
			rx
		};
		// The sender lives in controller state, which `&self` keeps alive,
		// and grants never drop waiters without sending.
		rx.await.expect("admission state dropped with waiters queued")
	}

	/// Records a session discovered out of band as active.
	pub fn register_active_session(&self, session_id: &str) {
		self.inner.state.lock().active.insert(session_id.to_string());
	}

	/// Releases an active session and re-pumps the queue.
	pub fn release_active_session(&self, session_id: &str) {
		let released = self.inner.state.lock().active.remove(session_id);
		if released {
			debug!(target = "scribe.admission", session_id, "active session released");
			pump(&self.inner);
		}
	}

	/// Returns a diagnostic snapshot. For observability only.
	pub fn stats(&self) -> AdmissionStats {
		let mut state = self.inner.state.lock();
		prune_window(&mut state, &self.inner.config);
		AdmissionStats {
			window_len: state.window.len(),
			active: state.active.len(),
			pending: state.pending,
			queued: state.queue.len(),
		}
	}
}

impl Lease {
	/// Requester identity this lease was granted to.
	pub fn source(&self) -> &str {
		&self.source
	}

	/// Instant the lease was granted.
	pub fn granted_at(&self) -> Instant {
		self.granted_at
	}

	/// Converts the reservation into an active session. No-op when the lease
	/// was already settled.
	pub fn confirm_created(&mut self, session_id: &str) {
		if self.settled {
			return;
		}
		self.settled = true;
		{
			let mut state = self.inner.state.lock();
			state.pending -= 1;
			state.active.insert(session_id.to_string());
		}
		debug!(target = "scribe.admission", source = %self.source, session_id, "lease confirmed");
		pump(&self.inner);
	}

	/// Releases the reservation without activating a session. No-op when the
	/// lease was already settled.
	pub fn cancel(&mut self) {
		if self.settled {
			return;
		}
		self.settled = true;
		self.inner.state.lock().pending -= 1;
		debug!(target = "scribe.admission", source = %self.source, "lease cancelled");
		pump(&self.inner);
	}
}

fn prune_window(state: &mut State, config: &AdmissionConfig) {
	let now = Instant::now();
	while state.window.front().is_some_and(|&entry| entry + config.window <= now) {
		state.window.pop_front();
	}
}

fn fits(state: &State, config: &AdmissionConfig) -> bool {
	state.window.len() < config.max_creates_per_minute
		&& state.active.len() + state.pending < config.max_concurrent_sessions
}

fn grant_locked(inner: &Arc<Inner>, state: &mut State, source: &str) -> Lease {
	let now = Instant::now();
	state.window.push_back(now);
	state.pending += 1;
	Lease {
		inner: Arc::clone(inner),
		source: source.to_string(),
		granted_at: now,
		settled: false,
	}
}

/// Re-scans the queue head-to-tail, granting every request that currently
/// fits, then schedules a wake-up for the oldest window entry's expiry when
/// only the rate budget blocks further grants.
fn pump(inner: &Arc<Inner>) {
	let mut state = inner.state.lock();
	prune_window(&mut state, &inner.config);

	while !state.queue.is_empty() && fits(&state, &inner.config) {
		let waiter = state.queue.pop_front().expect("checked non-empty");
		let lease = grant_locked(inner, &mut state, &waiter.source);
		debug!(target = "scribe.admission", source = %waiter.source, "queued lease granted");
		if let Err(mut lease) = waiter.tx.send(lease) {
			// Requester gave up while queued; roll the grant back.
			lease.settled = true;
			state.pending -= 1;
			state.window.pop_back();
		}
	}

	schedule_wake(inner, &mut state);
}

/// Schedules a wake-up at the oldest window entry's expiry when queued
/// requests are blocked only by the rate budget. Requests blocked on
/// concurrency are re-pumped by the settle or release that frees a slot.
fn schedule_wake(inner: &Arc<Inner>, state: &mut State) {
	if state.queue.is_empty() || state.wake_scheduled {
		return;
	}
	if state.active.len() + state.pending >= inner.config.max_concurrent_sessions {
		return;
	}
	let Some(&oldest) = state.window.front() else { return };
	state.wake_scheduled = true;
	let window = inner.config.window;
	let inner = Arc::clone(inner);
	tokio::spawn(async move {
		tokio::time::sleep_until(oldest + window).await;
		inner.state.lock().wake_scheduled = false;
		pump(&inner);
	});
}
