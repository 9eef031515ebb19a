// Copyright 2026 BadCompany
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Per-session state: tool-call counters, PII taints, sliding-window rate
//! limits, and the temporal event ring buffer used by chain rules.
//!
//! Sessions live in a bounded LRU with TTL; eviction is silent. A single
//! mutex guards the store; every operation is a short critical section.

use crate::engine_core::constants::defaults;
use crate::engine_core::models::Verdict;
use lru::LruCache;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// One entry of the per-session event ring buffer.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub tool: String,
    pub verdict: Verdict,
    pub at: Instant,
}

struct SessionState {
    tool_counts: HashMap<String, u64>,
    taints: BTreeSet<String>,
    /// Sliding windows keyed by rate-limit id; survive reload for stable ids
    rate_windows: HashMap<String, VecDeque<Instant>>,
    events: VecDeque<SessionEvent>,
    last_seen: Instant,
}

impl SessionState {
    fn new(now: Instant) -> Self {
        Self {
            tool_counts: HashMap::new(),
            taints: BTreeSet::new(),
            rate_windows: HashMap::new(),
            events: VecDeque::with_capacity(defaults::EVENT_RING_CAPACITY),
            last_seen: now,
        }
    }

    fn push_event(&mut self, tool: &str, verdict: Verdict, now: Instant, max_age: Duration) {
        while self.events.len() >= defaults::EVENT_RING_CAPACITY {
            self.events.pop_front();
        }
        while let Some(front) = self.events.front() {
            if now.duration_since(front.at) > max_age {
                self.events.pop_front();
            } else {
                break;
            }
        }
        self.events.push_back(SessionEvent {
            tool: tool.to_string(),
            verdict,
            at: now,
        });
    }
}

/// Stable copy of one session's matcher-visible state, taken under the
/// session lock once per check.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub tool_counts: HashMap<String, u64>,
    pub taints: Vec<String>,
    /// Oldest first
    pub events: Vec<SessionEvent>,
}

struct Inner {
    sessions: LruCache<String, SessionState>,
    ops: u64,
}

/// Bounded session store. Entries are created lazily on first reference
/// and silently dropped by LRU capacity or the TTL sweep.
pub struct SessionManager {
    inner: Mutex<Inner>,
    session_ttl: Duration,
}

const SWEEP_EVERY_OPS: u64 = 256;

impl SessionManager {
    pub fn new(max_sessions: usize, session_ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(max_sessions.max(1)).expect("nonzero");
        Self {
            inner: Mutex::new(Inner {
                sessions: LruCache::new(cap),
                ops: 0,
            }),
            session_ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn touch<'a>(
        inner: &'a mut Inner,
        session_id: &str,
        now: Instant,
        ttl: Duration,
    ) -> &'a mut SessionState {
        inner.ops += 1;
        if inner.ops % SWEEP_EVERY_OPS == 0 {
            let expired: Vec<String> = inner
                .sessions
                .iter()
                .filter(|(_, s)| now.duration_since(s.last_seen) > ttl)
                .map(|(k, _)| k.clone())
                .collect();
            for key in expired {
                inner.sessions.pop(&key);
            }
        }
        if !inner.sessions.contains(session_id) {
            inner
                .sessions
                .put(session_id.to_string(), SessionState::new(now));
        }
        let state = inner
            .sessions
            .get_mut(session_id)
            .expect("session just inserted");
        state.last_seen = now;
        state
    }

    /// Copy of the matcher-visible state for one session.
    pub fn snapshot(&self, session_id: &str) -> SessionSnapshot {
        let now = Instant::now();
        let mut inner = self.lock();
        let state = Self::touch(&mut inner, session_id, now, self.session_ttl);
        SessionSnapshot {
            tool_counts: state.tool_counts.clone(),
            taints: state.taints.iter().cloned().collect(),
            events: state.events.iter().cloned().collect(),
        }
    }

    /// Test a sliding-window rate limit and record the attempt if admitted.
    /// Returns `false` when the window already holds `max_calls` entries;
    /// rejected attempts do not consume a slot.
    pub fn admit_rate(
        &self,
        session_id: &str,
        limit_id: &str,
        max_calls: u32,
        window: Duration,
    ) -> bool {
        let now = Instant::now();
        let mut inner = self.lock();
        let state = Self::touch(&mut inner, session_id, now, self.session_ttl);
        let timestamps = state
            .rate_windows
            .entry(limit_id.to_string())
            .or_default();
        while let Some(front) = timestamps.front() {
            if now.duration_since(*front) > window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
        if timestamps.len() as u64 >= u64::from(max_calls) {
            return false;
        }
        timestamps.push_back(now);
        true
    }

    /// Counter increment policy: called only for ALLOW/REDACT outcomes.
    /// Advances the tool counter and pushes the event to the ring buffer.
    pub fn record_outcome(&self, session_id: &str, tool: &str, verdict: Verdict) {
        let now = Instant::now();
        let mut inner = self.lock();
        let state = Self::touch(&mut inner, session_id, now, self.session_ttl);
        *state.tool_counts.entry(tool.to_string()).or_insert(0) += 1;
        state.push_event(tool, verdict, now, self.session_ttl);
    }

    /// Ring-buffer-only event, used by post-check.
    pub fn record_event(&self, session_id: &str, tool: &str, verdict: Verdict) {
        let now = Instant::now();
        let mut inner = self.lock();
        let state = Self::touch(&mut inner, session_id, now, self.session_ttl);
        state.push_event(tool, verdict, now, self.session_ttl);
    }

    pub fn add_taints(&self, session_id: &str, kinds: &[String]) {
        if kinds.is_empty() {
            return;
        }
        let now = Instant::now();
        let mut inner = self.lock();
        let state = Self::touch(&mut inner, session_id, now, self.session_ttl);
        state.taints.extend(kinds.iter().cloned());
    }

    pub fn taints(&self, session_id: &str) -> Vec<String> {
        let now = Instant::now();
        let mut inner = self.lock();
        let state = Self::touch(&mut inner, session_id, now, self.session_ttl);
        state.taints.iter().cloned().collect()
    }

    pub fn tool_count(&self, session_id: &str, tool: &str) -> u64 {
        let now = Instant::now();
        let mut inner = self.lock();
        let state = Self::touch(&mut inner, session_id, now, self.session_ttl);
        state.tool_counts.get(tool).copied().unwrap_or(0)
    }

    /// Drop rate windows whose limit id is not in `valid`. Called after a
    /// reload so removed limits free their state while stable ids keep
    /// their history.
    pub fn retain_rate_limits(&self, valid: &HashSet<String>) {
        let mut inner = self.lock();
        for (_, state) in inner.sessions.iter_mut() {
            state.rate_windows.retain(|id, _| valid.contains(id));
        }
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new(4, Duration::from_secs(60))
    }

    #[test]
    fn test_counters_and_isolation() {
        let m = manager();
        m.record_outcome("a", "read_file", Verdict::Allow);
        m.record_outcome("a", "read_file", Verdict::Allow);
        m.record_outcome("b", "read_file", Verdict::Allow);
        assert_eq!(m.tool_count("a", "read_file"), 2);
        assert_eq!(m.tool_count("b", "read_file"), 1);
        assert_eq!(m.tool_count("a", "other"), 0);
    }

    #[test]
    fn test_lru_capacity_bound() {
        let m = manager();
        for i in 0..10 {
            m.record_outcome(&format!("s{i}"), "t", Verdict::Allow);
        }
        assert!(m.len() <= 4);
        // Oldest evicted silently; its state starts fresh
        assert_eq!(m.tool_count("s0", "t"), 0);
    }

    #[test]
    fn test_rate_window_admits_then_rejects() {
        let m = manager();
        let window = Duration::from_secs(60);
        assert!(m.admit_rate("s", "lim", 2, window));
        assert!(m.admit_rate("s", "lim", 2, window));
        assert!(!m.admit_rate("s", "lim", 2, window));
        // A rejected attempt did not consume a slot: window still holds 2
        assert!(!m.admit_rate("s", "lim", 2, window));
        // Other sessions have their own window
        assert!(m.admit_rate("other", "lim", 2, window));
    }

    #[test]
    fn test_rate_window_prunes_expired() {
        let m = manager();
        assert!(m.admit_rate("s", "lim", 1, Duration::from_millis(10)));
        assert!(!m.admit_rate("s", "lim", 1, Duration::from_millis(10)));
        std::thread::sleep(Duration::from_millis(20));
        assert!(m.admit_rate("s", "lim", 1, Duration::from_millis(10)));
    }

    #[test]
    fn test_event_ring_is_bounded() {
        let m = manager();
        for _ in 0..(defaults::EVENT_RING_CAPACITY + 50) {
            m.record_event("s", "t", Verdict::Allow);
        }
        let snap = m.snapshot("s");
        assert_eq!(snap.events.len(), defaults::EVENT_RING_CAPACITY);
    }

    #[test]
    fn test_taints_accumulate() {
        let m = manager();
        m.add_taints("s", &["EMAIL".to_string()]);
        m.add_taints("s", &["EMAIL".to_string(), "SSN".to_string()]);
        assert_eq!(m.taints("s"), vec!["EMAIL".to_string(), "SSN".to_string()]);
        assert!(m.taints("other").is_empty());
    }

    #[test]
    fn test_retain_rate_limits_drops_removed_ids() {
        let m = manager();
        assert!(m.admit_rate("s", "keep", 1, Duration::from_secs(60)));
        assert!(m.admit_rate("s", "drop", 1, Duration::from_secs(60)));
        let valid: HashSet<String> = ["keep".to_string()].into_iter().collect();
        m.retain_rate_limits(&valid);
        // "drop" window was discarded, so its limit admits again
        assert!(m.admit_rate("s", "drop", 1, Duration::from_secs(60)));
        assert!(!m.admit_rate("s", "keep", 1, Duration::from_secs(60)));
    }
}
