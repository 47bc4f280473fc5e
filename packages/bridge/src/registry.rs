//! Process-wide collection of live judge sessions.
//!
//! The registry is a lookup index only: it never owns a session's
//! lifecycle. Sessions register after a successful handshake and must
//! remove themselves at teardown, so a dead connection can never be
//! selected for dispatch. One mutex guards the whole index and is held
//! only for lookups and mutations, never across I/O.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::error::BridgeError;
use crate::session::JudgeSession;

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<String, Arc<JudgeSession>>,
    /// Which session holds which submission, maintained at reservation
    /// and cleared at every terminal hand-off.
    assignments: HashMap<i64, Arc<JudgeSession>>,
    /// Judges excluded from selection by the control plane.
    disabled: HashSet<String>,
}

pub struct JudgeRegistry {
    inner: Mutex<RegistryInner>,
}

impl JudgeRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(RegistryInner::default()),
        })
    }

    /// Add a session to the live set. The handshake path guarantees at
    /// most one session per name survives; a duplicate here means that
    /// discipline was violated and the new connection must be refused.
    pub fn register(&self, session: Arc<JudgeSession>) -> Result<(), BridgeError> {
        let mut inner = self.inner.lock().unwrap();
        let name = session.name().to_string();
        if inner.sessions.contains_key(&name) {
            return Err(BridgeError::DuplicateJudge(name));
        }
        inner.sessions.insert(name.clone(), session);
        info!(judge = %name, connected = inner.sessions.len(), "Judge registered");
        Ok(())
    }

    /// Idempotent removal. Only removes the entry if it is this exact
    /// session, so a displaced session's late teardown cannot evict its
    /// replacement.
    pub fn remove(&self, session: &Arc<JudgeSession>) {
        let mut inner = self.inner.lock().unwrap();
        let name = session.name();
        if inner
            .sessions
            .get(name)
            .is_some_and(|current| Arc::ptr_eq(current, session))
        {
            inner.sessions.remove(name);
            info!(judge = %name, connected = inner.sessions.len(), "Judge removed");
        }
        inner
            .assignments
            .retain(|_, holder| !Arc::ptr_eq(holder, session));
    }

    pub fn get(&self, name: &str) -> Option<Arc<JudgeSession>> {
        self.inner.lock().unwrap().sessions.get(name).cloned()
    }

    /// Select and reserve an Idle session able to grade `problem` in
    /// `language`, optionally pinned to a named judge. Candidates are
    /// tried from lowest reported load; the winner is atomically moved
    /// out of Idle, so concurrent dispatch cannot select it twice.
    pub fn find_capable(
        &self,
        problem: &str,
        language: &str,
        judge_name: Option<&str>,
        submission_id: i64,
    ) -> Option<(Arc<JudgeSession>, u64)> {
        let mut inner = self.inner.lock().unwrap();

        let mut candidates: Vec<Arc<JudgeSession>> = inner
            .sessions
            .values()
            .filter(|session| !inner.disabled.contains(session.name()))
            .filter(|session| judge_name.is_none_or(|name| session.name() == name))
            .filter(|session| session.has_capability(problem, language))
            .cloned()
            .collect();
        candidates.sort_by(|a, b| a.load().total_cmp(&b.load()));

        for session in candidates {
            if let Some(generation) = session.try_assign(submission_id) {
                inner
                    .assignments
                    .insert(submission_id, Arc::clone(&session));
                debug!(
                    judge = %session.name(),
                    submission_id,
                    problem,
                    language,
                    "Session reserved for dispatch"
                );
                return Some((session, generation));
            }
        }
        None
    }

    /// The session currently holding a submission, if any.
    pub fn holder_of(&self, submission_id: i64) -> Option<Arc<JudgeSession>> {
        self.inner
            .lock()
            .unwrap()
            .assignments
            .get(&submission_id)
            .cloned()
    }

    /// Hand-off point called at every terminal packet: the session is
    /// Idle again and may be selected by the next dispatch. Dispatch is
    /// pull-based, so nothing is re-offered here beyond clearing the
    /// assignment.
    pub fn on_judge_free(&self, name: &str, submission_id: i64) {
        let mut inner = self.inner.lock().unwrap();
        inner.assignments.remove(&submission_id);
        debug!(judge = %name, submission_id, "Judge freed");
    }

    /// Re-index a session's capability set. Selection reads capabilities
    /// live from the session, so there is nothing to rebuild; this is the
    /// notification hook for a `supported-problems` update.
    pub fn update_problems(&self, name: &str) {
        debug!(judge = %name, "Capability set updated");
    }

    /// Exclude or readmit a judge for selection. Returns whether a
    /// session with that name is currently connected.
    pub fn set_disabled(&self, name: &str, disabled: bool) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if disabled {
            inner.disabled.insert(name.to_string());
            warn!(judge = %name, "Judge disabled");
        } else {
            inner.disabled.remove(name);
            info!(judge = %name, "Judge enabled");
        }
        inner.sessions.contains_key(name)
    }

    pub fn connected(&self) -> usize {
        self.inner.lock().unwrap().sessions.len()
    }
}
