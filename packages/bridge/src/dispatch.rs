//! Dispatch gateway: the façade the rest of the system uses to submit,
//! rejudge and abort work.
//!
//! Every operation here tolerates an empty or unreachable judge pool:
//! submissions stay visibly Queued when nobody can grade them, and a
//! transport failure during hand-off finalizes the submission as an
//! internal error rather than leaving it stuck in flight.

use std::sync::Arc;

use tracing::{error, info, warn};

use common::packet::BridgePacket;

use crate::registry::JudgeRegistry;
use crate::session::submission_request;
use crate::store::SubmissionStore;

pub struct DispatchGateway {
    registry: Arc<JudgeRegistry>,
    store: Arc<dyn SubmissionStore>,
}

impl DispatchGateway {
    pub fn new(registry: Arc<JudgeRegistry>, store: Arc<dyn SubmissionStore>) -> Self {
        Self { registry, store }
    }

    /// Queue a submission and hand it to a capable judge. Returns whether
    /// the submission is now in a judge's hands; `false` leaves it either
    /// Queued (no judge, caller may retry later) or InternalError
    /// (hand-off failed), never silently in flight.
    pub async fn submit(&self, submission_id: i64, rejudge: bool, judge: Option<&str>) -> bool {
        match self.store.queue(submission_id).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    submission_id,
                    rejudge, "Submission is already in flight or missing, not dispatching"
                );
                return false;
            }
            Err(e) => {
                error!(submission_id, error = %e, "Failed to queue submission");
                return false;
            }
        }
        self.dispatch_queued(submission_id, judge).await
    }

    /// Bulk-queue a set of submissions, then dispatch each best-effort.
    /// Returns the ids that were queued; a submission with no capable
    /// judge stays Queued and does not abort the batch.
    pub async fn batch_submit(
        &self,
        submission_ids: &[i64],
        rejudge: bool,
        judge: Option<&str>,
    ) -> Vec<i64> {
        let queued = match self.store.queue_many(submission_ids).await {
            Ok(queued) => queued,
            Err(e) => {
                error!(error = %e, "Failed to queue submission batch");
                return Vec::new();
            }
        };
        if queued.len() < submission_ids.len() {
            warn!(
                requested = submission_ids.len(),
                queued = queued.len(),
                rejudge,
                "Some submissions were already in flight and were skipped"
            );
        }

        let mut undispatched = 0usize;
        for &submission_id in &queued {
            if !self.dispatch_queued(submission_id, judge).await {
                undispatched += 1;
            }
        }
        if undispatched > 0 {
            warn!(
                undispatched,
                total = queued.len(),
                "Submissions left queued with no capable judge"
            );
        }
        queued
    }

    async fn dispatch_queued(&self, submission_id: i64, judge: Option<&str>) -> bool {
        let record = match self.store.get(submission_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(submission_id, "Submission vanished before dispatch");
                return false;
            }
            Err(e) => {
                error!(submission_id, error = %e, "Store read failed");
                return false;
            }
        };

        let Some((session, generation)) =
            self.registry
                .find_capable(&record.problem, &record.language, judge, submission_id)
        else {
            info!(
                submission_id,
                problem = %record.problem,
                language = %record.language,
                "No capable judge available, leaving submission queued"
            );
            return false;
        };

        let packet = submission_request(&record);
        match session.request_grading(&packet, generation).await {
            Ok(()) => {
                info!(
                    submission_id,
                    judge = %session.name(),
                    "Submission dispatched"
                );
                true
            }
            Err(e) => {
                error!(
                    submission_id,
                    judge = %session.name(),
                    error = %e,
                    "Hand-off failed, marking submission IE"
                );
                // The session transport is broken; its teardown repeats
                // this conditionally and cleans up the registry.
                if let Err(e) = self
                    .store
                    .set_internal_error(submission_id, "failed to send submission to judge")
                    .await
                {
                    error!(submission_id, error = %e, "Store update failed");
                }
                session.close();
                false
            }
        }
    }

    /// Request termination of an in-flight submission. The authoritative
    /// Aborted transition happens when the judge's `submission-terminated`
    /// packet arrives; this only delivers the request. Returns whether a
    /// holding judge was reached.
    pub async fn abort(&self, submission_id: i64) -> bool {
        match self.store.get(submission_id).await {
            Ok(Some(record)) if record.status.is_terminal() => {
                info!(submission_id, status = %record.status, "Submission already finalized");
                return false;
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!(submission_id, "Abort requested for an unknown submission");
                return false;
            }
            Err(e) => {
                error!(submission_id, error = %e, "Store read failed");
                return false;
            }
        }

        let Some(session) = self.registry.holder_of(submission_id) else {
            info!(submission_id, "No judge holds this submission, nothing to abort");
            return false;
        };

        match session.send_packet(&BridgePacket::TerminateSubmission).await {
            Ok(()) => {
                info!(submission_id, judge = %session.name(), "Termination requested");
                true
            }
            Err(e) => {
                warn!(
                    submission_id,
                    judge = %session.name(),
                    error = %e,
                    "Failed to deliver termination request"
                );
                session.close();
                false
            }
        }
    }

    /// Ask a named judge to disconnect. `force` skips the graceful drain
    /// and tears the connection down immediately.
    pub async fn disconnect_judge(&self, name: &str, force: bool) -> bool {
        let Some(session) = self.registry.get(name) else {
            warn!(judge = %name, "Disconnect requested for an unknown judge");
            return false;
        };
        if force {
            info!(judge = %name, "Forcing disconnect");
            session.close();
        } else {
            info!(judge = %name, "Requesting graceful disconnect");
            if session.send_packet(&BridgePacket::Disconnect).await.is_err() {
                session.close();
            }
        }
        true
    }
}
