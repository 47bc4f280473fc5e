//! TCP listeners: one for judges, one for the administrative control
//! plane. Each accepted connection runs in its own task; nothing a single
//! peer does can stall the accept loops or another peer's session.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};
use uuid::Uuid;

use common::codec::{FrameReader, FrameWriter};
use common::packet::{AdminReply, AdminRequest};

use crate::dispatch::DispatchGateway;
use crate::registry::JudgeRegistry;
use crate::session::{self, SessionContext};

/// Accept judge connections forever.
pub async fn run_judge_listener(
    ctx: Arc<SessionContext>,
    listener: TcpListener,
) -> std::io::Result<()> {
    loop {
        let (socket, addr) = listener.accept().await?;
        let conn_id = Uuid::new_v4();
        info!(%addr, %conn_id, "Judge connection accepted");
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            session::handle_judge_connection(ctx, socket, conn_id).await;
        });
    }
}

/// Accept control-plane connections forever.
pub async fn run_admin_listener(
    gateway: Arc<DispatchGateway>,
    registry: Arc<JudgeRegistry>,
    listener: TcpListener,
    max_frame: u32,
) -> std::io::Result<()> {
    loop {
        let (socket, addr) = listener.accept().await?;
        let conn_id = Uuid::new_v4();
        info!(%addr, %conn_id, "Control-plane connection accepted");
        let gateway = Arc::clone(&gateway);
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            handle_admin_connection(gateway, registry, socket, conn_id, max_frame).await;
        });
    }
}

/// Request/reply loop over one control-plane connection.
async fn handle_admin_connection(
    gateway: Arc<DispatchGateway>,
    registry: Arc<JudgeRegistry>,
    socket: TcpStream,
    conn_id: Uuid,
    max_frame: u32,
) {
    let (read_half, write_half) = socket.into_split();
    let mut reader = FrameReader::new(read_half, max_frame);
    let mut writer = FrameWriter::new(write_half);

    loop {
        let reply = match reader.read_packet::<AdminRequest>().await {
            Ok(request) => handle_admin_request(&gateway, &registry, request).await,
            Err(e) if e.is_recoverable() => {
                warn!(%conn_id, error = %e, "Malformed control-plane request");
                AdminReply::Error {
                    message: e.to_string(),
                }
            }
            Err(_) => break,
        };
        if writer.write_packet(&reply).await.is_err() {
            break;
        }
    }
    info!(%conn_id, "Control-plane connection closed");
}

async fn handle_admin_request(
    gateway: &DispatchGateway,
    registry: &JudgeRegistry,
    request: AdminRequest,
) -> AdminReply {
    match request {
        AdminRequest::SubmissionRequest {
            submission_id,
            rejudge,
            judge_id,
        } => {
            gateway
                .submit(submission_id, rejudge, judge_id.as_deref())
                .await;
            AdminReply::SubmissionReceived { submission_id }
        }
        AdminRequest::BatchSubmissionRequest {
            submission_ids,
            rejudge,
            judge_id,
        } => {
            let queued = gateway
                .batch_submit(&submission_ids, rejudge, judge_id.as_deref())
                .await;
            AdminReply::BatchSubmissionReceived {
                submission_ids: queued,
            }
        }
        AdminRequest::TerminateSubmission { submission_id } => AdminReply::TerminateResult {
            judge_aborted: gateway.abort(submission_id).await,
        },
        AdminRequest::DisconnectJudge { judge_id, force } => AdminReply::JudgeDisconnected {
            ok: gateway.disconnect_judge(&judge_id, force).await,
        },
        AdminRequest::DisableJudge {
            judge_id,
            is_disabled,
        } => AdminReply::JudgeDisabled {
            ok: registry.set_disabled(&judge_id, is_disabled),
        },
    }
}
