//! Uploader task: streams a source through the flow controller

use super::flow_control::{Acquire, FlowController};
use super::source::UploadSource;
use super::write_channel::CommandChannel;
use crate::firmware::g2core::queue_report_query;
use gcodelink_core::{
    EventBus, ProtocolVariant, Result, StreamError, StreamEvent, TaskEvent, TaskKind,
};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Everything the uploader thread needs
pub struct UploaderContext {
    pub controller: Arc<FlowController>,
    pub channel: Arc<CommandChannel>,
    pub bus: Arc<EventBus>,
    pub port: String,
    /// How long to wait for a queue report before asking again (QueryCredit)
    pub query_interval: Duration,
}

/// Start the uploader thread. The caller must already have called
/// [`FlowController::begin_upload`].
pub fn spawn_uploader(ctx: UploaderContext, source: UploadSource) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("gcodelink-uploader".to_string())
        .spawn(move || run(ctx, source))
        .map_err(|e| {
            StreamError::Task {
                reason: format!("failed to spawn uploader: {}", e),
            }
            .into()
        })
}

fn run(ctx: UploaderContext, source: UploadSource) {
    ctx.bus.emit(TaskEvent::ThreadStarted(TaskKind::Uploader));
    ctx.bus.emit(StreamEvent::Started);
    info!("Uploading {} to {}", source.name(), ctx.port);

    let started = Instant::now();
    let mut sent = 0;
    let failure = match upload(&ctx, &source, &mut sent) {
        Ok(true) => {
            ctx.controller.finish_upload();
            let duration = started.elapsed();
            info!(
                "Upload to {} completed: {} lines in {:?}",
                ctx.port, sent, duration
            );
            ctx.bus.emit(StreamEvent::Completed {
                lines: sent,
                duration,
            });
            None
        }
        Ok(false) => {
            ctx.controller.cancel_upload();
            info!("Upload to {} cancelled after {} lines", ctx.port, sent);
            ctx.bus.emit(StreamEvent::Cancelled { lines: sent });
            None
        }
        Err(e) => {
            ctx.controller.cancel_upload();
            error!("Upload to {} failed after {} lines: {}", ctx.port, sent, e);
            ctx.bus.emit(StreamEvent::Failed {
                error: e.to_string(),
            });
            Some(e.to_string())
        }
    };

    ctx.bus.emit(TaskEvent::ThreadStopped {
        task: TaskKind::Uploader,
        error: failure,
    });
}

/// Returns `Ok(true)` when every line was sent and acknowledged, `Ok(false)`
/// when the upload was stopped, and an error when the session closed under
/// it.
fn upload(ctx: &UploaderContext, source: &UploadSource, sent: &mut usize) -> Result<bool> {
    let controller = &ctx.controller;
    let line_ending = ctx.channel.line_ending();

    for line in source.lines()? {
        let line = line?;

        if !controller.is_started() || !controller.is_open() {
            return halted(ctx);
        }
        if !controller.wait_while_paused() {
            return halted(ctx);
        }

        let size = controller.line_cost(&line, line_ending);
        controller.check_fits(*sent + 1, size)?;

        if !reserve(ctx, size)? {
            return halted(ctx);
        }
        if !ctx.channel.write_tracked(&line, size)? {
            return halted(ctx);
        }

        *sent += 1;
        ctx.bus.emit(StreamEvent::ProgressLine(*sent));
    }

    if controller.variant() == ProtocolVariant::AckCounted {
        debug!("Waiting for {} to acknowledge outstanding lines", ctx.port);
        if !controller.wait_drained() {
            return halted(ctx);
        }
        return Ok(true);
    }
    if !controller.is_started() || !controller.is_open() {
        return halted(ctx);
    }
    Ok(true)
}

/// Stop reason once the controller says the upload can't go on
///
/// An operator stop leaves the session open; anything else means the port
/// went away.
fn halted(ctx: &UploaderContext) -> Result<bool> {
    if ctx.controller.is_open() {
        Ok(false)
    } else {
        Err(StreamError::SessionClosed {
            port: ctx.port.clone(),
        }
        .into())
    }
}

/// Wait for credit. QueryCredit firmware is asked for a queue report each
/// time the wait comes up short.
fn reserve(ctx: &UploaderContext, size: usize) -> Result<bool> {
    let query = ctx.controller.variant() == ProtocolVariant::QueryCredit;
    let mut timeout = query.then_some(Duration::ZERO);

    loop {
        match ctx.controller.acquire(size, timeout) {
            Acquire::Granted => return Ok(true),
            Acquire::Cancelled | Acquire::Closed => return Ok(false),
            Acquire::TimedOut => {
                debug!("Out of planner slots on {}, querying queue", ctx.port);
                ctx.channel.write_raw(queue_report_query())?;
                timeout = Some(ctx.query_interval);
            }
        }
    }
}
