//! Bodies of the two supervised loops.
//!
//! Each iteration reads a fresh settings snapshot, does its work, reports to
//! the status sink and sleeps. Cancellation is checked before every iteration
//! and raced against both the work and the sleep, with cancellation winning
//! ties.

use std::path::Path;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::probe::{self, ConnectivityState};
use super::scanner;
use super::status::{StatusMessage, StatusSink};
use super::upload::{SkipReason, UploadOutcome, UploadPipeline};
use crate::config::DeviceSettings;
use crate::context::AppContext;
use crate::error::UploadError;
use crate::logging::LogThrottle;

/// How often the "device unreachable" warning may repeat
const UNREACHABLE_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// What a single file-watch iteration did.
#[derive(Debug)]
pub enum FileTick {
    /// No folder configured or nothing to send
    Idle,
    Attempted(UploadOutcome),
    Failed(UploadError),
}

pub async fn file_watch_loop(ctx: AppContext, token: CancellationToken) {
    let pipeline = UploadPipeline::new(
        ctx.client.clone(),
        ctx.watch.marker(),
        ctx.watch.upload_timeout(),
    );
    let interval = ctx.watch.file_interval();
    info!(interval_ms = interval.as_millis() as u64, "File watch loop started");

    while !token.is_cancelled() {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            tick = file_tick(&ctx, &pipeline) => {
                if let FileTick::Attempted(outcome) = &tick {
                    debug!(outcome = ?outcome, "File tick finished");
                }
            }
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = sleep(interval) => {}
        }
    }

    info!("File watch loop stopped");
}

/// One scan and at most one upload attempt. Never fails: problems are
/// reported to the sink and returned for inspection.
pub async fn file_tick(ctx: &AppContext, pipeline: &UploadPipeline) -> FileTick {
    let settings = ctx.store.get().await;

    let Some(folder) = settings.watched_folder() else {
        return FileTick::Idle;
    };
    let Some(candidate) = scanner::next_candidate(&folder, pipeline.marker()).await else {
        return FileTick::Idle;
    };

    let connectivity = ctx.store.connectivity_for(&settings.ip).await;
    match pipeline.attempt(&settings, connectivity, &candidate).await {
        Ok(outcome) => {
            report_outcome(ctx.sink.as_ref(), &settings, &outcome);
            FileTick::Attempted(outcome)
        }
        Err(e) => {
            error!(file = %candidate.display(), error = %e, "Upload attempt aborted");
            ctx.sink
                .append_message(StatusMessage::error(failure_text(&candidate, &e)));
            FileTick::Failed(e)
        }
    }
}

fn report_outcome(sink: &dyn StatusSink, settings: &DeviceSettings, outcome: &UploadOutcome) {
    let message = match outcome {
        UploadOutcome::Delivered { file, mode, .. } => StatusMessage::info(format!(
            "{} delivered to {} ({})",
            display_name(file),
            settings.ip,
            mode.as_str()
        )),
        UploadOutcome::DeliveryFailed { file, error, .. } => StatusMessage::error(format!(
            "Failed to deliver {} to {}: {}",
            display_name(file),
            settings.ip,
            error
        )),
        UploadOutcome::Skipped {
            file,
            reason: SkipReason::NoModeConfigured,
            ..
        } => StatusMessage::info(format!(
            "No delivery mode configured; {} marked processed without upload",
            display_name(file)
        )),
        // The connectivity indicators already say it all
        UploadOutcome::Skipped {
            reason: SkipReason::NotReachable,
            ..
        } => return,
    };

    sink.append_message(message);
}

fn failure_text(candidate: &Path, error: &UploadError) -> String {
    match error {
        UploadError::MultipleModesActive => format!(
            "{} not sent: both delivery modes are enabled, enable only one",
            display_name(candidate)
        ),
        other => other.to_string(),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub async fn reachability_watch_loop(ctx: AppContext, token: CancellationToken) {
    let interval = ctx.watch.reachability_interval();
    let throttle = LogThrottle::new(UNREACHABLE_LOG_INTERVAL);
    let mut last: Option<ConnectivityState> = None;
    info!(interval_ms = interval.as_millis() as u64, "Reachability loop started");

    while !token.is_cancelled() {
        let state = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            state = reachability_tick(&ctx) => state,
        };

        if last != Some(state) {
            info!(
                address_valid = state.address_valid,
                reachable = state.reachable,
                "Connectivity changed"
            );
            if state.reachable {
                throttle.clear();
            }
            last = Some(state);
        }
        if state.address_valid && !state.reachable {
            let ip = ctx.store.get().await.ip.clone();
            if throttle.should_log(ip.trim()) {
                warn!(ip = %ip.trim(), "Device unreachable, uploads are paused");
            }
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = sleep(interval) => {}
        }
    }

    info!("Reachability loop stopped");
}

/// Probe the configured address, store and publish the result.
pub async fn reachability_tick(ctx: &AppContext) -> ConnectivityState {
    let settings = ctx.store.get().await;
    let state = probe::check(ctx.prober.as_ref(), &settings.ip, ctx.watch.probe_timeout()).await;

    ctx.store.set_connectivity(&settings.ip, state).await;
    ctx.sink.update_connectivity(state);
    state
}
