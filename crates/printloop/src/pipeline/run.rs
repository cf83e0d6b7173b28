//! Four-stage orchestrator: scan → extract → correct → print.

use std::thread::{self, ScopedJoinHandle};

use tracing::{error, info};

use super::result::{RunOutput, RunReport};
use crate::channel::ordered_channel;
use crate::config::PipelineConfig;
use crate::correct::run_correction_stage;
use crate::error::{PipelineError, Result};
use crate::extract::run_extract_stage;
use crate::machine::{MotionController, Scanner};
use crate::message::{ErrorMsg, PathMsg, ScanMsg};
use crate::plan::{PrintPlan, SegmentStore};
use crate::scan::{run_scan_stage, ScanContext};
use crate::stream::{run_print_stage, PlanEnds};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn plan_ends(segments: &SegmentStore) -> Result<PlanEnds> {
    let first = segments.get(0)?;
    let last = segments.get(segments.len().saturating_sub(1))?;
    let first_waypoint = first
        .waypoints
        .first()
        .copied()
        .ok_or_else(|| PipelineError::invalid_plan("first segment has no waypoints"))?;
    Ok(PlanEnds {
        first: first_waypoint,
        first_direction: first.direction,
        last_direction: last.direction,
        segments: segments.len(),
    })
}

fn join<T>(handle: ScopedJoinHandle<'_, Result<T>>, stage: &'static str) -> Result<T> {
    handle.join().map_err(|_| {
        error!("{stage} stage panicked");
        PipelineError::StagePanicked { stage }
    })?
}

fn keep<T>(result: Result<T>, failures: &mut Vec<PipelineError>) -> Option<T> {
    result.map_err(|e| failures.push(e)).ok()
}

/// The failure that brought the run down. Stages that only saw a peer
/// close its channel are reported last.
fn root_cause(mut failures: Vec<PipelineError>) -> PipelineError {
    let pos = failures
        .iter()
        .position(|e| !matches!(e, PipelineError::ChannelClosed { .. }))
        .unwrap_or(0);
    failures.swap_remove(pos)
}

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Run one print through the closed loop.
///
/// Spawns the four stage threads, connects them with ordered channels and
/// waits for all of them. The first stage to fail on its own account decides
/// the returned error; its neighbours unwind through closed channels.
pub fn run_pipeline<S, M>(
    plan: PrintPlan,
    config: &PipelineConfig,
    scanner: S,
    machine: M,
) -> Result<RunOutput>
where
    S: Scanner + Send,
    M: MotionController + Send,
{
    config.validate()?;
    let mask = plan.path_mask();
    let (raster, segments) = plan.into_parts();
    let ends = plan_ends(&segments)?;
    let controller = config.correction.controller.build();
    let nominal = segments.nominal_paths();
    info!(
        segments = segments.len(),
        mode = ?config.correction.mode,
        lookahead = config.correction.lookahead,
        "starting pipeline"
    );

    let (start_tx, start_rx) = ordered_channel::<()>("start");
    let (scan_tx, scan_rx) = ordered_channel::<ScanMsg>("scan");
    let (err_tx, err_rx) = ordered_channel::<ErrorMsg>("extract");
    let (path_tx, path_rx) = ordered_channel::<PathMsg>("correct");

    let ctx = ScanContext {
        raster: &raster,
        mask: &mask,
        segments: &segments,
        config: &config.scan,
    };
    let controller = controller.as_ref();

    let (scan, measured, streamed, stream) = thread::scope(|s| {
        let scan = s.spawn(move || run_scan_stage(scanner, ctx, &start_rx, &scan_tx));
        let extract = s.spawn(move || {
            run_extract_stage(ctx.raster, ctx.segments, &config.extract, &scan_rx, &err_tx)
        });
        let correct = s.spawn(move || {
            run_correction_stage(&config.correction, controller, nominal, &err_rx, &path_tx)
        });
        let print = s.spawn(move || {
            run_print_stage(machine, &config.stream, &ends, &start_tx, &path_rx)
        });

        let mut failures = Vec::new();
        let scan = keep(join(scan, "scan"), &mut failures);
        let measured = keep(join(extract, "extract"), &mut failures);
        let streamed = keep(join(correct, "correct"), &mut failures);
        let stream = keep(join(print, "print"), &mut failures);
        match (scan, measured, streamed, stream) {
            (Some(a), Some(b), Some(c), Some(d)) => Ok((a, b, c, d)),
            _ => Err(root_cause(failures)),
        }
    })
    .map_err(|e| {
        error!(error = %e, "pipeline aborted");
        e
    })?;

    let report = RunReport {
        segments: segments.len(),
        measured_segments: measured,
        scan_cycles: scan.cycles,
        boundary_pixels: scan.marked_pixels,
        flushed_segments: scan.flushed_segments,
        stream,
    };
    info!(
        measured = report.measured_segments,
        cycles = report.scan_cycles,
        "pipeline finished"
    );
    Ok(RunOutput {
        report,
        raster,
        mask,
        boundary: scan.boundary,
        segments,
        streamed_paths: streamed,
    })
}
