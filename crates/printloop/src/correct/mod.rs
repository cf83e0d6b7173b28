//! Correction stage: decide which waypoints to stream next.
//!
//! In feedback mode, the errors measured on segment `m` are applied to
//! segment `m + L`, where `L` is the lookahead. The first `L` segments are
//! streamed as planned. `L` must exceed the pipeline's measurement latency in
//! segments: segment `m` is only scanned once the machine has printed some
//! segments past it, and those must already have been released.

mod controller;
mod material;

pub use controller::{
    AugerController, Controller, ControllerConfig, NoController, VelocityController,
};
pub use material::{MaterialModel, MaterialModelKind};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::channel::{Consumer, Producer};
use crate::error::{PipelineError, Result};
use crate::message::{ErrorMsg, PathMsg};
use crate::plan::Waypoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionMode {
    /// Stream the nominal plan without reading errors.
    PassThrough,
    /// Correct future segments from measured ones.
    Feedback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    pub mode: CorrectionMode,
    /// Distance in segments between a measured segment and the one it
    /// corrects.
    pub lookahead: usize,
    pub controller: ControllerConfig,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            mode: CorrectionMode::Feedback,
            lookahead: 4,
            controller: ControllerConfig::default(),
        }
    }
}

impl CorrectionConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.mode == CorrectionMode::Feedback && self.lookahead == 0 {
            return Err("correction.lookahead must be > 0 in feedback mode".to_string());
        }
        self.controller.validate()
    }
}

/// Apply the controller to `target` from `reference` and its errors.
///
/// Waypoints are paired by position; pairs beyond the shorter of the three
/// sequences are left alone.
pub fn correct_segment(
    controller: &dyn Controller,
    target: &mut [Waypoint],
    reference: &[Waypoint],
    errors: &ErrorMsg,
) {
    let pairs = target
        .iter_mut()
        .zip(reference)
        .zip(errors.width_errors.iter().zip(&errors.centerline_errors));
    for ((t, r), (&wd, &cl)) in pairs {
        controller.next_waypoint(t, r, wd, cl);
    }
}

fn emit(out: &Producer<PathMsg>, paths: &[Vec<Waypoint>], segment: usize) -> Result<()> {
    debug!("releasing segment {segment}");
    out.push(PathMsg {
        waypoints: paths[segment].clone(),
        segment,
    })
}

/// Read the remaining error messages until the one for segment `n - 1`, or
/// until error extraction has finished. Extraction keeps pushing after the
/// last release, so the receiver must stay open until then.
fn drain_errors(
    errors: &Consumer<ErrorMsg>,
    mut seen: Option<usize>,
    n: usize,
) -> Result<usize> {
    let mut drained = 0usize;
    while seen.map_or(true, |s| s + 1 < n) {
        match errors.wait_and_pop() {
            Ok(msg) => {
                seen = Some(msg.segment);
                drained += 1;
            }
            Err(PipelineError::ChannelClosed { .. }) => break,
            Err(e) => return Err(e),
        }
    }
    if drained > 0 {
        debug!("{drained} error messages arrived after the last release");
    }
    Ok(drained)
}

/// Run the correction stage.
///
/// Releases every segment of `paths` exactly once, in index order, and
/// returns the paths as streamed (corrected where feedback applied). The
/// stage returns only after the error message of the final segment has been
/// read or error extraction has closed its end.
pub fn run_correction_stage(
    config: &CorrectionConfig,
    controller: &dyn Controller,
    mut paths: Vec<Vec<Waypoint>>,
    errors: &Consumer<ErrorMsg>,
    out: &Producer<PathMsg>,
) -> Result<Vec<Vec<Waypoint>>> {
    let n = paths.len();
    if config.mode == CorrectionMode::PassThrough {
        for i in 0..n {
            emit(out, &paths, i)?;
        }
        drain_errors(errors, None, n)?;
        info!("correction stage finished (pass-through)");
        return Ok(paths);
    }

    let lookahead = config.lookahead;
    let mut next = 0usize;
    let mut seen = None;
    while next < n.min(lookahead) {
        emit(out, &paths, next)?;
        next += 1;
    }
    while next < n {
        let msg = errors.wait_and_pop()?;
        let measured = msg.segment;
        seen = Some(measured);
        let target = measured + lookahead;
        if target < next {
            warn!("errors of segment {measured} arrived after segment {target} was released");
            continue;
        }
        while next < target.min(n) {
            warn!("no measurement maps to segment {next}; releasing it as planned");
            emit(out, &paths, next)?;
            next += 1;
        }
        if target >= n {
            break;
        }
        if msg.has_errors() {
            let (done, ahead) = paths.split_at_mut(target);
            correct_segment(controller, &mut ahead[0], &done[measured], &msg);
            info!("segment {target} corrected from segment {measured}");
        } else {
            debug!("segment {measured} has no errors; segment {target} released as planned");
        }
        emit(out, &paths, target)?;
        next = target + 1;
    }
    drain_errors(errors, seen, n)?;
    info!("correction stage finished");
    Ok(paths)
}
