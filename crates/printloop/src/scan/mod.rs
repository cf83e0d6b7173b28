//! Scan stage: turn scanner profiles into a running boundary bitmap and
//! announce segments as they finish scanning.

mod edges;
mod localize;

pub use edges::mark_boundary;
pub use localize::{localize_profile, sample_position, ProfileLine};

use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::channel::{Consumer, Producer};
use crate::error::{PipelineError, Result};
use crate::machine::Scanner;
use crate::message::ScanMsg;
use crate::plan::{Raster, SegmentStore};

const STAGE: &str = "scan";

/// Scanner geometry and boundary-detection thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Distance (mm) between the nozzle and the scan line, measured against
    /// the travel direction.
    pub scan_offset_mm: f64,
    /// Length (mm) of the scan line.
    pub scan_width_mm: f64,
    /// Radius (mm) around a scan-complete point that counts as reached.
    pub position_tolerance_mm: f64,
    /// Minimum material height (mm) on the high side of an edge.
    pub height_threshold_mm: f64,
    /// Minimum height change (mm) between neighbouring samples for an edge.
    pub min_edge_step_mm: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scan_offset_mm: 5.0,
            scan_width_mm: 12.0,
            position_tolerance_mm: 2.5,
            height_threshold_mm: 0.05,
            min_edge_step_mm: 0.05,
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        let positive = [
            ("scan_width_mm", self.scan_width_mm),
            ("position_tolerance_mm", self.position_tolerance_mm),
            ("min_edge_step_mm", self.min_edge_step_mm),
        ];
        for (name, v) in positive {
            if !v.is_finite() || v <= 0.0 {
                return Err(format!("scan.{name} must be finite and > 0"));
            }
        }
        if !self.scan_offset_mm.is_finite() || !self.height_threshold_mm.is_finite() {
            return Err("scan offsets and thresholds must be finite".to_string());
        }
        Ok(())
    }
}

/// Read-only inputs of the scan stage.
#[derive(Debug, Clone, Copy)]
pub struct ScanContext<'a> {
    pub raster: &'a Raster,
    pub mask: &'a GrayImage,
    pub segments: &'a SegmentStore,
    pub config: &'a ScanConfig,
}

/// What the scan stage leaves behind.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// Every boundary pixel marked during the run.
    pub boundary: GrayImage,
    /// Scanner acquisitions performed.
    pub cycles: usize,
    /// Boundary pixels set (counting repeats).
    pub marked_pixels: usize,
    /// Segments emitted without their scan-complete point being reached,
    /// because the print stream had already finished.
    pub flushed_segments: usize,
}

/// Run the scan stage to completion.
///
/// Blocks on `start` until the print stream signals that the machine is
/// ready, then acquires profiles until every segment has been emitted on
/// `out`. Segment indices are emitted strictly increasing, each once.
///
/// If the print stream goes away (its end of `start` is dropped) before all
/// scan-complete points were reached, the machine will not move again: the
/// remaining segments are emitted with the final bitmap.
pub fn run_scan_stage<S: Scanner>(
    mut scanner: S,
    ctx: ScanContext<'_>,
    start: &Consumer<()>,
    out: &Producer<ScanMsg>,
) -> Result<ScanOutcome> {
    let ScanContext {
        raster,
        mask,
        segments,
        config,
    } = ctx;
    let n = segments.len();
    let mut outcome = ScanOutcome {
        boundary: raster.blank(),
        cycles: 0,
        marked_pixels: 0,
        flushed_segments: 0,
    };
    if n == 0 {
        return Ok(outcome);
    }

    start.wait_and_pop()?;
    info!("scan stage started");

    let tol2 = config.position_tolerance_mm * config.position_tolerance_mm;
    let mut next = 0usize;
    while next < n {
        let sample = scanner.acquire().map_err(|e| {
            error!(error = %e, "scanner acquisition failed");
            PipelineError::machine(STAGE, e)
        })?;
        outcome.cycles += 1;

        match localize_profile(&sample.pose, sample.profile.len(), raster, config) {
            Some(line) => {
                let marked =
                    mark_boundary(&line, &sample.profile, mask, config, &mut outcome.boundary);
                outcome.marked_pixels += marked;
                if marked > 0 {
                    debug!(cycle = outcome.cycles, marked, "boundary pixels");
                }
            }
            None => debug!(cycle = outcome.cycles, "profile outside print region"),
        }

        let pos = sample.pose.xy();
        while next < n {
            let done = segments.get(next)?.scan_done_pt;
            let dx = pos[0] - done[0];
            let dy = pos[1] - done[1];
            if dx * dx + dy * dy >= tol2 {
                break;
            }
            info!("segment {next} scanned, sending for processing");
            emit(out, &outcome.boundary, next, n)?;
            next += 1;
        }

        if next < n && print_stream_finished(start) {
            warn!(
                remaining = n - next,
                "print stream finished before all segments were scanned"
            );
            while next < n {
                emit(out, &outcome.boundary, next, n)?;
                outcome.flushed_segments += 1;
                next += 1;
            }
        }
    }
    info!(cycles = outcome.cycles, "scan stage finished");
    Ok(outcome)
}

fn emit(out: &Producer<ScanMsg>, boundary: &GrayImage, segment: usize, n: usize) -> Result<()> {
    out.push(ScanMsg {
        boundary: boundary.clone(),
        segment,
        last: segment + 1 == n,
    })
}

fn print_stream_finished(start: &Consumer<()>) -> bool {
    matches!(start.try_pop(), Err(PipelineError::ChannelClosed { .. }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ordered_channel;
    use crate::machine::{MachineError, MachineResult, Pose, ScanSample};
    use crate::plan::{PrintDir, Segment, Waypoint};

    struct ScriptedScanner {
        positions: Vec<[f64; 2]>,
        at: usize,
    }

    impl Scanner for ScriptedScanner {
        fn acquire(&mut self) -> MachineResult<ScanSample> {
            let p = self
                .positions
                .get(self.at)
                .copied()
                .ok_or_else(|| MachineError::fault(1, "script exhausted"))?;
            self.at += 1;
            Ok(ScanSample {
                profile: vec![0.0; 16],
                pose: Pose {
                    x: p[0],
                    y: p[1],
                    z: 0.0,
                    theta: 0.0,
                },
            })
        }
    }

    fn raster() -> Raster {
        Raster {
            origin: [0.0, 0.0],
            mm_per_px: 0.5,
            width_px: 100,
            height_px: 100,
            mask_width_mm: 2.0,
        }
    }

    fn store(done: &[[f64; 2]]) -> SegmentStore {
        SegmentStore::new(
            done.iter()
                .map(|&d| {
                    Segment::new(
                        vec![Waypoint::at(d[0], d[1], 0.0)],
                        None,
                        PrintDir::XPos,
                        0,
                        d,
                    )
                })
                .collect(),
        )
    }

    fn run(
        positions: Vec<[f64; 2]>,
        done: &[[f64; 2]],
    ) -> (Result<ScanOutcome>, Vec<ScanMsg>) {
        let raster = raster();
        let mask = raster.blank();
        let segments = store(done);
        let config = ScanConfig::default();
        let (start_tx, start_rx) = ordered_channel("start");
        let (tx, rx) = ordered_channel("scan");
        start_tx.push(()).unwrap();
        let ctx = ScanContext {
            raster: &raster,
            mask: &mask,
            segments: &segments,
            config: &config,
        };
        let scanner = ScriptedScanner { positions, at: 0 };
        let result = run_scan_stage(scanner, ctx, &start_rx, &tx);
        drop(start_tx);
        let mut msgs = Vec::new();
        while let Ok(Some(m)) = rx.try_pop() {
            msgs.push(m);
        }
        (result, msgs)
    }

    #[test]
    fn emits_each_segment_once_in_order() {
        let done = [[10.0, 0.0], [20.0, 0.0], [30.0, 0.0]];
        // dwell on each done point for several cycles
        let positions = vec![
            [0.0, 0.0],
            [10.0, 0.0],
            [10.5, 0.0],
            [11.0, 0.0],
            [15.0, 0.0],
            [20.0, 0.0],
            [20.0, 0.0],
            [30.0, 0.0],
        ];
        let (result, msgs) = run(positions, &done);
        let outcome = result.unwrap();
        let idx: Vec<usize> = msgs.iter().map(|m| m.segment).collect();
        assert_eq!(idx, vec![0, 1, 2]);
        assert!(msgs[2].last && !msgs[0].last && !msgs[1].last);
        assert_eq!(outcome.cycles, 8);
        assert_eq!(outcome.flushed_segments, 0);
    }

    #[test]
    fn coincident_done_points_emit_in_one_cycle() {
        let done = [[10.0, 0.0], [10.0, 0.0], [20.0, 0.0]];
        let positions = vec![[10.0, 0.0], [20.0, 0.0]];
        let (result, msgs) = run(positions, &done);
        assert_eq!(result.unwrap().cycles, 2);
        let idx: Vec<usize> = msgs.iter().map(|m| m.segment).collect();
        assert_eq!(idx, vec![0, 1, 2]);
    }

    #[test]
    fn acquisition_fault_is_fatal() {
        let done = [[10.0, 0.0], [20.0, 0.0]];
        let (result, msgs) = run(vec![[10.0, 0.0]], &done);
        let err = result.unwrap_err();
        assert!(matches!(err, PipelineError::Machine { stage: "scan", .. }));
        assert_eq!(msgs.len(), 1);
    }
}
