//! printloop: closed-loop scan/measure/correct/stream pipeline for
//! extrusion printing.
//!
//! A line scanner trails the nozzle and measures the as-built rods while the
//! machine keeps printing. The measured width and centerline errors of each
//! finished rod are fed forward into rods that have not been streamed yet.
//! The stages are:
//!
//! 1. **Scan** – localize every scanner profile in the raster frame and mark
//!    height edges into a boundary bitmap; emit a segment once the machine
//!    passes its scan-complete point.
//! 2. **Extract** – trace and smooth the two boundary curves inside the
//!    segment's region of interest and compute per-waypoint errors.
//! 3. **Correct** – run the configured controller over a segment further
//!    ahead and release paths in order.
//! 4. **Print** – stream commands into the machine queue with backpressure
//!    retry, bracketing the run with lead-in/lead-out moves.
//!
//! # Public API
//! - [`run_pipeline`] with a [`PrintPlan`], a [`PipelineConfig`] and the two
//!   hardware interfaces [`Scanner`] and [`MotionController`]
//! - per-stage configuration and the controller/material model types
//! - [`sim`] for an in-memory bench and demo plans
//! - [`diagnostics`] for persisted run output

mod channel;
mod config;
mod correct;
pub mod diagnostics;
mod error;
mod extract;
mod machine;
mod message;
mod pipeline;
mod plan;
mod scan;
pub mod sim;
mod stream;

#[cfg(test)]
mod test_utils;

pub use channel::{ordered_channel, Consumer, Producer};
pub use config::PipelineConfig;
pub use correct::{
    correct_segment, AugerController, Controller, ControllerConfig, CorrectionConfig,
    CorrectionMode, MaterialModel, MaterialModelKind, NoController, VelocityController,
};
pub use error::{MachineError, MachineResult, PipelineError, Result};
pub use extract::{measure_segment, waypoint_error, ExtractConfig};
pub use machine::{MotionCommand, MotionController, Pose, ScanSample, Scanner};
pub use message::{ErrorMsg, PathMsg, ScanMsg};
pub use pipeline::{run_pipeline, RunOutput, RunReport};
pub use plan::{
    Measurement, PixelRect, PrintDir, PrintPlan, Raster, Segment, SegmentStore, Waypoint,
    PLAN_SCHEMA_V1,
};
pub use scan::{localize_profile, mark_boundary, ProfileLine, ScanConfig};
pub use stream::{StreamConfig, StreamSummary};
