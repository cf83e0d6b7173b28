//! Interfaces to the motion controller and the line scanner.
//!
//! Both are external collaborators. The pipeline only relies on the traits
//! below; a vendor SDK binding or the in-memory [`crate::sim`] bench
//! implements them. Every call returns a [`MachineResult`] whose error is
//! tagged retryable ([`MachineError::BufferFull`]) or fatal.

use std::fmt;

use serde::{Deserialize, Serialize};

pub use crate::error::{MachineError, MachineResult};
use crate::plan::Waypoint;

/// A command submitted to the motion controller.
#[derive(Debug, Clone, PartialEq)]
pub enum MotionCommand {
    /// Coordinated print move to a waypoint, followed by its extruder
    /// set-point. Occupies two queue lines.
    Print(Waypoint),
    /// Rapid (non-printing) move.
    Rapid { x: f64, y: f64, z: f64 },
    /// Extruder set-point without motion.
    Extrude(f64),
    /// Raw controller program text, one command per line.
    Raw(String),
}

impl MotionCommand {
    /// Number of controller queue lines this command occupies.
    pub fn line_count(&self) -> usize {
        match self {
            Self::Print(_) => 2,
            Self::Rapid { .. } | Self::Extrude(_) => 1,
            Self::Raw(text) => text.lines().filter(|l| !l.trim().is_empty()).count().max(1),
        }
    }
}

impl fmt::Display for MotionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Print(w) => write!(
                f,
                "G1 X{:.4} Y{:.4} Z{:.4} A{:.3} F{:.4}\n$AO[1].X = {:.4}\n",
                w.x, w.y, w.z, w.theta, w.feed, w.extrusion
            ),
            Self::Rapid { x, y, z } => writeln!(f, "G0 X{x:.4} Y{y:.4} Z{z:.4}"),
            Self::Extrude(e) => writeln!(f, "$AO[1].X = {e:.4}"),
            Self::Raw(text) => {
                if text.ends_with('\n') {
                    f.write_str(text)
                } else {
                    writeln!(f, "{text}")
                }
            }
        }
    }
}

/// Motion/extrusion controller with a bounded command queue.
pub trait MotionController {
    /// Submit one command. In queue mode this appends to the command buffer
    /// and fails with [`MachineError::BufferFull`] when it has no room.
    fn execute(&mut self, command: &MotionCommand) -> MachineResult<()>;

    /// Lines currently held in the command queue.
    fn queue_line_count(&mut self) -> MachineResult<usize>;

    /// Total line capacity of the command queue.
    fn queue_line_capacity(&mut self) -> MachineResult<usize>;

    /// Switch the print task into queue mode.
    fn initialize_queue(&mut self) -> MachineResult<()>;

    /// Start executing queued commands.
    fn program_start(&mut self) -> MachineResult<()>;

    /// Pause execution (commands keep queueing).
    fn program_pause(&mut self) -> MachineResult<()>;

    /// Stop any running program and leave queue mode.
    fn program_stop(&mut self) -> MachineResult<()>;

    /// Enable or disable the motion axes.
    fn set_motion_enabled(&mut self, enabled: bool) -> MachineResult<()>;

    /// Enable or disable the extruder (auger + air).
    fn set_extruder_enabled(&mut self, enabled: bool) -> MachineResult<()>;
}

/// Machine pose at the moment a scan was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Rotary axis angle in degrees.
    pub theta: f64,
}

impl Pose {
    #[inline]
    pub fn xy(&self) -> [f64; 2] {
        [self.x, self.y]
    }
}

/// One triggered line-scanner acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSample {
    /// Height profile across the scan line, evenly spaced over the scan
    /// width, in scanner-local order.
    pub profile: Vec<f64>,
    /// Machine pose at trigger time.
    pub pose: Pose,
}

/// Line scanner mounted on the print head.
pub trait Scanner {
    /// Trigger the scanner and return the profile with the matching pose.
    fn acquire(&mut self) -> MachineResult<ScanSample>;
}

impl<T: MotionController + ?Sized> MotionController for &mut T {
    fn execute(&mut self, command: &MotionCommand) -> MachineResult<()> {
        (**self).execute(command)
    }
    fn queue_line_count(&mut self) -> MachineResult<usize> {
        (**self).queue_line_count()
    }
    fn queue_line_capacity(&mut self) -> MachineResult<usize> {
        (**self).queue_line_capacity()
    }
    fn initialize_queue(&mut self) -> MachineResult<()> {
        (**self).initialize_queue()
    }
    fn program_start(&mut self) -> MachineResult<()> {
        (**self).program_start()
    }
    fn program_pause(&mut self) -> MachineResult<()> {
        (**self).program_pause()
    }
    fn program_stop(&mut self) -> MachineResult<()> {
        (**self).program_stop()
    }
    fn set_motion_enabled(&mut self, enabled: bool) -> MachineResult<()> {
        (**self).set_motion_enabled(enabled)
    }
    fn set_extruder_enabled(&mut self, enabled: bool) -> MachineResult<()> {
        (**self).set_extruder_enabled(enabled)
    }
}

impl<T: Scanner + ?Sized> Scanner for &mut T {
    fn acquire(&mut self) -> MachineResult<ScanSample> {
        (**self).acquire()
    }
}
