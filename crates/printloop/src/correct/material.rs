//! Material response model.
//!
//! Deposited width follows a calibrated power law of the extrusion-to-feed
//! ratio:
//!
//! ```text
//! width = gain · ratio^exponent + offset,   ratio = extrusion / feed
//! ```
//!
//! An auger model solves for extrusion at a given feed; a velocity model
//! solves for feed at a given extrusion. Ratios are clamped to the range the
//! model was calibrated over.

use serde::{Deserialize, Serialize};

use crate::plan::Waypoint;

/// Which process parameter a model drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialModelKind {
    /// Drive extrusion (auger set-point) at fixed feed.
    Auger,
    /// Drive feed rate at fixed extrusion.
    Velocity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialModel {
    pub kind: MaterialModelKind,
    pub gain: f64,
    pub exponent: f64,
    pub offset: f64,
    /// Calibrated `[min, max]` extrusion/feed ratio.
    pub ratio_range: [f64; 2],
}

impl Default for MaterialModel {
    fn default() -> Self {
        Self {
            kind: MaterialModelKind::Auger,
            gain: 1.0,
            exponent: 1.0,
            offset: 0.0,
            ratio_range: [0.1, 10.0],
        }
    }
}

impl MaterialModel {
    /// Predicted deposited width for a set of process parameters.
    pub fn width(&self, extrusion: f64, feed: f64) -> f64 {
        if feed <= 0.0 {
            return self.offset;
        }
        let ratio = (extrusion / feed).max(0.0);
        self.gain * ratio.powf(self.exponent) + self.offset
    }

    /// Extrusion/feed ratio that yields `width`, clamped to the calibrated
    /// range.
    pub fn ratio_for_width(&self, width: f64) -> f64 {
        let [lo, hi] = self.ratio_range;
        let base = (width - self.offset) / self.gain;
        let ratio = if base > 0.0 {
            base.powf(1.0 / self.exponent)
        } else {
            lo
        };
        ratio.clamp(lo, hi)
    }

    /// Extrusion that yields `width` at `feed`.
    pub fn extrusion_for(&self, width: f64, feed: f64) -> f64 {
        self.ratio_for_width(width) * feed
    }

    /// Feed that yields `width` at `extrusion`.
    pub fn feed_for(&self, width: f64, extrusion: f64) -> f64 {
        extrusion / self.ratio_for_width(width)
    }

    /// Process parameter this model drives, for a target width and the
    /// other (fixed) parameter: extrusion for auger models given feed, feed
    /// for velocity models given extrusion.
    pub fn output(&self, width: f64, other: f64) -> f64 {
        match self.kind {
            MaterialModelKind::Auger => self.extrusion_for(width, other),
            MaterialModelKind::Velocity => self.feed_for(width, other),
        }
    }

    /// Assign the driven parameter of every waypoint from its target width.
    pub fn apply(&self, waypoints: &mut [Waypoint]) {
        for w in waypoints {
            match self.kind {
                MaterialModelKind::Auger => w.extrusion = self.output(w.width, w.feed),
                MaterialModelKind::Velocity => w.feed = self.output(w.width, w.extrusion),
            }
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        let [lo, hi] = self.ratio_range;
        if !(self.gain.is_finite() && self.gain > 0.0) {
            return Err("material model gain must be finite and > 0".to_string());
        }
        if !(self.exponent.is_finite() && self.exponent > 0.0) {
            return Err("material model exponent must be finite and > 0".to_string());
        }
        if !self.offset.is_finite() {
            return Err("material model offset must be finite".to_string());
        }
        if !(lo.is_finite() && hi.is_finite() && lo > 0.0 && lo <= hi) {
            return Err("material model ratio_range must satisfy 0 < min <= max".to_string());
        }
        Ok(())
    }
}
