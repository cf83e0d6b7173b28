//! Width controllers.
//!
//! A controller rewrites the process parameters of a future waypoint from
//! the error measured on an already printed reference waypoint. The reference
//! carries the parameters it was printed with, so any correction already
//! applied to it is carried forward and repeated errors integrate.

use serde::{Deserialize, Serialize};

use super::material::{MaterialModel, MaterialModelKind};
use crate::plan::Waypoint;

/// Adjusts a target waypoint given a measured reference waypoint.
pub trait Controller: Send + Sync {
    /// Update `target` in place. Only `feed` and `extrusion` may change.
    ///
    /// `width_error` > 0 means the reference bead came out too narrow.
    /// Non-finite errors leave the target unchanged.
    fn next_waypoint(
        &self,
        target: &mut Waypoint,
        reference: &Waypoint,
        width_error: f64,
        centerline_error: f64,
    );
}

/// Leaves every waypoint untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoController;

impl Controller for NoController {
    fn next_waypoint(&self, _: &mut Waypoint, _: &Waypoint, _: f64, _: f64) {}
}

/// Width the controller should command for `target`, or `None` when the
/// measurement is unusable.
fn commanded_width(
    model: &MaterialModel,
    gain: f64,
    max_ratio: f64,
    target: &Waypoint,
    reference: &Waypoint,
    width_error: f64,
) -> Option<f64> {
    if !width_error.is_finite() || target.width <= 0.0 {
        return None;
    }
    // offset already applied to the reference, relative to its own target
    let carried = model.width(reference.extrusion, reference.feed) - reference.width;
    let width = target.width + carried + gain * width_error;
    Some(width.clamp(target.width / max_ratio, target.width * max_ratio))
}

/// Corrects width through the extruder set-point at fixed feed.
#[derive(Debug, Clone, PartialEq)]
pub struct AugerController {
    pub model: MaterialModel,
    /// Fraction of the measured width error applied per correction.
    pub gain: f64,
    /// Commanded width stays within `[target / max_ratio, target · max_ratio]`.
    pub max_ratio: f64,
}

impl AugerController {
    pub fn new(model: MaterialModel, gain: f64, max_ratio: f64) -> Self {
        Self {
            model,
            gain,
            max_ratio,
        }
    }
}

impl Controller for AugerController {
    fn next_waypoint(&self, target: &mut Waypoint, reference: &Waypoint, width_error: f64, _: f64) {
        if let Some(w) = commanded_width(
            &self.model,
            self.gain,
            self.max_ratio,
            target,
            reference,
            width_error,
        ) {
            target.extrusion = self.model.extrusion_for(w, target.feed);
        }
    }
}

/// Corrects width through the feed rate at fixed extrusion.
#[derive(Debug, Clone, PartialEq)]
pub struct VelocityController {
    pub model: MaterialModel,
    pub gain: f64,
    pub max_ratio: f64,
}

impl VelocityController {
    pub fn new(model: MaterialModel, gain: f64, max_ratio: f64) -> Self {
        Self {
            model,
            gain,
            max_ratio,
        }
    }
}

impl Controller for VelocityController {
    fn next_waypoint(&self, target: &mut Waypoint, reference: &Waypoint, width_error: f64, _: f64) {
        if let Some(w) = commanded_width(
            &self.model,
            self.gain,
            self.max_ratio,
            target,
            reference,
            width_error,
        ) {
            target.feed = self.model.feed_for(w, target.extrusion);
        }
    }
}

/// Controller selection, as stored in configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerConfig {
    None,
    Auger {
        model: MaterialModel,
        gain: f64,
        max_ratio: f64,
    },
    Velocity {
        model: MaterialModel,
        gain: f64,
        max_ratio: f64,
    },
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::Auger {
            model: MaterialModel::default(),
            gain: 0.1,
            max_ratio: 1.5,
        }
    }
}

impl ControllerConfig {
    pub fn build(&self) -> Box<dyn Controller> {
        match self {
            Self::None => Box::new(NoController),
            Self::Auger {
                model,
                gain,
                max_ratio,
            } => Box::new(AugerController::new(model.clone(), *gain, *max_ratio)),
            Self::Velocity {
                model,
                gain,
                max_ratio,
            } => Box::new(VelocityController::new(model.clone(), *gain, *max_ratio)),
        }
    }

    /// Material model of the configured controller, if any.
    pub fn model(&self) -> Option<&MaterialModel> {
        match self {
            Self::None => None,
            Self::Auger { model, .. } | Self::Velocity { model, .. } => Some(model),
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        let (name, expected, model, gain, max_ratio) = match self {
            Self::None => return Ok(()),
            Self::Auger {
                model,
                gain,
                max_ratio,
            } => ("auger", MaterialModelKind::Auger, model, gain, max_ratio),
            Self::Velocity {
                model,
                gain,
                max_ratio,
            } => ("velocity", MaterialModelKind::Velocity, model, gain, max_ratio),
        };
        model.validate()?;
        if model.kind != expected {
            return Err(format!(
                "{name} controller needs a {expected:?} material model, got {:?}",
                model.kind
            ));
        }
        if !gain.is_finite() || *gain < 0.0 {
            return Err("controller gain must be finite and >= 0".to_string());
        }
        if !max_ratio.is_finite() || *max_ratio < 1.0 {
            return Err("controller max_ratio must be finite and >= 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn nominal(model: &MaterialModel) -> Waypoint {
        let mut w = Waypoint {
            feed: 2.0,
            width: 1.5,
            ..Waypoint::at(0.0, 0.0, 0.0)
        };
        w.extrusion = model.extrusion_for(w.width, w.feed);
        w
    }

    #[test]
    fn auger_raises_extrusion_for_narrow_bead() {
        let model = MaterialModel::default();
        let ctrl = AugerController::new(model.clone(), 0.5, 1.5);
        let reference = nominal(&model);
        let mut target = reference;
        ctrl.next_waypoint(&mut target, &reference, 0.2, 0.0);
        // commanded width 1.5 + 0.5 * 0.2 = 1.6 at feed 2
        assert_relative_eq!(target.extrusion, 3.2, epsilon = 1e-12);
        assert_eq!(target.feed, reference.feed);
        assert!(target.same_geometry(&reference));
    }

    #[test]
    fn correction_carries_over_from_reference() {
        let model = MaterialModel::default();
        let ctrl = AugerController::new(model.clone(), 0.5, 1.5);
        let mut reference = nominal(&model);
        // reference was already printed for width 1.6
        reference.extrusion = model.extrusion_for(1.6, reference.feed);
        let mut target = nominal(&model);
        ctrl.next_waypoint(&mut target, &reference, 0.2, 0.0);
        assert_relative_eq!(target.extrusion, 3.4, epsilon = 1e-12);
    }

    #[test]
    fn commanded_width_is_limited() {
        let model = MaterialModel::default();
        let ctrl = AugerController::new(model.clone(), 1.0, 1.5);
        let reference = nominal(&model);
        let mut target = reference;
        ctrl.next_waypoint(&mut target, &reference, 5.0, 0.0);
        assert_relative_eq!(model.width(target.extrusion, target.feed), 2.25, epsilon = 1e-12);
    }

    #[test]
    fn nan_error_leaves_target() {
        let model = MaterialModel::default();
        let reference = nominal(&model);
        let mut target = reference;
        AugerController::new(model, 0.5, 1.5).next_waypoint(&mut target, &reference, f64::NAN, 0.0);
        assert_eq!(target, reference);
    }

    #[test]
    fn velocity_slows_down_for_narrow_bead() {
        let model = MaterialModel {
            kind: MaterialModelKind::Velocity,
            ..MaterialModel::default()
        };
        let ctrl = VelocityController::new(model.clone(), 0.5, 1.5);
        let reference = nominal(&model);
        let mut target = reference;
        ctrl.next_waypoint(&mut target, &reference, 0.2, 0.0);
        assert!(target.feed < reference.feed);
        assert_eq!(target.extrusion, reference.extrusion);
    }

    #[test]
    fn config_is_tagged() {
        let cfg: ControllerConfig = serde_json::from_str(r#"{"type":"none"}"#).unwrap();
        assert_eq!(cfg, ControllerConfig::None);
        let text = serde_json::to_string(&ControllerConfig::default()).unwrap();
        assert!(text.contains("\"type\":\"auger\""));
        assert!(ControllerConfig::default().validate().is_ok());
    }

    #[test]
    fn mismatched_model_kind_is_rejected() {
        let cfg: ControllerConfig = serde_json::from_str(
            r#"{"type":"auger","model":{"kind":"velocity","gain":1.0,"exponent":1.0,"offset":0.0,"ratio_range":[0.1,10.0]},"gain":0.1,"max_ratio":1.5}"#,
        )
        .unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("auger"), "{err}");

        let velocity_model = MaterialModel {
            kind: MaterialModelKind::Velocity,
            ..MaterialModel::default()
        };
        let ok = ControllerConfig::Velocity {
            model: velocity_model,
            gain: 0.1,
            max_ratio: 1.5,
        };
        assert!(ok.validate().is_ok());
        let bad = ControllerConfig::Velocity {
            model: MaterialModel::default(),
            gain: 0.1,
            max_ratio: 1.5,
        };
        assert!(bad.validate().is_err());
    }
}
