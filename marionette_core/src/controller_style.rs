//! Controller Style Policy - how the hands relate to the held controllers.
//!
//! Pure lookup: a [`ControllerStyle`] plus the calibration state resolves to
//! a [`StylePolicy`] that the IK engine and the host's model visibility read.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Named hand/controller configurations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControllerStyle {
    OpenHandFreeControllers,
    ClosedHandFreeControllers,
    #[default]
    ClosedHandAttachedControllers,
    OpenHandHiddenControllers,
    CloseHandStretchArm,
    OpenHandStretchArm,
}

impl ControllerStyle {
    pub const ALL: [ControllerStyle; 6] = [
        ControllerStyle::OpenHandFreeControllers,
        ControllerStyle::ClosedHandFreeControllers,
        ControllerStyle::ClosedHandAttachedControllers,
        ControllerStyle::OpenHandHiddenControllers,
        ControllerStyle::CloseHandStretchArm,
        ControllerStyle::OpenHandStretchArm,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ControllerStyle::OpenHandFreeControllers => "open_hand_free_controllers",
            ControllerStyle::ClosedHandFreeControllers => "closed_hand_free_controllers",
            ControllerStyle::ClosedHandAttachedControllers => "closed_hand_attached_controllers",
            ControllerStyle::OpenHandHiddenControllers => "open_hand_hidden_controllers",
            ControllerStyle::CloseHandStretchArm => "close_hand_stretch_arm",
            ControllerStyle::OpenHandStretchArm => "open_hand_stretch_arm",
        }
    }

    /// Resolves the toggles for this style.
    ///
    /// Until calibration is done every style behaves like
    /// `OpenHandFreeControllers` and tracker models stay visible.
    pub fn policy(&self, calibration_done: bool, objects_fingers: bool, uniform_blend: f64) -> StylePolicy {
        let open_fingers = if objects_fingers {
            FingerPolicy::Objects
        } else {
            FingerPolicy::Uniform(uniform_blend)
        };
        let style = if calibration_done {
            *self
        } else {
            ControllerStyle::OpenHandFreeControllers
        };

        let (attached, fingers, clamp, stretch, controllers_visible) = match style {
            ControllerStyle::OpenHandFreeControllers => (false, FingerPolicy::Open, false, false, true),
            ControllerStyle::ClosedHandFreeControllers => (true, FingerPolicy::Automatic, false, false, true),
            ControllerStyle::ClosedHandAttachedControllers => (true, FingerPolicy::Automatic, true, false, true),
            ControllerStyle::OpenHandHiddenControllers => (false, open_fingers, false, false, false),
            ControllerStyle::CloseHandStretchArm => (true, FingerPolicy::Automatic, true, true, true),
            ControllerStyle::OpenHandStretchArm => (false, open_fingers, false, true, false),
        };

        StylePolicy {
            attached,
            fingers,
            clamp,
            stretch,
            controller_models_visible: controllers_visible,
            tracker_models_visible: !calibration_done,
        }
    }
}

impl fmt::Display for ControllerStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown controller style: {0}")]
pub struct UnknownStyle(pub String);

impl FromStr for ControllerStyle {
    type Err = UnknownStyle;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.replace('-', "_").to_lowercase();
        Self::ALL
            .into_iter()
            .find(|style| style.name() == key || format!("{style:?}").to_lowercase() == key)
            .ok_or_else(|| UnknownStyle(s.to_string()))
    }
}

/// Finger solving mode selected by the policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FingerPolicy {
    /// Fingers at their bind pose
    Open,

    /// Every chain at one fixed blend
    Uniform(f64),

    /// Descent against the held controller's grip proxy
    Automatic,

    /// Descent against whatever shape the palm touches
    Objects,
}

/// Per-frame toggles derived from a style.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StylePolicy {
    /// Hands rotate onto the controller grip
    pub attached: bool,
    pub fingers: FingerPolicy,
    /// Controller proxy pinned to the grab point
    pub clamp: bool,
    /// Forearm extends to reach far wrists
    pub stretch: bool,
    pub controller_models_visible: bool,
    pub tracker_models_visible: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_style() {
        assert_eq!(ControllerStyle::default(), ControllerStyle::ClosedHandAttachedControllers);
    }

    #[test]
    fn test_policy_table() {
        let p = ControllerStyle::ClosedHandAttachedControllers.policy(true, false, 0.1);
        assert!(p.attached && p.clamp && !p.stretch && p.controller_models_visible);
        assert_eq!(p.fingers, FingerPolicy::Automatic);

        let p = ControllerStyle::ClosedHandFreeControllers.policy(true, false, 0.1);
        assert!(p.attached && !p.clamp);

        let p = ControllerStyle::CloseHandStretchArm.policy(true, false, 0.1);
        assert!(p.attached && p.clamp && p.stretch);

        let p = ControllerStyle::OpenHandStretchArm.policy(true, true, 0.1);
        assert!(!p.attached && p.stretch && !p.controller_models_visible);
        assert_eq!(p.fingers, FingerPolicy::Objects);

        let p = ControllerStyle::OpenHandHiddenControllers.policy(true, false, 0.1);
        assert_eq!(p.fingers, FingerPolicy::Uniform(0.1));
        assert!(!p.tracker_models_visible);
    }

    #[test]
    fn test_undone_calibration_forces_open_free() {
        for style in ControllerStyle::ALL {
            let p = style.policy(false, true, 0.1);
            assert!(!p.attached && !p.clamp && !p.stretch);
            assert_eq!(p.fingers, FingerPolicy::Open);
            assert!(p.controller_models_visible);
            assert!(p.tracker_models_visible);
        }
    }

    #[test]
    fn test_style_parse_roundtrip() {
        for style in ControllerStyle::ALL {
            assert_eq!(style.to_string().parse::<ControllerStyle>(), Ok(style));
        }
        assert_eq!(
            "CloseHandStretchArm".parse::<ControllerStyle>(),
            Ok(ControllerStyle::CloseHandStretchArm)
        );
        assert!("fists".parse::<ControllerStyle>().is_err());
    }
}
