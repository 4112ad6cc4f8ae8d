//! User-facing prompt catalogue, keyed by stage and failure code.

use crate::marionette_calibration::CalibrationStage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Code shared by every stage when a bone or device is missing.
pub const MISSING_DATA_CODE: u8 = 3;

/// When a prompt is shown relative to its stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptKind {
    Intro,
    Success,
    Failure,
    Progress,
}

/// One message for the display surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub stage: CalibrationStage,
    pub kind: PromptKind,
    pub text: String,
}

impl Prompt {
    pub fn new(stage: CalibrationStage, kind: PromptKind, text: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            text: text.into(),
        }
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.stage, self.text)
    }
}

/// Instructions shown when a stage begins.
pub fn intro(stage: CalibrationStage) -> Option<String> {
    let text = match stage {
        CalibrationStage::Dirty => return None,
        CalibrationStage::Devices => {
            "Setting up device indices and taking some measures... Please, stand on a T-pose. Press TRIGGER when ready!"
        }
        CalibrationStage::TPose => {
            "Taking some measures... Please, stand on a T-pose. Press TRIGGER when ready!"
        }
        CalibrationStage::RootAvatar => {
            "Setting up root... Please, stand on a T-pose inside the avatar shown. Press TRIGGER when ready!"
        }
        CalibrationStage::Done => "Avatar setup completed successfully.",
    };
    Some(text.to_string())
}

/// Shown after a stage completes.
pub fn success(stage: CalibrationStage) -> Option<String> {
    match stage {
        CalibrationStage::Devices => Some("Devices were identified correctly!".to_string()),
        CalibrationStage::TPose => Some("Measures were correctly captured!".to_string()),
        _ => None,
    }
}

/// Shown after a failed attempt.
pub fn failure(stage: CalibrationStage, code: u8) -> Option<String> {
    if code == MISSING_DATA_CODE {
        return Some(
            "Could not find a required bone or device. Please, stand on a T-pose and try again."
                .to_string(),
        );
    }
    let text = match (stage, code) {
        (CalibrationStage::Dirty, _) => "Please, connect more controllers and/or trackers.",
        (CalibrationStage::Devices, 0) => {
            "Not enough devices! Need at least two controllers and/or trackers."
        }
        (CalibrationStage::Devices, 1) => {
            "Could not identify tracked objects! Make sure you're standing on a T-pose."
        }
        (CalibrationStage::Devices, 2) => {
            "Your head is not aligned with the rest of your body! Make sure you're standing on a T-pose."
        }
        _ => return None,
    };
    Some(text.to_string())
}

/// Shown while a stage works. `{0}`, `{1}`... are replaced by `args`.
pub fn progress(stage: CalibrationStage, args: &[&dyn fmt::Display]) -> Option<String> {
    let template = match stage {
        CalibrationStage::Dirty => "Found {0} controller(s) and {1} tracker(s).",
        CalibrationStage::TPose => "Taking some measures... Please, stand on a T-pose.",
        CalibrationStage::RootAvatar => {
            "Setting up root... Please, stand on a T-pose inside the avatar shown."
        }
        _ => return None,
    };
    let text = args
        .iter()
        .enumerate()
        .fold(template.to_string(), |text, (i, arg)| {
            text.replace(&format!("{{{i}}}"), &arg.to_string())
        });
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_codes() {
        assert!(failure(CalibrationStage::Devices, 0).unwrap().starts_with("Not enough devices"));
        assert!(failure(CalibrationStage::Devices, 2).unwrap().contains("head is not aligned"));
        assert!(failure(CalibrationStage::Dirty, 0).unwrap().contains("connect more"));
        assert!(failure(CalibrationStage::TPose, 0).is_none());
        assert!(failure(CalibrationStage::RootAvatar, 3).unwrap().contains("required bone"));
    }

    #[test]
    fn test_progress_substitutes_counts() {
        let text = progress(CalibrationStage::Dirty, &[&1, &2]).unwrap();
        assert_eq!(text, "Found 1 controller(s) and 2 tracker(s).");
        assert!(progress(CalibrationStage::Devices, &[]).is_none());
    }

    #[test]
    fn test_intro_and_success() {
        assert!(intro(CalibrationStage::Dirty).is_none());
        assert_eq!(intro(CalibrationStage::Done).unwrap(), "Avatar setup completed successfully.");
        assert!(success(CalibrationStage::Done).is_none());
        assert!(success(CalibrationStage::TPose).is_some());
    }
}
