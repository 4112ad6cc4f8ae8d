//! Named calibration and IK scenarios.

use serde::{Deserialize, Serialize};

/// Scenario identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScenarioId {
    /// Full hardware calibration driven by two confirms, then live IK
    TPoseCalibration,

    /// Pre-assigned roles, no confirms, reduced T-pose
    SimulatedDriver,

    /// Head turned away from the body plane during identification
    MisalignedHead,

    /// Too few trackers until the user switches the rest on
    MissingDevices,

    /// A controller held past the avatar's arm length
    ReachStretch,

    /// Closed hands gripping still controllers
    GripController,
}

impl ScenarioId {
    /// Returns all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::TPoseCalibration,
            ScenarioId::SimulatedDriver,
            ScenarioId::MisalignedHead,
            ScenarioId::MissingDevices,
            ScenarioId::ReachStretch,
            ScenarioId::GripController,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::TPoseCalibration => "t_pose_calibration",
            ScenarioId::SimulatedDriver => "simulated_driver",
            ScenarioId::MisalignedHead => "misaligned_head",
            ScenarioId::MissingDevices => "missing_devices",
            ScenarioId::ReachStretch => "reach_stretch",
            ScenarioId::GripController => "grip_controller",
        }
    }

    /// Returns a description of what the scenario checks.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::TPoseCalibration => {
                "Identify, measure and root a noisy performer; the live avatar's hips land on the root anchor"
            }
            ScenarioId::SimulatedDriver => "Known roles calibrate without any confirm and keep the default eye height",
            ScenarioId::MisalignedHead => "Identification fails with code 2 until the performer faces forward",
            ScenarioId::MissingDevices => "Detection stalls on the connect-more prompt until the trackers return",
            ScenarioId::ReachStretch => "The forearm slides out and never shortens below its bind length",
            ScenarioId::GripController => "Automatic finger scores never rise on a still controller",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.to_lowercase().replace('-', "_");
        ScenarioId::all()
            .into_iter()
            .find(|id| id.name() == key || id.name().replace('_', "") == key)
            .ok_or_else(|| format!("Unknown scenario: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for id in ScenarioId::all() {
            assert_eq!(id.name().parse::<ScenarioId>(), Ok(id));
            assert!(!id.description().is_empty());
        }
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("T-Pose-Calibration".parse(), Ok(ScenarioId::TPoseCalibration));
        assert_eq!("reachstretch".parse(), Ok(ScenarioId::ReachStretch));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
