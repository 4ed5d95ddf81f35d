use serde::{Deserialize, Serialize};

use crate::risk::{Joint, JointRisks};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exercise {
    pub name: String,
    pub description: String,
}

impl Exercise {
    fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
        }
    }

    fn for_joint(joint: Joint) -> Self {
        match joint {
            Joint::Back => Self::new(
                "Cat-Cow Stretch",
                "Improves spinal flexibility and reduces back strain. Perform 10 reps, holding each position for 5 seconds.",
            ),
            Joint::Knees => Self::new(
                "Quadriceps Stretch",
                "Strengthens knee support muscles. Hold for 30 seconds per leg, 3 reps.",
            ),
            Joint::Shoulders => Self::new(
                "Shoulder Blade Squeeze",
                "Improves shoulder stability. Perform 15 reps, holding for 5 seconds.",
            ),
        }
    }

    fn warm_up() -> Self {
        Self::new(
            "General Warm-Up",
            "Perform light cardio and dynamic stretches for 5-10 minutes to prepare muscles.",
        )
    }
}

/// One exercise per joint at Moderate or above, in back/knees/shoulders
/// order; a generic warm-up when nothing is elevated.
pub fn suggest_exercises(risks: &JointRisks) -> Vec<Exercise> {
    let mut exercises: Vec<Exercise> = risks
        .iter()
        .filter(|(_, level)| level.is_elevated())
        .map(|(joint, _)| Exercise::for_joint(joint))
        .collect();

    if exercises.is_empty() {
        exercises.push(Exercise::warm_up());
    }
    exercises
}
