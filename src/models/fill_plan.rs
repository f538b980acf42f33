//! Fill plans: what gets entered on each dispenser form
//!
//! A plan is derived data. It is recomputed from the work order on every
//! job start and never stored.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One test step on a metering form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepName {
    WetDown,
    FirstRun,
    CalibrationRetest,
    Retest,
    MeterSealed,
}

/// Metered grades run the full calibration sequence
pub const METERED_SEQUENCE: [StepName; 5] = [
    StepName::WetDown,
    StepName::FirstRun,
    StepName::CalibrationRetest,
    StepName::Retest,
    StepName::MeterSealed,
];

/// Non-metered grades skip calibration and sealing
pub const NON_METERED_SEQUENCE: [StepName; 3] =
    [StepName::WetDown, StepName::FirstRun, StepName::Retest];

impl StepName {
    pub fn label(self) -> &'static str {
        match self {
            StepName::WetDown => "Wet Down",
            StepName::FirstRun => "First Run",
            StepName::CalibrationRetest => "Calibration Retest",
            StepName::Retest => "Retest",
            StepName::MeterSealed => "Meter Sealed",
        }
    }

    /// Token used in field selectors
    pub fn slug(self) -> &'static str {
        match self {
            StepName::WetDown => "wet-down",
            StepName::FirstRun => "first-run",
            StepName::CalibrationRetest => "calibration-retest",
            StepName::Retest => "retest",
            StepName::MeterSealed => "meter-sealed",
        }
    }

    /// Value entered for a passing step
    pub fn pass_value(self) -> &'static str {
        match self {
            StepName::MeterSealed => "Yes",
            _ => "Pass",
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Plan for one fuel grade on one dispenser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuelStep {
    pub fuel_grade: String,
    pub metered: bool,
    pub sequence: Vec<StepName>,
}

/// Metering form plan for one dispenser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeteringPlan {
    pub dispenser_number: u32,
    pub steps: Vec<FuelStep>,
}

/// Checks on the open-neck prover form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProverStep {
    ProverFilled,
    ProverLeveled,
    ProverDrained,
    Result,
}

pub const PROVER_SEQUENCE: [ProverStep; 4] = [
    ProverStep::ProverFilled,
    ProverStep::ProverLeveled,
    ProverStep::ProverDrained,
    ProverStep::Result,
];

impl ProverStep {
    pub fn slug(self) -> &'static str {
        match self {
            ProverStep::ProverFilled => "prover-filled",
            ProverStep::ProverLeveled => "prover-leveled",
            ProverStep::ProverDrained => "prover-drained",
            ProverStep::Result => "result",
        }
    }

    pub fn pass_value(self) -> &'static str {
        match self {
            ProverStep::Result => "Pass",
            _ => "Yes",
        }
    }
}

/// Open-neck prover form plan for one dispenser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProverPlan {
    pub dispenser_number: u32,
    pub sequence: Vec<ProverStep>,
}

/// Which kind of form a plan fills
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FormType {
    Metering,
    OpenNeckProver,
}

/// Per-dispenser plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "formType", rename_all = "camelCase")]
pub enum FillPlan {
    Metering(MeteringPlan),
    OpenNeckProver(ProverPlan),
}

/// A single (selector, value) entry ready for the session driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldEntry {
    pub selector: String,
    pub value: String,
}

/// One progress unit inside a plan: a fuel grade, or the whole prover form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillUnit {
    pub label: String,
    pub fuel_grade: Option<String>,
    pub entries: Vec<FieldEntry>,
}

impl FillPlan {
    pub fn dispenser_number(&self) -> u32 {
        match self {
            FillPlan::Metering(p) => p.dispenser_number,
            FillPlan::OpenNeckProver(p) => p.dispenser_number,
        }
    }

    pub fn form_type(&self) -> FormType {
        match self {
            FillPlan::Metering(_) => FormType::Metering,
            FillPlan::OpenNeckProver(_) => FormType::OpenNeckProver,
        }
    }

    /// Number of progress units: one per fuel grade, one for a prover form
    pub fn unit_count(&self) -> usize {
        match self {
            FillPlan::Metering(p) => p.steps.len(),
            FillPlan::OpenNeckProver(_) => 1,
        }
    }

    /// Expand the plan into field entries using a selector template.
    ///
    /// The template may contain `{grade}` (zero-based grade index) and
    /// `{step}` (step slug).
    pub fn units(&self, field_template: &str) -> Vec<FillUnit> {
        match self {
            FillPlan::Metering(plan) => plan
                .steps
                .iter()
                .enumerate()
                .map(|(grade_index, step)| FillUnit {
                    label: step.fuel_grade.clone(),
                    fuel_grade: Some(step.fuel_grade.clone()),
                    entries: step
                        .sequence
                        .iter()
                        .map(|name| FieldEntry {
                            selector: render_selector(field_template, grade_index, name.slug()),
                            value: name.pass_value().to_string(),
                        })
                        .collect(),
                })
                .collect(),
            FillPlan::OpenNeckProver(plan) => vec![FillUnit {
                label: "Open Neck Prover".to_string(),
                fuel_grade: None,
                entries: plan
                    .sequence
                    .iter()
                    .map(|step| FieldEntry {
                        selector: render_selector(field_template, 0, step.slug()),
                        value: step.pass_value().to_string(),
                    })
                    .collect(),
            }],
        }
    }
}

fn render_selector(template: &str, grade_index: usize, step: &str) -> String {
    template
        .replace("{grade}", &grade_index.to_string())
        .replace("{step}", step)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan() -> FillPlan {
        FillPlan::Metering(MeteringPlan {
            dispenser_number: 2,
            steps: vec![
                FuelStep {
                    fuel_grade: "Regular".into(),
                    metered: true,
                    sequence: METERED_SEQUENCE.to_vec(),
                },
                FuelStep {
                    fuel_grade: "Plus".into(),
                    metered: false,
                    sequence: NON_METERED_SEQUENCE.to_vec(),
                },
            ],
        })
    }

    #[test]
    fn units_expand_one_entry_per_step() {
        let units = sample_plan().units("#g{grade}-{step}");
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].entries.len(), 5);
        assert_eq!(units[1].entries.len(), 3);
        assert_eq!(units[1].entries[0].selector, "#g1-wet-down");
        assert_eq!(units[0].entries[4].value, "Yes");
    }

    #[test]
    fn prover_plan_is_a_single_unit() {
        let plan = FillPlan::OpenNeckProver(ProverPlan {
            dispenser_number: 1,
            sequence: PROVER_SEQUENCE.to_vec(),
        });
        assert_eq!(plan.unit_count(), 1);
        assert_eq!(plan.form_type(), FormType::OpenNeckProver);
        let units = plan.units("[data-step={step}]");
        assert_eq!(units[0].fuel_grade, None);
        assert_eq!(units[0].entries[3].selector, "[data-step=result]");
    }

    #[test]
    fn plan_json_is_tagged_by_form_type() {
        let json = serde_json::to_value(sample_plan()).unwrap();
        assert_eq!(json["formType"], "metering");
        assert_eq!(json["dispenserNumber"], 2);
        assert_eq!(json["steps"][0]["fuelGrade"], "Regular");
    }
}
