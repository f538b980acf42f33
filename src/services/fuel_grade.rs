//! Fuel grade classifier - business capability layer
//!
//! Decides, per dispenser, which grades are metered (5-step calibration)
//! and which are not (3-step). Pure: the same service code and grade list
//! always produce the same plan.

use crate::error::{AppResult, ValidationError};
use crate::models::fill_plan::{
    FillPlan, FuelStep, MeteringPlan, ProverPlan, METERED_SEQUENCE, NON_METERED_SEQUENCE,
    PROVER_SEQUENCE,
};
use crate::models::work_order::Dispenser;
use crate::services::targeting::ServiceKind;
use phf::{phf_map, phf_set};
use std::collections::{BTreeMap, HashSet};

/// How a grade name is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeClass {
    Metered,
    NonMetered,
    /// Premium: metered unless a Super/Super Premium/Ultra grade shares the dispenser
    ConditionalPremium,
}

static GRADE_TABLE: phf::Map<&'static str, GradeClass> = phf_map! {
    "regular" => GradeClass::Metered,
    "unleaded" => GradeClass::Metered,
    "regular unleaded" => GradeClass::Metered,
    "unleaded regular" => GradeClass::Metered,
    "diesel" => GradeClass::Metered,
    "super" => GradeClass::Metered,
    "super premium" => GradeClass::Metered,
    "ultra" => GradeClass::Metered,
    "ethanol free" => GradeClass::Metered,
    "e0" => GradeClass::Metered,
    "race fuel" => GradeClass::Metered,
    "rec fuel" => GradeClass::Metered,
    "recreational fuel" => GradeClass::Metered,
    "plus" => GradeClass::NonMetered,
    "special 88" => GradeClass::NonMetered,
    "extra 89" => GradeClass::NonMetered,
    "midgrade 89" => GradeClass::NonMetered,
    "midgrade" => GradeClass::NonMetered,
    "mid grade" => GradeClass::NonMetered,
    "premium" => GradeClass::ConditionalPremium,
};

/// Grades that demote Premium to non-metered when present on the same dispenser
static PREMIUM_DEMOTERS: phf::Set<&'static str> = phf_set! {
    "super",
    "super premium",
    "ultra",
};

/// Lowercase, treat `-`/`_` as spaces, collapse whitespace
pub fn normalize_grade(name: &str) -> String {
    name.to_lowercase()
        .replace(['-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fuel grade classifier with an optional override table
#[derive(Debug, Clone, Default)]
pub struct FuelGradeClassifier {
    overrides: BTreeMap<String, GradeClass>,
}

impl FuelGradeClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build with extra grade names (`true` = metered)
    pub fn with_overrides(overrides: &BTreeMap<String, bool>) -> Self {
        let overrides = overrides
            .iter()
            .map(|(name, metered)| {
                let class = if *metered {
                    GradeClass::Metered
                } else {
                    GradeClass::NonMetered
                };
                (normalize_grade(name), class)
            })
            .collect();
        Self { overrides }
    }

    /// Look up a grade name. `None` means the name is not recognized.
    ///
    /// A trailing octane rating is tried with and without: "Super 93" is
    /// looked up as "super 93", then as "super".
    pub fn grade_class(&self, name: &str) -> Option<GradeClass> {
        let key = normalize_grade(name);
        self.lookup(&key)
            .or_else(|| without_octane(&key).and_then(|base| self.lookup(base)))
    }

    fn lookup(&self, key: &str) -> Option<GradeClass> {
        if let Some(class) = self.overrides.get(key) {
            return Some(*class);
        }
        if let Some(class) = GRADE_TABLE.get(key) {
            return Some(*class);
        }
        family_class(key)
    }

    /// Build the fill plan for one dispenser.
    ///
    /// `all_grades_on_dispenser` drives the Premium rule; when empty the
    /// dispenser's own grade list is used.
    pub fn classify(
        &self,
        service_code: &str,
        dispenser: &Dispenser,
        all_grades_on_dispenser: &[String],
    ) -> AppResult<FillPlan> {
        if ServiceKind::from_code(service_code) == Some(ServiceKind::OpenNeckProver) {
            return Ok(FillPlan::OpenNeckProver(ProverPlan {
                dispenser_number: dispenser.number,
                sequence: PROVER_SEQUENCE.to_vec(),
            }));
        }

        if dispenser.fuel_grades.is_empty() {
            return Err(ValidationError::EmptyFuelGrades {
                dispenser: dispenser.number,
            }
            .into());
        }

        let context = if all_grades_on_dispenser.is_empty() {
            &dispenser.fuel_grades[..]
        } else {
            all_grades_on_dispenser
        };
        let premium_demoted = context.iter().any(|g| is_premium_demoter(g));

        let mut seen = HashSet::new();
        let mut steps = Vec::with_capacity(dispenser.fuel_grades.len());
        for grade in &dispenser.fuel_grades {
            if !seen.insert(normalize_grade(grade)) {
                continue;
            }
            let class = self
                .grade_class(grade)
                .ok_or_else(|| ValidationError::UnknownFuelGrade {
                    grade: grade.clone(),
                    dispenser: dispenser.number,
                })?;
            let metered = match class {
                GradeClass::Metered => true,
                GradeClass::NonMetered => false,
                GradeClass::ConditionalPremium => !premium_demoted,
            };
            steps.push(FuelStep {
                fuel_grade: grade.trim().to_string(),
                metered,
                sequence: if metered {
                    METERED_SEQUENCE.to_vec()
                } else {
                    NON_METERED_SEQUENCE.to_vec()
                },
            });
        }

        Ok(FillPlan::Metering(MeteringPlan {
            dispenser_number: dispenser.number,
            steps,
        }))
    }
}

/// Families recognized by shape rather than exact name
fn family_class(key: &str) -> Option<GradeClass> {
    let words: Vec<&str> = key.split(' ').collect();
    let first = *words.first()?;

    if key.starts_with("ethanol free") || key.starts_with("non ethanol") || key.starts_with("rec ") {
        return Some(GradeClass::Metered);
    }
    if first == "race" || words.contains(&"diesel") {
        return Some(GradeClass::Metered);
    }
    None
}

/// "super 93" -> "super". `None` when the last word isn't a number or is
/// the only word.
fn without_octane(key: &str) -> Option<&str> {
    let (base, last) = key.rsplit_once(' ')?;
    let is_octane = !last.is_empty() && last.chars().all(|c| c.is_ascii_digit());
    is_octane.then_some(base)
}

fn is_premium_demoter(grade: &str) -> bool {
    let key = normalize_grade(grade);
    PREMIUM_DEMOTERS.contains(key.as_str())
        || without_octane(&key).is_some_and(|base| PREMIUM_DEMOTERS.contains(base))
}

/// Classify with the built-in tables only
pub fn classify(
    service_code: &str,
    dispenser: &Dispenser,
    all_grades_on_dispenser: &[String],
) -> AppResult<FillPlan> {
    FuelGradeClassifier::new().classify(service_code, dispenser, all_grades_on_dispenser)
}
