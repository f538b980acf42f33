//! Dispenser targeting - business capability layer
//!
//! Service codes decide which dispensers a visit covers and which form type
//! is filled. The free-text instruction parser for "specific dispensers"
//! lives here too, behind a single function that fails loudly.

use crate::error::{AppResult, ParseError, ValidationError};
use crate::models::fill_plan::FillPlan;
use crate::models::work_order::{Dispenser, WorkOrder};
use crate::services::fuel_grade::FuelGradeClassifier;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use tracing::debug;

/// Widest range accepted in instruction text, e.g. "1-24"
const MAX_RANGE_WIDTH: u32 = 48;

static KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:dispensers?|disps?|pumps?|fueling\s+positions?)\b\.?")
        .expect("keyword pattern is valid")
});

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\d+|[a-z]+|[^\sa-z\d]").expect("token pattern is valid"));

/// Targeting strategy selected by a service code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    /// Fill every dispenser in order; count from `quantity`
    AllDispensers,
    /// Fill only the dispensers named in the instructions
    SpecificDispensers,
    /// Open-neck prover form instead of metering forms
    OpenNeckProver,
}

impl ServiceKind {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "2861" | "3002" => Some(ServiceKind::AllDispensers),
            "2862" => Some(ServiceKind::SpecificDispensers),
            "3146" => Some(ServiceKind::OpenNeckProver),
            _ => None,
        }
    }
}

/// Dispensers picked for a visit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSelection {
    pub service_code: String,
    pub kind: ServiceKind,
    pub dispensers: Vec<Dispenser>,
}

impl TargetSelection {
    pub fn numbers(&self) -> Vec<u32> {
        self.dispensers.iter().map(|d| d.number).collect()
    }
}

/// Everything the orchestrator needs to fill a visit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitPlan {
    pub selection: TargetSelection,
    pub plans: Vec<FillPlan>,
}

impl VisitPlan {
    /// Progress units across all dispensers
    pub fn total_units(&self) -> usize {
        self.plans.iter().map(FillPlan::unit_count).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Number(u32),
    RangeOp,
    Separator,
}

fn tokenize(rest: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    for m in TOKEN_RE.find_iter(rest) {
        let raw = m.as_str().to_ascii_lowercase();
        // "#3", "No: 4"
        if raw == "#" || raw == ":" {
            continue;
        }
        let token = if raw.chars().all(|c| c.is_ascii_digit()) {
            match raw.parse() {
                Ok(n) => Token::Number(n),
                Err(_) => break,
            }
        } else {
            match raw.as_str() {
                "-" | "to" | "thru" | "through" => Token::RangeOp,
                "," | "&" | "/" | "+" | "." | "and" | "no" | "nos" | "number"
                | "numbers" => Token::Separator,
                _ => break,
            }
        };
        tokens.push(token);
    }
    tokens
}

fn collect_numbers(tokens: &[Token], out: &mut BTreeSet<u32>) -> Result<(), ParseError> {
    let mut last: Option<u32> = None;
    let mut in_range = false;

    for token in tokens {
        match *token {
            Token::Number(n) => {
                if n == 0 {
                    return Err(ParseError::ZeroDispenser);
                }
                match (in_range, last) {
                    (true, Some(start)) => {
                        if start > n {
                            return Err(ParseError::ReversedRange { start, end: n });
                        }
                        if n - start > MAX_RANGE_WIDTH {
                            return Err(ParseError::RangeTooWide { start, end: n });
                        }
                        out.extend(start..=n);
                        last = None;
                    }
                    _ => {
                        out.insert(n);
                        last = Some(n);
                    }
                }
                in_range = false;
            }
            Token::RangeOp => in_range = last.is_some(),
            Token::Separator => {
                in_range = false;
            }
        }
    }
    Ok(())
}

/// Extract dispenser numbers from free-text instructions.
///
/// Numbers are read from the run of digits, separators and range words
/// following each "dispenser"/"pump" keyword. Finding none is an error.
pub fn parse_dispenser_numbers(instructions: &str) -> Result<BTreeSet<u32>, ParseError> {
    let mut numbers = BTreeSet::new();

    for keyword in KEYWORD_RE.find_iter(instructions) {
        let tokens = tokenize(&instructions[keyword.end()..]);
        collect_numbers(&tokens, &mut numbers)?;
    }

    if numbers.is_empty() {
        return Err(ParseError::NoDispenserNumbers {
            text: instructions.trim().to_string(),
        });
    }
    debug!("instructions target dispensers {:?}", numbers);
    Ok(numbers)
}

/// Pick the dispensers a work order covers
pub fn resolve_targets(work_order: &WorkOrder, dispensers: &[Dispenser]) -> AppResult<TargetSelection> {
    let (service, kind) = work_order
        .service_codes
        .iter()
        .find_map(|sc| ServiceKind::from_code(&sc.code).map(|kind| (sc, kind)))
        .ok_or_else(|| ValidationError::NoSupportedServiceCode {
            work_order_id: work_order.id.clone(),
            codes: work_order.service_codes.iter().map(|sc| sc.code.clone()).collect(),
        })?;

    let mut available: Vec<Dispenser> = Vec::with_capacity(dispensers.len());
    for d in dispensers {
        if !available.iter().any(|a| a.number == d.number) {
            available.push(d.clone());
        }
    }
    available.sort_by_key(|d| d.number);

    let targeted = match kind {
        ServiceKind::AllDispensers | ServiceKind::OpenNeckProver => {
            if service.quantity == 0 {
                return Err(ValidationError::ZeroQuantity {
                    code: service.code.clone(),
                }
                .into());
            }
            let wanted = service.quantity as usize;
            if wanted > available.len() {
                return Err(ValidationError::InsufficientDispensers {
                    requested: service.quantity,
                    available: available.len(),
                }
                .into());
            }
            available.into_iter().take(wanted).collect()
        }
        ServiceKind::SpecificDispensers => {
            let numbers = parse_dispenser_numbers(&work_order.instructions_text)?;
            let mut picked = Vec::with_capacity(numbers.len());
            for number in numbers {
                let d = available
                    .iter()
                    .find(|d| d.number == number)
                    .ok_or(ValidationError::DispenserNotFound { number })?;
                picked.push(d.clone());
            }
            picked
        }
    };

    Ok(TargetSelection {
        service_code: service.code.trim().to_string(),
        kind,
        dispensers: targeted,
    })
}

/// Resolve targets and classify every targeted dispenser
pub fn plan_visit(
    classifier: &FuelGradeClassifier,
    work_order: &WorkOrder,
    dispensers: &[Dispenser],
) -> AppResult<VisitPlan> {
    let selection = resolve_targets(work_order, dispensers)?;
    let plans = selection
        .dispensers
        .iter()
        .map(|d| classifier.classify(&selection.service_code, d, &d.fuel_grades))
        .collect::<AppResult<Vec<_>>>()?;
    Ok(VisitPlan { selection, plans })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::work_order::ServiceCode;

    fn set(numbers: &[u32]) -> BTreeSet<u32> {
        numbers.iter().copied().collect()
    }

    fn work_order(code: &str, quantity: u32, instructions: &str, count: u32) -> WorkOrder {
        WorkOrder {
            id: "W-1".into(),
            service_codes: vec![ServiceCode {
                code: code.into(),
                quantity,
                description: String::new(),
            }],
            instructions_text: instructions.into(),
            dispensers: (1..=count)
                .map(|n| Dispenser::new(n, &["Regular", "Plus", "Premium"]))
                .collect(),
        }
    }

    #[test]
    fn parses_the_canonical_example() {
        assert_eq!(
            parse_dispenser_numbers("Test dispensers 1, 3, 5 only").unwrap(),
            set(&[1, 3, 5])
        );
    }

    #[test]
    fn parses_common_phrasings() {
        assert_eq!(parse_dispenser_numbers("Dispenser #2 and #4").unwrap(), set(&[2, 4]));
        assert_eq!(parse_dispenser_numbers("calibrate dispensers 1/2, 7/8").unwrap(), set(&[1, 2, 7, 8]));
        assert_eq!(parse_dispenser_numbers("Pumps 3-5 need meters").unwrap(), set(&[3, 4, 5]));
        assert_eq!(parse_dispenser_numbers("disp 1 thru 3 & 9").unwrap(), set(&[1, 2, 3, 9]));
        assert_eq!(
            parse_dispenser_numbers("Dispenser 4 is down. Pump 6 only.").unwrap(),
            set(&[4, 6])
        );
    }

    #[test]
    fn stops_at_the_first_unrelated_word() {
        assert_eq!(
            parse_dispenser_numbers("Dispensers 2, 4 have 12 nozzles").unwrap(),
            set(&[2, 4])
        );
    }

    #[test]
    fn fails_loudly_on_missing_numbers() {
        assert!(matches!(
            parse_dispenser_numbers("Test all dispensers please"),
            Err(ParseError::NoDispenserNumbers { .. })
        ));
        assert!(matches!(
            parse_dispenser_numbers("1, 3, 5"),
            Err(ParseError::NoDispenserNumbers { .. })
        ));
        assert!(parse_dispenser_numbers("").is_err());
    }

    #[test]
    fn rejects_bad_ranges_and_zero() {
        assert_eq!(
            parse_dispenser_numbers("dispensers 5-2"),
            Err(ParseError::ReversedRange { start: 5, end: 2 })
        );
        assert_eq!(parse_dispenser_numbers("dispenser 0"), Err(ParseError::ZeroDispenser));
        assert!(matches!(
            parse_dispenser_numbers("dispensers 1-500"),
            Err(ParseError::RangeTooWide { .. })
        ));
    }

    #[test]
    fn all_dispensers_uses_quantity() {
        let wo = work_order("2861", 2, "", 4);
        let selection = resolve_targets(&wo, &wo.dispensers).unwrap();
        assert_eq!(selection.kind, ServiceKind::AllDispensers);
        assert_eq!(selection.numbers(), vec![1, 2]);
    }

    #[test]
    fn quantity_larger_than_dispenser_list_fails() {
        let wo = work_order("3002", 6, "", 4);
        assert!(matches!(
            resolve_targets(&wo, &wo.dispensers),
            Err(AppError::Validation(ValidationError::InsufficientDispensers { requested: 6, available: 4 }))
        ));
    }

    #[test]
    fn specific_dispensers_come_from_instructions() {
        let wo = work_order("2862", 3, "Test dispensers 1, 3, 5 only", 6);
        let selection = resolve_targets(&wo, &wo.dispensers).unwrap();
        assert_eq!(selection.numbers(), vec![1, 3, 5]);
    }

    #[test]
    fn specific_dispenser_missing_from_work_order() {
        let wo = work_order("2862", 1, "dispenser 9", 4);
        assert!(matches!(
            resolve_targets(&wo, &wo.dispensers),
            Err(AppError::Validation(ValidationError::DispenserNotFound { number: 9 }))
        ));
    }

    #[test]
    fn unparseable_instructions_are_validation_errors() {
        let wo = work_order("2862", 1, "see site manager", 4);
        let err = resolve_targets(&wo, &wo.dispensers).unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(ValidationError::UnparseableInstructions(_))
        ));
    }

    #[test]
    fn unsupported_codes_are_rejected() {
        let wo = work_order("9999", 1, "", 2);
        assert!(matches!(
            resolve_targets(&wo, &wo.dispensers),
            Err(AppError::Validation(ValidationError::NoSupportedServiceCode { .. }))
        ));
    }

    #[test]
    fn prover_plan_for_each_target() {
        let wo = work_order("3146", 2, "", 3);
        let plan = plan_visit(&FuelGradeClassifier::new(), &wo, &wo.dispensers).unwrap();
        assert_eq!(plan.plans.len(), 2);
        assert!(plan.plans.iter().all(|p| matches!(p, FillPlan::OpenNeckProver(_))));
        assert_eq!(plan.total_units(), 2);
    }

    #[test]
    fn visit_plan_counts_fuel_units() {
        let wo = work_order("2861", 2, "", 2);
        let plan = plan_visit(&FuelGradeClassifier::new(), &wo, &wo.dispensers).unwrap();
        assert_eq!(plan.total_units(), 6);
    }
}
