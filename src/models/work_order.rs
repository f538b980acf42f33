use serde::{Deserialize, Serialize};

/// A service line on a work order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCode {
    pub code: String,
    #[serde(deserialize_with = "deserialize_lenient_u32")]
    pub quantity: u32,
    #[serde(default)]
    pub description: String,
}

/// One physical dispenser and the grades configured on it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dispenser {
    #[serde(deserialize_with = "deserialize_lenient_u32")]
    pub number: u32,
    #[serde(default)]
    pub fuel_grades: Vec<String>,
}

impl Dispenser {
    pub fn new(number: u32, fuel_grades: &[&str]) -> Self {
        Self {
            number,
            fuel_grades: fuel_grades.iter().map(|g| g.to_string()).collect(),
        }
    }
}

/// Work order as delivered by the scheduling side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkOrder {
    pub id: String,
    #[serde(default)]
    pub service_codes: Vec<ServiceCode>,
    #[serde(default)]
    pub instructions_text: String,
    #[serde(default)]
    pub dispensers: Vec<Dispenser>,
}

/// One scheduled visit: the unit of work for a single job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visit {
    pub visit_id: String,
    pub visit_url: String,
    pub work_order: WorkOrder,
    #[serde(skip_serializing, skip_deserializing)]
    pub file_path: Option<String>,
}

impl Visit {
    pub fn new(visit_id: impl Into<String>, visit_url: impl Into<String>, work_order: WorkOrder) -> Self {
        Self {
            visit_id: visit_id.into(),
            visit_url: visit_url.into(),
            work_order,
            file_path: None,
        }
    }
}

// Scraped data carries numbers as either strings or integers
fn deserialize_lenient_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct LenientU32;

    impl<'de> Visitor<'de> for LenientU32 {
        type Value = u32;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a non-negative integer or a string holding one")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            value
                .trim()
                .trim_start_matches('#')
                .parse()
                .map_err(|_| E::custom(format!("not a number: {}", value)))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            u32::try_from(value).map_err(|_| E::custom(format!("out of range: {}", value)))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            u32::try_from(value).map_err(|_| E::custom(format!("out of range: {}", value)))
        }
    }

    deserializer.deserialize_any(LenientU32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_accepts_string_or_number() {
        let json = r#"{"code":"2861","quantity":"4","description":"AccuMeasure"}"#;
        let sc: ServiceCode = serde_json::from_str(json).unwrap();
        assert_eq!(sc.quantity, 4);

        let json = r#"{"code":"2861","quantity":6}"#;
        let sc: ServiceCode = serde_json::from_str(json).unwrap();
        assert_eq!(sc.quantity, 6);
        assert_eq!(sc.description, "");
    }

    #[test]
    fn dispenser_number_accepts_hash_prefix() {
        let json = r##"{"number":"#3","fuelGrades":["Regular"]}"##;
        let d: Dispenser = serde_json::from_str(json).unwrap();
        assert_eq!(d.number, 3);
    }

    #[test]
    fn visit_loads_from_toml() {
        let text = r#"
visitId = "V-100"
visitUrl = "https://app.example.com/visits/100"

[workOrder]
id = "W-100"
instructionsText = "Test dispensers 1, 3 only"

[[workOrder.serviceCodes]]
code = "2862"
quantity = 2

[[workOrder.dispensers]]
number = 1
fuelGrades = ["Regular", "Plus", "Premium"]
"#;
        let visit: Visit = toml::from_str(text).unwrap();
        assert_eq!(visit.visit_id, "V-100");
        assert_eq!(visit.work_order.service_codes[0].code, "2862");
        assert_eq!(visit.work_order.dispensers[0].fuel_grades.len(), 3);
        assert!(visit.file_path.is_none());
    }
}
