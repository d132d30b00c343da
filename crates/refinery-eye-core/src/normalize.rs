//! Normalization of model output into [`AnalysisResult`].
//!
//! Three JSON shapes are accepted and mapped onto the canonical
//! [`InspectionFinding`]:
//!
//! | Shape | Array key | Field style | Severity scale |
//! |-------|-----------|-------------|----------------|
//! | canonical | `findings` | camelCase | Low/Medium/High/Critical |
//! | inspection report | `inspection_report` | snake_case | Low/Medium/High (Critical tolerated) |
//! | fault list | `faults` | camelCase (`component`, `description`, `standardGap`, `recommendation`) | Low/Medium/High/Critical |
//!
//! Required fields are required in every shape. A missing field, a wrong
//! type, or a severity outside the canonical enum yields
//! [`InspectError::MalformedModelOutput`] carrying the raw text. Nothing is
//! coerced or dropped. Array order is preserved; `serial_no` defaults to the
//! 1-based array position when the shape does not carry one.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::InspectError;
use crate::models::{AnalysisResult, InspectionFinding, Severity};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalEntry {
    serial_no: Option<u32>,
    timestamp: String,
    tag_number: String,
    equipment_type: String,
    fault_type: String,
    severity: String,
    corrective_action: String,
    remarks: String,
    standard_reference: Option<String>,
}

#[derive(Deserialize)]
struct ReportEntry {
    serial_no: Option<u32>,
    timestamp: String,
    tag_number: String,
    equipment_type: String,
    fault_type: String,
    severity: String,
    corrective_action: String,
    remarks: String,
    standard_reference: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FaultEntry {
    timestamp: String,
    component: String,
    tag_number: String,
    fault_type: String,
    description: String,
    severity: String,
    standard_gap: String,
    recommendation: String,
}

/// Parse raw model text into an [`AnalysisResult`].
pub fn parse_model_output(raw: &str) -> Result<AnalysisResult, InspectError> {
    let malformed = |reason: String| InspectError::MalformedModelOutput {
        reason,
        raw: raw.to_string(),
    };

    let value: Value = serde_json::from_str(raw.trim())
        .map_err(|e| malformed(format!("response is not valid JSON: {}", e)))?;

    let obj = value
        .as_object()
        .ok_or_else(|| malformed("response is not a JSON object".to_string()))?;

    let summary = match obj.get("summary") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return Err(malformed("summary must be a string".to_string())),
    };

    let findings = if let Some(items) = obj.get("findings") {
        entries::<CanonicalEntry>(items, "findings")
            .map_err(&malformed)?
            .into_iter()
            .enumerate()
            .map(|(i, e)| -> Result<InspectionFinding, String> {
                Ok(InspectionFinding {
                    serial_no: e.serial_no.unwrap_or(i as u32 + 1),
                    timestamp: e.timestamp,
                    tag_number: e.tag_number,
                    equipment_type: e.equipment_type,
                    fault_type: e.fault_type,
                    severity: severity(&e.severity, i)?,
                    corrective_action: e.corrective_action,
                    remarks: e.remarks,
                    standard_reference: e.standard_reference,
                })
            })
            .collect::<Result<Vec<_>, String>>()
    } else if let Some(items) = obj.get("inspection_report") {
        entries::<ReportEntry>(items, "inspection_report")
            .map_err(&malformed)?
            .into_iter()
            .enumerate()
            .map(|(i, e)| -> Result<InspectionFinding, String> {
                Ok(InspectionFinding {
                    serial_no: e.serial_no.unwrap_or(i as u32 + 1),
                    timestamp: e.timestamp,
                    tag_number: e.tag_number,
                    equipment_type: e.equipment_type,
                    fault_type: e.fault_type,
                    severity: severity(&e.severity, i)?,
                    corrective_action: e.corrective_action,
                    remarks: e.remarks,
                    standard_reference: e.standard_reference,
                })
            })
            .collect::<Result<Vec<_>, String>>()
    } else if let Some(items) = obj.get("faults") {
        entries::<FaultEntry>(items, "faults")
            .map_err(&malformed)?
            .into_iter()
            .enumerate()
            .map(|(i, e)| -> Result<InspectionFinding, String> {
                Ok(InspectionFinding {
                    serial_no: i as u32 + 1,
                    timestamp: e.timestamp,
                    tag_number: e.tag_number,
                    equipment_type: e.component,
                    fault_type: e.fault_type,
                    severity: severity(&e.severity, i)?,
                    corrective_action: e.recommendation,
                    remarks: e.description,
                    standard_reference: Some(e.standard_gap),
                })
            })
            .collect::<Result<Vec<_>, String>>()
    } else {
        return Err(malformed(
            "expected one of `findings`, `inspection_report`, or `faults`".to_string(),
        ));
    };

    Ok(AnalysisResult {
        summary,
        findings: findings.map_err(malformed)?,
    })
}

fn entries<T: DeserializeOwned>(items: &Value, key: &str) -> Result<Vec<T>, String> {
    let array = items
        .as_array()
        .ok_or_else(|| format!("`{}` must be an array", key))?;
    array
        .iter()
        .enumerate()
        .map(|(i, item)| {
            T::deserialize(item).map_err(|e| format!("`{}[{}]`: {}", key, i, e))
        })
        .collect()
}

fn severity(raw: &str, index: usize) -> Result<Severity, String> {
    raw.parse::<Severity>()
        .map_err(|e| format!("finding {}: {}", index + 1, e))
}
