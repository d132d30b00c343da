//! Inspector instruction and declared response schema sent with every
//! analyze request.

use serde_json::{json, Value};

/// Standards the model must cross-reference, in citation order.
pub const REFERENCE_STANDARDS: &[(&str, &str)] = &[
    ("OISD-STD-105", "Work Permit System"),
    ("OISD-STD-106", "Pressure Relief & Disposal"),
    ("OISD-STD-113", "Classification of Area for Electrical Installations"),
    ("OISD-STD-116", "Fire Protection Facilities"),
    ("OISD-STD-118", "Layouts for Oil & Gas Installations"),
    (
        "OISD-STD-128 to 135",
        "Inspection of Pressure Vessels, Piping, Rotating Equipment, etc.",
    ),
    ("OISD-STD-137", "Inspection of Electrical Equipment"),
    ("OISD-STD-152", "Safety Instrumentation"),
    ("GDN-145", "Guidelines for Handling & Storage"),
];

const DEFECT_TAXONOMY: &str = "\
   Instrumentation faults:
   - Physical damage: cracks, dents, deformation, broken or missing covers and glass.
   - Corrosion: rust on bodies, brackets and connectors; pitting or flaking.
   - Loose or missing hardware: unsecured bolts and nuts, missing nameplates or tags.
   - Cable and conduit: frayed cables, improper gland sealing, loose fittings, open junction boxes.
   - Ingress protection: open enclosures, water, dust or oil inside.
   - Orientation: transmitters or gauges installed at incorrect angles.
   - Impulse lines: blocked lines, visible dirt, corrosion or leaks.

   Control valve faults:
   - Leakage: gland packing, actuator seals, flanges, hydraulic oil.
   - Actuator: bent or broken linkages, rusted or seized arms.
   - Position indicator: broken, misaligned, or missing scale markings.
   - Coating: peeling paint, exposed metal.
   - Vibration and alignment: excessive vibration, loose supports.
   - Air supply: damaged tubing or fittings, moisture or oil in air lines.
   - Manual override: handwheel engaged unintentionally, missing locking devices.

   General observations:
   - Environmental: dust, moisture, chemical exposure.
   - Labeling: missing, faded, or illegible tags.
   - Safety: missing guards, damaged insulation, steam or water impinging on instruments.
";

/// Build the fixed inspector instruction.
///
/// `document_count` only changes whether attached PDFs are announced;
/// `links` are cited verbatim and never fetched.
pub fn build_instruction(document_count: usize, links: &[String]) -> String {
    let standards: String = REFERENCE_STANDARDS
        .iter()
        .map(|(code, title)| format!("- {} ({})\n", code, title))
        .collect();
    let documents = if document_count > 0 {
        format!("{} provided as attachments.", document_count)
    } else {
        "None.".to_string()
    };
    let urls = if links.is_empty() {
        "None.".to_string()
    } else {
        links.join(", ")
    };

    format!(
        "Role:\n\
You are a Senior Field Instrumentation and Control Valve Inspector. Perform a detailed \
visual walkthrough of the attached video. Detect faults, identify equipment tags, and check \
compliance with industry standards. Do not assume dismantling or advanced diagnostics.\n\
\n\
Reference Standards:\n\
Cross-reference observed conditions against these standards where applicable, alongside \
any attached PDF documents:\n\
{standards}\n\
Additional Reference Documents: {documents}\n\
Reference URLs: {urls}\n\
\n\
Instructions:\n\
1. Scan the footage for field instrumentation and control valves. Estimate a MM:SS \
timestamp for every observation.\n\
2. Identify equipment tags. Look for alphanumeric patterns such as 20-FV-2300, JBS-203 or \
TE-2312 and record visible tags exactly. If no tag is visible, use nearby text \
(for example \"Near Unit 3\") or describe the location as \"Near [location]\".\n\
3. Detect visual faults, watching strictly for:\n\
{taxonomy}\n\
4. Assign a severity (Low, Medium, High or Critical) based on risk to safety or process \
integrity, and give a corrective action citing the relevant OISD/GDN clause \
(for example \"Restore gland sealing as per OISD-STD-137\"). Put the violated standard or \
gap in standard_reference when one applies.\n\
\n\
Output Format:\n\
Return STRICT JSON with a one-paragraph summary and an inspection_report array numbered \
from 1 in order of appearance.\n",
        standards = standards,
        documents = documents,
        urls = urls,
        taxonomy = DEFECT_TAXONOMY,
    )
}

/// Declared response schema (Gemini `responseSchema` dialect).
pub fn response_schema() -> Value {
    let text = |description: &str| json!({ "type": "STRING", "description": description });
    json!({
        "type": "OBJECT",
        "properties": {
            "summary": text("One-paragraph overview of the inspection"),
            "inspection_report": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "serial_no": { "type": "INTEGER", "description": "Sequential number starting from 1" },
                        "timestamp": text("Time format MM:SS"),
                        "tag_number": text("Equipment tag number (e.g., 20-FV-2300) or 'Near [location]' if not visible"),
                        "equipment_type": text("Type of equipment (e.g., Pneumatic Control Valve, Pressure Transmitter)"),
                        "fault_type": text("Category of fault (e.g., Gland Packing Leak, Corroded Junction Box)"),
                        "severity": { "type": "STRING", "enum": ["Low", "Medium", "High", "Critical"] },
                        "corrective_action": text("Recommended action with OISD/GDN standard reference"),
                        "remarks": text("Detailed observation notes"),
                        "standard_reference": text("Violated standard or compliance gap, if any")
                    },
                    "required": [
                        "serial_no", "timestamp", "tag_number", "equipment_type",
                        "fault_type", "severity", "corrective_action", "remarks"
                    ]
                }
            }
        },
        "required": ["summary", "inspection_report"]
    })
}
