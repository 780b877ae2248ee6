//! Pure per-source normalization of raw payloads into canonical records.

use chrono::NaiveDate;
use fedscout_core::{CanonicalRecord, SbirPhase, SourceKind};
use fedscout_sources::RawSourceRecord;
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NormalizationError {
    #[error("{kind} record has no natural identifier")]
    MissingNaturalId { kind: SourceKind },
    #[error("{kind} record {natural_id} has no title")]
    MissingTitle {
        kind: SourceKind,
        natural_id: String,
    },
    #[error("{kind} record {natural_id}: unparseable {field} `{raw}`")]
    UnparseableDate {
        kind: SourceKind,
        natural_id: String,
        field: &'static str,
        raw: String,
    },
}

/// Maps one raw source payload to a canonical record. No I/O.
pub fn normalize(raw: &RawSourceRecord) -> Result<CanonicalRecord, NormalizationError> {
    match raw.source {
        SourceKind::Primary => normalize_primary(&raw.payload),
        SourceKind::SbirSttr => normalize_sbir(&raw.payload),
        SourceKind::FederalSpending => normalize_spending(&raw.payload),
    }
}

fn str_field<'a>(payload: &'a JsonValue, key: &str) -> Option<&'a str> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Monetary values arrive as numbers or as strings with currency symbols
/// and thousands separators.
fn parse_money(value: Option<&JsonValue>) -> Option<f64> {
    let value = value?;
    if let Some(amount) = value.as_f64() {
        return Some(amount);
    }
    let text = value.as_str()?;
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned.parse().ok()
}

/// NAICS codes are 2-6 digit numeric strings; anything else is dropped.
pub fn is_valid_naics(code: &str) -> bool {
    (2..=6).contains(&code.len()) && code.chars().all(|c| c.is_ascii_digit())
}

fn naics_field(payload: &JsonValue, key: &str) -> Vec<String> {
    let mut codes = Vec::new();
    match payload.get(key) {
        Some(JsonValue::String(code)) => codes.push(code.trim().to_string()),
        Some(JsonValue::Number(code)) => codes.push(code.to_string()),
        Some(JsonValue::Array(values)) => {
            for value in values {
                if let Some(code) = value.as_str() {
                    codes.push(code.trim().to_string());
                }
            }
        }
        _ => {}
    }
    codes.retain(|code| is_valid_naics(code));
    codes
}

/// Tries each format in order; date-time formats fall back to a leading
/// `YYYY-MM-DD` prefix parse since some sources append zone offsets.
fn parse_date_multi(raw: &str, formats: &[&str]) -> Option<NaiveDate> {
    for format in formats {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date);
        }
    }
    // `get` rather than indexing: a multibyte character straddling byte 10
    // must fall through to the error path, not panic.
    if let Some(prefix) = raw.get(..10) {
        if let Ok(date) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
            return Some(date);
        }
    }
    None
}

fn date_field(
    payload: &JsonValue,
    key: &str,
    formats: &[&str],
    kind: SourceKind,
    natural_id: &str,
    field: &'static str,
) -> Result<Option<NaiveDate>, NormalizationError> {
    match str_field(payload, key) {
        None => Ok(None),
        Some(raw) => {
            parse_date_multi(raw, formats)
                .map(Some)
                .ok_or_else(|| NormalizationError::UnparseableDate {
                    kind,
                    natural_id: natural_id.to_string(),
                    field,
                    raw: raw.to_string(),
                })
        }
    }
}

const PRIMARY_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];
const SBIR_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%b %d, %Y"];
const SPENDING_DATE_FORMATS: &[&str] = &["%Y-%m-%d"];

fn normalize_primary(payload: &JsonValue) -> Result<CanonicalRecord, NormalizationError> {
    let source = SourceKind::Primary;
    let natural_id = str_field(payload, "solicitationNumber")
        .or_else(|| str_field(payload, "noticeId"))
        .ok_or(NormalizationError::MissingNaturalId { kind: source })?
        .to_string();
    let title = str_field(payload, "title")
        .ok_or_else(|| NormalizationError::MissingTitle {
            kind: source,
            natural_id: natural_id.clone(),
        })?
        .to_string();

    // Procurement type "r" marks sources-sought research notices, the
    // primary source's SBIR-adjacent records.
    let type_code = str_field(payload, "type").unwrap_or_default();
    let title_upper = title.to_ascii_uppercase();
    let is_sbir = type_code.eq_ignore_ascii_case("r") || title_upper.contains("SBIR");
    let is_sttr = title_upper.contains("STTR");

    let status = match str_field(payload, "active") {
        Some(active) if active.eq_ignore_ascii_case("yes") => Some("active".to_string()),
        Some(_) => Some("inactive".to_string()),
        None => None,
    };

    Ok(CanonicalRecord {
        source,
        natural_id: natural_id.clone(),
        title,
        agency: str_field(payload, "fullParentPathName")
            .or_else(|| str_field(payload, "department"))
            .map(ToString::to_string),
        naics_codes: naics_field(payload, "naicsCode"),
        posted_date: date_field(
            payload,
            "postedDate",
            PRIMARY_DATE_FORMATS,
            source,
            &natural_id,
            "postedDate",
        )?,
        response_deadline: date_field(
            payload,
            "responseDeadLine",
            PRIMARY_DATE_FORMATS,
            source,
            &natural_id,
            "responseDeadLine",
        )?,
        value_amount: parse_money(payload.pointer("/award/amount")),
        status,
        state: payload
            .pointer("/placeOfPerformance/state/code")
            .and_then(|v| v.as_str())
            .map(ToString::to_string),
        latitude: None,
        longitude: None,
        is_sbir,
        is_sttr,
        phase: None,
    })
}

fn normalize_sbir(payload: &JsonValue) -> Result<CanonicalRecord, NormalizationError> {
    let source = SourceKind::SbirSttr;
    let natural_id = str_field(payload, "contract")
        .or_else(|| str_field(payload, "agency_tracking_number"))
        .ok_or(NormalizationError::MissingNaturalId { kind: source })?
        .to_string();
    let title = str_field(payload, "award_title")
        .ok_or_else(|| NormalizationError::MissingTitle {
            kind: source,
            natural_id: natural_id.clone(),
        })?
        .to_string();

    let program = str_field(payload, "program").unwrap_or("SBIR");

    Ok(CanonicalRecord {
        source,
        natural_id: natural_id.clone(),
        title,
        agency: str_field(payload, "agency").map(ToString::to_string),
        naics_codes: naics_field(payload, "naics_code"),
        posted_date: date_field(
            payload,
            "proposal_award_date",
            SBIR_DATE_FORMATS,
            source,
            &natural_id,
            "proposal_award_date",
        )?,
        response_deadline: date_field(
            payload,
            "contract_end_date",
            SBIR_DATE_FORMATS,
            source,
            &natural_id,
            "contract_end_date",
        )?,
        value_amount: parse_money(payload.get("award_amount")),
        status: Some("awarded".to_string()),
        state: str_field(payload, "state").map(ToString::to_string),
        latitude: None,
        longitude: None,
        is_sbir: program.eq_ignore_ascii_case("SBIR"),
        is_sttr: program.eq_ignore_ascii_case("STTR"),
        phase: str_field(payload, "phase").and_then(SbirPhase::parse),
    })
}

fn normalize_spending(payload: &JsonValue) -> Result<CanonicalRecord, NormalizationError> {
    let source = SourceKind::FederalSpending;
    let natural_id = str_field(payload, "Award ID")
        .or_else(|| str_field(payload, "generated_internal_id"))
        .ok_or(NormalizationError::MissingNaturalId { kind: source })?
        .to_string();
    let title = str_field(payload, "Recipient Name")
        .map(|recipient| format!("Award to {recipient}"))
        .ok_or_else(|| NormalizationError::MissingTitle {
            kind: source,
            natural_id: natural_id.clone(),
        })?;

    Ok(CanonicalRecord {
        source,
        natural_id: natural_id.clone(),
        title,
        agency: str_field(payload, "Awarding Agency").map(ToString::to_string),
        naics_codes: naics_field(payload, "naics_code"),
        posted_date: date_field(
            payload,
            "Start Date",
            SPENDING_DATE_FORMATS,
            source,
            &natural_id,
            "Start Date",
        )?,
        response_deadline: date_field(
            payload,
            "End Date",
            SPENDING_DATE_FORMATS,
            source,
            &natural_id,
            "End Date",
        )?,
        value_amount: parse_money(payload.get("Award Amount")),
        status: Some("awarded".to_string()),
        state: str_field(payload, "place_of_performance_state_code").map(ToString::to_string),
        latitude: None,
        longitude: None,
        is_sbir: false,
        is_sttr: false,
        phase: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(source: SourceKind, payload: JsonValue) -> RawSourceRecord {
        RawSourceRecord { source, payload }
    }

    #[test]
    fn primary_record_maps_core_fields() {
        let record = normalize(&raw(
            SourceKind::Primary,
            json!({
                "solicitationNumber": "FA8750-26-R-0001",
                "title": "Cyber Resiliency Support",
                "fullParentPathName": "DEPT OF DEFENSE.DEPT OF THE AIR FORCE",
                "naicsCode": "541512",
                "postedDate": "2026-07-15",
                "responseDeadLine": "2026-08-20T17:00:00-04:00",
                "active": "Yes",
                "type": "o",
                "award": {"amount": "$1,250,000.50"},
                "placeOfPerformance": {"state": {"code": "NY"}}
            }),
        ))
        .unwrap();

        assert_eq!(record.natural_id, "FA8750-26-R-0001");
        assert_eq!(record.naics_codes, vec!["541512"]);
        assert_eq!(
            record.posted_date,
            NaiveDate::from_ymd_opt(2026, 7, 15)
        );
        assert_eq!(
            record.response_deadline,
            NaiveDate::from_ymd_opt(2026, 8, 20)
        );
        assert_eq!(record.value_amount, Some(1_250_000.50));
        assert_eq!(record.status.as_deref(), Some("active"));
        assert_eq!(record.state.as_deref(), Some("NY"));
        assert!(!record.is_sbir);
    }

    #[test]
    fn primary_sources_sought_type_marks_sbir() {
        let record = normalize(&raw(
            SourceKind::Primary,
            json!({
                "solicitationNumber": "N00014-26-S-0003",
                "title": "Research Topic Sources Sought",
                "type": "r"
            }),
        ))
        .unwrap();
        assert!(record.is_sbir);
    }

    #[test]
    fn sbir_record_derives_program_and_phase() {
        let record = normalize(&raw(
            SourceKind::SbirSttr,
            json!({
                "contract": "W31P4Q-26-C-0042",
                "award_title": "Autonomous Sensor Fusion",
                "agency": "Department of Defense",
                "program": "STTR",
                "phase": "Phase II",
                "award_amount": 1499999,
                "proposal_award_date": "2026-03-12",
                "state": "MA"
            }),
        ))
        .unwrap();

        assert!(record.is_sttr);
        assert!(!record.is_sbir);
        assert_eq!(record.phase, Some(SbirPhase::II));
        assert_eq!(record.value_amount, Some(1_499_999.0));
        assert_eq!(record.status.as_deref(), Some("awarded"));
    }

    #[test]
    fn spending_record_uses_award_id_as_natural_id() {
        let record = normalize(&raw(
            SourceKind::FederalSpending,
            json!({
                "Award ID": "47QTCA26D0001",
                "Recipient Name": "ACME FEDERAL LLC",
                "Awarding Agency": "General Services Administration",
                "Award Amount": "2,400,000",
                "Start Date": "2026-01-01",
                "End Date": "2027-12-31",
                "naics_code": "541519",
                "place_of_performance_state_code": "TX"
            }),
        ))
        .unwrap();

        assert_eq!(record.natural_id, "47QTCA26D0001");
        assert_eq!(record.title, "Award to ACME FEDERAL LLC");
        assert_eq!(record.value_amount, Some(2_400_000.0));
        assert_eq!(record.state.as_deref(), Some("TX"));
    }

    #[test]
    fn missing_natural_id_is_an_error() {
        let err = normalize(&raw(
            SourceKind::Primary,
            json!({"title": "No Number Here"}),
        ))
        .unwrap_err();
        assert!(matches!(
            err,
            NormalizationError::MissingNaturalId {
                kind: SourceKind::Primary
            }
        ));
    }

    #[test]
    fn normalization_errors_name_the_offending_source() {
        use std::error::Error as _;

        let err = NormalizationError::MissingNaturalId {
            kind: SourceKind::SbirSttr,
        };
        assert!(err.to_string().contains("sbir_sttr"));
        assert!(err.source().is_none());
    }

    #[test]
    fn unparseable_deadline_is_an_error_not_a_panic() {
        let err = normalize(&raw(
            SourceKind::Primary,
            json!({
                "solicitationNumber": "X-1",
                "title": "Bad Deadline",
                "responseDeadLine": "whenever"
            }),
        ))
        .unwrap_err();
        assert!(matches!(
            err,
            NormalizationError::UnparseableDate { field: "responseDeadLine", .. }
        ));
    }

    #[test]
    fn multibyte_date_string_is_an_error_not_a_panic() {
        // Byte 10 falls inside the accented character.
        let err = normalize(&raw(
            SourceKind::Primary,
            json!({
                "solicitationNumber": "X-4",
                "title": "Accented Deadline",
                "responseDeadLine": "123456789é"
            }),
        ))
        .unwrap_err();
        assert!(matches!(
            err,
            NormalizationError::UnparseableDate { field: "responseDeadLine", .. }
        ));
    }

    #[test]
    fn invalid_naics_codes_are_dropped() {
        assert!(is_valid_naics("54"));
        assert!(is_valid_naics("541511"));
        assert!(!is_valid_naics("5415112"));
        assert!(!is_valid_naics("54X511"));
        assert!(!is_valid_naics("5"));

        let record = normalize(&raw(
            SourceKind::Primary,
            json!({
                "solicitationNumber": "X-2",
                "title": "Odd NAICS",
                "naicsCode": "ABC123"
            }),
        ))
        .unwrap();
        assert!(record.naics_codes.is_empty());
    }

    #[test]
    fn money_parsing_tolerates_symbols_and_commas() {
        assert_eq!(parse_money(Some(&json!("$12,345.67"))), Some(12345.67));
        assert_eq!(parse_money(Some(&json!(99.5))), Some(99.5));
        assert_eq!(parse_money(Some(&json!("not money"))), None);
        assert_eq!(parse_money(None), None);
    }
}
