use chrono::NaiveDate;
use csv::StringRecord;
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::error::{AppError, Result};
use crate::models::log_event::BULK_ADD;
use crate::models::member::CreateMemberData;
use crate::models::{LogEvent, Member};

const DISPLAY_NAME: &str = "TFI Display Name for Button";
const FIRST_NAME: &str = "First Name";
const LAST_NAME: &str = "Last Name";
const BARCODE: &str = "TFI Barcode for Button";
const BARCODE_FALLBACK: &str = "TFI Barcode AUTONUM";
const EMAIL: &str = "Email";
const MEMBERSHIP_END: &str = "Membership End Date";

/// Used when a row has no readable end date.
fn default_expiry() -> NaiveDate {
    NaiveDate::from_ymd_opt(2019, 6, 30).unwrap_or_default()
}

fn parse_row(record: &StringRecord, header_map: &HashMap<String, usize>) -> Option<CreateMemberData> {
    let get_field = |name: &str| -> Option<String> {
        header_map
            .get(name)
            .and_then(|&idx| record.get(idx))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    let barcode = get_field(BARCODE).or_else(|| get_field(BARCODE_FALLBACK))?;
    let first_name = get_field(FIRST_NAME).unwrap_or_default();
    let last_name = get_field(LAST_NAME).unwrap_or_default();

    let display_name = get_field(DISPLAY_NAME).unwrap_or_else(|| match last_name.chars().next() {
        Some(initial) => format!("{} {}", first_name, initial),
        None => first_name.clone(),
    });

    let membership_expires = get_field(MEMBERSHIP_END)
        .and_then(|date| NaiveDate::parse_from_str(&date, "%m/%d/%Y").ok())
        .unwrap_or_else(default_expiry);

    Some(CreateMemberData {
        barcode,
        display_name,
        first_name,
        last_name,
        email: get_field(EMAIL).unwrap_or_default(),
        membership_expires,
    })
}

/// Reads member rows out of an export. Rows without a barcode are skipped.
pub fn parse_members(content: &str) -> Result<Vec<CreateMemberData>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| AppError::Validation(format!("Failed to read CSV headers: {}", e)))?
        .clone();

    let header_map: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.trim().to_string(), idx))
        .collect();

    if !header_map.contains_key(BARCODE) && !header_map.contains_key(BARCODE_FALLBACK) {
        return Err(AppError::Validation(format!("Missing required header: {}", BARCODE)));
    }

    let mut members = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        match record {
            Ok(record) => match parse_row(&record, &header_map) {
                Some(member) => members.push(member),
                None => tracing::debug!(row = idx + 1, "Skipping row without barcode"),
            },
            Err(e) => tracing::warn!(row = idx + 1, error = %e, "Skipping unreadable row"),
        }
    }

    Ok(members)
}

/// Imports an uploaded member export and records who ran it.
pub async fn import_members(pool: &SqlitePool, file_name: &str, content: &str, admin_barcode: &str) -> Result<String> {
    let members = parse_members(content)?;
    let count = Member::add_members(pool, &members).await?;
    LogEvent::add_event(pool, BULK_ADD, admin_barcode).await?;

    tracing::info!(file = %file_name, count, "Members imported");
    Ok(format!("Imported {} from {}", count, file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    const EXPORT: &str = "\
TFI Display Name for Button,First Name,Last Name,TFI Barcode for Button,TFI Barcode AUTONUM,Email,Membership End Date
Sam S,Samantha,Smith,100200,,sam@example.org,12/31/2099
,Pat,Jones,,100201,,
,Lee,,100202,,lee@example.org,not a date
,No,Barcode,,,,
";

    #[test]
    fn test_parse_members_rules() {
        let members = parse_members(EXPORT).unwrap();

        assert_eq!(members.len(), 3);
        assert_eq!(members[0].display_name, "Sam S");
        assert_eq!(members[0].membership_expires, NaiveDate::from_ymd_opt(2099, 12, 31).unwrap());

        assert_eq!(members[1].barcode, "100201");
        assert_eq!(members[1].display_name, "Pat J");
        assert_eq!(members[1].membership_expires, default_expiry());

        assert_eq!(members[2].display_name, "Lee");
        assert_eq!(members[2].membership_expires, default_expiry());
    }

    #[test]
    fn test_missing_barcode_header_is_rejected() {
        assert!(parse_members("First Name,Last Name\nA,B\n").is_err());
    }

    #[tokio::test]
    async fn test_import_upserts_and_logs() {
        let pool = test_pool().await;

        let message = import_members(&pool, "members.csv", EXPORT, "100091").await.unwrap();
        assert_eq!(message, "Imported 3 from members.csv");

        let renamed = EXPORT.replace("Sam S,", "Sammy S,");
        import_members(&pool, "members.csv", &renamed, "100091").await.unwrap();

        let member = Member::find_by_barcode(&pool, "100200").await.unwrap().unwrap();
        assert_eq!(member.display_name, "Sammy S");
        assert!(LogEvent::get_last_event(&pool, BULK_ADD).await.unwrap().is_some());
    }
}
