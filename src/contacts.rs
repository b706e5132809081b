//! Contact-list export: derives a vCard-like CSV from pending reservation
//! rows. No network involved; exporting alone marks a row completed.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::Config;
use crate::dates;
use crate::model::ReservationRecord;
use crate::store::SharedStore;

/// Known channel names and their 2-letter codes. Unmapped channels pass
/// through unabbreviated.
static CHANNEL_CODES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("Airbnb", "Ab"),
        ("Booking.com", "Bk"),
        ("Agoda", "Ag"),
        ("Extranet", "Dr"),
        ("Trip.com(New)", "Tp"),
    ])
});

pub const CONTACT_HEADER: [&str; 19] = [
    "First Name",
    "Middle Name",
    "Last Name",
    "Phonetic First Name",
    "Phonetic Middle Name",
    "Phonetic Last Name",
    "Name Prefix",
    "Name Suffix",
    "Nickname",
    "File As",
    "Organization Name",
    "Organization Title",
    "Organization Department",
    "Birthday",
    "Notes",
    "Photo",
    "Labels",
    "Phone 1 - Label",
    "Phone 1 - Value",
];

const CONTACT_LABEL: &str = "* myContacts";
const PHONE_LABEL: &str = "Mobile";

pub fn channel_code(channel: &str) -> &str {
    CHANNEL_CODES.get(channel).copied().unwrap_or(channel)
}

/// `01jun`-style day-month; unparseable text passes through untouched.
fn day_month(text: &str) -> String {
    match dates::parse_date(text) {
        Some(date) => dates::day_month(date),
        None => text.to_string(),
    }
}

/// Contact display name, e.g. `Op A12 Ab 01jun-05jun`.
pub fn stay_label(record: &ReservationRecord) -> String {
    format!(
        "Op {} {} {}-{}",
        record.rooms,
        channel_code(&record.channel),
        day_month(&record.check_in),
        day_month(&record.check_out)
    )
}

/// Phones are normalised to international `+` form; a missing phone gets
/// the `-` placeholder rather than a bogus number.
pub fn format_phone(phone: &str) -> String {
    let phone = phone.trim();
    if phone.is_empty() {
        "-".to_string()
    } else {
        format!("+{}", phone)
    }
}

pub fn contact_row(record: &ReservationRecord) -> Vec<String> {
    let mut row = vec![String::new(); CONTACT_HEADER.len()];
    row[0] = stay_label(record);
    row[1] = record.first_name.clone();
    row[2] = record.last_name.clone();
    row[16] = CONTACT_LABEL.to_string();
    row[17] = PHONE_LABEL.to_string();
    row[18] = format_phone(&record.phone);
    row
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactsReport {
    pub exported: usize,
    pub output: Option<PathBuf>,
}

/// Export every pending row to a formatted contacts CSV in the logs
/// folder, then mark them all completed in one persisted batch. With no
/// pending rows, nothing is written and the store is untouched.
pub async fn run(cfg: &Config, store: &SharedStore) -> Result<ContactsReport> {
    let columns = cfg.contacts_columns();
    let marker = &cfg.app.completed_marker;
    let pending = store.pending_rows(&columns, marker).await;

    if pending.is_empty() {
        info!("no pending rows to export as contacts");
        return Ok(ContactsReport::default());
    }

    let (date, time) = dates::file_stamp();
    let logs_folder = Path::new(&cfg.app.logs_dir).join(&date);
    std::fs::create_dir_all(&logs_folder)
        .with_context(|| format!("failed to create logs folder {}", logs_folder.display()))?;
    let output = logs_folder.join(format!("formatted_contacts_{}_{}.csv", date, time));

    let mut writer = csv::WriterBuilder::new()
        .from_path(&output)
        .with_context(|| format!("failed to write contacts file {}", output.display()))?;
    writer.write_record(CONTACT_HEADER)?;
    for (_, record) in &pending {
        let row = contact_row(record);
        info!(contact = %format!("{} {} {}", row[0], row[1], row[2]), "exported contact");
        writer.write_record(&row)?;
    }
    writer.flush()?;

    let rows: Vec<usize> = pending.iter().map(|(row, _)| *row).collect();
    store
        .record_batch_outcome(&rows, &columns, marker, &dates::stamp_now())
        .await?;

    info!(exported = rows.len(), output = %output.display(), "contact export complete");
    Ok(ContactsReport {
        exported: rows.len(),
        output: Some(output),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stay_label_matches_channel_code_format() {
        let mut record = ReservationRecord::default();
        record.rooms = "A12".into();
        record.channel = "Airbnb".into();
        record.check_in = "01/06/2025".into();
        record.check_out = "05/06/2025".into();
        assert_eq!(stay_label(&record), "Op A12 Ab 01jun-05jun");
    }

    #[test]
    fn unmapped_channel_passes_through() {
        let mut record = ReservationRecord::default();
        record.rooms = "B3".into();
        record.channel = "Walk-in".into();
        record.check_in = "2025-06-01".into();
        record.check_out = "2025-06-05".into();
        assert_eq!(stay_label(&record), "Op B3 Walk-in 01jun-05jun");
    }

    #[test]
    fn unparseable_dates_pass_through_raw() {
        let mut record = ReservationRecord::default();
        record.rooms = "C1".into();
        record.channel = "Agoda".into();
        record.check_in = "soon".into();
        record.check_out = "later".into();
        assert_eq!(stay_label(&record), "Op C1 Ag soon-later");
    }

    #[test]
    fn phone_normalization() {
        assert_eq!(format_phone(""), "-");
        assert_eq!(format_phone("  "), "-");
        assert_eq!(format_phone("60123456789"), "+60123456789");
    }

    #[test]
    fn contact_row_carries_labels() {
        let mut record = ReservationRecord::default();
        record.first_name = "Aisha".into();
        record.last_name = "Rahman".into();
        record.phone = "60123456789".into();
        record.rooms = "A12".into();
        record.channel = "Booking.com".into();
        record.check_in = "01/06/2025".into();
        record.check_out = "05/06/2025".into();

        let row = contact_row(&record);
        assert_eq!(row.len(), CONTACT_HEADER.len());
        assert_eq!(row[0], "Op A12 Bk 01jun-05jun");
        assert_eq!(row[1], "Aisha");
        assert_eq!(row[2], "Rahman");
        assert_eq!(row[16], "* myContacts");
        assert_eq!(row[17], "Mobile");
        assert_eq!(row[18], "+60123456789");
    }

    #[tokio::test]
    async fn run_exports_pending_and_marks_completed() {
        let dir = tempfile::tempdir().unwrap();
        let store_path = dir.path().join("reservations.csv");
        std::fs::write(
            &store_path,
            "booking reference,guest first name,guest last name,guest phone number,rooms,channel name,check in date,check out date\n\
             B-1,Aisha,Rahman,60123456789,A12,Airbnb,01/06/2025,05/06/2025\n\
             B-2,Ben,Tan,60198765432,B3,Agoda,02/06/2025,06/06/2025\n",
        )
        .unwrap();

        let mut cfg: Config = serde_yaml::from_str(crate::config::example()).unwrap();
        cfg.app.store_path = store_path.to_string_lossy().to_string();
        cfg.app.logs_dir = dir.path().join("logs").to_string_lossy().to_string();

        let store = SharedStore::open(&store_path).unwrap();
        let report = run(&cfg, &store).await.unwrap();
        assert_eq!(report.exported, 2);
        let output = report.output.unwrap();
        let exported = std::fs::read_to_string(&output).unwrap();
        assert!(exported.contains("Op A12 Ab 01jun-05jun"));
        assert!(exported.contains("+60198765432"));

        // Second run: everything already completed, no new file.
        let report = run(&cfg, &store).await.unwrap();
        assert_eq!(report.exported, 0);
        assert!(report.output.is_none());
    }
}
