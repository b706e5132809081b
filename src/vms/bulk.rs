//! Bulk guest import: every pending row goes up in one multipart CSV
//! upload, and the whole batch shares a single accounting outcome.

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::dates;
use crate::model::{DispatchSummary, Outcome, ReservationRecord};
use crate::store::SharedStore;
use crate::vms::{capped_adults, CsrfToken, Credentials, ParkingMap, VmsClient};

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Fixed column schema of the import endpoint.
pub const IMPORT_HEADER: [&str; 14] = [
    "name",
    "phone",
    "email",
    "IC/Passport No",
    "unit_no",
    "car_park_lot",
    "booking_source",
    "note",
    "number_of_pax",
    "planned_checkin_at",
    "planned_checkout_at",
    "deposit_collected",
    "deposit_amount",
    "deposit_currency",
];

/// Check-in is planned at 3pm, check-out at 11am.
const CHECK_IN_HOUR: u32 = 15;
const CHECK_OUT_HOUR: u32 = 11;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRow {
    pub name: String,
    pub phone: String,
    pub email: String,
    pub unit_no: String,
    pub car_park_lot: String,
    pub booking_source: String,
    pub number_of_pax: String,
    pub planned_checkin_at: String,
    pub planned_checkout_at: String,
}

impl ImportRow {
    fn to_record(&self) -> Vec<&str> {
        vec![
            &self.name,
            &self.phone,
            &self.email,
            // Required by the schema; no real value in this workflow.
            "-",
            &self.unit_no,
            &self.car_park_lot,
            &self.booking_source,
            "",
            &self.number_of_pax,
            &self.planned_checkin_at,
            &self.planned_checkout_at,
            "",
            "",
            "",
        ]
    }
}

/// Planned timestamp for a raw stay date; unparseable text passes through.
fn planned(text: &str, hour: u32) -> String {
    match dates::parse_date(text) {
        Some(date) => dates::at_hour(date, hour),
        None => text.to_string(),
    }
}

pub fn import_row(
    record: &ReservationRecord,
    parking: &ParkingMap,
    fallback_email: &str,
) -> ImportRow {
    let adults = capped_adults(&record.room_types, record.adults().unwrap_or(1));
    ImportRow {
        name: record.full_name(),
        phone: record.phone.clone(),
        email: record.email().unwrap_or(fallback_email).to_string(),
        unit_no: record.rooms.clone(),
        car_park_lot: parking.lot_for(&record.rooms),
        booking_source: record.channel.clone(),
        number_of_pax: adults.to_string(),
        planned_checkin_at: planned(&record.check_in, CHECK_IN_HOUR),
        planned_checkout_at: planned(&record.check_out, CHECK_OUT_HOUR),
    }
}

pub fn render_csv(rows: &[ImportRow]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(IMPORT_HEADER)?;
    for row in rows {
        writer.write_record(row.to_record())?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| anyhow::anyhow!("failed to flush import CSV: {}", err))?;
    String::from_utf8(bytes).context("import CSV is not valid UTF-8")
}

/// Accounting response of the import endpoint. Row numbers are 1-based
/// CSV positions, the header being row 1.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub results: ImportResults,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportResults {
    #[serde(default)]
    pub total_records: u32,
    #[serde(default)]
    pub successful_imports: u32,
    #[serde(default)]
    pub failed_imports: u32,
    #[serde(default)]
    pub success_rows: Vec<RowOutcome>,
    #[serde(default)]
    pub error_rows: Vec<RowOutcome>,
    #[serde(default)]
    pub skipped_rows: Vec<RowOutcome>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RowOutcome {
    pub row: u32,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// CSV row numbers the endpoint never accounted for: expected rows
/// `2..=submitted+1` minus the union of success/error/skipped rows.
pub fn missing_row_numbers(submitted: usize, results: &ImportResults) -> Vec<u32> {
    let accounted: BTreeSet<u32> = results
        .success_rows
        .iter()
        .chain(&results.error_rows)
        .chain(&results.skipped_rows)
        .map(|row| row.row)
        .collect();
    (2..submitted as u32 + 2)
        .filter(|row| !accounted.contains(row))
        .collect()
}

/// Classify the batch outcome. `require_full_success` decides whether a
/// partial import counts as complete or stays a failure for the next run.
pub fn classify(submitted: usize, response: &ImportResponse, require_full_success: bool) -> Outcome {
    if !response.success {
        return Outcome::Failed("Upload failed - Server returned error".to_string());
    }
    let successful = response.results.successful_imports as usize;
    if successful == submitted {
        Outcome::Completed
    } else if successful > 0 {
        if require_full_success {
            Outcome::Failed(format!(
                "Partial success - {}/{} imported",
                successful, submitted
            ))
        } else {
            Outcome::Completed
        }
    } else {
        Outcome::Failed("Upload failed - No successful imports".to_string())
    }
}

/// The accounting must cover exactly the submitted rows; an endpoint that
/// under- or over-reports is surfaced either way.
fn accounting_mismatch(submitted: usize, results: &ImportResults) -> bool {
    results.total_records as usize != submitted
}

fn log_accounting(submitted: usize, response: &ImportResponse) {
    let results = &response.results;
    info!(
        expected = submitted,
        total_records = results.total_records,
        successful_imports = results.successful_imports,
        failed_imports = results.failed_imports,
        "import accounting"
    );
    if accounting_mismatch(submitted, results) {
        let missing = missing_row_numbers(submitted, results);
        warn!(?missing, "records missing from import accounting");
    }
    for row in &results.error_rows {
        warn!(
            row = row.row,
            name = row.name.as_deref().unwrap_or("N/A"),
            error = row.error.as_deref().unwrap_or("Unknown error"),
            "row failed to import"
        );
    }
}

async fn upload(
    client: &VmsClient,
    token: &CsrfToken,
    csv_text: String,
    file_name: String,
    submitted: usize,
    require_full_success: bool,
) -> Outcome {
    let url = match client.base_url.join("app/guests/import/upload") {
        Ok(url) => url,
        Err(err) => return Outcome::Failed(format!("Upload failed - {}", err)),
    };
    let part = reqwest::multipart::Part::bytes(csv_text.into_bytes())
        .file_name(file_name)
        .mime_str("application/vnd.ms-excel");
    let part = match part {
        Ok(part) => part,
        Err(err) => return Outcome::Failed(format!("Upload failed - {}", err)),
    };
    let form = reqwest::multipart::Form::new()
        .part("file", part)
        .text("_token", token.value.clone())
        .text("send_notifications", "0");

    let response = client
        .http
        .post(url)
        .timeout(UPLOAD_TIMEOUT)
        .header("X-CSRF-TOKEN", &token.value)
        .header("X-Requested-With", "XMLHttpRequest")
        .multipart(form)
        .send()
        .await;
    let response = match response {
        Ok(response) => response,
        Err(err) => return Outcome::Failed(format!("Upload failed - {}", err)),
    };
    if response.status() != StatusCode::OK {
        return Outcome::Failed(format!(
            "Upload failed - Status {}",
            response.status().as_u16()
        ));
    }
    let text = match response.text().await {
        Ok(text) => text,
        Err(err) => return Outcome::Failed(format!("Upload failed - {}", err)),
    };
    match serde_json::from_str::<ImportResponse>(&text) {
        Ok(parsed) => {
            if let Some(message) = parsed.message.as_deref().filter(|_| !parsed.success) {
                warn!(message, "import rejected by server");
            }
            log_accounting(submitted, &parsed);
            classify(submitted, &parsed, require_full_success)
        }
        Err(_) => Outcome::Failed("Upload failed - Invalid response".to_string()),
    }
}

/// Run the bulk-import workflow: transform pending rows to the import
/// schema, archive the generated CSV, authenticate, upload once, and mark
/// every submitted row with the shared batch outcome.
pub async fn run(cfg: &Config, store: &SharedStore) -> Result<DispatchSummary> {
    let columns = cfg.vms.import.columns();
    let marker = &cfg.app.completed_marker;
    let pending = store.pending_rows(&columns, marker).await;
    if pending.is_empty() {
        info!("no pending rows to bulk-import");
        return Ok(DispatchSummary::default());
    }

    let parking = ParkingMap::load(Path::new(&cfg.vms.parking_map_path))?;
    let rows: Vec<ImportRow> = pending
        .iter()
        .map(|(_, record)| import_row(record, &parking, &cfg.vms.fallback_email))
        .collect();
    let csv_text = render_csv(&rows)?;

    let (date, time) = dates::file_stamp();
    let logs_folder = Path::new(&cfg.app.logs_dir).join(&date);
    std::fs::create_dir_all(&logs_folder)
        .with_context(|| format!("failed to create logs folder {}", logs_folder.display()))?;
    let file_name = format!("{}_vms_bulkimport_{}.csv", date, time);
    std::fs::write(logs_folder.join(&file_name), &csv_text)
        .context("failed to archive import CSV")?;

    let client = VmsClient::new(&cfg.vms.base_url)?;
    let creds = Credentials {
        email: cfg.operator.email.clone(),
        password: cfg.vms.password.clone(),
    };
    let token = client.login(&creds).await?;

    info!(guests = rows.len(), "uploading guests to VMS");
    let outcome = upload(
        &client,
        &token,
        csv_text,
        file_name,
        rows.len(),
        cfg.vms.require_full_success,
    )
    .await;

    let indices: Vec<usize> = pending.iter().map(|(row, _)| *row).collect();
    store
        .record_batch_outcome(
            &indices,
            &columns,
            &outcome.status_text(marker),
            &dates::stamp_now(),
        )
        .await?;

    let mut summary = DispatchSummary::default();
    if outcome.is_completed() {
        summary.completed = indices.len();
    } else {
        summary.failed = indices.len();
    }
    info!(
        completed = summary.completed,
        failed = summary.failed,
        "bulk import finished"
    );
    Ok(summary)
}
