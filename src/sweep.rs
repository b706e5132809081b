//! Retention sweeper: ages out records whose checkout date has passed the
//! retention window. The store and the mirror sheet keep independent
//! windows; anything with an unparseable checkout is conservatively kept.

use anyhow::Result;
use chrono::NaiveDate;
use std::path::Path;
use tracing::info;

use crate::dates;
use crate::model::COL_CHECK_OUT;
use crate::sheet::MirrorSheet;
use crate::store::Table;

/// A record is removed once its checkout is strictly older than
/// `retention_days`: exactly `retention_days` old is still kept.
fn expired(checkout: &str, today: NaiveDate, retention_days: i64) -> bool {
    match dates::parse_date(checkout) {
        Some(date) => (today - date).num_days() > retention_days,
        None => false,
    }
}

/// Remove expired records in place; returns how many were dropped.
pub fn sweep_table(table: &mut Table, today: NaiveDate, retention_days: i64) -> usize {
    let before = table.records.len();
    table
        .records
        .retain(|record| !expired(&record.check_out, today, retention_days));
    before - table.records.len()
}

/// Sweep the store file. Only rewrites the file when something was removed.
pub fn sweep_store(path: &Path, retention_days: i64) -> Result<usize> {
    let mut table = Table::load(path)?;
    let removed = sweep_table(&mut table, dates::today(), retention_days);
    if removed > 0 {
        table.save(path)?;
    }
    info!(removed, remaining = table.records.len(), "store sweep complete");
    Ok(removed)
}

/// Sweep a mirrored sheet. Deletions run in descending index order so the
/// index shift of one deletion cannot invalidate the next.
pub async fn sweep_sheet(
    sheet: &dyn MirrorSheet,
    today: NaiveDate,
    retention_days: i64,
) -> Result<usize> {
    let rows = sheet.rows().await?;
    if rows.is_empty() {
        return Ok(0);
    }

    let checkout_column = rows[0]
        .iter()
        .position(|header| header.trim().to_lowercase() == COL_CHECK_OUT);
    let checkout_column = match checkout_column {
        Some(index) => index,
        None => {
            info!("sheet has no checkout column; nothing to sweep");
            return Ok(0);
        }
    };

    let mut expired_rows: Vec<usize> = rows
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(_, row)| {
            row.get(checkout_column)
                .map(|checkout| expired(checkout, today, retention_days))
                .unwrap_or(false)
        })
        .map(|(index, _)| index)
        .collect();

    expired_rows.sort_unstable_by(|a, b| b.cmp(a));
    for index in &expired_rows {
        sheet.delete_row(*index).await?;
    }

    info!(removed = expired_rows.len(), "sheet sweep complete");
    Ok(expired_rows.len())
}
