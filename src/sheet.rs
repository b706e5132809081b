//! Mirrored-spreadsheet adapter. The sheet is a short-lived operational
//! view of the store; the interface is deliberately narrow so the sweeper
//! and the mirror workflow never see the vendor API.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::json;
use std::fmt;
use std::time::Duration;
use tracing::info;

use crate::dispatch::RowWorkflow;
use crate::model::{Outcome, ReservationRecord, WorkflowColumns};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Row-indexed external sheet. Indices refer to positions in the vector
/// returned by `rows()`, row 0 being the header; deleting shifts every
/// later index down by one, which is why the sweeper deletes descending.
#[async_trait]
pub trait MirrorSheet: Send + Sync {
    async fn rows(&self) -> Result<Vec<Vec<String>>>;
    async fn append_row(&self, values: &[String]) -> Result<()>;
    async fn delete_row(&self, index: usize) -> Result<()>;
}

pub struct RestSheet {
    http: Client,
    base_url: Url,
    token: String,
}

impl fmt::Debug for RestSheet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestSheet")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RestSheet {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).context("invalid sheet base URL")?;
        let http = Client::builder()
            .user_agent("guestflow/0.1")
            .build()
            .expect("reqwest client");
        Ok(Self {
            http,
            base_url,
            token: token.to_string(),
        })
    }
}

#[async_trait]
impl MirrorSheet for RestSheet {
    async fn rows(&self) -> Result<Vec<Vec<String>>> {
        let url = self.base_url.join("rows").context("invalid sheet base URL")?;
        let response = self
            .http
            .get(url)
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(&self.token)
            .send()
            .await
            .context("failed to reach sheet service")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("sheet rows error {}: {}", status, body));
        }
        response.json().await.context("invalid sheet rows JSON")
    }

    async fn append_row(&self, values: &[String]) -> Result<()> {
        let url = self.base_url.join("rows").context("invalid sheet base URL")?;
        let response = self
            .http
            .post(url)
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(&self.token)
            .json(&json!({ "values": values }))
            .send()
            .await
            .context("failed to append sheet row")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("sheet append error {}: {}", status, body));
        }
        Ok(())
    }

    async fn delete_row(&self, index: usize) -> Result<()> {
        let url = self
            .base_url
            .join(&format!("rows/{}", index))
            .context("invalid sheet base URL")?;
        let response = self
            .http
            .delete(url)
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(&self.token)
            .send()
            .await
            .context("failed to delete sheet row")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("sheet delete error {}: {}", status, body));
        }
        Ok(())
    }
}

/// Projection of a reservation row mirrored onto the sheet.
pub fn mirror_row(record: &ReservationRecord) -> Vec<String> {
    vec![
        record.booking_reference.clone(),
        record.full_name(),
        record.phone.clone(),
        record.rooms.clone(),
        record.channel.clone(),
        record.check_in.clone(),
        record.check_out.clone(),
    ]
}

/// Per-row workflow appending pending reservations to the mirror sheet.
pub struct MirrorWorkflow {
    sheet: std::sync::Arc<dyn MirrorSheet>,
    columns: WorkflowColumns,
}

impl MirrorWorkflow {
    pub fn new(sheet: std::sync::Arc<dyn MirrorSheet>, columns: WorkflowColumns) -> Self {
        Self { sheet, columns }
    }
}

#[async_trait]
impl RowWorkflow for MirrorWorkflow {
    fn name(&self) -> &'static str {
        "mirror"
    }

    fn columns(&self) -> &WorkflowColumns {
        &self.columns
    }

    async fn submit(&self, record: &ReservationRecord) -> Outcome {
        match self.sheet.append_row(&mirror_row(record)).await {
            Ok(()) => {
                info!(booking = %record.booking_reference, "mirrored row to sheet");
                Outcome::Completed
            }
            Err(err) => Outcome::Failed(format!("Error: {:#}", err)),
        }
    }
}
