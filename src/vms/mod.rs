//! Client for the third-party Visitor Management System.
//!
//! The VMS is a cookie-session web app guarded by an anti-forgery token
//! hidden in its login form. The client wraps that into a narrow
//! capability: authenticate once, then register visitors (create → search
//! → detail, all three must succeed) or bulk-import a CSV of guests.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::dispatch::RowWorkflow;
use crate::model::{Outcome, ReservationRecord, WorkflowColumns};

pub mod bulk;

const LOGIN_TIMEOUT: Duration = Duration::from_secs(15);
const CREATE_TIMEOUT: Duration = Duration::from_secs(30);
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Hidden-input field names that may carry the anti-forgery token.
const TOKEN_FIELDS: [&str; 4] = [
    "csrfmiddlewaretoken",
    "_token",
    "authenticity_token",
    "csrf_token",
];

static INPUT_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<input\b[^>]*>").expect("valid input-tag regex"));
static ATTR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\b(name|type|value)\s*=\s*["']([^"']*)["']"#).expect("valid attr regex"));

/// Scan HTML for the first hidden input whose name is a known token field
/// and whose value is non-empty. Returns (field name, token value).
pub fn find_hidden_input(html: &str) -> Option<(String, String)> {
    for tag in INPUT_TAG_RE.find_iter(html) {
        let mut attrs: HashMap<String, String> = HashMap::new();
        for capture in ATTR_RE.captures_iter(tag.as_str()) {
            attrs.insert(capture[1].to_lowercase(), capture[2].to_string());
        }
        let name = match attrs.get("name") {
            Some(name) if TOKEN_FIELDS.contains(&name.as_str()) => name.clone(),
            _ => continue,
        };
        let hidden = attrs
            .get("type")
            .map(|t| t.is_empty() || t.eq_ignore_ascii_case("hidden"))
            .unwrap_or(true);
        if !hidden {
            continue;
        }
        if let Some(value) = attrs.get("value").filter(|v| !v.is_empty()) {
            return Some((name, value.clone()));
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Visitor payload for the create endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitorForm {
    pub full_name: String,
    pub phone: String,
    pub email: String,
    pub unit_no: String,
    pub car_park_lot: String,
    pub booking_source: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub visitor_id: i64,
    pub qrcode_url: String,
}

#[derive(Clone)]
pub struct VmsClient {
    http: Client,
    base_url: Url,
}

impl fmt::Debug for VmsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmsClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait VmsService: Send + Sync {
    /// Create → search-by-name → fetch-detail. All three steps must
    /// succeed, in order, for the registration to count.
    async fn register(&self, token: &CsrfToken, visitor: &VisitorForm) -> Result<Registration>;
}

impl VmsClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).context("invalid VMS base URL")?;
        let http = Client::builder()
            .user_agent("guestflow/0.1")
            .cookie_store(true)
            .build()
            .expect("reqwest client");
        Ok(Self { http, base_url })
    }

    /// Authenticate against the VMS: fetch the login page, scrape the
    /// anti-forgery token out of its hidden inputs, submit credentials
    /// with the token attached, then re-scrape the refreshed `_token`
    /// from the authenticated response. The session cookie lands in the
    /// client's jar automatically.
    pub async fn login(&self, creds: &Credentials) -> Result<CsrfToken> {
        let login_url = self.base_url.join("login").context("invalid VMS base URL")?;

        let page = self
            .http
            .get(login_url.clone())
            .timeout(LOGIN_TIMEOUT)
            .send()
            .await
            .context("failed to reach VMS login page")?
            .error_for_status()
            .context("VMS login page returned an error")?;
        let html = page.text().await.context("failed to read VMS login page")?;

        let mut body = serde_json::Map::new();
        body.insert("email".into(), creds.email.clone().into());
        body.insert("password".into(), creds.password.clone().into());
        if let Some((field, value)) = find_hidden_input(&html) {
            body.insert(field, value.into());
        }

        let response = self
            .http
            .post(login_url)
            .timeout(LOGIN_TIMEOUT)
            .json(&body)
            .send()
            .await
            .context("VMS login request failed")?
            .error_for_status()
            .context("VMS rejected the login")?;
        let html = response
            .text()
            .await
            .context("failed to read VMS login response")?;

        match find_hidden_input(&html) {
            Some((field, value)) if field == "_token" => Ok(CsrfToken { field, value }),
            _ => bail!("no _token field found in authenticated VMS response"),
        }
    }

    async fn create_visitor(&self, token: &CsrfToken, visitor: &VisitorForm) -> Result<()> {
        let url = self
            .base_url
            .join("admin/visitors")
            .context("invalid VMS base URL")?;
        let form = [
            ("full_name", visitor.full_name.as_str()),
            ("phone", visitor.phone.as_str()),
            ("email", visitor.email.as_str()),
            // Required by the endpoint; the workflow has no real value.
            ("national_identification_no", "-"),
            ("unit_no", visitor.unit_no.as_str()),
            ("car_park_lot", visitor.car_park_lot.as_str()),
            ("booking_source", visitor.booking_source.as_str()),
            (token.field.as_str(), token.value.as_str()),
        ];
        self.http
            .post(url)
            .timeout(CREATE_TIMEOUT)
            .form(&form)
            .send()
            .await
            .context("visitor create request failed")?
            .error_for_status()
            .context("VMS rejected the visitor create")?;
        Ok(())
    }

    async fn find_visitor_id(&self, full_name: &str) -> Result<i64> {
        let url = self
            .base_url
            .join("admin/get-visitors")
            .context("invalid VMS base URL")?;
        let params = visitor_query(full_name);
        let listing: VisitorListing = self
            .http
            .get(url)
            .timeout(QUERY_TIMEOUT)
            .query(&params)
            .send()
            .await
            .context("visitor search request failed")?
            .error_for_status()
            .context("VMS rejected the visitor search")?
            .json()
            .await
            .context("invalid visitor search response JSON")?;
        listing
            .data
            .first()
            .map(|row| row.id)
            .ok_or_else(|| anyhow!("visitor '{}' not found in VMS listing", full_name))
    }

    async fn visitor_detail(&self, visitor_id: i64) -> Result<VisitorDetail> {
        let url = self
            .base_url
            .join(&format!("admin/visitors/{}/show", visitor_id))
            .context("invalid VMS base URL")?;
        self.http
            .get(url)
            .timeout(QUERY_TIMEOUT)
            .header("X-Requested-With", "XMLHttpRequest")
            .send()
            .await
            .context("visitor detail request failed")?
            .error_for_status()
            .context("VMS rejected the visitor detail fetch")?
            .json()
            .await
            .context("invalid visitor detail response JSON")
    }
}

#[async_trait]
impl VmsService for VmsClient {
    async fn register(&self, token: &CsrfToken, visitor: &VisitorForm) -> Result<Registration> {
        self.create_visitor(token, visitor).await?;
        let visitor_id = self.find_visitor_id(&visitor.full_name).await?;
        let detail = self.visitor_detail(visitor_id).await?;
        Ok(Registration {
            visitor_id,
            qrcode_url: detail.qrcode_url,
        })
    }
}

#[derive(Debug, Deserialize)]
struct VisitorListing {
    #[serde(default)]
    data: Vec<VisitorRow>,
}

#[derive(Debug, Deserialize)]
struct VisitorRow {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct VisitorDetail {
    qrcode_url: String,
}

/// Columns of the server-side listing table, condensed from the endpoint's
/// DataTables contract: (data, name, searchable, orderable).
const LISTING_COLUMNS: [(&str, &str, bool, bool); 7] = [
    ("reg_no", "reg_no", true, true),
    ("name", "name", true, true),
    ("phone", "phone", true, true),
    ("checkin", "checkin_at", true, true),
    ("checkout", "checkout_at", true, true),
    ("status", "status", true, true),
    ("action", "action", false, false),
];

/// Query parameters searching the listing for a visitor by full name,
/// newest registration first.
pub fn visitor_query(full_name: &str) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = vec![
        ("start".into(), "0".into()),
        ("length".into(), "10".into()),
        ("order[0][column]".into(), "0".into()),
        ("order[0][dir]".into(), "desc".into()),
        ("order[0][name]".into(), "reg_no".into()),
        ("search[value]".into(), full_name.into()),
        ("search[regex]".into(), "false".into()),
    ];
    for (i, (data, name, searchable, orderable)) in LISTING_COLUMNS.iter().enumerate() {
        params.push((format!("columns[{}][data]", i), (*data).into()));
        params.push((format!("columns[{}][name]", i), (*name).into()));
        params.push((format!("columns[{}][searchable]", i), searchable.to_string()));
        params.push((format!("columns[{}][orderable]", i), orderable.to_string()));
    }
    params
}

/// Room-to-parking-lot lookup table, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct ParkingMap(HashMap<String, String>);

impl ParkingMap {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read parking map {}", path.display()))?;
        let map: HashMap<String, String> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse parking map {}", path.display()))?;
        Ok(Self(map))
    }

    pub fn from_entries<I: IntoIterator<Item = (String, String)>>(entries: I) -> Self {
        Self(entries.into_iter().collect())
    }

    /// Lot for a room; unknown rooms and blank lots get the `-` placeholder.
    pub fn lot_for(&self, room: &str) -> String {
        match self.0.get(room) {
            Some(lot) if !lot.trim().is_empty() => lot.clone(),
            _ => "-".to_string(),
        }
    }
}

/// The VMS caps party size by room type: `2+1` layouts take 7, anything
/// with a `3` takes 9, everything else 4.
pub fn capped_adults(room_types: &str, adults: u32) -> u32 {
    let room_types = room_types.to_lowercase();
    if room_types.contains("2+1") {
        adults.min(7)
    } else if room_types.contains('3') {
        adults.min(9)
    } else {
        adults.min(4)
    }
}

pub fn build_visitor_form(
    record: &ReservationRecord,
    parking: &ParkingMap,
    fallback_email: &str,
) -> VisitorForm {
    VisitorForm {
        full_name: record.full_name(),
        phone: record.phone.clone(),
        email: record.email().unwrap_or(fallback_email).to_string(),
        unit_no: record.rooms.clone(),
        car_park_lot: parking.lot_for(&record.rooms),
        booking_source: record.channel.clone(),
    }
}

/// Per-row workflow performing the 3-step registration protocol.
pub struct RegisterWorkflow {
    service: Arc<dyn VmsService>,
    token: CsrfToken,
    parking: ParkingMap,
    fallback_email: String,
    columns: WorkflowColumns,
}

impl RegisterWorkflow {
    pub fn new(
        service: Arc<dyn VmsService>,
        token: CsrfToken,
        parking: ParkingMap,
        fallback_email: String,
        columns: WorkflowColumns,
    ) -> Self {
        Self {
            service,
            token,
            parking,
            fallback_email,
            columns,
        }
    }
}

#[async_trait]
impl RowWorkflow for RegisterWorkflow {
    fn name(&self) -> &'static str {
        "vms-register"
    }

    fn columns(&self) -> &WorkflowColumns {
        &self.columns
    }

    async fn submit(&self, record: &ReservationRecord) -> Outcome {
        let visitor = build_visitor_form(record, &self.parking, &self.fallback_email);
        match self.service.register(&self.token, &visitor).await {
            Ok(registration) => {
                info!(
                    visitor = %visitor.full_name,
                    visitor_id = registration.visitor_id,
                    qrcode_url = %registration.qrcode_url,
                    "registered visitor"
                );
                Outcome::Completed
            }
            Err(err) => Outcome::Failed(format!("Error: {:#}", err)),
        }
    }
}
