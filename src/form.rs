//! Web-form submission workflow: one urlencoded POST per pending row.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

use crate::config::Config;
use crate::dispatch::RowWorkflow;
use crate::model::{Outcome, ReservationRecord, WorkflowColumns};

// Fixed field-name mapping of the form contract.
const ENTRY_OPERATOR_NAME: &str = "entry.1478325381";
const ENTRY_OPERATOR_PHONE: &str = "entry.887535986";
const ENTRY_CHANNEL: &str = "entry.1577804325";
const ENTRY_GUEST_NAME: &str = "entry.1080752479";
const ENTRY_GUEST_PHONE: &str = "entry.1314980540";
const ENTRY_ROOMS: &str = "entry.473851324";
const ENTRY_ADULTS: &str = "entry.2006614104";
const ENTRY_CHECK_IN: &str = "entry.1937352817";
const ENTRY_CHECK_OUT: &str = "entry.929840929";
const ENTRY_REMARKS: &str = "entry.1273587710";
const FIELD_EMAIL: &str = "emailAddress";

/// The form caps party size at 8.
const MAX_FORM_ADULTS: u32 = 8;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct OperatorIdentity {
    pub name: String,
    pub phone: String,
    pub email: String,
}

pub struct FormWorkflow {
    http: Client,
    url: String,
    operator: OperatorIdentity,
    columns: WorkflowColumns,
}

impl FormWorkflow {
    pub fn from_config(cfg: &Config) -> Self {
        let http = Client::builder()
            .user_agent("guestflow/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            url: cfg.form.url.clone(),
            operator: OperatorIdentity {
                name: cfg.operator.name.clone(),
                phone: cfg.operator.phone.clone(),
                email: cfg.operator.email.clone(),
            },
            columns: cfg.form_columns(),
        }
    }
}

/// Dates are passed through as raw text: the form accepts whatever the
/// export contained.
pub fn build_payload(
    record: &ReservationRecord,
    operator: &OperatorIdentity,
) -> Vec<(&'static str, String)> {
    let adults = record.adults().unwrap_or(1).min(MAX_FORM_ADULTS);
    vec![
        (ENTRY_OPERATOR_NAME, operator.name.clone()),
        (ENTRY_OPERATOR_PHONE, operator.phone.clone()),
        (ENTRY_CHANNEL, record.channel.clone()),
        (ENTRY_GUEST_NAME, record.full_name()),
        (ENTRY_GUEST_PHONE, record.phone.clone()),
        (ENTRY_ROOMS, record.rooms.clone()),
        (ENTRY_ADULTS, adults.to_string()),
        (ENTRY_CHECK_IN, record.check_in.clone()),
        (ENTRY_CHECK_OUT, record.check_out.clone()),
        (ENTRY_REMARKS, "None".to_string()),
        (FIELD_EMAIL, operator.email.clone()),
    ]
}

#[async_trait]
impl RowWorkflow for FormWorkflow {
    fn name(&self) -> &'static str {
        "form"
    }

    fn columns(&self) -> &WorkflowColumns {
        &self.columns
    }

    async fn submit(&self, record: &ReservationRecord) -> Outcome {
        let payload = build_payload(record, &self.operator);
        let response = self
            .http
            .post(&self.url)
            .timeout(REQUEST_TIMEOUT)
            .form(&payload)
            .send()
            .await;

        match response {
            Ok(response) if response.status() == StatusCode::OK => Outcome::Completed,
            Ok(response) => Outcome::Failed(format!(
                "Failed with status code {}",
                response.status().as_u16()
            )),
            Err(err) => Outcome::Failed(format!("Error: {}", err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operator() -> OperatorIdentity {
        OperatorIdentity {
            name: "Jane Operator".into(),
            phone: "60123456789".into(),
            email: "operator@example.com".into(),
        }
    }

    fn record() -> ReservationRecord {
        let mut r = ReservationRecord::default();
        r.first_name = "Aisha".into();
        r.last_name = "Rahman".into();
        r.phone = "0123456789".into();
        r.rooms = "A12".into();
        r.channel = "Airbnb".into();
        r.check_in = "01/06/2025".into();
        r.check_out = "05/06/2025".into();
        r.adults_raw = "2".into();
        r
    }

    fn value_of<'a>(payload: &'a [(&str, String)], key: &str) -> &'a str {
        payload.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str()).unwrap()
    }

    #[test]
    fn payload_maps_reservation_attributes() {
        let payload = build_payload(&record(), &operator());
        assert_eq!(value_of(&payload, ENTRY_GUEST_NAME), "Aisha Rahman");
        assert_eq!(value_of(&payload, ENTRY_GUEST_PHONE), "0123456789");
        assert_eq!(value_of(&payload, ENTRY_CHECK_IN), "01/06/2025");
        assert_eq!(value_of(&payload, ENTRY_REMARKS), "None");
        assert_eq!(value_of(&payload, FIELD_EMAIL), "operator@example.com");
    }

    #[test]
    fn adults_are_capped_at_eight() {
        let mut r = record();
        r.adults_raw = "12".into();
        let payload = build_payload(&r, &operator());
        assert_eq!(value_of(&payload, ENTRY_ADULTS), "8");
    }

    #[test]
    fn missing_adults_defaults_to_one() {
        let mut r = record();
        r.adults_raw = "".into();
        let payload = build_payload(&r, &operator());
        assert_eq!(value_of(&payload, ENTRY_ADULTS), "1");
    }
}
