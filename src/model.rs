use std::collections::BTreeMap;

// Canonical store column names. Headers are lowercased on load, so these
// are the only spellings the rest of the crate sees.
pub const COL_BOOKING_REF: &str = "booking reference";
pub const COL_FIRST_NAME: &str = "guest first name";
pub const COL_LAST_NAME: &str = "guest last name";
pub const COL_PHONE: &str = "guest phone number";
pub const COL_ROOMS: &str = "rooms";
pub const COL_CHANNEL: &str = "channel name";
pub const COL_CHECK_IN: &str = "check in date";
pub const COL_CHECK_OUT: &str = "check out date";
pub const COL_ROOM_TYPES: &str = "room types";
pub const COL_ADULTS: &str = "number of adults";
pub const COL_EMAIL: &str = "guest email";

/// One row of the reservation store.
///
/// Reservation fields are typed; everything else the CSV carries
/// (including every per-workflow status/date pair) lives in `extras`,
/// keyed by lowercased column name, so a save never loses columns the
/// loader did not recognise. Phone numbers and dates stay as raw text:
/// phones may carry leading zeros and dates arrive in mixed formats.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationRecord {
    pub booking_reference: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub rooms: String,
    pub channel: String,
    pub check_in: String,
    pub check_out: String,
    pub room_types: String,
    pub adults_raw: String,
    pub email: String,
    pub extras: BTreeMap<String, String>,
}

impl ReservationRecord {
    /// Composite key used for de-duplication. Not globally unique across
    /// sources, which is exactly why the merge dedups on it.
    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey {
            booking_reference: self.booking_reference.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn adults(&self) -> Option<u32> {
        self.adults_raw.trim().parse().ok()
    }

    /// Guest email, if present and non-empty.
    pub fn email(&self) -> Option<&str> {
        let email = self.email.trim();
        (!email.is_empty()).then_some(email)
    }

    /// Cell value for a (lowercased) column name.
    pub fn get(&self, column: &str) -> Option<&str> {
        match column {
            COL_BOOKING_REF => Some(&self.booking_reference),
            COL_FIRST_NAME => Some(&self.first_name),
            COL_LAST_NAME => Some(&self.last_name),
            COL_PHONE => Some(&self.phone),
            COL_ROOMS => Some(&self.rooms),
            COL_CHANNEL => Some(&self.channel),
            COL_CHECK_IN => Some(&self.check_in),
            COL_CHECK_OUT => Some(&self.check_out),
            COL_ROOM_TYPES => Some(&self.room_types),
            COL_ADULTS => Some(&self.adults_raw),
            COL_EMAIL => Some(&self.email),
            other => self.extras.get(other).map(String::as_str),
        }
    }

    pub fn set(&mut self, column: &str, value: String) {
        match column {
            COL_BOOKING_REF => self.booking_reference = value,
            COL_FIRST_NAME => self.first_name = value,
            COL_LAST_NAME => self.last_name = value,
            COL_PHONE => self.phone = value,
            COL_ROOMS => self.rooms = value,
            COL_CHANNEL => self.channel = value,
            COL_CHECK_IN => self.check_in = value,
            COL_CHECK_OUT => self.check_out = value,
            COL_ROOM_TYPES => self.room_types = value,
            COL_ADULTS => self.adults_raw = value,
            COL_EMAIL => self.email = value,
            other => {
                self.extras.insert(other.to_string(), value);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    pub booking_reference: String,
    pub first_name: String,
    pub last_name: String,
}

/// The status/date column pair a workflow tracks itself through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowColumns {
    pub status: String,
    pub date: String,
}

impl WorkflowColumns {
    pub fn new(status: impl Into<String>, date: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            date: date.into(),
        }
    }
}

/// Result of submitting one row (or one batch) to an external endpoint.
/// Failures carry the human-readable text that lands in the status column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed(String),
}

impl Outcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed)
    }

    /// The text written to the status column: the configured completed
    /// marker on success, the failure description otherwise.
    pub fn status_text(&self, completed_marker: &str) -> String {
        match self {
            Outcome::Completed => completed_marker.to_string(),
            Outcome::Failed(reason) => reason.clone(),
        }
    }
}

/// Counters returned from a dispatch pass, replacing ambient global state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub completed: usize,
    pub failed: usize,
}

impl DispatchSummary {
    pub fn tally(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Completed => self.completed += 1,
            Outcome::Failed(_) => self.failed += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_and_set_route_known_and_extra_columns() {
        let mut record = ReservationRecord::default();
        record.set(COL_FIRST_NAME, "Aisha".into());
        record.set("vms status", "Pending".into());

        assert_eq!(record.first_name, "Aisha");
        assert_eq!(record.get(COL_FIRST_NAME), Some("Aisha"));
        assert_eq!(record.get("vms status"), Some("Pending"));
        assert_eq!(record.get("missing column"), None);
    }

    #[test]
    fn adults_parse_is_lenient() {
        let mut record = ReservationRecord::default();
        record.adults_raw = " 3 ".into();
        assert_eq!(record.adults(), Some(3));
        record.adults_raw = "n/a".into();
        assert_eq!(record.adults(), None);
    }

    #[test]
    fn outcome_status_text() {
        assert_eq!(Outcome::Completed.status_text("Completed"), "Completed");
        assert_eq!(
            Outcome::Failed("Error: timeout".into()).status_text("Completed"),
            "Error: timeout"
        );
    }
}
