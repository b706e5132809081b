//! Guest-workflow automation: merges reservation exports into a CSV store
//! and dispatches pending rows to external endpoints (web form, contact
//! list, Visitor Management System, mirror sheet), tracking every workflow
//! through its own status/date column pair so reruns are idempotent.

pub mod config;
pub mod contacts;
pub mod dates;
pub mod dispatch;
pub mod form;
pub mod merge;
pub mod model;
pub mod sheet;
pub mod store;
pub mod sweep;
pub mod vms;
