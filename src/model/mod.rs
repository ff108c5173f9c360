//! Data models for callsync.
//!
//! This module contains the domain models:
//! - CallRecord (with its type and sync status enums)
//! - PersonRecord
//! - PlanInfo

pub mod call;
pub mod person;
pub mod plan;

pub use call::{normalize_phone, CallRecord, CallType, MetadataSyncStatus, RecordingSyncStatus};
pub use person::PersonRecord;
pub use plan::PlanInfo;
