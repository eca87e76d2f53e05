//! Data models shared by the persistence and workflow layers

pub mod history;
pub mod scraped_record;

pub use history::{HistoryAction, HistoryEntry, OriginalRecord};
pub use scraped_record::{ScrapedRecord, SourceKind, ValidationStatus};
