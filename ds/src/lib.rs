//! DocStore - document and jurisdiction model for ordinance extraction
//!
//! This crate holds the data types shared by every stage of the extraction
//! pipeline: [`Document`] (an opaque text blob plus an additive attribute
//! map), [`Jurisdiction`] (an administrative area with casefolded equality),
//! and the jurisdiction reference loader that joins user-supplied lists
//! against the bundled reference CSV.
//!
//! Nothing in here is async and nothing in here knows about LLMs; the
//! orchestrator crate layers behavior on top of these types.

pub mod document;
pub mod jurisdiction;
pub mod reference;

mod error;

pub use document::{Document, attrs};
pub use error::StoreError;
pub use jurisdiction::{Jurisdiction, JurisdictionType};
pub use reference::{JurisdictionInfo, load_reference, select_jurisdictions};
