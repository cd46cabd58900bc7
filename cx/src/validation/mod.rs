//! Document validation: heuristic screens, chunked LLM classification
//! with look-back memory, and jurisdiction (location) checks

pub mod content;
pub mod graphs;
pub mod location;

pub use content::{Heuristic, OrdinanceValidator, ValidationWithMemory, ValidatorPrompts};
pub use location::{JurisdictionValidator, weighted_vote};
