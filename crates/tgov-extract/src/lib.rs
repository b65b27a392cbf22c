//! Row validation, relationship extraction, and the proponent dimension
//! build: everything between a parsed table and a loadable batch.

pub mod preview;
pub mod proponentes;
pub mod relationships;
pub mod validate;

pub const CRATE_NAME: &str = "tgov-extract";

pub use preview::DryRunReport;
pub use proponentes::{build_proponentes, ProponentDimension};
pub use relationships::{extract_relationships, RelationshipExtraction};
pub use validate::{
    validate_programas, validate_propostas, ProponentCandidate, PropostaRow, RowError,
};
