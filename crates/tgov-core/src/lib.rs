//! Core domain model for the Transfer Gov ingestion pipeline.

pub mod cnpj;
pub mod hash;
pub mod osc;
pub mod records;
pub mod uf;

pub const CRATE_NAME: &str = "tgov-core";

pub use records::{
    ApoiadorRecord, EmendaRecord, EntityKind, ExtractionBatch, ProgramaRecord, ProponenteRecord,
    PropostaApoiadorRecord, PropostaEmendaRecord, PropostaRecord, RunStatus, TableCounts,
};
