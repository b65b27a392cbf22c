//! Typed records for the seven persisted tables plus run-level types.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Government transfer program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramaRecord {
    pub transfer_gov_id: String,
    pub nome: Option<String>,
    pub orgao_superior: Option<String>,
    pub orgao_vinculado: Option<String>,
    pub modalidade: Option<String>,
    pub acao_orcamentaria: Option<String>,
    pub natureza_juridica: Option<String>,
}

/// Transfer proposal. `proponente_cnpj` is filled in by the proponent
/// dimension build, `programa_id` may additionally be filled from the
/// relationship file's program links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropostaRecord {
    pub transfer_gov_id: String,
    pub titulo: Option<String>,
    pub valor_global: Option<f64>,
    pub valor_repasse: Option<f64>,
    pub valor_contrapartida: Option<f64>,
    pub data_publicacao: Option<NaiveDate>,
    pub data_inicio_vigencia: Option<NaiveDate>,
    pub data_fim_vigencia: Option<NaiveDate>,
    pub situacao: Option<String>,
    pub estado: Option<String>,
    pub municipio: Option<String>,
    pub proponente: Option<String>,
    pub programa_id: Option<String>,
    pub proponente_cnpj: Option<String>,
}

/// Parliamentarian supporting one or more proposals. The natural key is
/// derived from the normalized name, see [`crate::hash::supporter_key`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApoiadorRecord {
    pub transfer_gov_id: String,
    pub nome: Option<String>,
    pub tipo: Option<String>,
    pub orgao: Option<String>,
}

/// Budget amendment. The amendment number is unique in the source and
/// doubles as the natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmendaRecord {
    pub transfer_gov_id: String,
    pub numero: Option<String>,
    pub autor: Option<String>,
    pub valor: Option<f64>,
    pub tipo: Option<String>,
    pub ano: Option<i32>,
}

/// Proponent dimension row, keyed by normalized 14-digit CNPJ. The
/// `total_*` aggregates are recomputed in-store after every load and are
/// not carried on the extraction-side record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProponenteRecord {
    pub cnpj: String,
    pub nome: Option<String>,
    pub natureza_juridica: Option<String>,
    pub estado: Option<String>,
    pub municipio: Option<String>,
    pub cep: Option<String>,
    pub endereco: Option<String>,
    pub bairro: Option<String>,
    pub is_osc: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropostaApoiadorRecord {
    pub proposta_transfer_gov_id: String,
    pub apoiador_transfer_gov_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropostaEmendaRecord {
    pub proposta_transfer_gov_id: String,
    pub emenda_transfer_gov_id: String,
}

/// Everything extracted from one input directory, ready for loading.
#[derive(Debug, Clone, Default)]
pub struct ExtractionBatch {
    pub programas: Vec<ProgramaRecord>,
    pub propostas: Vec<PropostaRecord>,
    pub proponentes: Vec<ProponenteRecord>,
    pub apoiadores: Vec<ApoiadorRecord>,
    pub emendas: Vec<EmendaRecord>,
    pub proposta_apoiadores: Vec<PropostaApoiadorRecord>,
    pub proposta_emendas: Vec<PropostaEmendaRecord>,
    /// proposta transfer_gov_id -> programa transfer_gov_id, applied to
    /// `propostas.programa_id` only where that column is still NULL.
    pub programa_links: BTreeMap<String, String>,
}

impl ExtractionBatch {
    pub fn total_records(&self) -> usize {
        self.programas.len()
            + self.propostas.len()
            + self.proponentes.len()
            + self.apoiadores.len()
            + self.emendas.len()
            + self.proposta_apoiadores.len()
            + self.proposta_emendas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_records() == 0
    }
}

/// Terminal status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(RunStatus::Success),
            "partial" => Some(RunStatus::Partial),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// Rows affected by the upserts into one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    pub inserted: u64,
    pub updated: u64,
}

impl TableCounts {
    pub fn total(self) -> u64 {
        self.inserted + self.updated
    }
}

/// Entity discriminant used by lineage and reconciliation. Junction rows
/// are entities in their own right and receive lineage like the base
/// tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Programa,
    Proposta,
    Proponente,
    Apoiador,
    Emenda,
    PropostaApoiador,
    PropostaEmenda,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Programa => "programa",
            EntityKind::Proposta => "proposta",
            EntityKind::Proponente => "proponente",
            EntityKind::Apoiador => "apoiador",
            EntityKind::Emenda => "emenda",
            EntityKind::PropostaApoiador => "proposta_apoiador",
            EntityKind::PropostaEmenda => "proposta_emenda",
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            EntityKind::Programa => "programas",
            EntityKind::Proposta => "propostas",
            EntityKind::Proponente => "proponentes",
            EntityKind::Apoiador => "apoiadores",
            EntityKind::Emenda => "emendas",
            EntityKind::PropostaApoiador => "proposta_apoiadores",
            EntityKind::PropostaEmenda => "proposta_emendas",
        }
    }
}

impl PropostaApoiadorRecord {
    /// Compound natural key rendered for lineage.
    pub fn natural_key(&self) -> String {
        format!(
            "{}:{}",
            self.proposta_transfer_gov_id, self.apoiador_transfer_gov_id
        )
    }
}

impl PropostaEmendaRecord {
    pub fn natural_key(&self) -> String {
        format!(
            "{}:{}",
            self.proposta_transfer_gov_id, self.emenda_transfer_gov_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_round_trips_through_text() {
        for status in [RunStatus::Success, RunStatus::Partial, RunStatus::Failed] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RunStatus::parse("running"), None);
    }

    #[test]
    fn batch_counts_cover_all_tables() {
        let mut batch = ExtractionBatch::default();
        assert!(batch.is_empty());

        batch.programas.push(ProgramaRecord {
            transfer_gov_id: "PROG-1".into(),
            nome: None,
            orgao_superior: None,
            orgao_vinculado: None,
            modalidade: None,
            acao_orcamentaria: None,
            natureza_juridica: None,
        });
        batch.proposta_emendas.push(PropostaEmendaRecord {
            proposta_transfer_gov_id: "P-1".into(),
            emenda_transfer_gov_id: "E-1".into(),
        });

        assert_eq!(batch.total_records(), 2);
    }
}
