//! Entity and junction extraction from the relationship-shaped
//! `apoiadores_emendas` file.
//!
//! Each source row links a proposal to an amendment, a supporter, and a
//! program. One pass produces the distinct supporters and amendments, the
//! deduplicated junction rows, and the program-link map. Rows missing a
//! side contribute what they can.

use std::collections::{BTreeMap, BTreeSet};

use tgov_core::hash::{normalize_name, supporter_key};
use tgov_core::records::{
    ApoiadorRecord, EmendaRecord, PropostaApoiadorRecord, PropostaEmendaRecord,
};
use tgov_parser::{ColumnMap, Table};
use tracing::{debug, info};

use crate::validate::{parse_money, parse_year};

#[derive(Debug, Clone, Default)]
pub struct RelationshipExtraction {
    pub apoiadores: Vec<ApoiadorRecord>,
    pub emendas: Vec<EmendaRecord>,
    pub proposta_apoiadores: Vec<PropostaApoiadorRecord>,
    pub proposta_emendas: Vec<PropostaEmendaRecord>,
    /// proposta id -> programa id, applied later where the proposal's
    /// program reference is still null.
    pub programa_links: BTreeMap<String, String>,
    /// Rows with no proposal id, or with neither a supporter nor an
    /// amendment side.
    pub skipped_rows: usize,
    /// Rows that contributed only one of the two relationship sides.
    pub partial_rows: usize,
}

pub fn extract_relationships(table: &Table, columns: &ColumnMap) -> RelationshipExtraction {
    let mut seen_apoiadores: BTreeMap<String, ApoiadorRecord> = BTreeMap::new();
    let mut seen_emendas: BTreeMap<String, EmendaRecord> = BTreeMap::new();
    let mut junction_apoiadores: BTreeSet<(String, String)> = BTreeSet::new();
    let mut junction_emendas: BTreeSet<(String, String)> = BTreeSet::new();
    let mut out = RelationshipExtraction::default();

    for row in 0..table.row_count() {
        let Some(proposta_id) = columns.cell(table, row, "proposta_id") else {
            debug!(row, "link row without proposal id, skipping");
            out.skipped_rows += 1;
            continue;
        };
        let proposta_id = proposta_id.to_string();

        if let Some(programa_id) = columns.cell(table, row, "programa_id") {
            out.programa_links
                .entry(proposta_id.clone())
                .or_insert_with(|| programa_id.to_string());
        }

        let nome_parlamentar = columns.cell(table, row, "nome_parlamentar");
        let numero_emenda = columns.cell(table, row, "numero_emenda");
        let indicacao = columns.cell(table, row, "indicacao");

        if let Some(nome) = nome_parlamentar {
            // The supporter key is derived from the name; foreign-intent
            // columns (the program id, the proposal id) are never used as
            // the supporter's identity.
            let key = supporter_key(nome);
            seen_apoiadores.entry(key.clone()).or_insert_with(|| ApoiadorRecord {
                transfer_gov_id: key.clone(),
                nome: Some(normalize_name(nome)),
                tipo: indicacao.map(str::to_string),
                orgao: columns.cell(table, row, "orgao").map(str::to_string),
            });
            junction_apoiadores.insert((proposta_id.clone(), key));
        }

        if let Some(numero) = numero_emenda {
            // The amendment number is already unique in the source; the
            // first observed attribute set wins.
            seen_emendas.entry(numero.to_string()).or_insert_with(|| EmendaRecord {
                transfer_gov_id: numero.to_string(),
                numero: Some(numero.to_string()),
                autor: nome_parlamentar.map(normalize_name),
                valor: columns
                    .cell(table, row, "valor_repasse")
                    .and_then(|raw| parse_money(raw).ok()),
                tipo: indicacao.map(str::to_string),
                ano: columns
                    .cell(table, row, "ano_emenda")
                    .and_then(parse_year),
            });
            junction_emendas.insert((proposta_id.clone(), numero.to_string()));
        }

        match (nome_parlamentar, numero_emenda) {
            (None, None) => {
                debug!(row, proposta_id, "link row missing both sides");
                out.skipped_rows += 1;
            }
            (Some(_), None) | (None, Some(_)) => out.partial_rows += 1,
            (Some(_), Some(_)) => {}
        }
    }

    out.apoiadores = seen_apoiadores.into_values().collect();
    out.emendas = seen_emendas.into_values().collect();
    out.proposta_apoiadores = junction_apoiadores
        .into_iter()
        .map(|(proposta, apoiador)| PropostaApoiadorRecord {
            proposta_transfer_gov_id: proposta,
            apoiador_transfer_gov_id: apoiador,
        })
        .collect();
    out.proposta_emendas = junction_emendas
        .into_iter()
        .map(|(proposta, emenda)| PropostaEmendaRecord {
            proposta_transfer_gov_id: proposta,
            emenda_transfer_gov_id: emenda,
        })
        .collect();

    info!(
        apoiadores = out.apoiadores.len(),
        emendas = out.emendas.len(),
        proposta_apoiadores = out.proposta_apoiadores.len(),
        proposta_emendas = out.proposta_emendas.len(),
        programa_links = out.programa_links.len(),
        skipped = out.skipped_rows,
        partial = out.partial_rows,
        "extracted relationships"
    );

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgov_parser::{map_columns, FileKind};

    const LINK_HEADERS: &[&str] = &[
        "id_cnpj_programa_emenda_apoiadores_emendas",
        "numero_emenda_apoiadores_emendas",
        "nome_parlamentar_apoiadores_emendas",
        "id_programa",
        "indicacao_apoiadores_emendas",
        "valor_repasse_proposta_apoiadores_emendas",
    ];

    fn link_table(rows: &[&[&str]]) -> (Table, ColumnMap) {
        let table = Table::new(
            LINK_HEADERS.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        );
        let columns = map_columns(&table, FileKind::ApoiadoresEmendas).unwrap();
        (table, columns)
    }

    #[test]
    fn entities_and_junctions_are_deduplicated() {
        let (table, columns) = link_table(&[
            &["P-1", "E-100", "MARIA DA SILVA", "PR-9", "Impositiva", "1000,00"],
            &["P-2", "E-100", "MARIA DA SILVA", "PR-9", "Impositiva", "1000,00"],
            &["P-1", "E-100", "MARIA DA SILVA", "PR-9", "Impositiva", "1000,00"],
            &["P-1", "E-200", "JOSE SANTOS", "", "Bancada", "2500,50"],
        ]);

        let out = extract_relationships(&table, &columns);

        assert_eq!(out.apoiadores.len(), 2);
        assert_eq!(out.emendas.len(), 2);
        assert_eq!(out.proposta_apoiadores.len(), 3);
        assert_eq!(out.proposta_emendas.len(), 3);
        assert_eq!(out.programa_links.get("P-1"), Some(&"PR-9".to_string()));
        assert_eq!(out.programa_links.get("P-2"), Some(&"PR-9".to_string()));

        let emenda = out
            .emendas
            .iter()
            .find(|e| e.transfer_gov_id == "E-100")
            .unwrap();
        assert_eq!(emenda.valor, Some(1000.0));
        assert_eq!(emenda.autor.as_deref(), Some("MARIA DA SILVA"));
    }

    #[test]
    fn supporter_keys_derive_from_the_name_only() {
        let (table, columns) = link_table(&[
            &["P-1", "", "MARIA DA SILVA", "PR-9", "", ""],
            &["P-2", "", "  MARIA   DA SILVA ", "PR-8", "", ""],
        ]);

        let out = extract_relationships(&table, &columns);
        assert_eq!(out.apoiadores.len(), 1);
        assert_eq!(out.apoiadores[0].transfer_gov_id, supporter_key("MARIA DA SILVA"));
        assert_ne!(out.apoiadores[0].transfer_gov_id, "PR-9");
        assert_eq!(out.proposta_apoiadores.len(), 2);
    }

    #[test]
    fn rows_missing_one_side_still_contribute() {
        let (table, columns) = link_table(&[
            &["P-1", "E-1", "", "", "", ""],
            &["P-1", "", "MARIA", "", "", ""],
            &["P-1", "", "", "", "", ""],
            &["", "E-2", "JOSE", "", "", ""],
        ]);

        let out = extract_relationships(&table, &columns);
        assert_eq!(out.emendas.len(), 1);
        assert_eq!(out.apoiadores.len(), 1);
        assert_eq!(out.partial_rows, 2);
        assert_eq!(out.skipped_rows, 2);
    }

    #[test]
    fn first_observed_amendment_attributes_win() {
        let (table, columns) = link_table(&[
            &["P-1", "E-1", "MARIA", "", "Impositiva", "100"],
            &["P-2", "E-1", "JOSE", "", "Bancada", "999"],
        ]);

        let out = extract_relationships(&table, &columns);
        let emenda = &out.emendas[0];
        assert_eq!(emenda.autor.as_deref(), Some("MARIA"));
        assert_eq!(emenda.tipo.as_deref(), Some("Impositiva"));
        assert_eq!(emenda.valor, Some(100.0));
    }

    #[test]
    fn first_program_link_wins_per_proposal() {
        let (table, columns) = link_table(&[
            &["P-1", "E-1", "MARIA", "PR-1", "", ""],
            &["P-1", "E-2", "MARIA", "PR-2", "", ""],
        ]);

        let out = extract_relationships(&table, &columns);
        assert_eq!(out.programa_links.get("P-1"), Some(&"PR-1".to_string()));
    }
}
