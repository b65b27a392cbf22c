//! Proponent dimension build from the validated proposals.

use std::collections::BTreeMap;

use tgov_core::cnpj::normalize_cnpj;
use tgov_core::osc::is_osc;
use tgov_core::records::{ProponenteRecord, PropostaRecord};
use tracing::info;

use crate::validate::PropostaRow;

#[derive(Debug, Clone, Default)]
pub struct ProponentDimension {
    /// Proposals with `proponente_cnpj` resolved (or cleared when the
    /// candidate failed normalization).
    pub propostas: Vec<PropostaRecord>,
    /// Distinct proponents keyed by canonical CNPJ.
    pub proponentes: Vec<ProponenteRecord>,
    /// Rows whose CNPJ candidate was rejected; those proposals load with a
    /// null proponent reference.
    pub rejected_cnpjs: usize,
}

/// Deduplicate proponents by canonical CNPJ and write the reference back
/// onto each proposal. The first observation of a CNPJ fixes the
/// attribute set; later duplicates only fill fields the first left blank.
pub fn build_proponentes(rows: Vec<PropostaRow>) -> ProponentDimension {
    let mut dimension: BTreeMap<String, ProponenteRecord> = BTreeMap::new();
    let mut propostas = Vec::with_capacity(rows.len());
    let mut rejected = 0usize;

    for row in rows {
        let PropostaRow {
            mut proposta,
            proponente,
        } = row;

        let normalized = proponente.cnpj.as_deref().and_then(normalize_cnpj);
        match normalized {
            Some(cnpj) => {
                proposta.proponente_cnpj = Some(cnpj.clone());

                let entry = dimension.entry(cnpj.clone()).or_insert_with(|| {
                    ProponenteRecord {
                        cnpj,
                        nome: None,
                        natureza_juridica: None,
                        estado: None,
                        municipio: None,
                        cep: None,
                        endereco: None,
                        bairro: None,
                        is_osc: false,
                    }
                });
                fill_missing(&mut entry.nome, &proponente.nome);
                fill_missing(&mut entry.natureza_juridica, &proponente.natureza_juridica);
                fill_missing(&mut entry.estado, &proponente.estado);
                fill_missing(&mut entry.municipio, &proponente.municipio);
                fill_missing(&mut entry.cep, &proponente.cep);
                fill_missing(&mut entry.endereco, &proponente.endereco);
                fill_missing(&mut entry.bairro, &proponente.bairro);
                entry.is_osc = is_osc(entry.natureza_juridica.as_deref());
            }
            None => {
                if proponente.cnpj.is_some() {
                    rejected += 1;
                }
                proposta.proponente_cnpj = None;
            }
        }

        propostas.push(proposta);
    }

    let out = ProponentDimension {
        propostas,
        proponentes: dimension.into_values().collect(),
        rejected_cnpjs: rejected,
    };
    info!(
        proponentes = out.proponentes.len(),
        rejected_cnpjs = out.rejected_cnpjs,
        "built proponent dimension"
    );
    out
}

fn fill_missing(slot: &mut Option<String>, candidate: &Option<String>) {
    if slot.is_none() {
        slot.clone_from(candidate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::ProponentCandidate;

    fn row(id: &str, cnpj: Option<&str>, natureza: Option<&str>) -> PropostaRow {
        PropostaRow {
            proposta: PropostaRecord {
                transfer_gov_id: id.to_string(),
                titulo: None,
                valor_global: None,
                valor_repasse: None,
                valor_contrapartida: None,
                data_publicacao: None,
                data_inicio_vigencia: None,
                data_fim_vigencia: None,
                situacao: None,
                estado: None,
                municipio: None,
                proponente: None,
                programa_id: None,
                proponente_cnpj: None,
            },
            proponente: ProponentCandidate {
                cnpj: cnpj.map(str::to_string),
                natureza_juridica: natureza.map(str::to_string),
                ..Default::default()
            },
        }
    }

    #[test]
    fn punctuation_variants_collapse_to_one_proponent() {
        let out = build_proponentes(vec![
            row("P-1", Some("27.167.477/0001-12"), Some("306-9")),
            row("P-2", Some("27167477000112"), Some("306-9")),
        ]);

        assert_eq!(out.proponentes.len(), 1);
        assert_eq!(out.proponentes[0].cnpj, "27167477000112");
        assert!(out.proponentes[0].is_osc);
        assert_eq!(
            out.propostas[0].proponente_cnpj.as_deref(),
            Some("27167477000112")
        );
        assert_eq!(
            out.propostas[1].proponente_cnpj.as_deref(),
            Some("27167477000112")
        );
    }

    #[test]
    fn rejected_cnpjs_leave_a_null_reference() {
        let out = build_proponentes(vec![
            row("P-1", Some("00000000000000"), None),
            row("P-2", Some("123"), None),
            row("P-3", None, None),
        ]);

        assert!(out.proponentes.is_empty());
        assert_eq!(out.rejected_cnpjs, 2);
        assert_eq!(out.propostas.len(), 3);
        assert!(out.propostas.iter().all(|p| p.proponente_cnpj.is_none()));
    }

    #[test]
    fn first_observation_wins_and_gaps_backfill() {
        let mut first = row("P-1", Some("27167477000112"), None);
        first.proponente.nome = Some("ASSOCIACAO A".into());
        let mut second = row("P-2", Some("27167477000112"), Some("306-9"));
        second.proponente.nome = Some("ASSOCIACAO A LTDA".into());

        let out = build_proponentes(vec![first, second]);
        let p = &out.proponentes[0];
        // The name came from the first row; the natureza the first row
        // lacked was backfilled from the second.
        assert_eq!(p.nome.as_deref(), Some("ASSOCIACAO A"));
        assert_eq!(p.natureza_juridica.as_deref(), Some("306-9"));
        assert!(p.is_osc);
    }

    #[test]
    fn government_proponents_are_not_osc() {
        let out = build_proponentes(vec![row("P-1", Some("27167477000112"), Some("103-1"))]);
        assert!(!out.proponentes[0].is_osc);
    }
}
