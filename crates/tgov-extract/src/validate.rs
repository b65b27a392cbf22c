//! Row-level validation into typed records.
//!
//! Invalid rows are collected with their index and reason, never mixed
//! into the valid set; the run loads whatever subset survives.

use chrono::NaiveDate;
use tgov_core::records::{ProgramaRecord, PropostaRecord};
use tgov_core::uf;
use tgov_parser::{ColumnMap, Table};
use tracing::debug;

/// A rejected row: zero-based data-row index plus the reasons, joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    pub row_index: usize,
    pub reason: String,
}

impl std::fmt::Display for RowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "row {}: {}", self.row_index, self.reason)
    }
}

/// Proponent attributes carried off the proposals table alongside each
/// valid proposal, consumed by the dimension build. The CNPJ is still raw
/// here; normalization decides whether the proposal gets a reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProponentCandidate {
    pub cnpj: Option<String>,
    pub nome: Option<String>,
    pub natureza_juridica: Option<String>,
    pub estado: Option<String>,
    pub municipio: Option<String>,
    pub cep: Option<String>,
    pub endereco: Option<String>,
    pub bairro: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropostaRow {
    pub proposta: PropostaRecord,
    pub proponente: ProponentCandidate,
}

/// Validate the proposals table. Returns the valid rows (with their
/// proponent candidates) and the per-row errors.
pub fn validate_propostas(table: &Table, columns: &ColumnMap) -> (Vec<PropostaRow>, Vec<RowError>) {
    let mut valid = Vec::new();
    let mut errors = Vec::new();

    for row in 0..table.row_count() {
        let mut reasons: Vec<String> = Vec::new();

        let transfer_gov_id = match columns.cell(table, row, "transfer_gov_id") {
            Some(id) => id.to_string(),
            None => {
                errors.push(RowError {
                    row_index: row,
                    reason: "transfer_gov_id cannot be empty".into(),
                });
                continue;
            }
        };

        let estado = match columns.cell(table, row, "estado") {
            Some(raw) => match uf::normalize_uf(raw) {
                Some(code) => Some(code),
                None => {
                    reasons.push(format!("invalid estado UF code: {raw}"));
                    None
                }
            },
            None => None,
        };

        let valor_global = money_field(table, columns, row, "valor_global", &mut reasons);
        let valor_repasse = money_field(table, columns, row, "valor_repasse", &mut reasons);
        let valor_contrapartida =
            money_field(table, columns, row, "valor_contrapartida", &mut reasons);

        let data_publicacao = date_field(table, columns, row, "data_publicacao", &mut reasons);
        let data_inicio_vigencia =
            date_field(table, columns, row, "data_inicio_vigencia", &mut reasons);
        let data_fim_vigencia = date_field(table, columns, row, "data_fim_vigencia", &mut reasons);

        if !reasons.is_empty() {
            let error = RowError {
                row_index: row,
                reason: reasons.join("; "),
            };
            debug!(%error, "rejected proposta row");
            errors.push(error);
            continue;
        }

        let text = |canonical: &str| columns.cell(table, row, canonical).map(str::to_string);

        let proponente = ProponentCandidate {
            cnpj: text("proponente_cnpj"),
            nome: text("proponente"),
            natureza_juridica: text("natureza_juridica"),
            estado: estado.clone(),
            municipio: text("municipio"),
            cep: text("cep"),
            endereco: text("endereco"),
            bairro: text("bairro"),
        };

        valid.push(PropostaRow {
            proposta: PropostaRecord {
                transfer_gov_id,
                titulo: text("titulo"),
                valor_global,
                valor_repasse,
                valor_contrapartida,
                data_publicacao,
                data_inicio_vigencia,
                data_fim_vigencia,
                situacao: text("situacao"),
                estado,
                municipio: text("municipio"),
                proponente: text("proponente"),
                programa_id: text("programa_id"),
                proponente_cnpj: None,
            },
            proponente,
        });
    }

    (valid, errors)
}

/// Validate the programs table.
pub fn validate_programas(
    table: &Table,
    columns: &ColumnMap,
) -> (Vec<ProgramaRecord>, Vec<RowError>) {
    let mut valid = Vec::new();
    let mut errors = Vec::new();

    for row in 0..table.row_count() {
        let Some(transfer_gov_id) = columns.cell(table, row, "transfer_gov_id") else {
            errors.push(RowError {
                row_index: row,
                reason: "transfer_gov_id cannot be empty".into(),
            });
            continue;
        };

        let text = |canonical: &str| columns.cell(table, row, canonical).map(str::to_string);

        valid.push(ProgramaRecord {
            transfer_gov_id: transfer_gov_id.to_string(),
            nome: text("nome"),
            orgao_superior: text("orgao_superior"),
            orgao_vinculado: text("orgao_vinculado"),
            modalidade: text("modalidade"),
            acao_orcamentaria: text("acao_orcamentaria"),
            natureza_juridica: text("natureza_juridica"),
        });
    }

    (valid, errors)
}

fn money_field(
    table: &Table,
    columns: &ColumnMap,
    row: usize,
    canonical: &str,
    reasons: &mut Vec<String>,
) -> Option<f64> {
    let raw = columns.cell(table, row, canonical)?;
    match parse_money(raw) {
        Ok(value) if value < 0.0 => {
            reasons.push(format!("{canonical} cannot be negative: {value}"));
            None
        }
        Ok(value) => Some(value),
        Err(()) => {
            reasons.push(format!("{canonical} is not a number: {raw}"));
            None
        }
    }
}

fn date_field(
    table: &Table,
    columns: &ColumnMap,
    row: usize,
    canonical: &str,
    reasons: &mut Vec<String>,
) -> Option<NaiveDate> {
    let raw = columns.cell(table, row, canonical)?;
    match parse_date(raw) {
        Some(date) => Some(date),
        None => {
            reasons.push(format!("{canonical} is not a date: {raw}"));
            None
        }
    }
}

/// Parse a monetary amount, accepting both `1234.56` and the Brazilian
/// `1.234,56` form, with an optional leading `R$`.
pub fn parse_money(raw: &str) -> Result<f64, ()> {
    let cleaned = raw
        .trim()
        .trim_start_matches("R$")
        .trim()
        .replace('\u{a0}', "");
    if cleaned.is_empty() {
        return Err(());
    }

    let normalized = match (cleaned.rfind(','), cleaned.rfind('.')) {
        // Comma after the last dot: comma is the decimal separator and
        // dots are thousands.
        (Some(comma), Some(dot)) if comma > dot => {
            cleaned.replace('.', "").replace(',', ".")
        }
        // Only a comma: decimal separator.
        (Some(_), None) => cleaned.replace(',', "."),
        // Dot after the last comma: commas are thousands separators.
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        _ => cleaned,
    };

    normalized.parse::<f64>().map_err(|_| ())
}

/// Tolerant date parsing: `DD/MM/YYYY`, ISO, and the ISO datetime form
/// spreadsheet cells come back as.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|dt| dt.date())
        })
        .ok()
}

/// Year range sanity for amendments.
pub fn parse_year(raw: &str) -> Option<i32> {
    let year: i32 = raw.trim().parse().ok()?;
    (2000..=2100).contains(&year).then_some(year)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgov_parser::{map_columns, FileKind};

    fn table(headers: &[&str], rows: &[&[&str]]) -> Table {
        Table::new(
            headers.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    const PROPOSTA_HEADERS: &[&str] = &[
        "id_proposta",
        "titulo",
        "valor_global",
        "situacao",
        "estado",
        "municipio",
        "proponente",
        "identif_proponente",
        "natureza_juridica",
    ];

    #[test]
    fn valid_rows_become_typed_records() {
        let t = table(
            PROPOSTA_HEADERS,
            &[&[
                "PROP-001",
                "Projeto de Teste",
                "150000.00",
                "Em execu\u{00e7}\u{00e3}o",
                "ce",
                "Fortaleza",
                "Prefeitura Municipal",
                "27.167.477/0001-12",
                "103-1",
            ]],
        );
        let cols = map_columns(&t, FileKind::Propostas).unwrap();
        let (valid, errors) = validate_propostas(&t, &cols);

        assert!(errors.is_empty());
        assert_eq!(valid.len(), 1);
        let row = &valid[0];
        assert_eq!(row.proposta.transfer_gov_id, "PROP-001");
        assert_eq!(row.proposta.valor_global, Some(150000.0));
        assert_eq!(row.proposta.estado.as_deref(), Some("CE"));
        assert_eq!(row.proponente.cnpj.as_deref(), Some("27.167.477/0001-12"));
        assert_eq!(row.proponente.natureza_juridica.as_deref(), Some("103-1"));
    }

    #[test]
    fn empty_id_rejects_the_row_only() {
        let t = table(
            PROPOSTA_HEADERS,
            &[
                &["  ", "A", "10", "Nova", "SP", "X", "Y", "", ""],
                &["PROP-2", "B", "20", "Nova", "SP", "X", "Y", "", ""],
            ],
        );
        let cols = map_columns(&t, FileKind::Propostas).unwrap();
        let (valid, errors) = validate_propostas(&t, &cols);

        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].proposta.transfer_gov_id, "PROP-2");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].row_index, 0);
        assert!(errors[0].reason.contains("transfer_gov_id"));
    }

    #[test]
    fn negative_money_and_bad_uf_are_row_errors() {
        let t = table(
            PROPOSTA_HEADERS,
            &[&["PROP-1", "A", "-5", "Nova", "ZZ", "X", "Y", "", ""]],
        );
        let cols = map_columns(&t, FileKind::Propostas).unwrap();
        let (valid, errors) = validate_propostas(&t, &cols);

        assert!(valid.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].reason.contains("estado"));
        assert!(errors[0].reason.contains("negative"));
    }

    #[test]
    fn brazilian_decimal_form_is_accepted() {
        assert_eq!(parse_money("1.234,56"), Ok(1234.56));
        assert_eq!(parse_money("R$ 1.234,56"), Ok(1234.56));
        assert_eq!(parse_money("1234.56"), Ok(1234.56));
        assert_eq!(parse_money("1,234.56"), Ok(1234.56));
        assert_eq!(parse_money("1000"), Ok(1000.0));
        assert!(parse_money("dez reais").is_err());
    }

    #[test]
    fn dates_parse_in_both_layouts() {
        let expected = NaiveDate::from_ymd_opt(2026, 2, 6).unwrap();
        assert_eq!(parse_date("06/02/2026"), Some(expected));
        assert_eq!(parse_date("2026-02-06"), Some(expected));
        assert_eq!(parse_date("2026-02-06 00:00:00"), Some(expected));
        assert_eq!(parse_date("06-02-2026"), None);
    }

    #[test]
    fn year_range_is_bounded() {
        assert_eq!(parse_year("2024"), Some(2024));
        assert_eq!(parse_year("1999"), None);
        assert_eq!(parse_year("3000"), None);
        assert_eq!(parse_year("vinte"), None);
    }

    #[test]
    fn programas_require_only_the_id() {
        let t = table(
            &["id_programa", "nome", "orgao_superior"],
            &[
                &["PR-1", "Sa\u{00fa}de B\u{00e1}sica", "Minist\u{00e9}rio da Sa\u{00fa}de"],
                &["", "Sem id", ""],
            ],
        );
        let cols = map_columns(&t, FileKind::Programas).unwrap();
        let (valid, errors) = validate_programas(&t, &cols);
        assert_eq!(valid.len(), 1);
        assert_eq!(errors.len(), 1);
        assert_eq!(valid[0].nome.as_deref(), Some("Sa\u{00fa}de B\u{00e1}sica"));
    }
}
