//! Header normalization and canonical column mapping.
//!
//! Source files spell the same column many ways across exports (case,
//! accents, separators). Headers are folded to a canonical form and mapped
//! through per-file alias tables; downstream code only ever sees canonical
//! names.

use std::collections::BTreeMap;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::error::ParseError;
use crate::table::Table;

/// The three expected file groups of a dated input directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Propostas,
    ApoiadoresEmendas,
    Programas,
}

impl FileKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FileKind::Propostas => "propostas",
            FileKind::ApoiadoresEmendas => "apoiadores_emendas",
            FileKind::Programas => "programas",
        }
    }

    pub fn all() -> [FileKind; 3] {
        [
            FileKind::Propostas,
            FileKind::ApoiadoresEmendas,
            FileKind::Programas,
        ]
    }

    fn fields(self) -> &'static [FieldSpec] {
        match self {
            FileKind::Propostas => PROPOSTAS_FIELDS,
            FileKind::ApoiadoresEmendas => APOIADORES_EMENDAS_FIELDS,
            FileKind::Programas => PROGRAMAS_FIELDS,
        }
    }
}

/// Infer the file group from the file name. Unknown names are skipped by
/// the orchestrator with a warning.
pub fn infer_file_kind(file_name: &str) -> Option<FileKind> {
    let name = file_name.to_ascii_lowercase();
    if name.contains("proposta") {
        Some(FileKind::Propostas)
    } else if name.contains("apoiador") || name.contains("emenda") {
        Some(FileKind::ApoiadoresEmendas)
    } else if name.contains("programa") {
        Some(FileKind::Programas)
    } else {
        None
    }
}

/// Fold a raw header to its canonical lookup form: lowercase, accents
/// stripped via NFKD, non-alphanumeric runs collapsed to `_`, edges
/// trimmed.
pub fn normalize_header(raw: &str) -> String {
    let lowered = raw.trim_start_matches('\u{feff}').to_lowercase();
    let stripped: String = lowered.nfkd().filter(|c| !is_combining_mark(*c)).collect();

    let mut out = String::with_capacity(stripped.len());
    let mut at_separator = true;
    for c in stripped.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            at_separator = false;
        } else if !at_separator {
            out.push('_');
            at_separator = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

struct FieldSpec {
    canonical: &'static str,
    aliases: &'static [&'static str],
    required: bool,
}

const fn required(canonical: &'static str, aliases: &'static [&'static str]) -> FieldSpec {
    FieldSpec {
        canonical,
        aliases,
        required: true,
    }
}

const fn optional(canonical: &'static str, aliases: &'static [&'static str]) -> FieldSpec {
    FieldSpec {
        canonical,
        aliases,
        required: false,
    }
}

const PROPOSTAS_FIELDS: &[FieldSpec] = &[
    required("transfer_gov_id", &["id_proposta", "id"]),
    required("titulo", &["titulo_proposta", "objeto", "objeto_proposta"]),
    required("valor_global", &["valor_global_proposta"]),
    optional("valor_repasse", &["valor_repasse_proposta"]),
    optional("valor_contrapartida", &["valor_contrapartida_proposta"]),
    optional("data_publicacao", &["data_publicacao_dou"]),
    optional("data_inicio_vigencia", &["inicio_vigencia"]),
    optional("data_fim_vigencia", &["fim_vigencia"]),
    required("situacao", &["situacao_proposta"]),
    required("estado", &["uf", "uf_proponente"]),
    required("municipio", &["municipio_proponente"]),
    required("proponente", &["nome_proponente"]),
    optional("programa_id", &["id_programa"]),
    optional("proponente_cnpj", &["identif_proponente", "cnpj_proponente", "cnpj"]),
    optional("natureza_juridica", &["natureza_juridica_proponente"]),
    optional("cep", &["cep_proponente"]),
    optional("endereco", &["endereco_proponente"]),
    optional("bairro", &["bairro_proponente"]),
];

const APOIADORES_EMENDAS_FIELDS: &[FieldSpec] = &[
    required(
        "proposta_id",
        &[
            "id_cnpj_programa_emenda_apoiadores_emendas",
            "id_proposta",
            "transfer_gov_id",
        ],
    ),
    optional("numero_emenda", &["numero_emenda_apoiadores_emendas"]),
    optional(
        "nome_parlamentar",
        &["nome_parlamentar_apoiadores_emendas", "parlamentar"],
    ),
    optional("programa_id", &["id_programa"]),
    optional("indicacao", &["indicacao_apoiadores_emendas", "tipo_emenda", "tipo"]),
    optional(
        "orgao",
        &["nome_proponente_apoiadores_emendas", "orgao_apoiador"],
    ),
    optional(
        "valor_repasse",
        &[
            "valor_repasse_proposta_apoiadores_emendas",
            "valor_repasse_emenda",
        ],
    ),
    optional("ano_emenda", &["ano"]),
];

const PROGRAMAS_FIELDS: &[FieldSpec] = &[
    required("transfer_gov_id", &["id_programa", "id"]),
    required("nome", &["nome_programa"]),
    optional("orgao_superior", &[]),
    optional("orgao_vinculado", &[]),
    optional("modalidade", &[]),
    optional("acao_orcamentaria", &[]),
    optional("natureza_juridica", &["natureza_juridica_programa"]),
];

/// Canonical field name to column index, for one parsed table.
#[derive(Debug, Clone, Default)]
pub struct ColumnMap {
    by_canonical: BTreeMap<&'static str, usize>,
}

impl ColumnMap {
    pub fn get(&self, canonical: &str) -> Option<usize> {
        self.by_canonical.get(canonical).copied()
    }

    /// Convenience accessor: the trimmed cell under a canonical column.
    pub fn cell<'a>(&self, table: &'a Table, row: usize, canonical: &str) -> Option<&'a str> {
        table.cell(row, self.get(canonical)?)
    }
}

/// Resolve the table's headers against the alias table for `kind`.
/// Every required canonical name must be covered, otherwise
/// [`ParseError::SchemaValidation`] lists the missing ones.
pub fn map_columns(table: &Table, kind: FileKind) -> Result<ColumnMap, ParseError> {
    let mut normalized_to_index: BTreeMap<String, usize> = BTreeMap::new();
    for (index, header) in table.headers().iter().enumerate() {
        // First occurrence wins on duplicated headers.
        normalized_to_index
            .entry(normalize_header(header))
            .or_insert(index);
    }

    let mut map = ColumnMap::default();
    let mut missing = Vec::new();

    for field in kind.fields() {
        let found = std::iter::once(field.canonical)
            .chain(field.aliases.iter().copied())
            .find_map(|name| normalized_to_index.get(name).copied());

        match found {
            Some(index) => {
                map.by_canonical.insert(field.canonical, index);
            }
            None if field.required => missing.push(field.canonical.to_string()),
            None => {}
        }
    }

    if !missing.is_empty() {
        return Err(ParseError::SchemaValidation {
            file_kind: kind.as_str(),
            missing,
        });
    }

    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_fold_case_accents_and_separators() {
        assert_eq!(normalize_header("Situa\u{00e7}\u{00e3}o"), "situacao");
        assert_eq!(normalize_header("Valor Global (R$)"), "valor_global_r");
        assert_eq!(normalize_header("ID - Proposta"), "id_proposta");
        assert_eq!(normalize_header("\u{feff}Munic\u{00ed}pio  "), "municipio");
        assert_eq!(normalize_header("A\u{00c7}\u{00c3}O OR\u{00c7}AMENT\u{00c1}RIA"), "acao_orcamentaria");
    }

    #[test]
    fn file_kind_is_inferred_from_names() {
        assert_eq!(infer_file_kind("propostas.xlsx"), Some(FileKind::Propostas));
        assert_eq!(
            infer_file_kind("apoiadores_emendas.csv"),
            Some(FileKind::ApoiadoresEmendas)
        );
        assert_eq!(infer_file_kind("Programas.XLSX"), Some(FileKind::Programas));
        assert_eq!(infer_file_kind("leiame.txt"), None);
    }

    fn propostas_table(headers: &[&str]) -> Table {
        let row = vec![String::from("x"); headers.len()];
        Table::new(headers.iter().map(|h| h.to_string()).collect(), vec![row])
    }

    #[test]
    fn variant_headers_map_to_canonical_names() {
        let table = propostas_table(&[
            "ID Proposta",
            "T\u{00cd}TULO",
            "Valor Global",
            "Situa\u{00e7}\u{00e3}o",
            "UF",
            "Munic\u{00ed}pio",
            "Nome Proponente",
            "Identif Proponente",
        ]);
        let map = map_columns(&table, FileKind::Propostas).unwrap();
        assert_eq!(map.get("transfer_gov_id"), Some(0));
        assert_eq!(map.get("estado"), Some(4));
        assert_eq!(map.get("proponente"), Some(6));
        assert_eq!(map.get("proponente_cnpj"), Some(7));
        assert_eq!(map.get("programa_id"), None);
    }

    #[test]
    fn missing_required_columns_are_named() {
        let table = propostas_table(&["ID Proposta", "Valor Global"]);
        let err = map_columns(&table, FileKind::Propostas).unwrap_err();
        match err {
            ParseError::SchemaValidation { file_kind, missing } => {
                assert_eq!(file_kind, "propostas");
                assert!(missing.contains(&"titulo".to_string()));
                assert!(missing.contains(&"situacao".to_string()));
                assert!(!missing.contains(&"transfer_gov_id".to_string()));
            }
            other => panic!("expected SchemaValidation, got {other:?}"),
        }
    }

    #[test]
    fn link_table_requires_only_the_proposal_id() {
        let table = Table::new(
            vec![
                "ID/CNPJ/PROGRAMA/EMENDA (Apoiadores/Emendas)".into(),
                "N\u{00da}MERO EMENDA (Apoiadores/Emendas)".into(),
            ],
            vec![vec!["P-1".into(), "E-1".into()]],
        );
        let map = map_columns(&table, FileKind::ApoiadoresEmendas).unwrap();
        assert_eq!(map.get("proposta_id"), Some(0));
        assert_eq!(map.get("numero_emenda"), Some(1));
        assert_eq!(map.get("nome_parlamentar"), None);
    }

    #[test]
    fn duplicate_headers_keep_the_first_occurrence() {
        let table = Table::new(
            vec!["id_programa".into(), "nome".into(), "Nome".into()],
            vec![vec!["PR-1".into(), "a".into(), "b".into()]],
        );
        let map = map_columns(&table, FileKind::Programas).unwrap();
        assert_eq!(map.get("nome"), Some(1));
    }
}
