//! Schema DDL, executed idempotently at startup.
//!
//! Foreign references are deliberately soft (no FK constraints) so partial
//! ingestions never fail referential checks; dangling references are
//! resolved by the next successful run.

use sqlx::PgPool;

use crate::error::StoreError;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS programas (
    id              BIGSERIAL PRIMARY KEY,
    transfer_gov_id TEXT NOT NULL UNIQUE,
    nome            TEXT,
    orgao_superior  TEXT,
    orgao_vinculado TEXT,
    modalidade      TEXT,
    acao_orcamentaria TEXT,
    natureza_juridica TEXT,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    extraction_date DATE
);

CREATE TABLE IF NOT EXISTS propostas (
    id              BIGSERIAL PRIMARY KEY,
    transfer_gov_id TEXT NOT NULL UNIQUE,
    titulo          TEXT,
    valor_global    DOUBLE PRECISION,
    valor_repasse   DOUBLE PRECISION,
    valor_contrapartida DOUBLE PRECISION,
    data_publicacao DATE,
    data_inicio_vigencia DATE,
    data_fim_vigencia DATE,
    situacao        TEXT,
    estado          VARCHAR(2),
    municipio       TEXT,
    proponente      TEXT,
    -- soft reference to programas.transfer_gov_id
    programa_id     TEXT,
    -- soft reference to proponentes.cnpj
    proponente_cnpj TEXT,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    extraction_date DATE
);
CREATE INDEX IF NOT EXISTS ix_propostas_situacao ON propostas (situacao);
CREATE INDEX IF NOT EXISTS ix_propostas_estado ON propostas (estado);
CREATE INDEX IF NOT EXISTS ix_propostas_data_publicacao ON propostas (data_publicacao);
CREATE INDEX IF NOT EXISTS ix_propostas_valor_global ON propostas (valor_global);
CREATE INDEX IF NOT EXISTS ix_propostas_proponente_cnpj ON propostas (proponente_cnpj);

CREATE TABLE IF NOT EXISTS apoiadores (
    id              BIGSERIAL PRIMARY KEY,
    transfer_gov_id TEXT NOT NULL UNIQUE,
    nome            TEXT,
    tipo            TEXT,
    orgao           TEXT,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    extraction_date DATE
);

CREATE TABLE IF NOT EXISTS emendas (
    id              BIGSERIAL PRIMARY KEY,
    transfer_gov_id TEXT NOT NULL UNIQUE,
    numero          TEXT,
    autor           TEXT,
    valor           DOUBLE PRECISION,
    tipo            TEXT,
    ano             INTEGER,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    extraction_date DATE
);

CREATE TABLE IF NOT EXISTS proponentes (
    id              BIGSERIAL PRIMARY KEY,
    cnpj            TEXT NOT NULL UNIQUE,
    nome            TEXT,
    natureza_juridica TEXT,
    estado          VARCHAR(2),
    municipio       TEXT,
    cep             TEXT,
    endereco        TEXT,
    bairro          TEXT,
    is_osc          BOOLEAN NOT NULL DEFAULT FALSE,
    total_propostas BIGINT NOT NULL DEFAULT 0,
    total_emendas   BIGINT NOT NULL DEFAULT 0,
    valor_total_emendas DOUBLE PRECISION NOT NULL DEFAULT 0,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    extraction_date DATE
);
CREATE INDEX IF NOT EXISTS ix_proponentes_natureza_juridica ON proponentes (natureza_juridica);
CREATE INDEX IF NOT EXISTS ix_proponentes_is_osc ON proponentes (is_osc);
CREATE INDEX IF NOT EXISTS ix_proponentes_estado ON proponentes (estado);

CREATE TABLE IF NOT EXISTS proposta_apoiadores (
    id              BIGSERIAL PRIMARY KEY,
    proposta_transfer_gov_id TEXT NOT NULL,
    apoiador_transfer_gov_id TEXT NOT NULL,
    extraction_date DATE,
    UNIQUE (proposta_transfer_gov_id, apoiador_transfer_gov_id)
);
CREATE INDEX IF NOT EXISTS ix_proposta_apoiadores_apoiador ON proposta_apoiadores (apoiador_transfer_gov_id);

CREATE TABLE IF NOT EXISTS proposta_emendas (
    id              BIGSERIAL PRIMARY KEY,
    proposta_transfer_gov_id TEXT NOT NULL,
    emenda_transfer_gov_id TEXT NOT NULL,
    extraction_date DATE,
    UNIQUE (proposta_transfer_gov_id, emenda_transfer_gov_id)
);
CREATE INDEX IF NOT EXISTS ix_proposta_emendas_emenda ON proposta_emendas (emenda_transfer_gov_id);

-- Append-only provenance, one row per base-entity upsert per run.
CREATE TABLE IF NOT EXISTS data_lineage (
    id                   BIGSERIAL PRIMARY KEY,
    run_id               UUID NOT NULL,
    entity_type          TEXT NOT NULL,
    entity_id            TEXT NOT NULL,
    source_file          TEXT NOT NULL,
    extraction_timestamp TIMESTAMPTZ NOT NULL,
    pipeline_version     TEXT NOT NULL,
    record_hash          TEXT NOT NULL,
    created_at           TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS ix_data_lineage_source_file ON data_lineage (source_file, entity_type);
CREATE INDEX IF NOT EXISTS ix_data_lineage_entity ON data_lineage (entity_type, entity_id);
CREATE INDEX IF NOT EXISTS ix_data_lineage_run ON data_lineage (run_id);

-- Append-only audit trail, one row per invocation.
CREATE TABLE IF NOT EXISTS extraction_logs (
    id               BIGSERIAL PRIMARY KEY,
    run_id           UUID NOT NULL UNIQUE,
    run_date         TIMESTAMPTZ NOT NULL DEFAULT now(),
    status           TEXT NOT NULL,
    files_processed  INTEGER,
    total_records    BIGINT,
    records_inserted BIGINT,
    records_updated  BIGINT,
    records_skipped  BIGINT,
    duration_seconds DOUBLE PRECISION,
    error_message    TEXT
);
CREATE INDEX IF NOT EXISTS ix_extraction_logs_run_date ON extraction_logs (run_date);
"#;

/// Create all tables and indexes when absent.
pub async fn init_schema(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    tracing::info!("database schema initialized");
    Ok(())
}
