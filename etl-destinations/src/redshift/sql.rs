//! SQL text of every statement sent to Redshift.
//!
//! Staged records land in a raw layout: one row per record holding its id, the record itself as a
//! `SUPER` value, the load time and its position in the sync. Staged files carry the columns in
//! that order, with `_etl_load_seq` increasing across the files and records of one sync. Key
//! fields are resolved by navigating into `_etl_data`.

use pg_escape::{quote_identifier, quote_literal};

use etl_staging::types::{KeyPath, PrimaryKey};

pub const RAW_ID_COLUMN: &str = "_etl_raw_id";
pub const DATA_COLUMN: &str = "_etl_data";
pub const LOADED_AT_COLUMN: &str = "_etl_loaded_at";
pub const LOAD_SEQ_COLUMN: &str = "_etl_load_seq";

/// Column added by the dedup copy to rank rows sharing a key.
const ROW_NUMBER_COLUMN: &str = "_etl_row_number";

fn raw_columns() -> String {
    format!("{RAW_ID_COLUMN}, {DATA_COLUMN}, {LOADED_AT_COLUMN}, {LOAD_SEQ_COLUMN}")
}

pub fn qualified_table_name(schema_name: &str, table_name: &str) -> String {
    format!(
        "{}.{}",
        quote_identifier(schema_name),
        quote_identifier(table_name)
    )
}

/// Navigates to a key field of the record stored in `table_name`.
///
/// Values are serialized so keys of any `SUPER` type can be compared and partitioned on.
fn key_path_expression(table_name: Option<&str>, path: &KeyPath) -> String {
    let mut expression = match table_name {
        Some(table_name) => format!("{}.{DATA_COLUMN}", quote_identifier(table_name)),
        None => DATA_COLUMN.to_string(),
    };

    for segment in path.segments() {
        expression.push('.');
        expression.push_str(&quote_identifier(segment));
    }

    format!("JSON_SERIALIZE({expression})")
}

pub fn create_schema_if_not_exists(schema_name: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", quote_identifier(schema_name))
}

pub fn create_table_if_not_exists(schema_name: &str, table_name: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({RAW_ID_COLUMN} VARCHAR(36) PRIMARY KEY, {DATA_COLUMN} SUPER, {LOADED_AT_COLUMN} TIMESTAMPTZ DEFAULT GETDATE(), {LOAD_SEQ_COLUMN} BIGINT NOT NULL)",
        qualified_table_name(schema_name, table_name)
    )
}

pub fn drop_table_if_exists(schema_name: &str, table_name: &str) -> String {
    format!(
        "DROP TABLE IF EXISTS {}",
        qualified_table_name(schema_name, table_name)
    )
}

/// `TRUNCATE` commits the running transaction in Redshift, so rows are deleted instead.
pub fn truncate_table(schema_name: &str, table_name: &str) -> String {
    format!("DELETE FROM {}", qualified_table_name(schema_name, table_name))
}

pub fn copy_table(schema_name: &str, src_table_name: &str, dst_table_name: &str) -> String {
    let columns = raw_columns();

    format!(
        "INSERT INTO {} ({columns}) SELECT {columns} FROM {}",
        qualified_table_name(schema_name, dst_table_name),
        qualified_table_name(schema_name, src_table_name)
    )
}

/// Copies only the last loaded row of every key.
///
/// Rows are ranked by load time and then by load sequence, so rows of one copy sharing a load
/// time keep their staged order.
pub fn dedup_copy_table(
    schema_name: &str,
    src_table_name: &str,
    dst_table_name: &str,
    primary_key: &PrimaryKey,
) -> String {
    let columns = raw_columns();
    let partition = primary_key
        .paths()
        .iter()
        .map(|path| key_path_expression(None, path))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {} ({columns}) SELECT {columns} FROM (SELECT {columns}, ROW_NUMBER() OVER (PARTITION BY {partition} ORDER BY {LOADED_AT_COLUMN} DESC, {LOAD_SEQ_COLUMN} DESC) AS {ROW_NUMBER_COLUMN} FROM {}) AS deduped WHERE {ROW_NUMBER_COLUMN} = 1",
        qualified_table_name(schema_name, dst_table_name),
        qualified_table_name(schema_name, src_table_name)
    )
}

/// Deletes the rows of `dst_table_name` sharing a key with a row of `src_table_name`.
pub fn delete_from_table(
    schema_name: &str,
    src_table_name: &str,
    dst_table_name: &str,
    primary_key: &PrimaryKey,
) -> String {
    let condition = primary_key
        .paths()
        .iter()
        .map(|path| {
            format!(
                "{} = {}",
                key_path_expression(Some(dst_table_name), path),
                key_path_expression(Some(src_table_name), path)
            )
        })
        .collect::<Vec<_>>()
        .join(" AND ");

    format!(
        "DELETE FROM {} USING {} WHERE {condition}",
        qualified_table_name(schema_name, dst_table_name),
        qualified_table_name(schema_name, src_table_name)
    )
}

pub fn case_sensitive_identifiers(enabled: bool) -> String {
    format!("SET enable_case_sensitive_identifier TO {enabled}")
}

/// Loads the files listed in a manifest into `table_name`.
///
/// Contains credentials and must never be logged.
pub fn copy_from_manifest(
    schema_name: &str,
    table_name: &str,
    manifest_url: &str,
    access_key_id: &str,
    secret_access_key: &str,
    region: &str,
) -> String {
    let credentials =
        format!("aws_access_key_id={access_key_id};aws_secret_access_key={secret_access_key}");

    format!(
        "COPY {} ({}) FROM {} CREDENTIALS {} CSV GZIP REGION {} TIMEFORMAT 'auto' STATUPDATE OFF MANIFEST",
        qualified_table_name(schema_name, table_name),
        raw_columns(),
        quote_literal(manifest_url),
        quote_literal(&credentials),
        quote_literal(region)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> PrimaryKey {
        PrimaryKey::from(vec![
            vec!["id".to_string()],
            vec!["payload".to_string(), "Tenant".to_string()],
        ])
    }

    #[test]
    fn truncate_deletes_rows_instead_of_truncating() {
        assert_eq!(truncate_table("public", "users"), "DELETE FROM public.users");
    }

    #[test]
    fn identifiers_are_quoted_when_needed() {
        assert_eq!(
            qualified_table_name("Analytics", "user events"),
            r#""Analytics"."user events""#
        );
        assert_eq!(
            drop_table_if_exists("public", "_etl_tmp_users"),
            "DROP TABLE IF EXISTS public._etl_tmp_users"
        );
    }

    #[test]
    fn create_table_uses_raw_layout() {
        assert_eq!(
            create_table_if_not_exists("public", "users"),
            "CREATE TABLE IF NOT EXISTS public.users (_etl_raw_id VARCHAR(36) PRIMARY KEY, _etl_data SUPER, _etl_loaded_at TIMESTAMPTZ DEFAULT GETDATE(), _etl_load_seq BIGINT NOT NULL)"
        );
    }

    #[test]
    fn copy_moves_raw_columns() {
        assert_eq!(
            copy_table("public", "_etl_tmp_users", "users"),
            "INSERT INTO public.users (_etl_raw_id, _etl_data, _etl_loaded_at, _etl_load_seq) SELECT _etl_raw_id, _etl_data, _etl_loaded_at, _etl_load_seq FROM public._etl_tmp_users"
        );
    }

    #[test]
    fn delete_matches_every_key_path() {
        assert_eq!(
            delete_from_table("public", "_etl_tmp_users", "users", &key()),
            r#"DELETE FROM public.users USING public._etl_tmp_users WHERE JSON_SERIALIZE(users._etl_data.id) = JSON_SERIALIZE(_etl_tmp_users._etl_data.id) AND JSON_SERIALIZE(users._etl_data.payload."Tenant") = JSON_SERIALIZE(_etl_tmp_users._etl_data.payload."Tenant")"#
        );
    }

    #[test]
    fn dedup_copy_keeps_last_loaded_row_per_key() {
        assert_eq!(
            dedup_copy_table("public", "_etl_tmp_users", "users", &key()),
            r#"INSERT INTO public.users (_etl_raw_id, _etl_data, _etl_loaded_at, _etl_load_seq) SELECT _etl_raw_id, _etl_data, _etl_loaded_at, _etl_load_seq FROM (SELECT _etl_raw_id, _etl_data, _etl_loaded_at, _etl_load_seq, ROW_NUMBER() OVER (PARTITION BY JSON_SERIALIZE(_etl_data.id), JSON_SERIALIZE(_etl_data.payload."Tenant") ORDER BY _etl_loaded_at DESC, _etl_load_seq DESC) AS _etl_row_number FROM public._etl_tmp_users) AS deduped WHERE _etl_row_number = 1"#
        );
    }

    #[test]
    fn case_sensitivity_toggle() {
        assert_eq!(
            case_sensitive_identifiers(true),
            "SET enable_case_sensitive_identifier TO true"
        );
        assert_eq!(
            case_sensitive_identifiers(false),
            "SET enable_case_sensitive_identifier TO false"
        );
    }

    #[test]
    fn copy_from_manifest_escapes_literals() {
        let query = copy_from_manifest(
            "public",
            "_etl_tmp_users",
            "s3://bucket/etl/public_users/2024/01/09/07/id/copy.manifest",
            "AKIA",
            "se'cret",
            "us-east-1",
        );

        assert_eq!(
            query,
            "COPY public._etl_tmp_users (_etl_raw_id, _etl_data, _etl_loaded_at, _etl_load_seq) FROM 's3://bucket/etl/public_users/2024/01/09/07/id/copy.manifest' CREDENTIALS 'aws_access_key_id=AKIA;aws_secret_access_key=se''cret' CSV GZIP REGION 'us-east-1' TIMEFORMAT 'auto' STATUPDATE OFF MANIFEST"
        );
    }
}
