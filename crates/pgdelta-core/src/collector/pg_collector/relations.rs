//! Per-table and per-index statistics.

use std::collections::HashMap;

use crate::storage::model::{IndexKey, IndexStats, Oid, RelationKey, RelationStats};

use super::queries::{build_index_stats_query, build_relation_stats_query};
use super::{PgCollectError, PgConnection};

/// Reads pg_stat_user_tables + pg_statio_user_tables of the connected database.
pub fn acquire_relation_stats<C: PgConnection + ?Sized>(
    conn: &mut C,
    database_oid: Oid,
) -> Result<HashMap<RelationKey, RelationStats>, PgCollectError> {
    let rows = conn.relation_stats(&build_relation_stats_query())?;
    Ok(rows
        .into_iter()
        .map(|row| {
            (
                RelationKey {
                    database_oid,
                    relid: row.relid,
                },
                row.stats,
            )
        })
        .collect())
}

/// Reads pg_stat_user_indexes + pg_statio_user_indexes of the connected database.
pub fn acquire_index_stats<C: PgConnection + ?Sized>(
    conn: &mut C,
    database_oid: Oid,
) -> Result<HashMap<IndexKey, IndexStats>, PgCollectError> {
    let rows = conn.index_stats(&build_index_stats_query())?;
    Ok(rows
        .into_iter()
        .map(|row| {
            (
                IndexKey {
                    database_oid,
                    indexrelid: row.indexrelid,
                },
                row.stats,
            )
        })
        .collect())
}
