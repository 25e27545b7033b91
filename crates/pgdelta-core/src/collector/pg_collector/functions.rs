//! pg_stat_user_functions (populated only with `track_functions` enabled).

use std::collections::HashMap;

use crate::storage::model::{FunctionKey, FunctionStats, Oid};

use super::queries::build_function_stats_query;
use super::{PgCollectError, PgConnection};

pub fn acquire_function_stats<C: PgConnection + ?Sized>(
    conn: &mut C,
    database_oid: Oid,
) -> Result<HashMap<FunctionKey, FunctionStats>, PgCollectError> {
    let rows = conn.function_stats(&build_function_stats_query())?;
    Ok(rows
        .into_iter()
        .map(|row| {
            (
                FunctionKey {
                    database_oid,
                    funcid: row.funcid,
                },
                row.stats,
            )
        })
        .collect())
}
