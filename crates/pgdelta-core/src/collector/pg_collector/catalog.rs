//! Catalog data carried along with each snapshot for reporting.

use tracing::debug;

use crate::config::CollectionOpts;
use crate::storage::model::{
    PostgresBackend, PostgresDatabase, PostgresFunction, PostgresRelation, PostgresRole,
    PostgresSetting, PostgresVersion,
};

use super::queries::{
    build_backends_query, build_data_directory_query, build_databases_query,
    build_functions_query, build_relations_query, build_roles_query, build_settings_query,
};
use super::{PgCollectError, PgConnection};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    pub roles: Vec<PostgresRole>,
    pub databases: Vec<PostgresDatabase>,
    pub backends: Vec<PostgresBackend>,
    pub settings: Vec<PostgresSetting>,
    pub relations: Vec<PostgresRelation>,
    pub functions: Vec<PostgresFunction>,
    /// Empty when the role may not read `data_directory`.
    pub data_directory: String,
}

/// Reads roles, databases and backends, plus the categories enabled in `opts`.
pub fn acquire_catalog<C: PgConnection + ?Sized>(
    conn: &mut C,
    version: &PostgresVersion,
    opts: &CollectionOpts,
) -> Result<Catalog, PgCollectError> {
    let mut catalog = Catalog {
        roles: conn.roles(&build_roles_query())?,
        databases: conn.databases(&build_databases_query())?,
        backends: conn.backends(&build_backends_query(version.numeric))?,
        ..Default::default()
    };

    if opts.collect_settings {
        catalog.settings = conn.settings(&build_settings_query())?;
    }
    if opts.collect_relations {
        catalog.relations = conn.relations(&build_relations_query())?;
    }
    if opts.collect_functions {
        catalog.functions = conn.functions(&build_functions_query())?;
    }

    catalog.data_directory = match conn.query_text(&build_data_directory_query()) {
        Ok(dir) => dir.unwrap_or_default(),
        Err(e) => {
            debug!(error = %e, "data_directory not readable");
            String::new()
        }
    };

    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockConnection;

    fn version() -> PostgresVersion {
        PostgresVersion::new("15.4", 150004)
    }

    #[test]
    fn disabled_categories_are_not_queried() {
        let mut conn = MockConnection::new(150004);
        conn.settings = vec![PostgresSetting {
            name: "work_mem".into(),
            current_value: "4096".into(),
            ..Default::default()
        }];
        let opts = CollectionOpts {
            collect_settings: false,
            collect_relations: false,
            collect_functions: false,
            ..CollectionOpts::default()
        };
        let catalog = acquire_catalog(&mut conn, &version(), &opts).unwrap();
        assert!(catalog.settings.is_empty());
        assert!(!conn.queries.iter().any(|q| q.contains("FROM pg_settings")));
        assert!(!conn.queries.iter().any(|q| q.contains("FROM pg_class")));
    }

    #[test]
    fn enabled_categories_are_returned() {
        let mut conn = MockConnection::new(150004);
        conn.roles = vec![PostgresRole {
            oid: 10,
            name: "postgres".into(),
            superuser: true,
            can_login: true,
            connection_limit: -1,
        }];
        conn.data_directory = Some("/var/lib/postgresql/15/main".into());
        let catalog = acquire_catalog(&mut conn, &version(), &CollectionOpts::default()).unwrap();
        assert_eq!(catalog.roles.len(), 1);
        assert_eq!(catalog.data_directory, "/var/lib/postgresql/15/main");
    }

    #[test]
    fn unreadable_data_directory_degrades_to_empty() {
        let mut conn = MockConnection::new(150004);
        conn.data_directory_fails = true;
        let catalog = acquire_catalog(&mut conn, &version(), &CollectionOpts::default()).unwrap();
        assert_eq!(catalog.data_directory, "");
    }
}
