//! Migrations for the activity database (activity.duckdb)
//!
//! Kept apart from the main schema so the history can be deleted or
//! exported without touching financial data.

/// Activity database migrations in apply order: (filename, sql_content)
pub const LOG_MIGRATIONS: &[(&str, &str)] = &[
    ("000_migrations.sql", include_str!("000_migrations.sql")),
    ("001_initial_schema.sql", include_str!("001_initial_schema.sql")),
];
