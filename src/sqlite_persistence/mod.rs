//! Declarative, versioned SQLite schemas.
//!
//! Every store describes its tables as a list of [`VersionedSchema`]s. A fresh
//! database is created from the newest one; an existing database is validated
//! against the version recorded in `PRAGMA user_version` and migrated forward.

mod versioned_schema;

pub use versioned_schema::{
    open_versioned, Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
    BASE_DB_VERSION, DEFAULT_TIMESTAMP,
};
