//! Exactly-once import of JSON data bundles.

pub mod bundle;
pub mod discover;
pub mod dispatch;
pub mod engine;
pub mod ledger;
pub mod report;
pub mod summary;
pub mod tables;

pub use bundle::{parse_bundle, BundleDescriptor, BundleKind, Operation, ParseError, RowMap};
pub use discover::{discover_bundle_files, DiscoveryError};
pub use dispatch::{
    Action, DispatchError, OperationDispatcher, PersistenceError, TableRegistry, TableStore,
};
pub use engine::{ImportEngine, ImportError};
pub use ledger::{LedgerEntry, LedgerError, LedgerRecord, MigrationLedger, SourceCategory};
pub use report::write_import_report;
pub use summary::{BundleFailure, BundleOutcome, BundleState, ImportSummary};
pub use tables::{ColumnSpec, SqlTable, TableSpec, CATALOG};
