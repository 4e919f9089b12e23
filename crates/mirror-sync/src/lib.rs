//! # mirror-sync
//!
//! Keeps a local mirror of a game client's assets in step with the
//! publisher's version service.
//!
//! This crate provides:
//! - The update synchronizer (`Synchronizer`): version checks, update
//!   packages, patches, and per-version change ledgers
//! - The first-time import pipeline (`Importer`) for XAPK bundles
//! - The asset catalog that maps content-addressed files to logical paths
//! - Tool settings, the client registry, and the client's app config
//!
//! ## Example
//!
//! ```ignore
//! use mirror_sync::{ClientRegistry, GitSnapshotStore, ReqwestTransport, Settings, Synchronizer};
//!
//! let settings = Settings::load("config.json".as_ref())?;
//! let client = *ClientRegistry::global().get("EN").unwrap();
//! let transport = ReqwestTransport::new(std::time::Duration::from_secs(60))?;
//! let snapshot = GitSnapshotStore::new(&settings.asset_repo);
//! let report = Synchronizer::from_settings(&settings, client, transport, snapshot).synchronize()?;
//! ```

pub mod app_config;
pub mod catalog;
pub mod client;
pub mod decompile;
mod error;
pub mod import;
pub mod ledger;
pub mod protocol;
pub mod settings;
pub mod snapshot;
pub mod synchronizer;
pub mod transport;

pub use app_config::AppConfig;
pub use catalog::{
    apply_rename_plan, build_rename_plan, read_asset_entries, AssetEntry, CatalogIssue,
    ErrorLedger, RenamePlan, RenameStats,
};
pub use client::{ClientDescriptor, ClientRegistry};
pub use decompile::{decompile_tree, DecompileStats, Decompiler, ExternalDecompiler};
pub use error::{Error, Result};
pub use import::{decode_tree, resolve_client, ImportReport, ImportStages, Importer};
pub use ledger::{ChangeKind, ChangeLedger, LedgerStore};
pub use protocol::{Directive, VersionCheck};
pub use settings::{ClientPaths, Settings, SettingsError, SettingsFile};
pub use snapshot::{GitSnapshotStore, SnapshotStore};
pub use synchronizer::{
    apply_package, AppliedVersion, DeviceIdentity, SyncOutcome, SyncReport, SyncState,
    Synchronizer,
};
pub use transport::{HttpTransport, ReqwestTransport};
