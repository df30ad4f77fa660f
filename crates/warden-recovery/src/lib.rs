//! warden-recovery — backup and restore for the control plane.
//!
//! # Backup layout
//!
//! ```text
//! <backup_dir>/
//!   backup-1718000000000/
//!     state/state.json          state store export
//!     config/sources.json       original paths, by index
//!     config/0/warden.yaml
//!     artifacts/sources.json
//!     artifacts/0/...
//!     manifest.json             written last (temp + rename)
//! ```
//!
//! A directory without `manifest.json` is an incomplete backup and is never
//! offered for restore.
//!
//! # Restore
//!
//! A restore holds the fleet mutex throughout and leaves a
//! `restore.pending` journal in place until every step has succeeded. While
//! the journal exists the fleet is reported Critical.

pub mod component;
pub mod error;
pub mod journal;
pub mod orchestrator;
pub mod store;

pub use component::BackupComponent;
pub use error::{RecoveryError, RecoveryResult};
pub use journal::{JournalEntry, RestoreJournal};
pub use orchestrator::{RecoveryOrchestrator, RecoveryStats};
pub use store::BackupStore;
