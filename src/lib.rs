//! # walldex
//!
//! Wallpaper cataloguing: image files tagged with people and hierarchical
//! franchises, persisted in SQLite, browsed in pages.
//!
//! The catalog stores only file names; absolute paths are re-derived
//! against a configured base directory at read time, so a relocated
//! collection needs nothing more than a config change. Franchises form a
//! parent/child tree kept as an adjacency list and reconstructed either
//! store-side by a recursive query or in memory by [`hierarchy`]. Tagging
//! links are rewritten wholesale on every save inside one transaction.

pub mod browse;
pub mod config;
pub mod db;
pub mod error;
pub mod hierarchy;
pub mod models;
pub mod paths;
pub mod repository;

pub use browse::{BrowseSession, CancelToken, NoopLoader, PageLoader, Pager};
pub use config::Config;
pub use db::Database;
pub use error::{Result, WalldexError};
pub use hierarchy::FranchiseNode;
pub use models::{Franchise, Person, Wallpaper};
pub use paths::WalldexPaths;
pub use repository::{SqlDiskRepository, WallpaperRepository};
