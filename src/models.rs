use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A category node in the self-referencing franchise hierarchy.
///
/// `id` 0 marks a record that has not been persisted yet. `depth` is
/// computed at query time (0 for roots) and is not stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Franchise {
    pub id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
    pub depth: u32,
}

impl Franchise {
    pub fn new(name: impl Into<String>, parent_id: Option<i64>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            parent_id,
            depth: 0,
        }
    }

    pub fn is_saved(&self) -> bool {
        self.id != 0
    }
}

// Equality and hashing consider the id alone so a franchise stays a stable
// set member while its name or parent is edited. Two unsaved (id 0)
// franchises therefore compare equal; callers keep unsaved records out of
// sets until they have a real id.
impl PartialEq for Franchise {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Franchise {}

impl Hash for Franchise {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub franchises: HashSet<Franchise>,
    pub primary_franchise_id: Option<i64>,
}

impl Person {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            franchises: HashSet::new(),
            primary_franchise_id: None,
        }
    }

    /// Resolves the primary franchise against the membership set, falling
    /// back to an arbitrary member when unset or no longer linked.
    pub fn primary_franchise(&self) -> Option<&Franchise> {
        self.primary_franchise_id
            .and_then(|id| self.franchises.iter().find(|f| f.id == id))
            .or_else(|| self.franchises.iter().next())
    }
}

impl std::fmt::Display for Person {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.primary_franchise() {
            Some(fr) => write!(f, "{} ({})", self.name, fr.name),
            None => f.write_str(&self.name),
        }
    }
}

/// A catalogued image. Only the file name is persisted; `file_path` is
/// re-derived against the configured base directory at read time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallpaper {
    pub id: i64,
    pub name: Option<String>,
    pub file_name: String,
    pub file_path: Option<PathBuf>,
    pub date_added: DateTime<Utc>,
    pub author: Option<String>,
    pub source: Option<String>,
    pub people: Vec<Person>,
    pub franchises: Vec<Franchise>,
}

impl Wallpaper {
    /// Builds an unsaved record (id 0, current timestamp) from a file
    /// found on disk but absent from the catalog.
    pub fn from_disk(path: &Path) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            id: 0,
            name: None,
            file_name,
            file_path: Some(path.to_path_buf()),
            date_added: Utc::now(),
            author: None,
            source: None,
            people: Vec::new(),
            franchises: Vec::new(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.file_name)
    }

    pub fn is_saved(&self) -> bool {
        self.id != 0
    }
}
