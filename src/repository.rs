use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::Config;
use crate::db::Database;
use crate::error::{Result, WalldexError};
use crate::models::{Franchise, Person, Wallpaper};
use crate::paths::WalldexPaths;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp", "gif"];

/// Catalog access for a consumer such as a management UI. All operations
/// are plain request/response; nothing here assumes parallel callers.
#[async_trait]
pub trait WallpaperRepository: Send + Sync {
    async fn wallpapers(&self) -> Result<Vec<Wallpaper>>;
    async fn search_wallpapers(&self, term: &str) -> Result<Vec<Wallpaper>>;
    async fn people(&self) -> Result<Vec<Person>>;
    async fn search_people(&self, term: &str) -> Result<Vec<Person>>;
    async fn franchises(&self) -> Result<Vec<Franchise>>;
    async fn search_franchises(&self, term: &str) -> Result<Vec<Franchise>>;
    async fn franchises_for_person(&self, person_id: i64) -> Result<Vec<Franchise>>;
    async fn save_wallpaper(&self, wallpaper: &Wallpaper) -> Result<i64>;
    async fn save_person(&self, person: &Person) -> Result<i64>;
    async fn save_franchises(&self, franchises: &[Franchise]) -> Result<Vec<i64>>;
    async fn delete_person(&self, id: i64) -> Result<()>;
    async fn delete_franchise(&self, id: i64) -> Result<bool>;
    /// Removes the catalog row only; the image file stays on disk.
    async fn soft_delete_wallpaper(&self, id: i64) -> Result<bool>;
    /// Drops catalog rows whose backing file no longer exists under the
    /// base directory. Returns the number of rows removed.
    async fn trim_wallpapers(&self) -> Result<u32>;
}

/// Production repository over the SQLite catalog and a base directory of
/// image files. The catalog stores only file names; absolute paths are
/// joined against the base directory at read time, so a relocated
/// directory only needs a config change.
///
/// Each operation opens its own connection on tokio's blocking pool;
/// nothing is pooled or held across calls.
pub struct SqlDiskRepository {
    wallpaper_dir: PathBuf,
    db_path: PathBuf,
}

impl SqlDiskRepository {
    pub fn new(wallpaper_dir: impl Into<PathBuf>, db_path: impl Into<PathBuf>) -> Self {
        Self {
            wallpaper_dir: wallpaper_dir.into(),
            db_path: db_path.into(),
        }
    }

    pub fn from_config(config: &Config, paths: &WalldexPaths) -> Self {
        Self::new(
            config.storage.wallpaper_dir.clone(),
            config.database_path(paths),
        )
    }

    pub fn wallpaper_dir(&self) -> &Path {
        &self.wallpaper_dir
    }

    /// Image files directly under the base directory. A missing directory
    /// scans as empty rather than failing, so a fresh setup still shows
    /// whatever the catalog has.
    async fn scan_disk(&self) -> Result<Vec<PathBuf>> {
        if tokio::fs::metadata(&self.wallpaper_dir).await.is_err() {
            debug!(dir = %self.wallpaper_dir.display(), "wallpaper directory missing, scanning nothing");
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.wallpaper_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if is_image_file(&path) {
                files.push(path);
            }
        }
        Ok(files)
    }

    /// Disk ∪ store merge keyed by file name: catalog rows come out with
    /// their absolute path re-derived from the base directory, and image
    /// files the catalog does not know yet come out as unsaved records.
    async fn merge_with_disk(
        &self,
        mut stored: Vec<Wallpaper>,
        filter: Option<&str>,
    ) -> Result<Vec<Wallpaper>> {
        for wallpaper in &mut stored {
            wallpaper.file_path = Some(self.wallpaper_dir.join(&wallpaper.file_name));
        }
        let known: HashSet<String> = stored.iter().map(|w| w.file_name.clone()).collect();
        let term = filter.map(str::to_lowercase);

        let mut merged = stored;
        for path in self.scan_disk().await? {
            let candidate = Wallpaper::from_disk(&path);
            if candidate.file_name.is_empty() || known.contains(&candidate.file_name) {
                continue;
            }
            if let Some(term) = &term {
                if !candidate.file_name.to_lowercase().contains(term) {
                    continue;
                }
            }
            merged.push(candidate);
        }
        debug!(
            total = merged.len(),
            unsaved = merged.iter().filter(|w| !w.is_saved()).count(),
            "catalog merged with disk"
        );
        Ok(merged)
    }
}

#[async_trait]
impl WallpaperRepository for SqlDiskRepository {
    async fn wallpapers(&self) -> Result<Vec<Wallpaper>> {
        let db_path = self.db_path.clone();
        let stored =
            run_blocking(move || Database::open(&db_path)?.list_wallpapers(None)).await?;
        self.merge_with_disk(stored, None).await
    }

    async fn search_wallpapers(&self, term: &str) -> Result<Vec<Wallpaper>> {
        let db_path = self.db_path.clone();
        let filter = term.to_owned();
        let stored = run_blocking(move || {
            Database::open(&db_path)?.list_wallpapers(Some(filter.as_str()))
        })
        .await?;
        self.merge_with_disk(stored, Some(term)).await
    }

    async fn people(&self) -> Result<Vec<Person>> {
        let db_path = self.db_path.clone();
        run_blocking(move || Database::open(&db_path)?.list_people()).await
    }

    async fn search_people(&self, term: &str) -> Result<Vec<Person>> {
        let db_path = self.db_path.clone();
        let term = term.to_owned();
        run_blocking(move || Database::open(&db_path)?.search_people(&term)).await
    }

    async fn franchises(&self) -> Result<Vec<Franchise>> {
        let db_path = self.db_path.clone();
        run_blocking(move || Database::open(&db_path)?.list_franchises()).await
    }

    async fn search_franchises(&self, term: &str) -> Result<Vec<Franchise>> {
        let db_path = self.db_path.clone();
        let term = term.to_owned();
        run_blocking(move || Database::open(&db_path)?.search_franchises(&term)).await
    }

    async fn franchises_for_person(&self, person_id: i64) -> Result<Vec<Franchise>> {
        let db_path = self.db_path.clone();
        run_blocking(move || Database::open(&db_path)?.franchises_for_person(person_id)).await
    }

    async fn save_wallpaper(&self, wallpaper: &Wallpaper) -> Result<i64> {
        let db_path = self.db_path.clone();
        let wallpaper = wallpaper.clone();
        run_blocking(move || Database::open(&db_path)?.save_wallpaper(&wallpaper)).await
    }

    async fn save_person(&self, person: &Person) -> Result<i64> {
        let db_path = self.db_path.clone();
        let person = person.clone();
        run_blocking(move || Database::open(&db_path)?.upsert_person(&person)).await
    }

    async fn save_franchises(&self, franchises: &[Franchise]) -> Result<Vec<i64>> {
        let db_path = self.db_path.clone();
        let franchises = franchises.to_vec();
        run_blocking(move || Database::open(&db_path)?.save_franchises(&franchises)).await
    }

    async fn delete_person(&self, id: i64) -> Result<()> {
        let db_path = self.db_path.clone();
        run_blocking(move || Database::open(&db_path)?.delete_person(id)).await
    }

    async fn delete_franchise(&self, id: i64) -> Result<bool> {
        let db_path = self.db_path.clone();
        run_blocking(move || Database::open(&db_path)?.delete_franchise(id)).await
    }

    async fn soft_delete_wallpaper(&self, id: i64) -> Result<bool> {
        let db_path = self.db_path.clone();
        run_blocking(move || Database::open(&db_path)?.delete_wallpaper(id)).await
    }

    async fn trim_wallpapers(&self) -> Result<u32> {
        let dir = self.wallpaper_dir.clone();
        let db_path = self.db_path.clone();
        run_blocking(move || {
            if !dir.is_dir() {
                debug!("wallpaper directory missing, nothing to trim");
                return Ok(0);
            }
            let mut db = Database::open(&db_path)?;
            let stored = db.list_wallpapers(None)?;
            let mut removed = 0;
            for wallpaper in stored {
                if dir.join(&wallpaper.file_name).exists() {
                    continue;
                }
                if db.delete_wallpaper(wallpaper.id)? {
                    removed += 1;
                }
            }
            info!(removed, "catalog trimmed against disk");
            Ok(removed)
        })
        .await
    }
}

async fn run_blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| WalldexError::Task(e.to_string()))?
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}
