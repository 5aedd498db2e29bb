use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::error::{Result, WalldexError};
use crate::models::{Franchise, Person, Wallpaper};

// Traversal of the adjacency list, store-side. The queue is dequeued by
// (level DESC, parent_id, name), which yields depth-first pre-order with
// siblings in name order. The second anchor arm picks up rows whose
// recorded parent does not exist so they come out as extra roots after
// the connected forest instead of being dropped.
const FRANCHISE_TREE_SQL: &str = "
    WITH RECURSIVE under_part(id, name, parent_id, level) AS (
        SELECT id, name, parent_id, 0 AS level
        FROM franchises
        WHERE parent_id IS NULL
        UNION ALL
        SELECT o.id, o.name, o.parent_id, 0
        FROM franchises o
        WHERE o.parent_id IS NOT NULL
          AND NOT EXISTS (SELECT 1 FROM franchises p WHERE p.id = o.parent_id)
        UNION ALL
        SELECT f.id, f.name, f.parent_id, under_part.level + 1
        FROM franchises f, under_part
        WHERE f.parent_id = under_part.id
        ORDER BY level DESC, parent_id, name
    )
    SELECT id, name, parent_id, level FROM under_part";

// Rows caught in a parent cycle are reachable from neither anchor, so the
// traversal above never visits them. They are swept up separately and
// reported as roots.
const CYCLE_SWEEP_SQL: &str = "
    WITH RECURSIVE reachable(id) AS (
        SELECT id FROM franchises WHERE parent_id IS NULL
        UNION ALL
        SELECT o.id
        FROM franchises o
        WHERE o.parent_id IS NOT NULL
          AND NOT EXISTS (SELECT 1 FROM franchises p WHERE p.id = o.parent_id)
        UNION ALL
        SELECT f.id FROM franchises f, reachable WHERE f.parent_id = reachable.id
    )
    SELECT f.id, f.name, f.parent_id, 0 AS level
    FROM franchises f
    WHERE f.id NOT IN (SELECT id FROM reachable)";

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS franchises (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                parent_id INTEGER
            );
            CREATE TABLE IF NOT EXISTS people (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                primary_franchise INTEGER
            );
            CREATE TABLE IF NOT EXISTS people_franchises (
                person INTEGER NOT NULL,
                franchise INTEGER NOT NULL,
                PRIMARY KEY (person, franchise)
            );
            CREATE TABLE IF NOT EXISTS wallpapers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT,
                date_added INTEGER NOT NULL,
                file_name TEXT NOT NULL,
                author TEXT,
                source TEXT
            );
            CREATE TABLE IF NOT EXISTS wallpaper_people (
                wallpaper_id INTEGER NOT NULL,
                person_id INTEGER NOT NULL,
                PRIMARY KEY (wallpaper_id, person_id)
            );
            CREATE TABLE IF NOT EXISTS wallpaper_franchises (
                wallpaper_id INTEGER NOT NULL,
                franchise_id INTEGER NOT NULL,
                PRIMARY KEY (wallpaper_id, franchise_id)
            );",
        )?;
        Ok(())
    }

    // -- Franchises --

    pub fn upsert_franchise(&self, franchise: &Franchise) -> Result<i64> {
        upsert_franchise_row(&self.conn, franchise)
    }

    /// Bulk upsert of the complete edited set inside one transaction; any
    /// failure rolls the whole batch back.
    pub fn save_franchises(&mut self, franchises: &[Franchise]) -> Result<Vec<i64>> {
        let tx = self.conn.transaction()?;
        let mut ids = Vec::with_capacity(franchises.len());
        for franchise in franchises {
            ids.push(upsert_franchise_row(&tx, franchise)?);
        }
        tx.commit()?;
        info!(count = ids.len(), "franchise set saved");
        Ok(ids)
    }

    /// All franchises, depth-annotated, in depth-first pre-order with
    /// siblings in name order. Orphans and cycle rows come out as extra
    /// roots after the connected forest.
    pub fn list_franchises(&self) -> Result<Vec<Franchise>> {
        self.query_franchise_tree(None)
    }

    /// Same traversal as [`list_franchises`](Self::list_franchises) with a
    /// substring post-filter on the franchise's own name. Ancestors of a
    /// match are not pulled in; matched rows keep their true depth.
    pub fn search_franchises(&self, term: &str) -> Result<Vec<Franchise>> {
        self.query_franchise_tree(Some(term))
    }

    /// Flat membership list for a person; the tree is not computed here, so
    /// depth is reported as 0 on every row.
    pub fn franchises_for_person(&self, person_id: i64) -> Result<Vec<Franchise>> {
        let mut stmt = self.conn.prepare(
            "SELECT f.id, f.name, f.parent_id, 0 AS level
             FROM franchises f
             INNER JOIN people_franchises pf ON f.id = pf.franchise
             WHERE pf.person = ?1",
        )?;
        let rows = stmt.query_map(params![person_id], row_to_franchise)?;
        let mut franchises = Vec::new();
        for row in rows {
            franchises.push(row?);
        }
        Ok(franchises)
    }

    /// Deletes the franchise row and its link-table references. Children
    /// keep their recorded parent and surface as orphan roots on the next
    /// listing; there is no cascade.
    pub fn delete_franchise(&mut self, id: i64) -> Result<bool> {
        if id == 0 {
            return Err(WalldexError::Validation(
                "cannot delete franchise with id 0 (never saved)".into(),
            ));
        }
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM people_franchises WHERE franchise = ?1",
            params![id],
        )?;
        tx.execute(
            "DELETE FROM wallpaper_franchises WHERE franchise_id = ?1",
            params![id],
        )?;
        let count = tx.execute("DELETE FROM franchises WHERE id = ?1", params![id])?;
        tx.commit()?;
        debug!(id, deleted = count > 0, "franchise delete");
        Ok(count > 0)
    }

    fn query_franchise_tree(&self, filter: Option<&str>) -> Result<Vec<Franchise>> {
        let mut sql = String::from(FRANCHISE_TREE_SQL);
        if filter.is_some() {
            sql.push_str("\n    WHERE name LIKE '%' || ?1 || '%'");
        }
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = match filter {
            Some(term) => stmt.query_map(params![term], row_to_franchise)?,
            None => stmt.query_map([], row_to_franchise)?,
        };
        let mut franchises = Vec::new();
        for row in rows {
            franchises.push(row?);
        }
        drop(stmt);

        let mut sql = String::from(CYCLE_SWEEP_SQL);
        if filter.is_some() {
            sql.push_str("\n      AND f.name LIKE '%' || ?1 || '%'");
        }
        sql.push_str("\n    ORDER BY f.name, f.id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = match filter {
            Some(term) => stmt.query_map(params![term], row_to_franchise)?,
            None => stmt.query_map([], row_to_franchise)?,
        };
        for row in rows {
            franchises.push(row?);
        }
        Ok(franchises)
    }

    // -- People --

    /// Upserts the person header and rewrites the complete franchise
    /// membership inside one transaction. Returns the effective id.
    pub fn upsert_person(&mut self, person: &Person) -> Result<i64> {
        let tx = self.conn.transaction()?;
        let requested = person.id;
        let id_param = if requested == 0 { None } else { Some(requested) };
        let primary = person.primary_franchise().map(|f| f.id);
        let returned: i64 = tx.query_row(
            "INSERT INTO people (id, name, primary_franchise)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name = ?2, primary_franchise = ?3
             RETURNING id",
            params![id_param, person.name, primary],
            |row| row.get(0),
        )?;
        if requested != 0 && returned != requested {
            return Err(WalldexError::IdMismatch {
                requested,
                returned,
            });
        }

        // replace-all membership: dropping and re-inserting the links is
        // simpler than diffing, and the transaction covers a failed insert
        tx.execute(
            "DELETE FROM people_franchises WHERE person = ?1",
            params![returned],
        )?;
        for franchise in &person.franchises {
            tx.execute(
                "INSERT INTO people_franchises (person, franchise) VALUES (?1, ?2)",
                params![returned, franchise.id],
            )?;
        }
        tx.commit()?;
        info!(
            id = returned,
            franchises = person.franchises.len(),
            "person saved"
        );
        Ok(returned)
    }

    pub fn list_people(&self) -> Result<Vec<Person>> {
        let headers = self.query_person_headers(
            "SELECT id, name, primary_franchise FROM people",
            None,
        )?;
        self.hydrate_people(headers)
    }

    /// Matches on the person's own name or on the name of any franchise
    /// they are linked to.
    pub fn search_people(&self, term: &str) -> Result<Vec<Person>> {
        let headers = self.query_person_headers(
            "SELECT p.id, p.name, p.primary_franchise
             FROM people p
             LEFT OUTER JOIN people_franchises pf ON p.id = pf.person
             LEFT OUTER JOIN franchises f ON f.id = pf.franchise
             WHERE p.name LIKE '%' || ?1 || '%' OR f.name LIKE '%' || ?1 || '%'
             GROUP BY p.id, p.name, p.primary_franchise",
            Some(term),
        )?;
        self.hydrate_people(headers)
    }

    pub fn get_person(&self, id: i64) -> Result<Person> {
        let header = self
            .conn
            .query_row(
                "SELECT id, name, primary_franchise FROM people WHERE id = ?1",
                params![id],
                row_to_person_header,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => WalldexError::PersonNotFound(id),
                other => WalldexError::Database(other),
            })?;
        self.hydrate_person(header)
    }

    pub fn delete_person(&mut self, id: i64) -> Result<()> {
        if id == 0 {
            return Err(WalldexError::Validation(
                "cannot delete person with id 0 (never saved)".into(),
            ));
        }
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM people_franchises WHERE person = ?1",
            params![id],
        )?;
        tx.execute("DELETE FROM people WHERE id = ?1", params![id])?;
        tx.execute(
            "DELETE FROM wallpaper_people WHERE person_id = ?1",
            params![id],
        )?;
        tx.commit()?;
        debug!(id, "person deleted");
        Ok(())
    }

    fn query_person_headers(
        &self,
        sql: &str,
        term: Option<&str>,
    ) -> Result<Vec<PersonHeader>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = match term {
            Some(term) => stmt.query_map(params![term], row_to_person_header)?,
            None => stmt.query_map([], row_to_person_header)?,
        };
        let mut headers = Vec::new();
        for row in rows {
            headers.push(row?);
        }
        Ok(headers)
    }

    fn hydrate_people(&self, headers: Vec<PersonHeader>) -> Result<Vec<Person>> {
        let mut people = Vec::with_capacity(headers.len());
        for header in headers {
            people.push(self.hydrate_person(header)?);
        }
        Ok(people)
    }

    fn hydrate_person(&self, header: PersonHeader) -> Result<Person> {
        let franchises = self
            .franchises_for_person(header.id)?
            .into_iter()
            .collect();
        Ok(Person {
            id: header.id,
            name: header.name,
            franchises,
            // id 0 in the column means no primary was ever recorded
            primary_franchise_id: header.primary_franchise.filter(|id| *id != 0),
        })
    }

    // -- Wallpapers --

    /// Upserts the header row and rewrites both link tables with the id the
    /// store returned, all inside one transaction; a failure in any step
    /// rolls back the entire write.
    pub fn save_wallpaper(&mut self, wallpaper: &Wallpaper) -> Result<i64> {
        let tx = self.conn.transaction()?;
        let requested = wallpaper.id;
        let id_param = if requested == 0 { None } else { Some(requested) };
        // a timestamp at or before the epoch means the caller never set one
        let date_added = match wallpaper.date_added.timestamp() {
            secs if secs > 0 => secs,
            _ => Utc::now().timestamp(),
        };
        let returned: i64 = tx.query_row(
            "INSERT INTO wallpapers (id, name, date_added, file_name, author, source)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                 name = ?2, date_added = ?3, file_name = ?4, author = ?5, source = ?6
             RETURNING id",
            params![
                id_param,
                blank_to_null(wallpaper.name.as_deref()),
                date_added,
                wallpaper.file_name,
                blank_to_null(wallpaper.author.as_deref()),
                blank_to_null(wallpaper.source.as_deref()),
            ],
            |row| row.get(0),
        )?;
        if requested != 0 && returned != requested {
            return Err(WalldexError::IdMismatch {
                requested,
                returned,
            });
        }

        // link rewrites key on the id the store handed back, not the
        // possibly-unsaved one on the model
        tx.execute(
            "DELETE FROM wallpaper_people WHERE wallpaper_id = ?1",
            params![returned],
        )?;
        for person in &wallpaper.people {
            tx.execute(
                "INSERT INTO wallpaper_people (wallpaper_id, person_id) VALUES (?1, ?2)",
                params![returned, person.id],
            )?;
        }
        tx.execute(
            "DELETE FROM wallpaper_franchises WHERE wallpaper_id = ?1",
            params![returned],
        )?;
        for franchise in &wallpaper.franchises {
            tx.execute(
                "INSERT INTO wallpaper_franchises (wallpaper_id, franchise_id) VALUES (?1, ?2)",
                params![returned, franchise.id],
            )?;
        }
        tx.commit()?;
        info!(
            id = returned,
            people = wallpaper.people.len(),
            franchises = wallpaper.franchises.len(),
            "wallpaper saved"
        );
        Ok(returned)
    }

    /// All catalogued wallpapers, or those matching the term on wallpaper
    /// name, file name, or a linked person's name. Each row is hydrated
    /// with its people (and their franchise sets) and its franchises.
    /// `file_path` is left unset; deriving it belongs to the repository.
    pub fn list_wallpapers(&self, search: Option<&str>) -> Result<Vec<Wallpaper>> {
        let mut headers: Vec<WallpaperRow> = Vec::new();
        match search {
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, name, date_added, file_name, author, source FROM wallpapers",
                )?;
                let rows = stmt.query_map([], row_to_wallpaper_row)?;
                for row in rows {
                    headers.push(row?);
                }
            }
            Some(term) => {
                let mut stmt = self.conn.prepare(
                    "SELECT w.id, w.name, w.date_added, w.file_name, w.author, w.source
                     FROM wallpapers w
                     LEFT OUTER JOIN wallpaper_people wp ON w.id = wp.wallpaper_id
                     LEFT OUTER JOIN people p ON wp.person_id = p.id
                     WHERE w.name LIKE '%' || ?1 || '%'
                        OR w.file_name LIKE '%' || ?1 || '%'
                        OR p.name LIKE '%' || ?1 || '%'
                     GROUP BY w.id, w.name, w.date_added, w.file_name, w.author, w.source",
                )?;
                let rows = stmt.query_map(params![term], row_to_wallpaper_row)?;
                for row in rows {
                    headers.push(row?);
                }
            }
        }

        let mut wallpapers = Vec::with_capacity(headers.len());
        for header in headers {
            wallpapers.push(self.hydrate_wallpaper(header)?);
        }
        Ok(wallpapers)
    }

    pub fn get_wallpaper(&self, id: i64) -> Result<Wallpaper> {
        let header = self
            .conn
            .query_row(
                "SELECT id, name, date_added, file_name, author, source
                 FROM wallpapers WHERE id = ?1",
                params![id],
                row_to_wallpaper_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => WalldexError::WallpaperNotFound(id),
                other => WalldexError::Database(other),
            })?;
        self.hydrate_wallpaper(header)
    }

    /// Removes the catalog row and both link tables; the image file on disk
    /// is not touched.
    pub fn delete_wallpaper(&mut self, id: i64) -> Result<bool> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM wallpaper_people WHERE wallpaper_id = ?1",
            params![id],
        )?;
        tx.execute(
            "DELETE FROM wallpaper_franchises WHERE wallpaper_id = ?1",
            params![id],
        )?;
        let count = tx.execute("DELETE FROM wallpapers WHERE id = ?1", params![id])?;
        tx.commit()?;
        debug!(id, deleted = count > 0, "wallpaper delete");
        Ok(count > 0)
    }

    pub fn wallpaper_count(&self) -> Result<u32> {
        let count: u32 =
            self.conn
                .query_row("SELECT COUNT(*) FROM wallpapers", [], |row| row.get(0))?;
        Ok(count)
    }

    fn hydrate_wallpaper(&self, header: WallpaperRow) -> Result<Wallpaper> {
        let person_headers = {
            let mut stmt = self.conn.prepare(
                "SELECT p.id, p.name, p.primary_franchise
                 FROM wallpaper_people wp
                 INNER JOIN people p ON p.id = wp.person_id
                 WHERE wp.wallpaper_id = ?1",
            )?;
            let rows = stmt.query_map(params![header.id], row_to_person_header)?;
            let mut headers = Vec::new();
            for row in rows {
                headers.push(row?);
            }
            headers
        };
        let people = self.hydrate_people(person_headers)?;

        let mut stmt = self.conn.prepare(
            "SELECT f.id, f.name, f.parent_id, 0 AS level
             FROM wallpaper_franchises wf
             INNER JOIN franchises f ON f.id = wf.franchise_id
             WHERE wf.wallpaper_id = ?1",
        )?;
        let rows = stmt.query_map(params![header.id], row_to_franchise)?;
        let mut franchises = Vec::new();
        for row in rows {
            franchises.push(row?);
        }

        Ok(Wallpaper {
            id: header.id,
            name: header.name,
            file_name: header.file_name,
            file_path: None,
            date_added: DateTime::from_timestamp(header.date_added, 0).unwrap_or_default(),
            author: header.author,
            source: header.source,
            people,
            franchises,
        })
    }
}

// Internal helper types

struct PersonHeader {
    id: i64,
    name: String,
    primary_franchise: Option<i64>,
}

struct WallpaperRow {
    id: i64,
    name: Option<String>,
    date_added: i64,
    file_name: String,
    author: Option<String>,
    source: Option<String>,
}

fn row_to_franchise(row: &rusqlite::Row<'_>) -> rusqlite::Result<Franchise> {
    Ok(Franchise {
        id: row.get(0)?,
        name: row.get(1)?,
        parent_id: row.get(2)?,
        depth: row.get(3)?,
    })
}

fn row_to_person_header(row: &rusqlite::Row<'_>) -> rusqlite::Result<PersonHeader> {
    Ok(PersonHeader {
        id: row.get(0)?,
        name: row.get(1)?,
        primary_franchise: row.get(2)?,
    })
}

fn row_to_wallpaper_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WallpaperRow> {
    Ok(WallpaperRow {
        id: row.get(0)?,
        name: row.get(1)?,
        date_added: row.get(2)?,
        file_name: row.get(3)?,
        author: row.get(4)?,
        source: row.get(5)?,
    })
}

fn upsert_franchise_row(conn: &Connection, franchise: &Franchise) -> Result<i64> {
    let requested = franchise.id;
    let id_param = if requested == 0 { None } else { Some(requested) };
    let returned: i64 = conn.query_row(
        "INSERT INTO franchises (id, name, parent_id)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET name = ?2, parent_id = ?3
         RETURNING id",
        params![id_param, franchise.name, franchise.parent_id],
        |row| row.get(0),
    )?;
    if requested != 0 && returned != requested {
        return Err(WalldexError::IdMismatch {
            requested,
            returned,
        });
    }
    Ok(returned)
}

fn blank_to_null(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
