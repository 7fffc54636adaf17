use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use super::schema::SCHEMA;
use super::{ProjectWithUser, Store};
use crate::error::{Error, Result};
use crate::types::*;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            tracing::error!("invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_acl(s: &str) -> ProjectAcl {
    serde_json::from_str(s).unwrap_or_else(|e| {
        tracing::error!("invalid acl in database: '{}' - {}", s, e);
        ProjectAcl::default()
    })
}

fn row_to_project(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        project_dir: row.get(3)?,
        acl: parse_acl(&row.get::<_, String>(4)?),
        blocked: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
        updated_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}

const PROJECT_COLS: &str = "id, user_id, name, project_dir, acl, blocked, created_at, updated_at";

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // User operations

    fn create_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![user.id, user.name, format_datetime(&user.created_at)],
        )?;
        Ok(())
    }

    fn add_public_key(&self, key: &PublicKey) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO public_keys (user_id, key_text) VALUES (?1, ?2)",
            params![key.user_id, key.key_text],
        )?;
        Ok(())
    }

    fn find_user_by_id(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, created_at FROM users WHERE id = ?1",
            params![id],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: parse_datetime(&row.get::<_, String>(2)?),
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn find_user_by_name(&self, name: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, created_at FROM users WHERE name = ?1",
            params![name],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: parse_datetime(&row.get::<_, String>(2)?),
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn find_user_by_pubkey(&self, _name: &str, key: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT u.id, u.name, u.created_at FROM users u
             JOIN public_keys k ON k.user_id = u.id
             WHERE k.key_text = ?1",
            params![key],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: parse_datetime(&row.get::<_, String>(2)?),
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    // Feature flags

    fn set_feature(&self, user_id: &str, feature: &FeatureData) -> Result<()> {
        let perms = serde_json::to_string(&feature.perms)
            .map_err(|e| Error::Validation(e.to_string()))?;
        self.conn().execute(
            "INSERT INTO features (user_id, perms, storage_max, file_max, special_file_max)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
               perms = excluded.perms,
               storage_max = excluded.storage_max,
               file_max = excluded.file_max,
               special_file_max = excluded.special_file_max",
            params![
                user_id,
                perms,
                feature.storage_max as i64,
                feature.file_max,
                feature.special_file_max,
            ],
        )?;
        Ok(())
    }

    fn find_feature(&self, user_id: &str) -> Result<FeatureData> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT perms, storage_max, file_max, special_file_max
                 FROM features WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        Ok(match row {
            Some((perms, storage_max, file_max, special_file_max)) => FeatureData {
                perms: serde_json::from_str(&perms).unwrap_or_default(),
                storage_max: storage_max as u64,
                file_max,
                special_file_max,
            },
            None => FeatureData::default(),
        })
    }

    fn has_feature_for_user(&self, user_id: &str, perm: &str) -> Result<bool> {
        Ok(self.find_feature(user_id)?.has_perm(perm))
    }

    // Project operations

    fn insert_project(&self, user_id: &str, name: &str, project_dir: &str) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = format_datetime(&Utc::now());
        let acl = serde_json::to_string(&ProjectAcl::default())
            .map_err(|e| Error::Validation(e.to_string()))?;
        self.conn().execute(
            "INSERT INTO projects (id, user_id, name, project_dir, acl, blocked, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, '', ?6, ?6)",
            params![id, user_id, name, project_dir, acl, now],
        )?;
        Ok(id)
    }

    fn update_project(&self, user_id: &str, name: &str) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE projects SET updated_at = ?1 WHERE user_id = ?2 AND name = ?3",
            params![format_datetime(&Utc::now()), user_id, name],
        )?;
        if changed == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn link_to_project(
        &self,
        user_id: &str,
        project_id: &str,
        project_dir: &str,
        commit: bool,
    ) -> Result<()> {
        let project = self
            .conn()
            .query_row(
                &format!("SELECT {PROJECT_COLS} FROM projects WHERE id = ?1 AND user_id = ?2"),
                params![project_id, user_id],
                row_to_project,
            )
            .optional()?
            .ok_or(Error::NotFound)?;

        // Linking to a non-terminal project would create a chain
        // deeper than one hop.
        if project_dir != project.name {
            let target = self
                .find_project_by_name(user_id, project_dir)?
                .ok_or_else(|| {
                    Error::validation(format!("({project_dir}) project does not exist"))
                })?;
            if target.is_link() {
                return Err(Error::validation(format!(
                    "({}) is itself a link to ({}); link to the terminal project instead",
                    target.name, target.project_dir
                )));
            }
        }

        if commit {
            self.conn().execute(
                "UPDATE projects SET project_dir = ?1, updated_at = ?2 WHERE id = ?3",
                params![project_dir, format_datetime(&Utc::now()), project_id],
            )?;
        }
        Ok(())
    }

    fn remove_project(&self, project_id: &str) -> Result<()> {
        let conn = self.conn();
        let project = conn
            .query_row(
                &format!("SELECT {PROJECT_COLS} FROM projects WHERE id = ?1"),
                params![project_id],
                row_to_project,
            )
            .optional()?
            .ok_or(Error::NotFound)?;

        let dependents: i64 = conn.query_row(
            "SELECT COUNT(*) FROM projects
             WHERE user_id = ?1 AND project_dir = ?2 AND name != ?2",
            params![project.user_id, project.name],
            |row| row.get(0),
        )?;
        if dependents > 0 {
            return Err(Error::HasDependents(dependents as usize));
        }

        conn.execute("DELETE FROM projects WHERE id = ?1", params![project_id])?;
        Ok(())
    }

    fn find_project_by_name(&self, user_id: &str, name: &str) -> Result<Option<Project>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {PROJECT_COLS} FROM projects WHERE user_id = ?1 AND name = ?2"),
            params![user_id, name],
            row_to_project,
        )
        .optional()
        .map_err(Error::from)
    }

    fn find_project_links(&self, user_id: &str, name: &str) -> Result<Vec<Project>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROJECT_COLS} FROM projects
             WHERE user_id = ?1 AND project_dir = ?2 AND name != ?2
             ORDER BY name"
        ))?;
        let rows = stmt.query_map(params![user_id, name], row_to_project)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::from)
    }

    fn find_projects_by_user(&self, user_id: &str) -> Result<Vec<Project>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROJECT_COLS} FROM projects WHERE user_id = ?1 ORDER BY name"
        ))?;
        let rows = stmt.query_map(params![user_id], row_to_project)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::from)
    }

    fn find_projects_by_prefix(&self, user_id: &str, prefix: &str) -> Result<Vec<Project>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROJECT_COLS} FROM projects
             WHERE user_id = ?1 AND name LIKE ?2 || '%' ESCAPE '\\'
             ORDER BY updated_at, id"
        ))?;
        let escaped = prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        let rows = stmt.query_map(params![user_id, escaped], row_to_project)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::from)
    }

    fn find_all_projects(
        &self,
        pager: &Pager,
        by: ProjectOrder,
    ) -> Result<Paginate<ProjectWithUser>> {
        let conn = self.conn();
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM projects", [], |row| row.get(0))?;

        let mut stmt = conn.prepare(&format!(
            "SELECT p.id, p.user_id, p.name, p.project_dir, p.acl, p.blocked,
                    p.created_at, p.updated_at, u.name
             FROM projects p JOIN users u ON u.id = p.user_id
             ORDER BY p.{} DESC LIMIT ?1 OFFSET ?2",
            by.column()
        ))?;
        let rows = stmt.query_map(
            params![pager.num as i64, (pager.page * pager.num) as i64],
            |row| {
                Ok(ProjectWithUser {
                    project: row_to_project(row)?,
                    username: row.get(8)?,
                })
            },
        )?;

        Ok(Paginate {
            data: rows.collect::<rusqlite::Result<Vec<_>>>()?,
            total: total as usize,
        })
    }
}
