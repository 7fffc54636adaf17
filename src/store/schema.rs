pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS public_keys (
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    key_text TEXT NOT NULL,
    UNIQUE(user_id, key_text)
);

CREATE TABLE IF NOT EXISTS features (
    user_id TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
    perms TEXT NOT NULL,
    storage_max INTEGER NOT NULL,
    file_max INTEGER NOT NULL,
    special_file_max INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    project_dir TEXT NOT NULL,
    acl TEXT NOT NULL,
    blocked TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(user_id, name)
);

CREATE INDEX IF NOT EXISTS idx_projects_project_dir
    ON projects(user_id, project_dir);
";
