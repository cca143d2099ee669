use rusqlite::Connection;

use super::error::StorageError;

pub const DIRECTORY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL,
    plan TEXT NOT NULL,
    credit_balance REAL NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS organizations (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    plan TEXT NOT NULL,
    credit_balance REAL NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS organization_members (
    organization_id TEXT NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    role TEXT NOT NULL,
    joined_at TEXT NOT NULL,
    PRIMARY KEY (organization_id, user_id)
);

CREATE TABLE IF NOT EXISTS departments (
    id TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS department_members (
    department_id TEXT NOT NULL REFERENCES departments(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    joined_at TEXT NOT NULL,
    PRIMARY KEY (department_id, user_id)
);
"#;

pub const ENTITY_TABLE_NAMES: [&str; 3] = ["gateways", "plugins", "workflows"];

pub const ALLOCATION_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS dept_allocations (
    id TEXT PRIMARY KEY,
    department_id TEXT NOT NULL UNIQUE REFERENCES departments(id) ON DELETE CASCADE,
    max_gateways INTEGER,
    max_plugins INTEGER,
    max_workflows INTEGER,
    max_ram_mb INTEGER,
    max_cpu_cores REAL,
    max_storage_mb INTEGER,
    credit_budget INTEGER,
    credit_used REAL NOT NULL DEFAULT 0,
    credit_reset_at TEXT,
    allocation_mode TEXT NOT NULL,
    set_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS member_allocations (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    department_id TEXT NOT NULL,
    max_gateways INTEGER,
    max_workflows INTEGER,
    max_ram_mb INTEGER,
    max_cpu_cores REAL,
    max_storage_mb INTEGER,
    credit_budget INTEGER,
    credit_used REAL NOT NULL DEFAULT 0,
    credit_reset_at TEXT,
    allocation_mode TEXT NOT NULL,
    set_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (user_id, department_id),
    FOREIGN KEY (department_id, user_id)
        REFERENCES department_members(department_id, user_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_member_allocations_department
    ON member_allocations(department_id);
"#;

fn entity_table_schema(table: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    organization_id TEXT,
    department_id TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_{table}_owner ON {table}(owner_id, organization_id);
CREATE INDEX IF NOT EXISTS idx_{table}_department ON {table}(department_id);
"#
    )
}

pub fn init_database(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(DIRECTORY_SCHEMA)?;
    for table in ENTITY_TABLE_NAMES {
        conn.execute_batch(&entity_table_schema(table))?;
    }
    conn.execute_batch(ALLOCATION_SCHEMA)?;
    Ok(())
}
