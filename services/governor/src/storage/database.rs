use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::allocation::{AllocationMode, DeptAllocation, MemberAllocation, ResourceCaps};

use super::contracts::{AllocationStore, DirectoryStore};
use super::error::StorageError;
use super::records::{
    Department, DepartmentMembership, EntityKind, EntityRecord, OrgRole, Organization,
    OwnerFilter, UserAccount,
};
use super::schema::init_database;
use super::QUOTA_DB_FILENAME;

impl ToSql for AllocationMode {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for AllocationMode {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|_| FromSqlError::InvalidType)
    }
}

impl ToSql for OrgRole {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for OrgRole {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|_| FromSqlError::InvalidType)
    }
}

const DEPT_ALLOCATION_COLUMNS: &str = r#"
    id, department_id, max_gateways, max_plugins, max_workflows, max_ram_mb,
    max_cpu_cores, max_storage_mb, credit_budget, credit_used, credit_reset_at,
    allocation_mode, set_by, created_at, updated_at
"#;

const MEMBER_ALLOCATION_COLUMNS: &str = r#"
    id, user_id, department_id, max_gateways, max_workflows, max_ram_mb,
    max_cpu_cores, max_storage_mb, credit_budget, credit_used, credit_reset_at,
    allocation_mode, set_by, created_at, updated_at
"#;

fn get_u64(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<u64>> {
    Ok(row.get::<_, Option<i64>>(idx)?.map(|v| v.max(0) as u64))
}

fn to_i64(value: Option<u64>) -> Option<i64> {
    value.map(|v| v.min(i64::MAX as u64) as i64)
}

fn map_dept_allocation(row: &Row<'_>) -> rusqlite::Result<DeptAllocation> {
    Ok(DeptAllocation {
        id: row.get(0)?,
        department_id: row.get(1)?,
        caps: ResourceCaps {
            max_gateways: get_u64(row, 2)?,
            max_plugins: get_u64(row, 3)?,
            max_workflows: get_u64(row, 4)?,
            max_ram_mb: get_u64(row, 5)?,
            max_cpu_cores: row.get(6)?,
            max_storage_mb: get_u64(row, 7)?,
            credit_budget: get_u64(row, 8)?,
        },
        credit_used: row.get(9)?,
        credit_reset_at: row.get(10)?,
        allocation_mode: row.get(11)?,
        set_by: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

fn map_member_allocation(row: &Row<'_>) -> rusqlite::Result<MemberAllocation> {
    Ok(MemberAllocation {
        id: row.get(0)?,
        user_id: row.get(1)?,
        department_id: row.get(2)?,
        caps: ResourceCaps {
            max_gateways: get_u64(row, 3)?,
            max_plugins: None,
            max_workflows: get_u64(row, 4)?,
            max_ram_mb: get_u64(row, 5)?,
            max_cpu_cores: row.get(6)?,
            max_storage_mb: get_u64(row, 7)?,
            credit_budget: get_u64(row, 8)?,
        },
        credit_used: row.get(9)?,
        credit_reset_at: row.get(10)?,
        allocation_mode: row.get(11)?,
        set_by: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

fn query_dept_allocation(
    conn: &Connection,
    department_id: &str,
) -> Result<Option<DeptAllocation>, StorageError> {
    let sql = format!(
        "SELECT {DEPT_ALLOCATION_COLUMNS} FROM dept_allocations WHERE department_id = ?1"
    );
    let row = conn
        .query_row(&sql, params![department_id], map_dept_allocation)
        .optional()?;
    Ok(row)
}

fn query_member_allocation(
    conn: &Connection,
    user_id: &str,
    department_id: &str,
) -> Result<Option<MemberAllocation>, StorageError> {
    let sql = format!(
        "SELECT {MEMBER_ALLOCATION_COLUMNS} FROM member_allocations \
         WHERE user_id = ?1 AND department_id = ?2"
    );
    let row = conn
        .query_row(&sql, params![user_id, department_id], map_member_allocation)
        .optional()?;
    Ok(row)
}

pub struct QuotaDatabase {
    data_dir: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl QuotaDatabase {
    pub fn new(data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)?;
        let db_path = data_dir.join(QUOTA_DB_FILENAME);
        let conn = Connection::open(&db_path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        init_database(&conn)?;

        Ok(Self {
            data_dir: Some(data_dir),
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        init_database(&conn)?;

        Ok(Self {
            data_dir: None,
            conn: Mutex::new(conn),
        })
    }

    pub fn data_dir(&self) -> Option<&PathBuf> {
        self.data_dir.as_ref()
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::ConnectionPoisoned)
    }

    pub fn insert_user(&self, user: &UserAccount) -> Result<(), StorageError> {
        let conn = self.connection()?;
        conn.execute(
            r#"
            INSERT INTO users (id, email, plan, credit_balance, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                user.id,
                user.email,
                user.plan,
                user.credit_balance,
                user.created_at
            ],
        )?;
        Ok(())
    }

    pub fn insert_organization(&self, organization: &Organization) -> Result<(), StorageError> {
        let conn = self.connection()?;
        conn.execute(
            r#"
            INSERT INTO organizations (id, name, plan, credit_balance, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                organization.id,
                organization.name,
                organization.plan,
                organization.credit_balance,
                organization.created_at
            ],
        )?;
        Ok(())
    }

    pub fn add_organization_member(
        &self,
        organization_id: &str,
        user_id: &str,
        role: OrgRole,
    ) -> Result<(), StorageError> {
        let conn = self.connection()?;
        conn.execute(
            r#"
            INSERT INTO organization_members (organization_id, user_id, role, joined_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(organization_id, user_id) DO UPDATE SET role = excluded.role
            "#,
            params![organization_id, user_id, role, Utc::now()],
        )?;
        Ok(())
    }

    pub fn insert_department(&self, department: &Department) -> Result<(), StorageError> {
        let conn = self.connection()?;
        conn.execute(
            r#"
            INSERT INTO departments (id, organization_id, name, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                department.id,
                department.organization_id,
                department.name,
                department.created_at
            ],
        )?;
        Ok(())
    }

    /// Removing a department cascades to its memberships and allocations.
    pub fn delete_department(&self, department_id: &str) -> Result<(), StorageError> {
        let conn = self.connection()?;
        let deleted = conn.execute(
            "DELETE FROM departments WHERE id = ?1",
            params![department_id],
        )?;
        if deleted == 0 {
            return Err(StorageError::NotFound(format!("department {department_id}")));
        }
        Ok(())
    }

    pub fn add_department_member(
        &self,
        department_id: &str,
        user_id: &str,
    ) -> Result<(), StorageError> {
        let conn = self.connection()?;
        conn.execute(
            r#"
            INSERT OR IGNORE INTO department_members (department_id, user_id, joined_at)
            VALUES (?1, ?2, ?3)
            "#,
            params![department_id, user_id, Utc::now()],
        )?;
        Ok(())
    }

    pub fn remove_department_member(
        &self,
        department_id: &str,
        user_id: &str,
    ) -> Result<(), StorageError> {
        let conn = self.connection()?;
        let deleted = conn.execute(
            "DELETE FROM department_members WHERE department_id = ?1 AND user_id = ?2",
            params![department_id, user_id],
        )?;
        if deleted == 0 {
            return Err(StorageError::NotFound(format!(
                "membership of {user_id} in department {department_id}"
            )));
        }
        Ok(())
    }

    pub fn insert_entity(&self, entity: &EntityRecord) -> Result<(), StorageError> {
        let conn = self.connection()?;
        let sql = format!(
            r#"
            INSERT INTO {} (id, name, owner_id, organization_id, department_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            entity.kind.table()
        );
        conn.execute(
            &sql,
            params![
                entity.id,
                entity.name,
                entity.owner_id,
                entity.organization_id,
                entity.department_id,
                Utc::now()
            ],
        )?;
        Ok(())
    }
}

impl AllocationStore for QuotaDatabase {
    fn upsert_department_allocation(
        &self,
        allocation: &DeptAllocation,
    ) -> Result<DeptAllocation, StorageError> {
        let conn = self.connection()?;
        let caps = &allocation.caps;

        conn.execute(
            r#"
            INSERT INTO dept_allocations (
                id, department_id, max_gateways, max_plugins, max_workflows, max_ram_mb,
                max_cpu_cores, max_storage_mb, credit_budget, credit_used, credit_reset_at,
                allocation_mode, set_by, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(department_id) DO UPDATE SET
                max_gateways = excluded.max_gateways,
                max_plugins = excluded.max_plugins,
                max_workflows = excluded.max_workflows,
                max_ram_mb = excluded.max_ram_mb,
                max_cpu_cores = excluded.max_cpu_cores,
                max_storage_mb = excluded.max_storage_mb,
                credit_budget = excluded.credit_budget,
                allocation_mode = excluded.allocation_mode,
                set_by = excluded.set_by,
                updated_at = excluded.updated_at
            "#,
            params![
                allocation.id,
                allocation.department_id,
                to_i64(caps.max_gateways),
                to_i64(caps.max_plugins),
                to_i64(caps.max_workflows),
                to_i64(caps.max_ram_mb),
                caps.max_cpu_cores,
                to_i64(caps.max_storage_mb),
                to_i64(caps.credit_budget),
                allocation.credit_used,
                allocation.credit_reset_at,
                allocation.allocation_mode,
                allocation.set_by,
                allocation.created_at,
                allocation.updated_at
            ],
        )?;

        query_dept_allocation(&conn, &allocation.department_id)?.ok_or_else(|| {
            StorageError::NotFound(format!(
                "allocation for department {}",
                allocation.department_id
            ))
        })
    }

    fn find_department_allocation(
        &self,
        department_id: &str,
    ) -> Result<Option<DeptAllocation>, StorageError> {
        let conn = self.connection()?;
        query_dept_allocation(&conn, department_id)
    }

    fn delete_department_allocation(&self, department_id: &str) -> Result<bool, StorageError> {
        let conn = self.connection()?;
        let deleted = conn.execute(
            "DELETE FROM dept_allocations WHERE department_id = ?1",
            params![department_id],
        )?;
        Ok(deleted > 0)
    }

    fn list_department_allocations(
        &self,
        organization_id: &str,
    ) -> Result<Vec<DeptAllocation>, StorageError> {
        let conn = self.connection()?;
        let sql = format!(
            r#"
            SELECT {DEPT_ALLOCATION_COLUMNS}
            FROM dept_allocations
            WHERE department_id IN (SELECT id FROM departments WHERE organization_id = ?1)
            ORDER BY created_at
            "#
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![organization_id], map_dept_allocation)?;

        let mut allocations = Vec::new();
        for row in rows {
            allocations.push(row?);
        }
        Ok(allocations)
    }

    fn upsert_member_allocation(
        &self,
        allocation: &MemberAllocation,
    ) -> Result<MemberAllocation, StorageError> {
        let conn = self.connection()?;
        let caps = &allocation.caps;

        conn.execute(
            r#"
            INSERT INTO member_allocations (
                id, user_id, department_id, max_gateways, max_workflows, max_ram_mb,
                max_cpu_cores, max_storage_mb, credit_budget, credit_used, credit_reset_at,
                allocation_mode, set_by, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(user_id, department_id) DO UPDATE SET
                max_gateways = excluded.max_gateways,
                max_workflows = excluded.max_workflows,
                max_ram_mb = excluded.max_ram_mb,
                max_cpu_cores = excluded.max_cpu_cores,
                max_storage_mb = excluded.max_storage_mb,
                credit_budget = excluded.credit_budget,
                allocation_mode = excluded.allocation_mode,
                set_by = excluded.set_by,
                updated_at = excluded.updated_at
            "#,
            params![
                allocation.id,
                allocation.user_id,
                allocation.department_id,
                to_i64(caps.max_gateways),
                to_i64(caps.max_workflows),
                to_i64(caps.max_ram_mb),
                caps.max_cpu_cores,
                to_i64(caps.max_storage_mb),
                to_i64(caps.credit_budget),
                allocation.credit_used,
                allocation.credit_reset_at,
                allocation.allocation_mode,
                allocation.set_by,
                allocation.created_at,
                allocation.updated_at
            ],
        )?;

        query_member_allocation(&conn, &allocation.user_id, &allocation.department_id)?
            .ok_or_else(|| {
                StorageError::NotFound(format!(
                    "allocation for member {} in department {}",
                    allocation.user_id, allocation.department_id
                ))
            })
    }

    fn find_member_allocation(
        &self,
        user_id: &str,
        department_id: &str,
    ) -> Result<Option<MemberAllocation>, StorageError> {
        let conn = self.connection()?;
        query_member_allocation(&conn, user_id, department_id)
    }

    fn delete_member_allocation(
        &self,
        user_id: &str,
        department_id: &str,
    ) -> Result<bool, StorageError> {
        let conn = self.connection()?;
        let deleted = conn.execute(
            "DELETE FROM member_allocations WHERE user_id = ?1 AND department_id = ?2",
            params![user_id, department_id],
        )?;
        Ok(deleted > 0)
    }

    fn list_member_allocations(
        &self,
        department_id: &str,
    ) -> Result<Vec<MemberAllocation>, StorageError> {
        let conn = self.connection()?;
        let sql = format!(
            r#"
            SELECT {MEMBER_ALLOCATION_COLUMNS}
            FROM member_allocations
            WHERE department_id = ?1
            ORDER BY created_at
            "#
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![department_id], map_member_allocation)?;

        let mut allocations = Vec::new();
        for row in rows {
            allocations.push(row?);
        }
        Ok(allocations)
    }

    fn increment_department_credit_used(
        &self,
        department_id: &str,
        amount: f64,
    ) -> Result<bool, StorageError> {
        let conn = self.connection()?;
        let updated = conn.execute(
            r#"
            UPDATE dept_allocations
            SET credit_used = credit_used + ?2
            WHERE department_id = ?1
            "#,
            params![department_id, amount],
        )?;
        Ok(updated > 0)
    }

    fn increment_member_credit_used(
        &self,
        user_id: &str,
        department_id: &str,
        amount: f64,
    ) -> Result<bool, StorageError> {
        let conn = self.connection()?;
        let updated = conn.execute(
            r#"
            UPDATE member_allocations
            SET credit_used = credit_used + ?3
            WHERE user_id = ?1 AND department_id = ?2
            "#,
            params![user_id, department_id, amount],
        )?;
        Ok(updated > 0)
    }

    fn reset_all_credit_usage(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let departments = tx.execute(
            "UPDATE dept_allocations SET credit_used = 0, credit_reset_at = ?1",
            params![now],
        )?;
        let members = tx.execute(
            "UPDATE member_allocations SET credit_used = 0, credit_reset_at = ?1",
            params![now],
        )?;
        tx.commit()?;
        Ok(departments + members)
    }

    fn reset_credit_usage_before(
        &self,
        period_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let departments = tx.execute(
            r#"
            UPDATE dept_allocations
            SET credit_used = 0, credit_reset_at = ?2
            WHERE COALESCE(credit_reset_at, created_at) < ?1
            "#,
            params![period_start, now],
        )?;
        let members = tx.execute(
            r#"
            UPDATE member_allocations
            SET credit_used = 0, credit_reset_at = ?2
            WHERE COALESCE(credit_reset_at, created_at) < ?1
            "#,
            params![period_start, now],
        )?;
        tx.commit()?;
        Ok(departments + members)
    }

    fn reset_organization_credit_usage(
        &self,
        organization_id: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let departments = tx.execute(
            r#"
            UPDATE dept_allocations
            SET credit_used = 0, credit_reset_at = ?2
            WHERE department_id IN (SELECT id FROM departments WHERE organization_id = ?1)
            "#,
            params![organization_id, now],
        )?;
        let members = tx.execute(
            r#"
            UPDATE member_allocations
            SET credit_used = 0, credit_reset_at = ?2
            WHERE department_id IN (SELECT id FROM departments WHERE organization_id = ?1)
            "#,
            params![organization_id, now],
        )?;
        tx.commit()?;
        Ok(departments + members)
    }
}

impl DirectoryStore for QuotaDatabase {
    fn find_user(&self, user_id: &str) -> Result<Option<UserAccount>, StorageError> {
        let conn = self.connection()?;
        let row = conn
            .query_row(
                r#"
                SELECT id, email, plan, credit_balance, created_at
                FROM users
                WHERE id = ?1
                "#,
                params![user_id],
                |row| {
                    Ok(UserAccount {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        plan: row.get(2)?,
                        credit_balance: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn find_organization(
        &self,
        organization_id: &str,
    ) -> Result<Option<Organization>, StorageError> {
        let conn = self.connection()?;
        let row = conn
            .query_row(
                r#"
                SELECT id, name, plan, credit_balance, created_at
                FROM organizations
                WHERE id = ?1
                "#,
                params![organization_id],
                |row| {
                    Ok(Organization {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        plan: row.get(2)?,
                        credit_balance: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn find_department(&self, department_id: &str) -> Result<Option<Department>, StorageError> {
        let conn = self.connection()?;
        let row = conn
            .query_row(
                r#"
                SELECT id, organization_id, name, created_at
                FROM departments
                WHERE id = ?1
                "#,
                params![department_id],
                |row| {
                    Ok(Department {
                        id: row.get(0)?,
                        organization_id: row.get(1)?,
                        name: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn find_membership(
        &self,
        department_id: &str,
        user_id: &str,
    ) -> Result<Option<DepartmentMembership>, StorageError> {
        let conn = self.connection()?;
        let row = conn
            .query_row(
                r#"
                SELECT department_id, user_id, joined_at
                FROM department_members
                WHERE department_id = ?1 AND user_id = ?2
                "#,
                params![department_id, user_id],
                |row| {
                    Ok(DepartmentMembership {
                        department_id: row.get(0)?,
                        user_id: row.get(1)?,
                        joined_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn find_org_role(
        &self,
        organization_id: &str,
        user_id: &str,
    ) -> Result<Option<OrgRole>, StorageError> {
        let conn = self.connection()?;
        let role = conn
            .query_row(
                r#"
                SELECT role
                FROM organization_members
                WHERE organization_id = ?1 AND user_id = ?2
                "#,
                params![organization_id, user_id],
                |row| row.get::<_, OrgRole>(0),
            )
            .optional()?;
        Ok(role)
    }

    fn count_entities(&self, kind: EntityKind, filter: &OwnerFilter) -> Result<u64, StorageError> {
        let conn = self.connection()?;
        let (predicate, values) = filter.predicate();
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {predicate}", kind.table());
        let count: i64 = conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn count_organization_seats(&self, organization_id: &str) -> Result<u64, StorageError> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM organization_members WHERE organization_id = ?1",
            params![organization_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    fn count_departments(&self, organization_id: &str) -> Result<u64, StorageError> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM departments WHERE organization_id = ?1",
            params![organization_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> QuotaDatabase {
        let db = QuotaDatabase::open_in_memory().expect("in-memory database");
        let now = Utc::now();
        db.insert_organization(&Organization {
            id: "org-1".into(),
            name: "Acme".into(),
            plan: "business".into(),
            credit_balance: 0.0,
            created_at: now,
        })
        .unwrap();
        db.insert_user(&UserAccount {
            id: "user-1".into(),
            email: "u1@acme.test".into(),
            plan: "free".into(),
            credit_balance: 0.0,
            created_at: now,
        })
        .unwrap();
        db.insert_department(&Department {
            id: "dept-1".into(),
            organization_id: "org-1".into(),
            name: "Ops".into(),
            created_at: now,
        })
        .unwrap();
        db.add_department_member("dept-1", "user-1").unwrap();
        db
    }

    fn dept_allocation(department_id: &str, caps: ResourceCaps) -> DeptAllocation {
        let now = Utc::now();
        DeptAllocation {
            id: uuid::Uuid::new_v4().to_string(),
            department_id: department_id.to_string(),
            caps,
            credit_used: 0.0,
            credit_reset_at: None,
            allocation_mode: AllocationMode::HardCap,
            set_by: "admin".into(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn upsert_preserves_credit_used() {
        let db = seeded();
        let caps = ResourceCaps {
            credit_budget: Some(100),
            ..Default::default()
        };
        db.upsert_department_allocation(&dept_allocation("dept-1", caps.clone()))
            .unwrap();
        assert!(db.increment_department_credit_used("dept-1", 30.0).unwrap());

        let raised = ResourceCaps {
            credit_budget: Some(200),
            max_gateways: Some(3),
            ..Default::default()
        };
        let stored = db
            .upsert_department_allocation(&dept_allocation("dept-1", raised))
            .unwrap();
        assert_eq!(stored.caps.credit_budget, Some(200));
        assert_eq!(stored.caps.max_gateways, Some(3));
        assert_eq!(stored.credit_used, 30.0);
        assert_eq!(stored.allocation_mode, AllocationMode::HardCap);
    }

    #[test]
    fn stale_reset_skips_rows_already_in_period() {
        let db = seeded();
        let now = Utc::now();
        db.insert_department(&Department {
            id: "dept-2".into(),
            organization_id: "org-1".into(),
            name: "Sales".into(),
            created_at: now,
        })
        .unwrap();

        let mut stale = dept_allocation("dept-1", ResourceCaps::default());
        stale.created_at = now - chrono::Duration::days(62);
        db.upsert_department_allocation(&stale).unwrap();
        db.upsert_department_allocation(&dept_allocation("dept-2", ResourceCaps::default()))
            .unwrap();
        db.increment_department_credit_used("dept-1", 30.0).unwrap();
        db.increment_department_credit_used("dept-2", 20.0).unwrap();

        let period_start = now - chrono::Duration::days(1);
        assert_eq!(db.reset_credit_usage_before(period_start, now).unwrap(), 1);
        assert_eq!(db.reset_credit_usage_before(period_start, now).unwrap(), 0);

        let stale = db.find_department_allocation("dept-1").unwrap().unwrap();
        assert_eq!(stale.credit_used, 0.0);
        assert!(stale.credit_reset_at.is_some());
        let fresh = db.find_department_allocation("dept-2").unwrap().unwrap();
        assert_eq!(fresh.credit_used, 20.0);
    }

    #[test]
    fn increment_without_row_reports_false() {
        let db = seeded();
        assert!(!db.increment_department_credit_used("dept-1", 5.0).unwrap());
        assert!(!db
            .increment_member_credit_used("user-1", "dept-1", 5.0)
            .unwrap());
    }

    #[test]
    fn deleting_department_cascades_allocations() {
        let db = seeded();
        db.upsert_department_allocation(&dept_allocation("dept-1", ResourceCaps::default()))
            .unwrap();
        db.delete_department("dept-1").unwrap();
        assert!(db.find_department_allocation("dept-1").unwrap().is_none());
        assert!(db.find_membership("dept-1", "user-1").unwrap().is_none());
    }

    #[test]
    fn counts_entities_by_owner_filter() {
        let db = seeded();
        let entities = [
            ("gw-1", None, None),
            ("gw-2", Some("org-1"), Some("dept-1")),
            ("gw-3", Some("org-1"), None),
        ];
        for (id, org, dept) in entities {
            db.insert_entity(&EntityRecord {
                id: id.into(),
                kind: EntityKind::Gateway,
                name: id.into(),
                owner_id: "user-1".into(),
                organization_id: org.map(str::to_string),
                department_id: dept.map(str::to_string),
            })
            .unwrap();
        }

        let personal = OwnerFilter::Personal {
            user_id: "user-1".into(),
        };
        let organization = OwnerFilter::Organization {
            organization_id: "org-1".into(),
        };
        let member = OwnerFilter::Member {
            user_id: "user-1".into(),
            department_id: "dept-1".into(),
        };
        assert_eq!(db.count_entities(EntityKind::Gateway, &personal).unwrap(), 1);
        assert_eq!(
            db.count_entities(EntityKind::Gateway, &organization).unwrap(),
            2
        );
        assert_eq!(db.count_entities(EntityKind::Gateway, &member).unwrap(), 1);
        assert_eq!(db.count_entities(EntityKind::Plugin, &personal).unwrap(), 0);
    }
}
