use leadflow_core::UserId;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::errors::{Result, StoreError};
use crate::types::{NewUser, User};

/// User directory.
pub struct UserRepo;

impl UserRepo {
    /// Create a user.
    pub fn create(conn: &Connection, params: &NewUser, now: &str) -> Result<User> {
        let id = params.id.clone().unwrap_or_default();
        let _ = conn.execute(
            "INSERT INTO users (id, name, email, is_active, max_open_assignments,
             max_assignments_per_hour, max_assignments_per_day, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id.as_str(),
                params.name,
                params.email,
                !params.inactive,
                params.max_open_assignments,
                params.max_assignments_per_hour,
                params.max_assignments_per_day,
                now,
            ],
        )?;
        Self::get(conn, &id)?.ok_or_else(|| StoreError::not_found("user", id.as_str()))
    }

    /// Fetch a user.
    pub fn get(conn: &Connection, id: &UserId) -> Result<Option<User>> {
        Ok(conn
            .query_row("SELECT * FROM users WHERE id = ?1", [id.as_str()], user_from_row)
            .optional()?)
    }

    /// All users, by ID.
    pub fn list(conn: &Connection) -> Result<Vec<User>> {
        let mut stmt = conn.prepare("SELECT * FROM users ORDER BY id")?;
        let rows = stmt.query_map([], user_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Activate or deactivate a user.
    pub fn set_active(conn: &Connection, id: &UserId, active: bool) -> Result<()> {
        let changed = conn.execute(
            "UPDATE users SET is_active = ?2 WHERE id = ?1",
            params![id.as_str(), active],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("user", id.as_str()));
        }
        Ok(())
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId::from(row.get::<_, String>("id")?),
        name: row.get("name")?,
        email: row.get("email")?,
        is_active: row.get("is_active")?,
        max_open_assignments: row.get("max_open_assignments")?,
        max_assignments_per_hour: row.get("max_assignments_per_hour")?,
        max_assignments_per_day: row.get("max_assignments_per_day")?,
        created_at: row.get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::test_support::{T0, setup_db};

    #[test]
    fn create_and_get() {
        let conn = setup_db();
        let user = UserRepo::create(
            &conn,
            &NewUser {
                id: Some("user-7".into()),
                name: "Seven".into(),
                max_assignments_per_hour: Some(3),
                ..NewUser::default()
            },
            T0,
        )
        .unwrap();
        assert_eq!(user.id.as_str(), "user-7");
        assert!(user.is_active);
        assert_eq!(user.max_assignments_per_hour, Some(3));
        assert_eq!(UserRepo::get(&conn, &user.id).unwrap(), Some(user));
    }

    #[test]
    fn generated_id_when_absent() {
        let conn = setup_db();
        let user = UserRepo::create(&conn, &NewUser { name: "A".into(), ..NewUser::default() }, T0)
            .unwrap();
        assert!(user.id.starts_with("user-"));
    }

    #[test]
    fn deactivate() {
        let conn = setup_db();
        let user = UserRepo::create(&conn, &NewUser { name: "A".into(), ..NewUser::default() }, T0)
            .unwrap();
        UserRepo::set_active(&conn, &user.id, false).unwrap();
        assert!(!UserRepo::get(&conn, &user.id).unwrap().unwrap().is_active);
        assert!(UserRepo::set_active(&conn, &"user-missing".into(), true).is_err());
    }

    #[test]
    fn list_is_sorted() {
        let conn = setup_db();
        for id in ["user-b", "user-a"] {
            let _ = UserRepo::create(
                &conn,
                &NewUser { id: Some(id.into()), name: id.into(), ..NewUser::default() },
                T0,
            )
            .unwrap();
        }
        let ids: Vec<String> = UserRepo::list(&conn).unwrap().into_iter().map(|u| u.id.as_str().to_owned()).collect();
        assert_eq!(ids, ["user-a", "user-b"]);
    }
}
