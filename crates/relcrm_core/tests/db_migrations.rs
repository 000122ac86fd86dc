use relcrm_core::db::migrations::latest_version;
use relcrm_core::db::{open_db, open_db_in_memory, DbError};
use rusqlite::Connection;
use uuid::Uuid;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    let tables = table_names(&conn);
    for table in [
        "clients",
        "client_contacts",
        "client_activities",
        "client_reminders",
        "documents",
    ] {
        assert!(tables.iter().any(|name| name == table), "missing table `{table}`");
    }
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relcrm.sqlite3");

    drop(open_db(&path).unwrap());
    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert!(table_names(&conn_second).contains(&"clients".to_string()));
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.sqlite3");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn schema_allows_only_one_primary_contact_per_client() {
    let conn = open_db_in_memory().unwrap();
    let user = Uuid::new_v4().to_string();
    let client = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO clients (id, user_id, name, created_at, updated_at) VALUES (?1, ?2, 'Acme', 1, 1)",
        [&client, &user],
    )
    .unwrap();

    let insert_primary = |name: &str| {
        conn.execute(
            "INSERT INTO client_contacts (id, client_id, user_id, name, is_primary, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, 1)",
            [Uuid::new_v4().to_string(), client.clone(), user.clone(), name.to_string()],
        )
    };
    insert_primary("Ann").unwrap();
    assert!(insert_primary("Bob").is_err());
}

#[test]
fn foreign_keys_cascade_on_client_delete() {
    let conn = open_db_in_memory().unwrap();
    let user = Uuid::new_v4().to_string();
    let client = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO clients (id, user_id, name, created_at, updated_at) VALUES (?1, ?2, 'Acme', 1, 1)",
        [&client, &user],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO client_reminders (id, client_id, user_id, title, remind_at, created_at)
         VALUES (?1, ?2, ?3, 'Ping', 5, 1)",
        [&Uuid::new_v4().to_string(), &client, &user],
    )
    .unwrap();

    conn.execute("DELETE FROM clients WHERE id = ?1", [&client])
        .unwrap();
    let remaining: i64 = conn
        .query_row("SELECT COUNT(*) FROM client_reminders", [], |row| row.get(0))
        .unwrap();
    assert_eq!(remaining, 0);
}

fn schema_version(conn: &Connection) -> u32 {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .unwrap()
}

fn table_names(conn: &Connection) -> Vec<String> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
        .unwrap();
    let names = stmt
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<String>, _>>()
        .unwrap();
    names
}
