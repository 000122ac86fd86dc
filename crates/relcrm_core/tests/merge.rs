use relcrm_core::db::{open_db, open_db_in_memory, open_db_with_lock_wait};
use relcrm_core::model::activity::{ActivityMetadata, ActivityType, ClientActivity};
use relcrm_core::model::client::tag_key;
use relcrm_core::model::contact::ClientContact;
use relcrm_core::model::document::{Document, DocumentDraft};
use relcrm_core::model::reminder::ClientReminder;
use relcrm_core::repo::activity_repo::ActivityRepository;
use relcrm_core::repo::contact_repo::ContactRepository;
use relcrm_core::repo::document_repo::DocumentRepository;
use relcrm_core::repo::reminder_repo::ReminderRepository;
use relcrm_core::{
    Client, ClientRepository, ErrorCode, FieldCodec, MergeCoordinator, MergeError,
    SqliteClientRepository,
};
use rusqlite::Connection;
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

fn codec() -> FieldCodec {
    FieldCodec::from_key_bytes(&[9u8; 32]).unwrap()
}

struct Seeded {
    owner: Uuid,
    keeper: Uuid,
    loser: Uuid,
}

/// Keeper: 2 contacts (one primary), 2 activities, 1 reminder.
/// Loser: 1 primary contact, 1 activity, 2 reminders, 1 document.
fn seed(conn: &Connection, codec: &FieldCodec) -> Seeded {
    let owner = Uuid::new_v4();
    let repo = SqliteClientRepository::new(conn, owner, codec);

    let mut keeper = Client::new(owner, "Acme Inc");
    keeper.created_at = 1;
    keeper.industry = "Tech".to_string();
    keeper.notes = "keeper notes".to_string();
    keeper.tags = vec!["VIP".to_string(), "Retail".to_string()];
    let mut loser = Client::new(owner, "ACME");
    loser.created_at = 2;
    loser.industry = "Retail".to_string();
    loser.website = "https://acme.example".to_string();
    loser.notes = "loser notes".to_string();
    loser.tags = vec!["vip".to_string(), "Wholesale".to_string()];
    repo.create_client(&keeper).unwrap();
    repo.create_client(&loser).unwrap();

    for (name, primary) in [("Ann", true), ("Abe", false)] {
        let mut contact = ClientContact::new(keeper.id, owner, name);
        contact.email = Some(format!("{}@acme.io", name.to_lowercase()));
        contact.is_primary = primary;
        repo.create_contact(&contact).unwrap();
    }
    let mut loser_contact = ClientContact::new(loser.id, owner, "Lou");
    loser_contact.email = Some("lou@acme.io".to_string());
    loser_contact.is_primary = true;
    repo.create_contact(&loser_contact).unwrap();

    for title in ["Intro", "Demo"] {
        repo.append_activity(&ClientActivity::new(keeper.id, owner, ActivityType::Note, title))
            .unwrap();
    }
    repo.append_activity(&ClientActivity::new(loser.id, owner, ActivityType::Call, "Call"))
        .unwrap();

    repo.create_reminder(&ClientReminder::new(keeper.id, owner, "Renewal", 10))
        .unwrap();
    for title in ["Invoice", "Check in"] {
        repo.create_reminder(&ClientReminder::new(loser.id, owner, title, 20))
            .unwrap();
    }
    repo.create_document(&Document::new(
        loser.id,
        owner,
        DocumentDraft {
            file_type: "application/pdf".to_string(),
            file_size: 10,
            original_name: "contract.pdf".to_string(),
            storage_key: "docs/contract.pdf".to_string(),
        },
    ))
    .unwrap();

    Seeded {
        owner,
        keeper: keeper.id,
        loser: loser.id,
    }
}

fn snapshot(conn: &Connection) -> Vec<(String, i64)> {
    let tables = [
        "clients",
        "client_contacts",
        "client_activities",
        "client_reminders",
        "documents",
    ];
    let mut rows = Vec::new();
    for table in tables {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {column}, COUNT(*) FROM {table} GROUP BY {column} ORDER BY {column}",
                column = if table == "clients" { "id" } else { "client_id" }
            ))
            .unwrap();
        let found = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        rows.extend(found.into_iter().map(|(id, n)| (format!("{table}:{id}"), n)));
    }
    rows
}

#[test]
fn merge_conserves_sub_entities_and_removes_loser() {
    let conn = open_db_in_memory().unwrap();
    let codec = codec();
    let seeded = seed(&conn, &codec);

    let outcome = MergeCoordinator::new(&conn, seeded.owner, &codec)
        .merge(seeded.keeper, seeded.loser)
        .unwrap();
    assert_eq!(outcome.moved.contacts, 1);
    assert_eq!(outcome.moved.activities, 1);
    assert_eq!(outcome.moved.reminders, 2);
    assert_eq!(outcome.moved.documents, 1);
    assert_eq!(outcome.merged_from_name, "ACME");

    let repo = SqliteClientRepository::new(&conn, seeded.owner, &codec);
    let keeper = repo.get_client(seeded.keeper).unwrap();
    assert_eq!(keeper.contacts.len(), 3);
    assert_eq!(keeper.activities.len(), 2 + 1 + 1);
    assert_eq!(keeper.reminders.len(), 3);
    assert_eq!(keeper.documents.len(), 1);
    assert_eq!(
        repo.get_client(seeded.loser).unwrap_err().code(),
        ErrorCode::NotFound
    );

    let audit = keeper
        .activities
        .iter()
        .find(|activity| activity.id == outcome.audit_activity_id)
        .unwrap();
    assert_eq!(audit.kind, ActivityType::Updated);
    assert_eq!(
        audit.metadata,
        Some(ActivityMetadata::Merge {
            merged_from_id: seeded.loser,
            merged_from_name: "ACME".to_string(),
        })
    );
}

#[test]
fn merged_keeper_has_exactly_one_primary_and_it_is_the_keepers() {
    let conn = open_db_in_memory().unwrap();
    let codec = codec();
    let seeded = seed(&conn, &codec);

    MergeCoordinator::new(&conn, seeded.owner, &codec)
        .merge(seeded.keeper, seeded.loser)
        .unwrap();

    let repo = SqliteClientRepository::new(&conn, seeded.owner, &codec);
    let contacts = repo.list_contacts(seeded.keeper).unwrap();
    let primaries: Vec<&str> = contacts
        .iter()
        .filter(|contact| contact.is_primary)
        .map(|contact| contact.name.as_str())
        .collect();
    assert_eq!(primaries, vec!["Ann"]);
}

#[test]
fn merged_tags_are_a_case_insensitive_superset_without_duplicates() {
    let conn = open_db_in_memory().unwrap();
    let codec = codec();
    let seeded = seed(&conn, &codec);

    MergeCoordinator::new(&conn, seeded.owner, &codec)
        .merge(seeded.keeper, seeded.loser)
        .unwrap();

    let repo = SqliteClientRepository::new(&conn, seeded.owner, &codec);
    let merged = repo.get_client_row(seeded.keeper).unwrap();
    let keys: Vec<String> = merged.tags.iter().map(|tag| tag_key(tag)).collect();
    let unique: HashSet<&String> = keys.iter().collect();
    assert_eq!(unique.len(), keys.len());
    for expected in ["vip", "retail", "wholesale"] {
        assert!(keys.iter().any(|key| key == expected), "missing {expected}");
    }
}

#[test]
fn merged_scalars_prefer_keeper_and_fill_gaps() {
    let conn = open_db_in_memory().unwrap();
    let codec = codec();
    let seeded = seed(&conn, &codec);

    MergeCoordinator::new(&conn, seeded.owner, &codec)
        .merge(seeded.keeper, seeded.loser)
        .unwrap();

    let repo = SqliteClientRepository::new(&conn, seeded.owner, &codec);
    let merged = repo.get_client_row(seeded.keeper).unwrap();
    assert_eq!(merged.industry, "Tech");
    assert_eq!(merged.website, "https://acme.example");
    assert_eq!(merged.name, "Acme Inc");
    assert_eq!(merged.notes, "keeper notes\n\n---\n\nloser notes");
}

#[test]
fn repeating_a_merge_reports_not_found() {
    let conn = open_db_in_memory().unwrap();
    let codec = codec();
    let seeded = seed(&conn, &codec);
    let coordinator = MergeCoordinator::new(&conn, seeded.owner, &codec);

    coordinator.merge(seeded.keeper, seeded.loser).unwrap();
    let err = coordinator.merge(seeded.keeper, seeded.loser).unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[test]
fn invalid_requests_are_rejected_before_touching_storage() {
    let conn = open_db_in_memory().unwrap();
    let codec = codec();
    let seeded = seed(&conn, &codec);
    let coordinator = MergeCoordinator::new(&conn, seeded.owner, &codec);
    let before = snapshot(&conn);

    let same = coordinator.merge(seeded.keeper, seeded.keeper).unwrap_err();
    assert!(matches!(same, MergeError::InvalidMerge(_)));
    let nil = coordinator.merge(Uuid::nil(), seeded.loser).unwrap_err();
    assert_eq!(nil.code(), ErrorCode::InvalidMerge);
    assert_eq!(snapshot(&conn), before);
}

#[test]
fn merging_another_users_client_is_an_ownership_error() {
    let conn = open_db_in_memory().unwrap();
    let codec = codec();
    let seeded = seed(&conn, &codec);

    let err = MergeCoordinator::new(&conn, Uuid::new_v4(), &codec)
        .merge(seeded.keeper, seeded.loser)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Ownership);
}

#[test]
fn failure_mid_merge_leaves_database_unchanged() {
    let conn = open_db_in_memory().unwrap();
    let codec = codec();
    let seeded = seed(&conn, &codec);
    let before = snapshot(&conn);
    let keeper_before: (String, String) = conn
        .query_row(
            "SELECT notes, tags FROM clients WHERE id = ?1",
            [seeded.keeper.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();

    conn.execute_batch(
        "CREATE TRIGGER fail_activity_move
         BEFORE UPDATE OF client_id ON client_activities
         BEGIN
             SELECT RAISE(ABORT, 'injected failure');
         END;",
    )
    .unwrap();

    let err = MergeCoordinator::new(&conn, seeded.owner, &codec)
        .merge(seeded.keeper, seeded.loser)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Internal);

    assert_eq!(snapshot(&conn), before);
    let keeper_after: (String, String) = conn
        .query_row(
            "SELECT notes, tags FROM clients WHERE id = ?1",
            [seeded.keeper.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(keeper_after, keeper_before);
    let loser_primaries: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM client_contacts WHERE client_id = ?1 AND is_primary = 1",
            [seeded.loser.to_string()],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(loser_primaries, 1);
}

#[test]
fn held_write_lock_times_out_as_concurrent_modification() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("crm.sqlite3");
    let codec = codec();
    let setup = open_db(&path).unwrap();
    let seeded = seed(&setup, &codec);

    let impatient = open_db_with_lock_wait(&path, Duration::from_millis(50)).unwrap();
    let blocker = open_db(&path).unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let err = MergeCoordinator::new(&impatient, seeded.owner, &codec)
        .merge(seeded.keeper, seeded.loser)
        .unwrap_err();
    assert!(matches!(err, MergeError::ConcurrentModification));
    assert_eq!(err.code(), ErrorCode::ConcurrentModification);

    blocker.execute_batch("ROLLBACK;").unwrap();
    MergeCoordinator::new(&impatient, seeded.owner, &codec)
        .merge(seeded.keeper, seeded.loser)
        .unwrap();
}

#[test]
fn overlapping_merges_on_the_same_pair_succeed_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("crm.sqlite3");
    let codec = codec();
    let setup = open_db(&path).unwrap();
    let seeded = seed(&setup, &codec);
    drop(setup);

    let directions = [(seeded.keeper, seeded.loser), (seeded.loser, seeded.keeper)];
    let results: Vec<Result<(), ErrorCode>> = std::thread::scope(|scope| {
        let handles: Vec<_> = directions
            .iter()
            .map(|&(keep, lose)| {
                let path = path.clone();
                let codec = codec.clone();
                let owner = seeded.owner;
                scope.spawn(move || {
                    let conn = open_db(&path).unwrap();
                    MergeCoordinator::new(&conn, owner, &codec)
                        .merge(keep, lose)
                        .map(|_| ())
                        .map_err(|err| err.code())
                })
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    let successes = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(successes, 1, "results: {results:?}");
    for result in results.iter().filter_map(|result| result.as_ref().err()) {
        assert!(matches!(
            result,
            ErrorCode::NotFound | ErrorCode::ConcurrentModification
        ));
    }

    let check = open_db(&path).unwrap();
    let clients: i64 = check
        .query_row("SELECT COUNT(*) FROM clients", [], |row| row.get(0))
        .unwrap();
    assert_eq!(clients, 1);
}
