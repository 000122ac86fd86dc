use relcrm_core::db::open_db_in_memory;
use relcrm_core::model::contact::ClientContact;
use relcrm_core::repo::contact_repo::ContactRepository;
use relcrm_core::service::duplicates::ScanOptions;
use relcrm_core::{
    Client, ClientRepository, DuplicateReport, DuplicateScanService, FieldCodec, MatchReason,
    SimilarityScorer, SqliteClientRepository,
};
use rusqlite::Connection;
use uuid::Uuid;

fn codec() -> FieldCodec {
    FieldCodec::from_key_bytes(&[3u8; 32]).unwrap()
}

fn add_client(
    repo: &SqliteClientRepository<'_>,
    name: &str,
    created_at: i64,
    email: Option<&str>,
) -> Uuid {
    let mut client = Client::new(repo.owner(), name);
    client.created_at = created_at;
    repo.create_client(&client).unwrap();
    if let Some(email) = email {
        let mut contact = ClientContact::new(client.id, repo.owner(), "Contact");
        contact.email = Some(email.to_string());
        repo.create_contact(&contact).unwrap();
    }
    client.id
}

fn scan(
    conn: &Connection,
    owner: Uuid,
    codec: &FieldCodec,
    options: ScanOptions,
) -> DuplicateReport {
    DuplicateScanService::new(conn, owner, codec, SimilarityScorer::default(), options)
        .detect()
        .unwrap()
}

#[test]
fn detection_groups_matching_clients_with_reasons() {
    let conn = open_db_in_memory().unwrap();
    let codec = codec();
    let owner = Uuid::new_v4();
    let repo = SqliteClientRepository::new(&conn, owner, &codec);

    let first = add_client(&repo, "Northwind", 1, Some("a@x.com"));
    let second = add_client(&repo, "Contoso", 2, Some("A@X.com "));
    let acme = add_client(&repo, "Acme Inc", 3, None);
    let acme_dup = add_client(&repo, "ACME", 4, None);
    add_client(&repo, "John Doe", 5, None);
    add_client(&repo, "Jane Smith", 6, None);

    let report = scan(&conn, owner, &codec, ScanOptions::default());
    assert_eq!(report.scanned, 6);
    assert!(!report.truncated);
    assert_eq!(report.groups.len(), 2);

    assert_eq!(report.groups[0].match_reason, MatchReason::SameEmail);
    let ids: Vec<Uuid> = report.groups[0].clients.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![first, second]);
    assert_eq!(report.groups[0].clients[0].emails, vec!["a@x.com"]);

    assert_eq!(report.groups[1].match_reason, MatchReason::SimilarName);
    let ids: Vec<Uuid> = report.groups[1].clients.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![acme, acme_dup]);
}

#[test]
fn detection_is_idempotent_and_read_only() {
    let conn = open_db_in_memory().unwrap();
    let codec = codec();
    let owner = Uuid::new_v4();
    let repo = SqliteClientRepository::new(&conn, owner, &codec);
    add_client(&repo, "Globex", 1, Some("ops@globex.io"));
    add_client(&repo, "Globex Corporation", 2, Some("ops@globex.io"));

    let first = scan(&conn, owner, &codec, ScanOptions::default());
    let second = scan(&conn, owner, &codec, ScanOptions::default());
    assert_eq!(first, second);
    assert_eq!(first.groups.len(), 1);
    assert_eq!(first.groups[0].match_reason, MatchReason::SameEmail);
    let clients: i64 = conn
        .query_row("SELECT COUNT(*) FROM clients", [], |row| row.get(0))
        .unwrap();
    assert_eq!(clients, 2);
}

#[test]
fn small_pages_see_the_same_groups_as_one_page() {
    let conn = open_db_in_memory().unwrap();
    let codec = codec();
    let owner = Uuid::new_v4();
    let repo = SqliteClientRepository::new(&conn, owner, &codec);
    for index in 0..7 {
        add_client(&repo, &format!("Initech {index}"), index, None);
    }
    add_client(&repo, "Initech", 100, None);

    let whole = scan(&conn, owner, &codec, ScanOptions::default());
    let paged = scan(
        &conn,
        owner,
        &codec,
        ScanOptions {
            page_size: 2,
            ..ScanOptions::default()
        },
    );
    assert_eq!(whole, paged);
    assert_eq!(whole.scanned, 8);
}

#[test]
fn candidate_cap_truncates_and_reports_it() {
    let conn = open_db_in_memory().unwrap();
    let codec = codec();
    let owner = Uuid::new_v4();
    let repo = SqliteClientRepository::new(&conn, owner, &codec);
    for index in 0..5 {
        add_client(&repo, &format!("Client {index}"), index, None);
    }

    let report = scan(
        &conn,
        owner,
        &codec,
        ScanOptions {
            page_size: 2,
            max_candidates: 3,
            ..ScanOptions::default()
        },
    );
    assert_eq!(report.scanned, 3);
    assert!(report.truncated);
}

#[test]
fn blocking_pass_still_finds_keyed_matches() {
    let conn = open_db_in_memory().unwrap();
    let codec = codec();
    let owner = Uuid::new_v4();
    let repo = SqliteClientRepository::new(&conn, owner, &codec);
    add_client(&repo, "Umbrella", 1, Some("info@umbrella.io"));
    add_client(&repo, "Umbrella Corp", 2, None);
    add_client(&repo, "Hooli", 3, Some("INFO@umbrella.io"));

    let report = scan(
        &conn,
        owner,
        &codec,
        ScanOptions {
            blocking_threshold: 1,
            ..ScanOptions::default()
        },
    );
    assert!(report.blocked);
    assert_eq!(report.groups.len(), 1);
    assert_eq!(report.groups[0].clients.len(), 3);
    assert_eq!(report.groups[0].match_reason, MatchReason::SameEmail);
}

#[test]
fn other_users_clients_are_never_candidates() {
    let conn = open_db_in_memory().unwrap();
    let codec = codec();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    add_client(
        &SqliteClientRepository::new(&conn, alice, &codec),
        "Acme",
        1,
        None,
    );
    add_client(
        &SqliteClientRepository::new(&conn, bob, &codec),
        "Acme",
        2,
        None,
    );

    let report = scan(&conn, alice, &codec, ScanOptions::default());
    assert_eq!(report.scanned, 1);
    assert!(report.groups.is_empty());
}
