use relcrm_core::db::open_db_in_memory;
use relcrm_core::model::activity::{ActivityDraft, ActivityMetadata, ActivityType};
use relcrm_core::model::contact::ContactDraft;
use relcrm_core::model::reminder::ReminderDraft;
use relcrm_core::model::now_epoch_ms;
use relcrm_core::{
    ClientDraft, ClientService, ErrorCode, FieldCodec, Priority, SqliteClientRepository,
    TimelineService,
};
use uuid::Uuid;

fn codec() -> FieldCodec {
    FieldCodec::from_key_bytes(&[5u8; 32]).unwrap()
}

fn draft(name: &str) -> ClientDraft {
    ClientDraft {
        name: name.to_string(),
        ..ClientDraft::default()
    }
}

#[test]
fn create_normalizes_draft_and_reads_back() {
    let conn = open_db_in_memory().unwrap();
    let codec = codec();
    let service = ClientService::new(SqliteClientRepository::new(&conn, Uuid::new_v4(), &codec));

    let created = service
        .create_client(ClientDraft {
            name: "  Acme  ".to_string(),
            tags: vec!["VIP".to_string(), "vip".to_string(), " ".to_string()],
            priority: Some(Priority::High),
            ..ClientDraft::default()
        })
        .unwrap();
    assert_eq!(created.client.name, "Acme");
    assert_eq!(created.client.tags, vec!["VIP"]);
    assert_eq!(created.client.priority, Priority::High);
    assert!(created.contacts.is_empty());
}

#[test]
fn stage_change_appends_timeline_entry() {
    let conn = open_db_in_memory().unwrap();
    let codec = codec();
    let service = ClientService::new(SqliteClientRepository::new(&conn, Uuid::new_v4(), &codec));

    let mut initial = draft("Acme");
    initial.stage_id = "lead".to_string();
    let created = service.create_client(initial).unwrap();

    let mut moved = draft("Acme");
    moved.stage_id = "won".to_string();
    let updated = service.update_client(created.client.id, moved).unwrap();

    assert_eq!(updated.client.stage_id, "won");
    assert_eq!(updated.activities.len(), 1);
    assert_eq!(updated.activities[0].kind, ActivityType::StageChange);
    assert_eq!(
        updated.activities[0].metadata,
        Some(ActivityMetadata::StageChange {
            old_stage_id: "lead".to_string(),
            new_stage_id: "won".to_string(),
        })
    );
}

#[test]
fn logging_a_call_touches_last_contacted_and_encrypts_content() {
    let conn = open_db_in_memory().unwrap();
    let codec = codec();
    let service = ClientService::new(SqliteClientRepository::new(&conn, Uuid::new_v4(), &codec));
    let created = service.create_client(draft("Acme")).unwrap();

    let activity = service
        .log_activity(
            created.client.id,
            ActivityDraft {
                kind: ActivityType::Call,
                title: "Quarterly call".to_string(),
                content: "Discussed renewal pricing".to_string(),
                metadata: Some(ActivityMetadata::Call {
                    duration_minutes: Some(30),
                    outcome: None,
                }),
            },
        )
        .unwrap();
    assert_eq!(activity.content, "Discussed renewal pricing");

    let client = service.get_client(created.client.id).unwrap().client;
    assert_eq!(client.last_contacted_at, Some(activity.created_at));

    let stored: Vec<u8> = conn
        .query_row("SELECT content FROM client_activities", [], |row| row.get(0))
        .unwrap();
    assert!(!String::from_utf8_lossy(&stored).contains("renewal"));
}

#[test]
fn activity_content_keeps_surrounding_whitespace() {
    let conn = open_db_in_memory().unwrap();
    let codec = codec();
    let service = ClientService::new(SqliteClientRepository::new(&conn, Uuid::new_v4(), &codec));
    let created = service.create_client(draft("Acme")).unwrap();

    let content = "  - item one\n  - item two\n";
    service
        .log_activity(
            created.client.id,
            ActivityDraft {
                kind: ActivityType::Note,
                title: "Checklist".to_string(),
                content: content.to_string(),
                metadata: None,
            },
        )
        .unwrap();

    let stored = service.list_activities(created.client.id, None).unwrap();
    assert_eq!(stored[0].content, content);
}

#[test]
fn mismatched_activity_metadata_is_a_validation_error() {
    let conn = open_db_in_memory().unwrap();
    let codec = codec();
    let service = ClientService::new(SqliteClientRepository::new(&conn, Uuid::new_v4(), &codec));
    let created = service.create_client(draft("Acme")).unwrap();

    let err = service
        .log_activity(
            created.client.id,
            ActivityDraft {
                kind: ActivityType::Note,
                title: "Note".to_string(),
                content: String::new(),
                metadata: Some(ActivityMetadata::Email { subject: None }),
            },
        )
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Validation);
}

#[test]
fn contact_update_keeps_single_primary() {
    let conn = open_db_in_memory().unwrap();
    let codec = codec();
    let service = ClientService::new(SqliteClientRepository::new(&conn, Uuid::new_v4(), &codec));
    let created = service.create_client(draft("Acme")).unwrap();
    let id = created.client.id;

    let ann = service
        .add_contact(
            id,
            ContactDraft {
                name: "Ann".to_string(),
                email: Some(" ann@acme.io ".to_string()),
                is_primary: true,
                ..ContactDraft::default()
            },
        )
        .unwrap();
    assert_eq!(ann.email.as_deref(), Some("ann@acme.io"));

    let bob = service
        .add_contact(
            id,
            ContactDraft {
                name: "Bob".to_string(),
                ..ContactDraft::default()
            },
        )
        .unwrap();
    service
        .update_contact(
            bob.id,
            ContactDraft {
                name: "Bob".to_string(),
                is_primary: true,
                ..ContactDraft::default()
            },
        )
        .unwrap();

    let contacts = service.list_contacts(id).unwrap();
    let primaries: Vec<&str> = contacts
        .iter()
        .filter(|contact| contact.is_primary)
        .map(|contact| contact.name.as_str())
        .collect();
    assert_eq!(primaries, vec!["Bob"]);
}

#[test]
fn reminders_complete_once_and_drop_out_of_agenda() {
    let conn = open_db_in_memory().unwrap();
    let codec = codec();
    let owner = Uuid::new_v4();
    let service = ClientService::new(SqliteClientRepository::new(&conn, owner, &codec));
    let created = service.create_client(draft("Acme")).unwrap();

    let past = service
        .add_reminder(
            created.client.id,
            ReminderDraft {
                title: "Overdue".to_string(),
                description: String::new(),
                remind_at: now_epoch_ms() - 60_000,
            },
        )
        .unwrap();
    assert!(past.overdue);
    service
        .add_reminder(
            created.client.id,
            ReminderDraft {
                title: "Tomorrow".to_string(),
                description: String::new(),
                remind_at: now_epoch_ms() + 24 * 60 * 60 * 1000,
            },
        )
        .unwrap();

    let timeline = TimelineService::new(SqliteClientRepository::new(&conn, owner, &codec));
    let agenda = timeline.reminder_agenda(None).unwrap();
    assert_eq!(agenda.overdue.len(), 1);
    assert_eq!(agenda.upcoming.len(), 1);

    let done = service.complete_reminder(past.reminder.id).unwrap();
    assert!(!done.overdue);
    let first_completion = done.reminder.completed_at;
    let again = service.complete_reminder(past.reminder.id).unwrap();
    assert_eq!(again.reminder.completed_at, first_completion);

    let agenda = timeline.reminder_agenda(None).unwrap();
    assert!(agenda.overdue.is_empty());
}

#[test]
fn activity_stats_count_by_type_within_window() {
    let conn = open_db_in_memory().unwrap();
    let codec = codec();
    let owner = Uuid::new_v4();
    let service = ClientService::new(SqliteClientRepository::new(&conn, owner, &codec));
    let created = service.create_client(draft("Acme")).unwrap();
    for kind in [ActivityType::Call, ActivityType::Call, ActivityType::Note] {
        service
            .log_activity(
                created.client.id,
                ActivityDraft {
                    kind,
                    title: "entry".to_string(),
                    content: String::new(),
                    metadata: None,
                },
            )
            .unwrap();
    }
    conn.execute(
        "UPDATE client_activities SET created_at = 1 WHERE type = 'note'",
        [],
    )
    .unwrap();

    let stats = TimelineService::new(SqliteClientRepository::new(&conn, owner, &codec))
        .activity_stats(Some(7))
        .unwrap();
    assert_eq!(stats.days, 7);
    assert_eq!(stats.counts[&ActivityType::Call], 2);
    assert_eq!(stats.counts[&ActivityType::Note], 0);
    assert_eq!(stats.total, 2);
}
