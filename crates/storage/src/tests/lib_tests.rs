use super::*;

fn row(first_name: &str, faculty_id: i64) -> NewGraduate {
    NewGraduate {
        first_name: first_name.to_string(),
        faculty_id: FacultyId(faculty_id),
        ..NewGraduate::default()
    }
}

async fn seeded() -> Storage {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    assert!(storage
        .create_faculty(FacultyId(1), "Engineering")
        .await
        .expect("faculty"));
    assert!(storage
        .create_faculty(FacultyId(2), "Science")
        .await
        .expect("faculty"));
    storage
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("storage.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[tokio::test]
async fn duplicate_faculty_id_is_not_inserted_twice() {
    let storage = seeded().await;
    let inserted = storage
        .create_faculty(FacultyId(1), "Engineering again")
        .await
        .expect("insert");
    assert!(!inserted);

    let faculty = storage
        .faculty(FacultyId(1))
        .await
        .expect("load")
        .expect("exists");
    assert_eq!(faculty.name, "Engineering");
}

#[tokio::test]
async fn population_is_a_live_count_over_graduates() {
    let storage = seeded().await;
    storage
        .import_graduates(&[row("a", 1), row("b", 1), row("c", 2)])
        .await
        .expect("import");

    let faculties = storage.list_faculties().await.expect("faculties");
    assert_eq!(faculties.len(), 2);
    assert_eq!(faculties[0].population, 2);
    assert_eq!(faculties[1].population, 1);
}

#[tokio::test]
async fn import_assigns_program_and_faculty_sequences() {
    let storage = seeded().await;
    let outcome = storage
        .import_graduates(&[row("a", 1), row("b", 2), row("c", 1)])
        .await
        .expect("import");
    assert_eq!(outcome, ImportOutcome::Imported(3));

    let (engineering, total) = storage
        .list_graduates_by_faculty(FacultyId(1), 10, 0)
        .await
        .expect("list");
    assert_eq!(total, 2);
    assert_eq!(engineering[0].first_name, "a");
    assert_eq!(engineering[0].sequence, 1);
    assert_eq!(engineering[0].faculty_sequence, 1);
    assert_eq!(engineering[1].first_name, "c");
    assert_eq!(engineering[1].sequence, 3);
    assert_eq!(engineering[1].faculty_sequence, 2);
}

#[tokio::test]
async fn import_rejects_unknown_faculty_without_writing() {
    let storage = seeded().await;
    let outcome = storage
        .import_graduates(&[row("a", 1), row("ghost", 99)])
        .await
        .expect("import");
    assert_eq!(outcome, ImportOutcome::UnknownFaculty(FacultyId(99)));

    let (total, _) = storage.ceremony_totals().await.expect("totals");
    assert_eq!(total, 0);
}

#[tokio::test]
async fn import_rejects_duplicate_program_sequence() {
    let storage = seeded().await;
    let mut first = row("a", 1);
    first.sequence = Some(5);
    storage.import_graduates(&[first]).await.expect("import");

    let mut clash = row("b", 2);
    clash.sequence = Some(5);
    let outcome = storage.import_graduates(&[clash]).await.expect("import");
    assert_eq!(outcome, ImportOutcome::DuplicateSequence(5));
}

#[tokio::test]
async fn replacing_partition_derives_round_membership_positionally() {
    let storage = seeded().await;
    storage
        .import_graduates(&[row("a", 1), row("b", 1), row("c", 1), row("d", 2)])
        .await
        .expect("import");

    let partition = StoredPartition {
        rounds: vec![RoundNumber(1), RoundNumber(2)],
        quotas: vec![
            StoredRoundQuota {
                round: RoundNumber(1),
                faculty_id: FacultyId(1),
                quota: 2,
            },
            StoredRoundQuota {
                round: RoundNumber(2),
                faculty_id: FacultyId(1),
                quota: 1,
            },
        ],
    };
    storage
        .replace_quota_partition(&partition)
        .await
        .expect("replace");

    let (engineering, _) = storage
        .list_graduates_by_faculty(FacultyId(1), 10, 0)
        .await
        .expect("list");
    let rounds: Vec<_> = engineering.iter().map(|g| g.round_number).collect();
    assert_eq!(
        rounds,
        vec![Some(RoundNumber(1)), Some(RoundNumber(1)), Some(RoundNumber(2))]
    );

    let (science, _) = storage
        .list_graduates_by_faculty(FacultyId(2), 10, 0)
        .await
        .expect("list");
    assert_eq!(science[0].round_number, None);

    assert_eq!(storage.load_quota_partition().await.expect("load"), partition);
    assert_eq!(storage.total_quota().await.expect("total"), 3);
}

#[tokio::test]
async fn call_next_flips_each_graduate_once() {
    let storage = seeded().await;
    storage
        .import_graduates(&[row("a", 1), row("b", 1)])
        .await
        .expect("import");
    storage
        .replace_quota_partition(&StoredPartition {
            rounds: vec![RoundNumber(1)],
            quotas: vec![StoredRoundQuota {
                round: RoundNumber(1),
                faculty_id: FacultyId(1),
                quota: 2,
            }],
        })
        .await
        .expect("replace");

    let next = storage
        .next_pending(RoundNumber(1))
        .await
        .expect("next")
        .expect("pending");
    assert_eq!(next.first_name, "a");
    let called = storage
        .call_next(RoundNumber(1), Utc::now())
        .await
        .expect("call")
        .expect("someone pending");
    assert_eq!(called.graduate_id, next.graduate_id);
    assert!(called.called);
    assert!(!storage
        .call_if_next(next.graduate_id, RoundNumber(1), Utc::now())
        .await
        .expect("call again"));

    let progress = storage
        .round_progress(RoundNumber(1))
        .await
        .expect("progress")
        .expect("round exists");
    assert_eq!(progress.entrants, 2);
    assert_eq!(progress.called, 1);
    assert_eq!(progress.pending(), 1);
    assert_eq!(progress.latest_called_sequence, Some(1));

    let latest = storage
        .latest_called_in_round(RoundNumber(1))
        .await
        .expect("latest")
        .expect("someone called");
    assert_eq!(latest.graduate_id, next.graduate_id);
    assert_eq!(latest.call_order, Some(1));

    assert_eq!(storage.reset_round(RoundNumber(1)).await.expect("reset"), 1);
    let progress = storage
        .round_progress(RoundNumber(1))
        .await
        .expect("progress")
        .expect("round exists");
    assert_eq!(progress.called, 0);
}

#[tokio::test]
async fn pending_after_walks_rounds_in_call_order() {
    let storage = seeded().await;
    let mut late = row("late", 1);
    late.sequence = Some(30);
    let mut early = row("early", 2);
    early.sequence = Some(10);
    let mut middle = row("middle", 1);
    middle.sequence = Some(20);
    storage
        .import_graduates(&[late, early, middle])
        .await
        .expect("import");
    storage
        .replace_quota_partition(&StoredPartition {
            rounds: vec![RoundNumber(1), RoundNumber(2)],
            quotas: vec![
                StoredRoundQuota {
                    round: RoundNumber(1),
                    faculty_id: FacultyId(1),
                    quota: 1,
                },
                StoredRoundQuota {
                    round: RoundNumber(2),
                    faculty_id: FacultyId(1),
                    quota: 1,
                },
                StoredRoundQuota {
                    round: RoundNumber(2),
                    faculty_id: FacultyId(2),
                    quota: 1,
                },
            ],
        })
        .await
        .expect("replace");

    let first_page = storage
        .pending_after(PendingCursor::start(), 2)
        .await
        .expect("page");
    let names: Vec<_> = first_page.iter().map(|g| g.first_name.as_str()).collect();
    assert_eq!(names, vec!["middle", "early"]);

    let cursor = PendingCursor::from(first_page.last().expect("last"));
    let rest = storage.pending_after(cursor, 10).await.expect("page");
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].first_name, "late");
}

#[tokio::test]
async fn populated_faculty_cannot_be_removed() {
    let storage = seeded().await;
    storage
        .import_graduates(&[row("a", 1)])
        .await
        .expect("import");

    assert_eq!(
        storage.remove_faculty(FacultyId(1)).await.expect("remove"),
        FacultyRemoval::Populated(1)
    );
    assert_eq!(
        storage.remove_faculty(FacultyId(2)).await.expect("remove"),
        FacultyRemoval::Removed
    );
    assert_eq!(
        storage.remove_faculty(FacultyId(2)).await.expect("remove"),
        FacultyRemoval::NotFound
    );
}

#[tokio::test]
async fn deleting_roster_clears_partition() {
    let storage = seeded().await;
    storage
        .import_graduates(&[row("a", 1), row("b", 2)])
        .await
        .expect("import");
    storage
        .replace_quota_partition(&StoredPartition {
            rounds: vec![RoundNumber(1)],
            quotas: vec![StoredRoundQuota {
                round: RoundNumber(1),
                faculty_id: FacultyId(2),
                quota: 1,
            }],
        })
        .await
        .expect("replace");

    assert_eq!(storage.delete_all_graduates().await.expect("delete"), 2);
    assert_eq!(
        storage.load_quota_partition().await.expect("load"),
        StoredPartition::default()
    );
}

#[tokio::test]
async fn calls_follow_membership_at_the_moment_of_the_flip() {
    let storage = seeded().await;
    storage
        .import_graduates(&[row("a", 1), row("b", 1)])
        .await
        .expect("import");
    let split = |first: i64, second: i64| StoredPartition {
        rounds: vec![RoundNumber(1), RoundNumber(2)],
        quotas: vec![
            StoredRoundQuota {
                round: RoundNumber(1),
                faculty_id: FacultyId(1),
                quota: first,
            },
            StoredRoundQuota {
                round: RoundNumber(2),
                faculty_id: FacultyId(1),
                quota: second,
            },
        ],
    };
    storage.replace_quota_partition(&split(1, 1)).await.expect("split");
    let a = storage
        .next_pending(RoundNumber(1))
        .await
        .expect("next")
        .expect("pending");

    // Round 1 loses its only seat before the flip lands.
    storage.replace_quota_partition(&split(0, 2)).await.expect("move");
    assert!(!storage
        .call_if_next(a.graduate_id, RoundNumber(1), Utc::now())
        .await
        .expect("stale call"));
    assert!(storage
        .call_next(RoundNumber(1), Utc::now())
        .await
        .expect("call")
        .is_none());

    let called = storage
        .call_next(RoundNumber(2), Utc::now())
        .await
        .expect("call")
        .expect("round 2 pending");
    assert_eq!(called.graduate_id, a.graduate_id);
    assert_eq!(called.round_number, Some(RoundNumber(2)));
}
