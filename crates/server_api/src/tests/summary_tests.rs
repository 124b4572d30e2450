use futures::StreamExt;

use super::*;
use crate::{
    sequencer::{self, Advance},
    support,
};
use shared::domain::FacultyId;

#[tokio::test]
async fn round_summary_tracks_calls() {
    let ctx = support::context().await;
    support::faculty(&ctx, 1, "A", 0).await;
    support::graduates(&ctx, &[("a", 1, 10), ("b", 1, 20), ("c", 1, 30)]).await;
    support::partition(&ctx, &[1, 2], &[(1, 1, 2), (2, 1, 1)]).await;

    sequencer::advance(&ctx, RoundNumber(1)).await.expect("advance");
    let summary = round_summary(&ctx, RoundNumber(1)).await.expect("summary");
    assert_eq!(
        summary,
        RoundSummary {
            current_round: RoundNumber(1),
            total_in_round: 2,
            already_called: 1,
            remaining: 1,
            latest_called_sequence: Some(10),
            total_all_rounds: 3,
        }
    );
}

#[tokio::test]
async fn current_summary_is_none_once_everything_is_called() {
    let ctx = support::context().await;
    support::faculty(&ctx, 1, "A", 1).await;
    support::partition(&ctx, &[1], &[(1, 1, 1)]).await;

    assert!(current_summary(&ctx).await.expect("summary").is_some());
    sequencer::advance(&ctx, RoundNumber(1)).await.expect("advance");
    assert!(current_summary(&ctx).await.expect("summary").is_none());
    assert!(overview(&ctx).await.expect("overview").is_none());
}

#[tokio::test]
async fn overview_follows_the_faculty_being_served() {
    let ctx = support::context().await;
    support::faculty(&ctx, 1, "Arts", 0).await;
    support::faculty(&ctx, 2, "Law", 0).await;
    support::graduates(&ctx, &[("a1", 1, 1), ("l1", 2, 2), ("a2", 1, 3), ("l2", 2, 4)]).await;
    support::partition(&ctx, &[1], &[(1, 1, 2), (1, 2, 2)]).await;

    let before = overview(&ctx).await.expect("overview").expect("active");
    assert_eq!(before.current_faculty_id, Some(FacultyId(1)));
    assert_eq!(before.current_faculty_remaining, 2);

    sequencer::advance(&ctx, RoundNumber(1)).await.expect("advance");
    sequencer::advance(&ctx, RoundNumber(1)).await.expect("advance");
    let after = overview(&ctx).await.expect("overview").expect("active");
    assert_eq!(
        after,
        Overview {
            round_number: RoundNumber(1),
            total_capacity: 4,
            remaining_count: 2,
            current_faculty_id: Some(FacultyId(2)),
            current_faculty_name: Some("Law".into()),
            current_faculty_quota: 2,
            current_faculty_remaining: 1,
        }
    );
}

#[tokio::test]
async fn upcoming_stream_is_finite_ordered_and_restartable() {
    let ctx = support::context().await;
    support::faculty(&ctx, 1, "A", 40).await;
    support::partition(&ctx, &[1, 2], &[(1, 1, 30), (2, 1, 10)]).await;

    let upcoming = collect_upcoming(&ctx, 35).await.expect("upcoming");
    assert_eq!(upcoming.len(), 35);
    assert!(upcoming.windows(2).all(|pair| {
        (pair[0].round_number, pair[0].sequence) < (pair[1].round_number, pair[1].sequence)
    }));
    assert_eq!(upcoming[30].round_number, Some(RoundNumber(2)));

    let mut stream = Box::pin(next_upcoming(&ctx, 1));
    let first = stream
        .next()
        .await
        .expect("item")
        .expect("graduate");
    assert_eq!(first.id, upcoming[0].id);

    sequencer::advance(&ctx, RoundNumber(1)).await.expect("advance");
    let restarted = collect_upcoming(&ctx, 3).await.expect("upcoming");
    assert_eq!(restarted[0].id, upcoming[1].id);

    let everyone = collect_upcoming(&ctx, 500).await.expect("upcoming");
    assert_eq!(everyone.len(), 39);
}

#[tokio::test]
async fn upcoming_skips_unassigned_graduates() {
    let ctx = support::context().await;
    support::faculty(&ctx, 1, "A", 3).await;
    support::partition(&ctx, &[1], &[(1, 1, 1)]).await;

    let upcoming = collect_upcoming(&ctx, 10).await.expect("upcoming");
    assert_eq!(upcoming.len(), 1);
}

#[tokio::test]
async fn snapshot_splits_first_from_following() {
    let ctx = support::context().await;
    support::faculty(&ctx, 1, "A", 4).await;
    support::partition(&ctx, &[1], &[(1, 1, 4)]).await;
    let Advance::Called(_) = sequencer::advance(&ctx, RoundNumber(1))
        .await
        .expect("advance")
    else {
        panic!("expected a call");
    };

    let snapshot = snapshot(&ctx, 2).await.expect("snapshot");
    assert_eq!(snapshot.first_graduate.expect("first").first_name, "A-2");
    let following: Vec<_> = snapshot
        .next_graduates
        .iter()
        .map(|g| g.first_name.as_str())
        .collect();
    assert_eq!(following, vec!["A-3", "A-4"]);
    assert!(!snapshot.all_rounds_complete);
    assert_eq!(
        snapshot.graduate_summary,
        CeremonyTotals {
            total_graduates: 4,
            received: 1,
            not_received: 3,
        }
    );
}
