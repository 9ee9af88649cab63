/// Tests for the per-entity event history: monotonic gap-free sequencing,
/// retention trimming, and explicit replay failure after a trim.
use specter_shared::{EventHistory, HistoryError, Visibility};

#[test]
fn sequence_numbers_are_gap_free_and_strictly_increasing() {
    let mut history = EventHistory::new();
    for i in 0..10u32 {
        let seq = history.add(Visibility::OtherClients, vec![i as u8], i as u64);
        assert_eq!(seq, i);
    }
    assert_eq!(history.next_seq(), 10);

    let seqs: Vec<_> = history.events().map(|event| event.seq).collect();
    assert_eq!(seqs, (0..10).collect::<Vec<_>>());
}

#[test]
fn resumed_history_continues_the_same_sequence() {
    let mut history = EventHistory::new();
    history.add(Visibility::OwnClient, vec![1], 0);
    history.add(Visibility::OwnClient, vec![2], 0);

    // simulate the handoff: serialize, carry across, keep appending
    let mut carried = history.clone();
    assert_eq!(carried.next_seq(), 2);
    let seq = carried.add(Visibility::OwnClient, vec![3], 5);
    assert_eq!(seq, 2);
}

#[test]
fn trim_respects_retention_and_floor() {
    let mut history = EventHistory::new();
    for i in 0..6u64 {
        history.add(Visibility::OtherClients, vec![], i);
    }

    // events at tick 0..=2 are older than the retention window at tick 12
    let removed = history.trim(12, 10, None);
    assert_eq!(removed, 3);
    assert_eq!(history.oldest_retained(), 3);

    // a floor pins still-referenced events regardless of age
    let removed = history.trim(100, 10, Some(4));
    assert_eq!(removed, 1);
    assert_eq!(history.oldest_retained(), 4);
}

#[test]
fn replay_from_a_retained_point_returns_the_tail() {
    let mut history = EventHistory::new();
    for i in 0..5u8 {
        history.add(Visibility::OtherClients, vec![i], 0);
    }
    let events = history.replay_from(3).unwrap();
    let payloads: Vec<_> = events.iter().map(|event| event.payload.clone()).collect();
    assert_eq!(payloads, vec![vec![3], vec![4]]);

    // replay from the very next sequence number is an empty, valid replay
    assert!(history.replay_from(5).unwrap().is_empty());
}

#[test]
fn replay_from_a_trimmed_point_fails_explicitly() {
    let mut history = EventHistory::new();
    for i in 0..5u64 {
        history.add(Visibility::OtherClients, vec![], i);
    }
    history.trim(100, 10, None);

    let result = history.replay_from(2);
    assert_eq!(
        result.unwrap_err(),
        HistoryError::AlreadyTrimmed {
            requested: 2,
            oldest: 5
        }
    );
}

#[test]
fn replay_from_the_future_fails_explicitly() {
    let history = EventHistory::new();
    let result = history.replay_from(1);
    assert_eq!(
        result.unwrap_err(),
        HistoryError::AheadOfHistory {
            requested: 1,
            next: 0
        }
    );
}
