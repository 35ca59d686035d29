//! Convergence scenarios across independently ordered replicas.

use proptest::prelude::*;
use skein_crdt::{LineCol, Operation, PositionAllocator, Position, Replica};
use uuid::Uuid;

fn site(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

fn apply_all(replica: &mut Replica, ops: impl IntoIterator<Item = Operation>) {
    for op in ops {
        replica.apply_remote(op).unwrap();
    }
}

#[test]
fn test_reverse_delivery_of_hi() {
    let mut a = Replica::with_seed(site(1), 10);
    let mut b = Replica::with_seed(site(2), 20);

    let h = a.local_insert("h", LineCol::new(0, 0)).unwrap();
    let i = a.local_insert("i", LineCol::new(0, 1)).unwrap();

    apply_all(&mut b, i);
    apply_all(&mut b, h);
    assert_eq!(a.to_text(), "hi");
    assert_eq!(b.to_text(), "hi");
}

#[test]
fn test_concurrent_inserts_at_same_boundary() {
    let mut a = Replica::with_seed(site(1), 7);
    let mut b = Replica::with_seed(site(2), 7);

    let base = a.local_insert("[]", LineCol::new(0, 0)).unwrap();
    apply_all(&mut b, base);

    let from_a = a.local_insert("x", LineCol::new(0, 1)).unwrap();
    let from_b = b.local_insert("y", LineCol::new(0, 1)).unwrap();
    assert_ne!(from_a[0].character.position, from_b[0].character.position);

    apply_all(&mut a, from_b);
    apply_all(&mut b, from_a);
    assert_eq!(a.to_text(), b.to_text());
    assert_eq!(a.to_text().len(), 4);
}

#[test]
fn test_three_sites_any_delivery_order() {
    let mut a = Replica::with_seed(site(1), 1);
    let mut b = Replica::with_seed(site(2), 2);
    let mut c = Replica::with_seed(site(3), 3);

    let seed = a.local_insert("line one\nline two", LineCol::new(0, 0)).unwrap();
    apply_all(&mut b, seed.clone());
    apply_all(&mut c, seed);
    let base = b.snapshot();

    let mut ops = Vec::new();
    ops.extend(a.local_insert("A", LineCol::new(0, 4)).unwrap());
    ops.extend(b.local_delete(LineCol::new(0, 8), LineCol::new(1, 0)).unwrap());
    ops.extend(c.local_insert("C\n", LineCol::new(1, 0)).unwrap());
    ops.extend(c.local_delete(LineCol::new(2, 0), LineCol::new(2, 4)).unwrap());

    let mut forward = Replica::with_seed(site(10), 0);
    let mut backward = Replica::with_seed(site(11), 0);
    let mut rotated = Replica::with_seed(site(12), 0);
    // Everyone starts from the seeded text.
    for r in [&mut forward, &mut backward, &mut rotated] {
        assert!(r.adopt_snapshot(base.clone()).unwrap());
    }

    apply_all(&mut forward, ops.clone());
    apply_all(&mut backward, ops.iter().rev().cloned());
    let mid = ops.len() / 2;
    apply_all(&mut rotated, ops[mid..].iter().chain(&ops[..mid]).cloned());

    apply_all(&mut a, ops.clone());
    apply_all(&mut b, ops.clone());
    apply_all(&mut c, ops.clone());

    let text = forward.to_text();
    assert_eq!(backward.to_text(), text);
    assert_eq!(rotated.to_text(), text);
    assert_eq!(a.to_text(), text);
    assert_eq!(b.to_text(), text);
    assert_eq!(c.to_text(), text);
    assert_eq!(text, "lineA oneC\n two");
    assert_eq!(forward.pending_deletes(), 0);
    assert_eq!(backward.pending_deletes(), 0);
}

#[test]
fn test_delete_waits_for_its_insert() {
    let mut a = Replica::with_seed(site(1), 4);
    let mut b = Replica::with_seed(site(2), 5);

    let insert = a.local_insert("z", LineCol::new(0, 0)).unwrap();
    let delete = a.local_delete(LineCol::new(0, 0), LineCol::new(0, 1)).unwrap();

    apply_all(&mut b, delete);
    assert_eq!(b.to_text(), "");
    assert_eq!(b.pending_deletes(), 1);

    let outcome = b.apply_remote(insert[0].clone()).unwrap();
    assert!(outcome.fresh);
    assert_eq!(b.to_text(), "");
    assert_eq!(b.pending_deletes(), 0);
}

#[test]
fn test_reapplying_everything_is_idempotent() {
    let mut a = Replica::with_seed(site(1), 8);
    let mut b = Replica::with_seed(site(2), 9);

    let mut ops = a.local_insert("abc\ndef", LineCol::new(0, 0)).unwrap();
    ops.extend(a.local_delete(LineCol::new(0, 1), LineCol::new(1, 1)).unwrap());

    apply_all(&mut b, ops.clone());
    let once = b.to_text();
    for op in ops {
        assert!(!b.apply_remote(op).unwrap().fresh);
    }
    assert_eq!(b.to_text(), once);
    assert_eq!(once, a.to_text());
}

#[test]
fn test_version_exceptions_across_gaps() {
    let mut a = Replica::with_seed(site(1), 1);
    let mut b = Replica::with_seed(site(2), 2);
    let ops = a.local_insert("123", LineCol::new(0, 0)).unwrap();

    b.apply_remote(ops[0].clone()).unwrap();
    b.apply_remote(ops[2].clone()).unwrap();
    assert!(!b.vector().has_been_applied(a.site_id(), 2));

    b.apply_remote(ops[1].clone()).unwrap();
    let version = b.vector().get(&a.site_id()).unwrap();
    assert_eq!(version.counter, 3);
    assert!(version.exceptions.is_empty());
    assert_eq!(b.to_text(), "123");
}

proptest! {
    #[test]
    fn prop_allocation_stays_between(
        seed in any::<u64>(),
        picks in prop::collection::vec(any::<prop::sample::Index>(), 1..120),
    ) {
        let mut alloc = PositionAllocator::with_seed(site(1), seed);
        let mut sorted: Vec<Position> = Vec::new();

        for pick in picks {
            let slot = pick.index(sorted.len() + 1);
            let low = if slot == 0 { Position::empty() } else { sorted[slot - 1].clone() };
            let high = sorted.get(slot).cloned().unwrap_or_default();

            let next = alloc.allocate_between(&low, &high);
            prop_assert!(low < next);
            prop_assert!(high.is_empty() || next < high);
            sorted.insert(slot, next);
        }
    }

    #[test]
    fn prop_shuffled_delivery_converges(
        edits in prop::collection::vec((any::<bool>(), any::<prop::sample::Index>(), "[a-c\n]{1,3}"), 1..25),
        order in any::<u64>(),
    ) {
        let mut author_a = Replica::with_seed(site(1), 100);
        let mut author_b = Replica::with_seed(site(2), 200);
        let mut ops = Vec::new();

        for (by_a, at, text) in &edits {
            let author = if *by_a { &mut author_a } else { &mut author_b };
            let lines = author.store().lines();
            let line = at.index(lines.len());
            let ch = at.index(lines[line].len() + 1).min(
                lines[line].len() - usize::from(lines[line].last().is_some_and(|c| c.is_newline())),
            );
            if at.index(3) == 0 && author.total_chars() > 0 {
                let end = LineCol::new(line, (ch + 1).min(lines[line].len()));
                ops.extend(author.local_delete(LineCol::new(line, ch), end).unwrap());
            } else {
                ops.extend(author.local_insert(text, LineCol::new(line, ch)).unwrap());
            }
        }

        let mut shuffled = ops.clone();
        let mut state = order;
        for i in (1..shuffled.len()).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            shuffled.swap(i, (state >> 33) as usize % (i + 1));
        }

        let mut in_order = Replica::with_seed(site(3), 0);
        let mut out_of_order = Replica::with_seed(site(4), 0);
        apply_all(&mut in_order, ops);
        apply_all(&mut out_of_order, shuffled);

        prop_assert_eq!(in_order.to_text(), out_of_order.to_text());
        prop_assert_eq!(out_of_order.pending_deletes(), 0);
    }
}
