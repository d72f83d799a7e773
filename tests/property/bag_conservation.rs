//! Conservation properties of the countdown workload under the bag
//! contract: split, merge, process, and wire transfer never lose or
//! duplicate units.

use proptest::prelude::*;
use workbag::demo::{CountFold, CountdownBag};
use workbag::{decode_fragment, encode_fragment, Bag};

/// Build a bag with an explicit bucket layout via the public surface.
fn bag_from(slots: &[u64]) -> CountdownBag {
    let mut shaped = CountdownBag::empty();
    for &units in slots {
        shaped.merge(CountdownBag::seeded(units, 1));
    }
    shaped
}

proptest! {
    #[test]
    fn split_partitions_the_remaining_units(slots in prop::collection::vec(0u64..500, 1..12)) {
        let mut bag = CountdownBag::seeded(slots.iter().sum(), slots.len());
        let before = bag.remaining();
        match bag.split(false) {
            Some(frag) => {
                prop_assert!(before >= 2);
                prop_assert!(frag.remaining() > 0);
                prop_assert_eq!(frag.processed(), 0);
                prop_assert_eq!(bag.remaining() + frag.remaining(), before);
            }
            None => prop_assert!(before < 2),
        }
    }

    #[test]
    fn split_then_merge_is_an_identity_on_totals(total in 0u64..10_000, buckets in 1usize..8) {
        let mut bag = CountdownBag::seeded(total, buckets);
        if let Some(frag) = bag.split(false) {
            bag.merge(frag);
        }
        prop_assert_eq!(bag.remaining(), total);
        prop_assert_eq!(bag.processed(), 0);
    }

    #[test]
    fn processing_in_arbitrary_steps_counts_every_unit(
        total in 1u64..5_000,
        steps in prop::collection::vec(1usize..700, 1..50),
    ) {
        let mut bag = CountdownBag::seeded(total, 3);
        let mut fold = CountFold::default();
        for step in steps {
            bag.process(step, &mut fold);
            if bag.is_empty() {
                break;
            }
        }
        // Finish whatever the step schedule left over.
        while !bag.is_empty() {
            bag.process(1_000, &mut fold);
        }
        bag.submit(&mut fold);
        prop_assert_eq!(fold.count, total);
    }

    #[test]
    fn repeated_splitting_partitions_without_loss(total in 2u64..20_000) {
        let mut bag = CountdownBag::seeded(total, 5);
        let mut fragments = Vec::new();
        while let Some(frag) = bag.split(false) {
            fragments.push(frag);
            if fragments.len() >= 64 {
                break;
            }
        }
        let scattered: u64 = fragments.iter().map(CountdownBag::remaining).sum();
        prop_assert_eq!(bag.remaining() + scattered, total);
        // Fragments are disjoint: merging them all back restores the bag.
        for frag in fragments {
            bag.merge(frag);
        }
        prop_assert_eq!(bag.remaining(), total);
    }

    #[test]
    fn wire_transfer_preserves_fragments(slots in prop::collection::vec(0u64..100, 1..10)) {
        let bag = bag_from(&slots);
        let total = bag.remaining();
        let env = encode_fragment(0, &bag).expect("encode");
        let back: CountdownBag = decode_fragment(1, &env).expect("decode");
        prop_assert_eq!(back.remaining(), total);
        prop_assert_eq!(back.processed(), bag.processed());
    }
}
