// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Shared checks for the unit tests.

use crate::address_space::{Backing, Block, BlockInfo, VaType};

/// Assert the at-rest invariants of a block list snapshot.
pub(crate) fn assert_invariants<V: VaType, P: Backing, E: BlockInfo>(blocks: &[Block<V, P, E>]) {
    let (first, last) = match (blocks.first(), blocks.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => panic!("block list is empty"),
    };
    assert_eq!(first.virt, V::ZERO, "first block must start at 0");
    assert!(last.is_unmapped(), "terminator must be unmapped: {last:?}");

    for pair in blocks.windows(2) {
        assert!(pair[0].virt < pair[1].virt, "unsorted blocks: {pair:?}");
        assert!(!pair[0].continues_into(&pair[1]), "unmerged blocks: {pair:?}");
    }
    for block in blocks.iter().filter(|b| b.is_unmapped()) {
        assert_eq!(block.extra, E::default(), "hole carries extra info: {block:?}");
    }
}
