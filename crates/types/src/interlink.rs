//! Interlink computation.
//!
//! Each block commits to a skiplist over its ancestors: entry 0 is always
//! the genesis hash, and entry `i + 1` is the most recent ancestor whose
//! hash reaches level `i`. A hash's level is its count of leading zero
//! bits, so higher entries point exponentially further back. The merkle
//! root of the list lands in the header as `interlink_root`.

use crate::Hash;

/// The interlink level of a block hash.
pub fn interlink_level(hash: &Hash) -> u32 {
    hash.leading_zero_bits()
}

/// Compute the interlink list for the child of the given parent.
///
/// `parent_links` is the parent's own interlink list, empty only when the
/// parent is genesis.
pub fn next_interlinks(genesis_hash: Hash, parent_hash: Hash, parent_links: &[Hash]) -> Vec<Hash> {
    let mut links = if parent_links.is_empty() {
        vec![genesis_hash]
    } else {
        parent_links.to_vec()
    };

    if parent_hash == genesis_hash {
        return links;
    }

    let level = interlink_level(&parent_hash);
    for i in 0..=level {
        let idx = i as usize + 1;
        if idx < links.len() {
            links[idx] = parent_hash;
        } else {
            links.push(parent_hash);
        }
    }
    links
}
