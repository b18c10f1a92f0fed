//! The swap-or-not shuffle over validator indices.

use types::Hash256;

use ethereum_hashing::hash;

const SEED_SIZE: usize = 32;
const ROUND_SIZE: usize = 1;
const POSITION_WINDOW_SIZE: usize = 4;
const PIVOT_VIEW_SIZE: usize = SEED_SIZE + ROUND_SIZE;
const TOTAL_SIZE: usize = SEED_SIZE + ROUND_SIZE + POSITION_WINDOW_SIZE;

/// Maps `index` to its shuffled position in a list of `list_size` elements.
///
/// Returns `None` for an empty list or an out-of-range index. The mapping is
/// a bijection for any fixed `(seed, list_size, rounds)`.
pub fn compute_shuffled_index(
    index: usize,
    list_size: usize,
    seed: &Hash256,
    rounds: u8,
) -> Option<usize> {
    if list_size == 0 || index >= list_size || list_size > 2_usize.pow(24) {
        return None;
    }

    let mut index = index;
    let mut buf = [0_u8; TOTAL_SIZE];
    buf[0..SEED_SIZE].copy_from_slice(seed.as_bytes());

    for round in 0..rounds {
        buf[SEED_SIZE] = round;

        let pivot = {
            let digest = hash(&buf[0..PIVOT_VIEW_SIZE]);
            let mut eight = [0_u8; 8];
            eight.copy_from_slice(&digest[0..8]);
            u64::from_le_bytes(eight) as usize % list_size
        };

        let flip = (pivot + (list_size - index)) % list_size;
        let position = std::cmp::max(index, flip);

        buf[PIVOT_VIEW_SIZE..].copy_from_slice(&((position / 256) as u32).to_le_bytes());
        let source = hash(&buf);

        let byte = source[(position % 256) / 8];
        let bit = (byte >> (position % 8)) % 2;

        if bit == 1 {
            index = flip;
        }
    }

    Some(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_none_for_degenerate_input() {
        assert_eq!(compute_shuffled_index(0, 0, &Hash256::zero(), 10), None);
        assert_eq!(compute_shuffled_index(10, 10, &Hash256::zero(), 10), None);
    }

    #[test]
    fn is_a_permutation() {
        let seed = Hash256::repeat_byte(0x42);
        let list_size = 100;
        let mut seen = vec![false; list_size];
        for i in 0..list_size {
            let shuffled = compute_shuffled_index(i, list_size, &seed, 10).unwrap();
            assert!(!seen[shuffled]);
            seen[shuffled] = true;
        }
    }

    #[test]
    fn seed_changes_the_permutation() {
        let a: Vec<_> = (0..50)
            .map(|i| compute_shuffled_index(i, 50, &Hash256::repeat_byte(1), 10).unwrap())
            .collect();
        let b: Vec<_> = (0..50)
            .map(|i| compute_shuffled_index(i, 50, &Hash256::repeat_byte(2), 10).unwrap())
            .collect();
        assert_ne!(a, b);
    }
}
