/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! A dense bitset over a fixed universe of small integers, used for
//! per-block liveness sets.

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitSet {
    bits: Vec<u64>,
}

const BITS_PER_WORD: usize = 64;

impl BitSet {
    pub fn with_capacity(n: usize) -> Self {
        let quot = n / BITS_PER_WORD;
        let rem = n % BITS_PER_WORD;
        let no_of_words = quot + (rem != 0) as usize;
        Self {
            bits: vec![0; no_of_words],
        }
    }

    #[inline(always)]
    pub fn insert(&mut self, el: usize) {
        let word = el / BITS_PER_WORD;
        let bit = el % BITS_PER_WORD;
        self.bits[word] |= 1u64 << bit;
    }

    #[inline(always)]
    pub fn remove(&mut self, el: usize) {
        let word = el / BITS_PER_WORD;
        let bit = el % BITS_PER_WORD;
        self.bits[word] &= !(1u64 << bit);
    }

    #[inline(always)]
    pub fn contains(&self, el: usize) -> bool {
        let word = el / BITS_PER_WORD;
        let bit = el % BITS_PER_WORD;
        self.bits[word] & (1u64 << bit) != 0
    }

    pub fn clear(&mut self) {
        for word in self.bits.iter_mut() {
            *word = 0;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&word| word == 0)
    }

    /// Union `other` into `self`; returns true if `self` changed.
    /// Both sets must be over the same universe.
    pub fn union_with(&mut self, other: &Self) -> bool {
        debug_assert_eq!(self.bits.len(), other.bits.len());
        let mut changed = false;
        for (word, &other_word) in self.bits.iter_mut().zip(other.bits.iter()) {
            let new = *word | other_word;
            changed |= new != *word;
            *word = new;
        }
        changed
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter().enumerate().flat_map(|(word_idx, &word)| {
            let mut word = word;
            core::iter::from_fn(move || {
                if word == 0 {
                    None
                } else {
                    let bit = word.trailing_zeros() as usize;
                    word &= word - 1;
                    Some(word_idx * BITS_PER_WORD + bit)
                }
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_remove_contains() {
        let mut set = BitSet::with_capacity(200);
        assert!(set.is_empty());
        set.insert(0);
        set.insert(63);
        set.insert(64);
        set.insert(199);
        assert!(set.contains(0));
        assert!(set.contains(63));
        assert!(set.contains(64));
        assert!(set.contains(199));
        assert!(!set.contains(1));
        assert!(!set.contains(65));
        set.remove(64);
        assert!(!set.contains(64));
        assert!(!set.is_empty());
        set.clear();
        assert!(set.is_empty());
    }

    #[test]
    fn iter_in_order() {
        let mut set = BitSet::with_capacity(300);
        for &el in &[5, 7, 63, 64, 130, 299] {
            set.insert(el);
        }
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![5, 7, 63, 64, 130, 299]);
    }

    #[test]
    fn union() {
        let mut a = BitSet::with_capacity(128);
        let mut b = BitSet::with_capacity(128);
        a.insert(3);
        b.insert(90);
        assert!(a.union_with(&b));
        assert!(!a.union_with(&b));
        assert!(a.contains(3));
        assert!(a.contains(90));
    }
}
