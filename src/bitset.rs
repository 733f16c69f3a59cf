//! A growable set of bit indices backed by machine words (§3 `BitSet`).

const WORD_BITS: usize = 64;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BitSet {
    words: Vec<u64>,
}

impl BitSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bit_capacity(bits: usize) -> Self {
        Self {
            words: vec![0u64; (bits + WORD_BITS - 1) / WORD_BITS],
        }
    }

    /// Builds a `BitSet` from a raw byte buffer, LSB-first per byte, as
    /// produced by `BinaryReader::bitset_stream` and the live-memory
    /// `DynamicBitset` layout (§4.A, §4.I).
    pub fn from_bytes(bytes: &[u8], bit_count: usize) -> Self {
        let mut set = Self::with_bit_capacity(bit_count);
        for (byte_idx, byte) in bytes.iter().enumerate() {
            for bit in 0..8 {
                let index = byte_idx * 8 + bit;
                if index >= bit_count {
                    break;
                }
                if byte & (1 << bit) != 0 {
                    set.insert(index);
                }
            }
        }
        set.trim();
        set
    }

    pub fn insert(&mut self, index: usize) {
        let word = index / WORD_BITS;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (index % WORD_BITS);
    }

    pub fn contains(&self, index: usize) -> bool {
        self.words
            .get(index / WORD_BITS)
            .map_or(false, |w| w & (1 << (index % WORD_BITS)) != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(word_idx, &word)| {
            (0..WORD_BITS).filter_map(move |bit| {
                (word & (1 << bit) != 0).then_some(word_idx * WORD_BITS + bit)
            })
        })
    }

    /// Restores the invariant that the trailing word is nonzero unless the
    /// set is empty.
    fn trim(&mut self) {
        while matches!(self.words.last(), Some(0)) {
            self.words.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_word_invariant_holds_after_trim() {
        let mut set = BitSet::with_bit_capacity(128);
        set.insert(3);
        assert!(!set.words.is_empty());
        // construct from bytes whose trailing byte is zero
        let set2 = BitSet::from_bytes(&[0b0000_1000, 0x00], 16);
        assert_eq!(set2.words.len(), 1);
        assert!(set2.contains(3));
    }

    #[test]
    fn empty_set_has_no_words() {
        let set = BitSet::new();
        assert!(set.is_empty());
        assert!(set.words.is_empty());
    }

    #[test]
    fn iter_yields_set_bits_in_order() {
        let set = BitSet::from_bytes(&[0b0000_0101], 8);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 2]);
    }
}
