//! The block header, which is stored in front of every block in the buffer.
use core::mem;

const WORD: usize = mem::size_of::<usize>();

/// The size of a single header in bytes.
///
/// A header consists of four machine words: the state, the payload size, the
/// offset of the previous header and the offset of the next header.
pub const HEADER_SIZE: usize = 4 * WORD;

/// The marker written into a link field if there is no such neighbor.
const NO_LINK: usize = usize::MAX;

/// The state of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// The block is available for allocation.
    Free,
    /// The block is handed out to a user.
    Used,
}

/// A decoded block header.
///
/// The `prev`/`next` links are byte offsets of the neighboring headers inside
/// the buffer. The list is address-ordered, so `prev` is always smaller and
/// `next` always larger than the offset of the entry itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    state: State,
    size: usize,
    prev: Option<usize>,
    next: Option<usize>,
}
impl Entry {
    /// Create a free, unlinked entry with the given payload size.
    pub const fn free(size: usize) -> Self {
        Self {
            state: State::Free,
            size,
            prev: None,
            next: None,
        }
    }

    /// Create a used, unlinked entry with the given payload size.
    pub const fn used(size: usize) -> Self {
        Self {
            state: State::Used,
            size,
            prev: None,
            next: None,
        }
    }

    /// Set the links of this entry.
    pub const fn linked(mut self, prev: Option<usize>, next: Option<usize>) -> Self {
        self.prev = prev;
        self.next = next;
        self
    }

    pub const fn state(&self) -> State {
        self.state
    }

    pub fn set_state(&mut self, state: State) {
        self.state = state;
    }

    pub const fn is_free(&self) -> bool {
        matches!(self.state, State::Free)
    }

    /// The size of the payload, i.e. excluding the header itself.
    pub const fn size(&self) -> usize {
        self.size
    }

    pub fn set_size(&mut self, size: usize) {
        self.size = size;
    }

    pub const fn prev(&self) -> Option<usize> {
        self.prev
    }

    pub fn set_prev(&mut self, prev: Option<usize>) {
        self.prev = prev;
    }

    pub const fn next(&self) -> Option<usize> {
        self.next
    }

    pub fn set_next(&mut self, next: Option<usize>) {
        self.next = next;
    }

    /// Encode the entry into its in-memory representation.
    pub const fn as_raw(&self) -> [u8; HEADER_SIZE] {
        let state = match self.state {
            State::Free => 0,
            State::Used => 1,
        };
        let words = [
            state,
            self.size,
            encode_link(self.prev),
            encode_link(self.next),
        ];

        let mut raw = [0; HEADER_SIZE];
        let mut word = 0;
        while word < words.len() {
            let bytes = words[word].to_ne_bytes();
            let mut i = 0;
            while i < WORD {
                raw[word * WORD + i] = bytes[i];
                i += 1;
            }
            word += 1;
        }
        raw
    }

    /// Decode an entry from its in-memory representation.
    ///
    /// Any non-zero state word is treated as a used block.
    pub fn from_raw(raw: &[u8; HEADER_SIZE]) -> Self {
        let word = |index: usize| {
            let mut bytes = [0; WORD];
            bytes.copy_from_slice(&raw[index * WORD..(index + 1) * WORD]);
            usize::from_ne_bytes(bytes)
        };

        Self {
            state: if word(0) == 0 { State::Free } else { State::Used },
            size: word(1),
            prev: decode_link(word(2)),
            next: decode_link(word(3)),
        }
    }
}

const fn encode_link(link: Option<usize>) -> usize {
    match link {
        Some(offset) => offset,
        None => NO_LINK,
    }
}

const fn decode_link(word: usize) -> Option<usize> {
    if word == NO_LINK {
        None
    } else {
        Some(word)
    }
}
