use super::entry::{Entry, HEADER_SIZE};

/// An offset of a header inside the [`Buffer`], that is validated and known to
/// be safe.
///
/// Such an offset is only produced by walking the block list (or by following
/// the links of an entry obtained that way), therefore it always points to the
/// start of a header, that is part of the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ValidatedOffset(usize);
impl ValidatedOffset {
    /// The offset of the very first header, which is always at the start of
    /// the buffer.
    pub const HEAD: Self = Self(0);

    /// The raw byte offset into the buffer.
    pub const fn get(self) -> usize {
        self.0
    }

    /// The byte offset of the payload following the header.
    pub const fn payload(self) -> usize {
        self.0 + HEADER_SIZE
    }
}

/// Statically sized, zero-initialized storage for a pool.
///
/// The storage is aligned to 16 bytes, so that every header and payload is
/// aligned as long as all sizes are multiples of 16. Since it is zeroed, a
/// `static` of this type is placed in `.bss` instead of `.data`.
#[repr(C, align(16))]
pub struct HeapMemory<const N: usize>([u8; N]);
impl<const N: usize> HeapMemory<N> {
    /// Create new zero-filled storage.
    pub const fn new() -> Self {
        Self([0; N])
    }
}
impl<const N: usize> Default for HeapMemory<N> {
    fn default() -> Self {
        Self::new()
    }
}
impl<const N: usize> AsRef<[u8]> for HeapMemory<N> {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
impl<const N: usize> AsMut<[u8]> for HeapMemory<N> {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

/// The buffer memory backing the pool.
///
/// The buffer does not track any state besides the bytes of the storage: all
/// the headers live inside the storage itself. Reads and writes of headers are
/// bounds-checked and panic on a violation, since that can only happen if the
/// block list got corrupted.
pub struct Buffer<S>(S);
impl<S> Buffer<S> {
    /// Wrap the given storage. The contents are not touched.
    pub const fn new(storage: S) -> Self {
        Self(storage)
    }

    /// Give back the storage.
    pub fn into_inner(self) -> S {
        self.0
    }
}
impl<S: AsRef<[u8]> + AsMut<[u8]>> Buffer<S> {
    /// The total number of bytes of the storage.
    pub fn len(&self) -> usize {
        self.0.as_ref().len()
    }

    /// The raw bytes of the storage.
    pub fn bytes(&self) -> &[u8] {
        self.0.as_ref()
    }

    /// The raw bytes of the storage.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.0.as_mut()
    }

    /// Write the initial header: a single free block spanning the whole
    /// buffer (minus its own header).
    ///
    /// # Panics
    /// This function panics if the buffer is not larger than a header.
    pub fn initialize(&mut self) {
        assert!(self.len() > HEADER_SIZE, "buffer too small for a header");
        let remaining_size = self.len() - HEADER_SIZE;
        self.write(0, Entry::free(remaining_size));
    }

    /// Decode the header at an arbitrary offset.
    ///
    /// # Panics
    /// This function panics if the header would be read past the end of the
    /// buffer.
    fn at(&self, offset: usize) -> Entry {
        assert!(offset + HEADER_SIZE <= self.len(), "header out of bounds");

        let mut raw = [0; HEADER_SIZE];
        raw.copy_from_slice(&self.bytes()[offset..offset + HEADER_SIZE]);
        Entry::from_raw(&raw)
    }

    /// Encode a header at an arbitrary offset.
    ///
    /// # Panics
    /// This function panics if the header would be written past the end of
    /// the buffer.
    fn write(&mut self, offset: usize, entry: Entry) {
        assert!(offset + HEADER_SIZE <= self.len(), "header out of bounds");

        self.bytes_mut()[offset..offset + HEADER_SIZE].copy_from_slice(&entry.as_raw());
    }

    /// Read the entry at a [`ValidatedOffset`].
    pub fn get(&self, offset: ValidatedOffset) -> Entry {
        self.at(offset.0)
    }

    /// Overwrite the entry at a [`ValidatedOffset`].
    pub fn set(&mut self, offset: ValidatedOffset, entry: Entry) {
        self.write(offset.0, entry);
    }

    /// Place a brand-new header at `offset`.
    ///
    /// This is used when splitting a block: the caller is responsible for
    /// choosing an offset inside the span of the block being split and for
    /// linking the new entry into the list.
    pub fn insert(&mut self, offset: usize, entry: Entry) -> ValidatedOffset {
        self.write(offset, entry);
        ValidatedOffset(offset)
    }

    /// Turn a link stored in an entry into a [`ValidatedOffset`].
    ///
    /// # Panics
    /// This function panics if the link points outside of the buffer.
    pub fn follow(&self, link: Option<usize>) -> Option<ValidatedOffset> {
        link.map(|offset| {
            assert!(offset + HEADER_SIZE <= self.len(), "corrupted block link");
            ValidatedOffset(offset)
        })
    }

    /// Check whether `offset` is the start of a header in the block list.
    ///
    /// This scans the list linearly, so arbitrary user input can be turned
    /// into a [`ValidatedOffset`] without trusting it.
    pub fn validate(&self, offset: usize) -> Option<ValidatedOffset> {
        self.entries()
            .take_while(|entry| entry.0 <= offset)
            .find(|entry| entry.0 == offset)
    }

    /// Iterate over all entries in address order and obtain the
    /// [`ValidatedOffset`]s.
    ///
    /// The buffer has to be [initialized](Self::initialize).
    pub fn entries(&self) -> EntryIter<'_, S> {
        EntryIter::new(self)
    }

    /// Request the payload memory of the entry at a [`ValidatedOffset`].
    pub fn memory_of(&self, offset: ValidatedOffset) -> &[u8] {
        let size = self.get(offset).size();
        let start = offset.payload();
        &self.bytes()[start..start + size]
    }

    /// Request the mutable payload memory of the entry at a
    /// [`ValidatedOffset`].
    pub fn memory_of_mut(&mut self, offset: ValidatedOffset) -> &mut [u8] {
        let size = self.get(offset).size();
        let start = offset.payload();
        &mut self.bytes_mut()[start..start + size]
    }
}

pub struct EntryIter<'buffer, S> {
    buffer: &'buffer Buffer<S>,
    offset: Option<ValidatedOffset>,
}
impl<'buffer, S> EntryIter<'buffer, S> {
    /// Create an entry iterator over the given [`Buffer`].
    pub const fn new(buffer: &'buffer Buffer<S>) -> Self {
        Self {
            buffer,
            offset: Some(ValidatedOffset::HEAD),
        }
    }
}
impl<'buffer, S: AsRef<[u8]> + AsMut<[u8]>> Iterator for EntryIter<'buffer, S> {
    type Item = ValidatedOffset;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.offset?;
        let next = self.buffer.follow(self.buffer.get(offset).next());
        // the list is address-ordered, which also guarantees termination
        if let Some(next) = next {
            assert!(next > offset, "corrupted block list");
        }
        self.offset = next;
        Some(offset)
    }
}
