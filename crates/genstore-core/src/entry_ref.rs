//! Compact entry references and their bit layouts.
//!
//! An [`EntryRef`] is an opaque 32-bit handle. The [`RefType`] in use
//! decides how those bits split between a buffer id and an offset within
//! the buffer. Handles are copied freely; they denote a location, not
//! ownership of the element stored there.

use std::fmt;

use crate::id::BufferId;

/// Opaque handle to an element (or array of elements) in a data store.
///
/// The raw value `0` is reserved as the invalid reference: the first
/// array of buffer 0 is never handed out, so no successful allocation can
/// return it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[must_use]
pub struct EntryRef(u32);

impl EntryRef {
    /// Wrap a raw 32-bit value.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The reserved invalid reference.
    pub const fn invalid() -> Self {
        Self(0)
    }

    /// Whether this reference may point at an element.
    pub const fn valid(self) -> bool {
        self.0 != 0
    }

    /// The raw packed value.
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for EntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryRef({:#x})", self.0)
    }
}

/// A bit layout for packing `(buffer_id, offset)` into an [`EntryRef`].
///
/// The offset is counted in *units*: for [`EntryRefT`] a unit is one array
/// of the buffer's array size, for [`AlignedEntryRefT`] a unit is a fixed
/// power-of-two number of elements. The element index of a reference is
/// always `offset * unit_size(array_size)`.
pub trait RefType: Copy + fmt::Debug + PartialEq + From<EntryRef> + Into<EntryRef> + 'static {
    /// Number of low bits holding the offset.
    const OFFSET_BITS: u32;

    /// Pack a buffer id and offset.
    ///
    /// # Panics
    ///
    /// Panics if either value does not fit the layout. Exceeding the layout
    /// is a sizing error upstream, not a recoverable condition.
    fn new(offset: usize, buffer_id: BufferId) -> Self;

    /// The offset in units.
    fn offset(self) -> usize;

    /// The owning buffer.
    fn buffer_id(self) -> BufferId;

    /// Elements covered by one offset unit in a buffer of the given array size.
    fn unit_size(array_size: usize) -> usize;

    /// Number of buffer ids the layout can address.
    fn num_buffers() -> u32 {
        1u32 << (32 - Self::OFFSET_BITS)
    }

    /// Number of distinct offsets the layout can address.
    fn offset_size() -> usize {
        1usize << Self::OFFSET_BITS
    }

    /// Round `num_elems` up to a whole number of offset units.
    fn pad(num_elems: usize, array_size: usize) -> usize {
        let unit = Self::unit_size(array_size);
        num_elems.div_ceil(unit) * unit
    }
}

fn pack(offset: usize, buffer_id: BufferId, offset_bits: u32) -> u32 {
    let offset_size = 1usize << offset_bits;
    let num_buffers = 1u64 << (32 - offset_bits);
    assert!(
        offset < offset_size,
        "entry ref offset {offset} out of range (limit {offset_size}, buffer {buffer_id})"
    );
    assert!(
        u64::from(buffer_id.0) < num_buffers,
        "entry ref buffer id {buffer_id} out of range (limit {num_buffers})"
    );
    (offset as u32) | (buffer_id.0 << offset_bits)
}

/// Layout with `OFFSET_BITS` offset bits counted in arrays.
///
/// The remaining `32 - OFFSET_BITS` bits address buffers. The default
/// store layout is `EntryRefT<22>`: 1024 buffers of up to 4M arrays each.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryRefT<const OFFSET_BITS: u32>(u32);

impl<const OFFSET_BITS: u32> EntryRefT<OFFSET_BITS> {
    const LAYOUT_OK: () = assert!(OFFSET_BITS > 0 && OFFSET_BITS < 32);

    /// Pack a buffer id and offset (in arrays).
    pub fn new(offset: usize, buffer_id: BufferId) -> Self {
        let () = Self::LAYOUT_OK;
        Self(pack(offset, buffer_id, OFFSET_BITS))
    }

    /// The raw packed value.
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl<const OFFSET_BITS: u32> RefType for EntryRefT<OFFSET_BITS> {
    const OFFSET_BITS: u32 = OFFSET_BITS;

    fn new(offset: usize, buffer_id: BufferId) -> Self {
        EntryRefT::new(offset, buffer_id)
    }

    fn offset(self) -> usize {
        (self.0 & ((1u32 << OFFSET_BITS) - 1)) as usize
    }

    fn buffer_id(self) -> BufferId {
        BufferId(self.0 >> OFFSET_BITS)
    }

    fn unit_size(array_size: usize) -> usize {
        array_size
    }
}

impl<const OFFSET_BITS: u32> From<EntryRef> for EntryRefT<OFFSET_BITS> {
    fn from(r: EntryRef) -> Self {
        Self(r.raw())
    }
}

impl<const OFFSET_BITS: u32> From<EntryRefT<OFFSET_BITS>> for EntryRef {
    fn from(r: EntryRefT<OFFSET_BITS>) -> Self {
        EntryRef::new(r.0)
    }
}

impl<const OFFSET_BITS: u32> fmt::Debug for EntryRefT<OFFSET_BITS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EntryRefT(buffer={}, offset={})",
            self.buffer_id(),
            self.offset()
        )
    }
}

/// Layout whose offset counts fixed runs of `1 << ALIGN_BITS` elements.
///
/// Used for raw, variable-length spans: a buffer can hold
/// `offset_size() << ALIGN_BITS` elements, at the cost of padding each
/// allocation to the alignment.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlignedEntryRefT<const OFFSET_BITS: u32, const ALIGN_BITS: u32>(u32);

impl<const OFFSET_BITS: u32, const ALIGN_BITS: u32> AlignedEntryRefT<OFFSET_BITS, ALIGN_BITS> {
    const LAYOUT_OK: () = assert!(OFFSET_BITS > 0 && OFFSET_BITS < 32 && ALIGN_BITS < 16);

    /// Pack a buffer id and an offset (in alignment units).
    pub fn new(offset: usize, buffer_id: BufferId) -> Self {
        let () = Self::LAYOUT_OK;
        Self(pack(offset, buffer_id, OFFSET_BITS))
    }

    /// Elements per offset unit.
    pub const fn alignment() -> usize {
        1usize << ALIGN_BITS
    }
}

impl<const OFFSET_BITS: u32, const ALIGN_BITS: u32> RefType
    for AlignedEntryRefT<OFFSET_BITS, ALIGN_BITS>
{
    const OFFSET_BITS: u32 = OFFSET_BITS;

    fn new(offset: usize, buffer_id: BufferId) -> Self {
        AlignedEntryRefT::new(offset, buffer_id)
    }

    fn offset(self) -> usize {
        (self.0 & ((1u32 << OFFSET_BITS) - 1)) as usize
    }

    fn buffer_id(self) -> BufferId {
        BufferId(self.0 >> OFFSET_BITS)
    }

    fn unit_size(_array_size: usize) -> usize {
        Self::alignment()
    }
}

impl<const OFFSET_BITS: u32, const ALIGN_BITS: u32> From<EntryRef>
    for AlignedEntryRefT<OFFSET_BITS, ALIGN_BITS>
{
    fn from(r: EntryRef) -> Self {
        Self(r.raw())
    }
}

impl<const OFFSET_BITS: u32, const ALIGN_BITS: u32> From<AlignedEntryRefT<OFFSET_BITS, ALIGN_BITS>>
    for EntryRef
{
    fn from(r: AlignedEntryRefT<OFFSET_BITS, ALIGN_BITS>) -> Self {
        EntryRef::new(r.0)
    }
}

impl<const OFFSET_BITS: u32, const ALIGN_BITS: u32> fmt::Debug
    for AlignedEntryRefT<OFFSET_BITS, ALIGN_BITS>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AlignedEntryRefT(buffer={}, offset={}, align={})",
            self.buffer_id(),
            self.offset(),
            Self::alignment()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Ref22 = EntryRefT<22>;

    #[test]
    fn zero_is_invalid() {
        assert!(!EntryRef::invalid().valid());
        assert!(!EntryRef::default().valid());
        let r: EntryRef = Ref22::new(0, BufferId(0)).into();
        assert_eq!(r, EntryRef::invalid());
    }

    #[test]
    fn layout_limits() {
        assert_eq!(Ref22::num_buffers(), 1024);
        assert_eq!(Ref22::offset_size(), 1 << 22);
        assert_eq!(EntryRefT::<31>::num_buffers(), 2);
    }

    #[test]
    fn buffer_id_occupies_high_bits() {
        let r = Ref22::new(5, BufferId(3));
        assert_eq!(r.raw(), 5 | (3 << 22));
        assert_eq!(r.offset(), 5);
        assert_eq!(r.buffer_id(), BufferId(3));
    }

    #[test]
    fn max_values_fit() {
        let r = Ref22::new((1 << 22) - 1, BufferId(1023));
        assert_eq!(r.raw(), u32::MAX);
        let back = Ref22::from(EntryRef::from(r));
        assert_eq!(back.offset(), (1 << 22) - 1);
        assert_eq!(back.buffer_id(), BufferId(1023));
    }

    #[test]
    #[should_panic(expected = "offset 4194304 out of range")]
    fn offset_overflow_panics() {
        let _ = Ref22::new(1 << 22, BufferId(0));
    }

    #[test]
    #[should_panic(expected = "buffer id 1024 out of range")]
    fn buffer_overflow_panics() {
        let _ = Ref22::new(0, BufferId(1024));
    }

    #[test]
    fn aligned_unit_and_padding() {
        type Aligned = AlignedEntryRefT<20, 2>;
        assert_eq!(Aligned::alignment(), 4);
        assert_eq!(<Aligned as RefType>::unit_size(1), 4);
        assert_eq!(Aligned::pad(5, 1), 8);
        assert_eq!(Aligned::pad(8, 1), 8);
        assert_eq!(Ref22::pad(5, 4), 8);
        assert_eq!(Ref22::pad(3, 1), 3);
    }

    #[test]
    fn display_shows_raw_hex() {
        assert_eq!(EntryRef::new(0x40_0001).to_string(), "EntryRef(0x400001)");
    }

    #[cfg(not(miri))]
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn pack_is_lossless(offset in 0usize..(1 << 22), buffer in 0u32..1024) {
                let r: EntryRef = EntryRefT::<22>::new(offset, BufferId(buffer)).into();
                let back = EntryRefT::<22>::from(r);
                prop_assert_eq!(back.offset(), offset);
                prop_assert_eq!(back.buffer_id(), BufferId(buffer));
                prop_assert_eq!(r.valid(), offset != 0 || buffer != 0);
            }
        }
    }
}
