use crate::consts::{BITS_PER_BITMAP, BLOCK_SIZE};
use crate::error::{Corruption, FsError, Result};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

#[derive(Debug, PartialEq)]
pub enum State {
    Free,
    Used,
}

#[repr(C)]
#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, PartialEq)]
pub struct Bitmap {
    /// Stores 4096 bytes mapping each bit to a logical unit on disk. Bits are
    /// packed least significant first, so unit 0 is bit 0 of byte 0.
    bits: [u8; BLOCK_SIZE],
}

impl Bitmap {
    pub fn new() -> Self {
        Self::new_zeroed()
    }

    /// Reads a bitmap from a buffer of exactly BLOCK_SIZE bytes. Passing a slice
    /// of any other size will result in a panic.
    pub fn parse(buf: &[u8]) -> Self {
        let mut bmp = Self::new();
        bmp.bits.copy_from_slice(buf);
        bmp
    }

    pub fn serialize(&self) -> &[u8] {
        self.as_bytes()
    }

    pub fn get(&self, nr: usize) -> State {
        assert!(nr < BITS_PER_BITMAP);
        let mask = 0b01_u8 << (nr % 8);
        match self.bits[nr / 8] & mask {
            0 => State::Free,
            _ => State::Used,
        }
    }

    pub fn set_reserved(&mut self, nr: usize) {
        assert!(nr < BITS_PER_BITMAP);
        self.bits[nr / 8] |= 0b01_u8 << (nr % 8);
    }

    pub fn set_free(&mut self, nr: usize) {
        assert!(nr < BITS_PER_BITMAP);
        self.bits[nr / 8] &= !(0b01_u8 << (nr % 8));
    }
}

impl Default for Bitmap {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let used = self.bits.iter().map(|b| b.count_ones()).sum::<u32>();
        f.debug_struct("Bitmap").field("used", &used).finish()
    }
}

/// Walks a bitmap from the lowest index upward, yielding every free unit below
/// `cap`. Allocation always takes the first value, which keeps the allocation
/// order deterministic.
pub struct FreeIndices<'a> {
    /// Keeps track of the next starting place for looking for available units.
    marker: usize,
    bitmap: &'a Bitmap,
    /// One past the highest index that may be handed out.
    cap: usize,
}

impl<'a> Iterator for FreeIndices<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        while self.marker < self.cap {
            let i = self.marker;
            self.marker += 1;
            if let State::Free = self.bitmap.get(i) {
                return Some(i);
            }
        }
        None
    }
}

/// Hands out block or inode numbers from a single bitmap block.
///
/// `universe` is the number of units the bitmap covers. The first `reserved`
/// units belong to fixed metadata and are always marked used.
#[derive(Debug, Clone)]
pub struct Allocator {
    bitmap: Bitmap,
    universe: usize,
    reserved: usize,
}

impl Allocator {
    /// A fresh allocator with only the reserved prefix in use.
    pub fn new(universe: usize, reserved: usize) -> Self {
        assert!(universe <= BITS_PER_BITMAP);
        assert!(reserved <= universe);
        let mut bitmap = Bitmap::new();
        for nr in 0..reserved {
            bitmap.set_reserved(nr);
        }
        Self {
            bitmap,
            universe,
            reserved,
        }
    }

    /// Wraps a bitmap read from disk. Every unit of the reserved prefix must
    /// already be marked used, otherwise the volume is corrupt.
    pub fn open(bitmap: Bitmap, universe: usize, reserved: usize) -> Result<Self> {
        assert!(universe <= BITS_PER_BITMAP);
        assert!(reserved <= universe);
        if let Some(nr) = (0..reserved).find(|&nr| bitmap.get(nr) == State::Free) {
            return Err(Corruption::BadLayout(format!(
                "reserved unit {} is marked free in bitmap",
                nr
            ))
            .into());
        }
        Ok(Self {
            bitmap,
            universe,
            reserved,
        })
    }

    pub fn allocate(&mut self) -> Result<usize> {
        let nr = self.free_indices().next().ok_or(FsError::NoSpace)?;
        self.bitmap.set_reserved(nr);
        Ok(nr)
    }

    /// Releases a unit. Freeing a unit that is already free does nothing.
    ///
    /// # Panics
    ///
    /// Panics if `nr` lies outside the universe or inside the reserved prefix.
    pub fn free(&mut self, nr: usize) {
        assert!(nr < self.universe, "freeing unit {} beyond {}", nr, self.universe);
        assert!(nr >= self.reserved, "freeing reserved unit {}", nr);
        self.bitmap.set_free(nr);
    }

    pub fn is_set(&self, nr: usize) -> bool {
        assert!(nr < self.universe);
        self.bitmap.get(nr) == State::Used
    }

    pub fn free_indices(&self) -> FreeIndices<'_> {
        FreeIndices {
            marker: self.reserved,
            bitmap: &self.bitmap,
            cap: self.universe,
        }
    }

    pub fn free_count(&self) -> usize {
        self.free_indices().count()
    }

    pub fn universe(&self) -> usize {
        self.universe
    }

    pub fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_read_and_write_values_to_bitmap() {
        let mut bmp = Bitmap::new();

        bmp.set_reserved(2);

        assert_eq!(bmp.get(0), State::Free);
        assert_eq!(bmp.get(2), State::Used);
    }

    #[test]
    fn can_set_values_at_ends_of_bitmap() {
        let mut bmp = Bitmap::new();

        bmp.set_reserved(0);
        bmp.set_reserved(BITS_PER_BITMAP - 1);

        assert_eq!(bmp.get(0), State::Used);
        assert_eq!(bmp.get(BITS_PER_BITMAP - 1), State::Used);
    }

    #[test]
    fn can_toggle_block_between_free_and_used() {
        let mut bmp = Bitmap::new();

        bmp.set_reserved(10);
        bmp.set_reserved(11);
        assert_eq!(bmp.get(10), State::Used);

        bmp.set_free(10);
        assert_eq!(bmp.get(10), State::Free);
        // Neighbouring bits survive.
        assert_eq!(bmp.get(11), State::Used);
    }

    #[test]
    fn bits_are_packed_lsb_first() {
        let mut bmp = Bitmap::new();
        for nr in 0..4 {
            bmp.set_reserved(nr);
        }
        bmp.set_reserved(9);

        let bytes = bmp.serialize();
        assert_eq!(bytes[0], 0x0F);
        assert_eq!(bytes[1], 0x02);
        assert_eq!(Bitmap::parse(bytes), bmp);
    }

    #[test]
    fn allocation_takes_lowest_free_index_in_order() {
        let mut bmp = Bitmap::new();
        for nr in 0..8 {
            if ![2, 5, 7].contains(&nr) {
                bmp.set_reserved(nr);
            }
        }
        let mut alloc = Allocator::open(bmp, 8, 0).unwrap();

        assert_eq!(alloc.allocate().unwrap(), 2);
        assert_eq!(alloc.allocate().unwrap(), 5);
        assert_eq!(alloc.allocate().unwrap(), 7);
        match alloc.allocate() {
            Err(FsError::NoSpace) => (),
            other => panic!("expected NoSpace, got {:?}", other),
        }
    }

    #[test]
    fn allocate_never_returns_a_used_index() {
        let mut alloc = Allocator::new(64, 4);
        let mut seen = Vec::new();
        while let Ok(nr) = alloc.allocate() {
            assert!(!seen.contains(&nr));
            assert!(nr >= 4);
            seen.push(nr);
        }
        assert_eq!(seen.len(), 60);
        assert_eq!(alloc.free_count(), 0);
    }

    #[test]
    fn double_free_is_a_no_op() {
        let mut alloc = Allocator::new(32, 2);
        let nr = alloc.allocate().unwrap();
        alloc.free(nr);
        let once = *alloc.bitmap();
        alloc.free(nr);
        assert_eq!(*alloc.bitmap(), once);
        assert!(!alloc.is_set(nr));
        // The freed unit is the next to be handed out again.
        assert_eq!(alloc.allocate().unwrap(), nr);
    }

    #[test]
    #[should_panic(expected = "freeing reserved unit")]
    fn freeing_reserved_unit_panics() {
        let mut alloc = Allocator::new(32, 4);
        alloc.free(3);
    }

    #[test]
    #[should_panic(expected = "beyond")]
    fn freeing_out_of_range_panics() {
        let mut alloc = Allocator::new(32, 4);
        alloc.free(32);
    }

    #[test]
    fn opening_bitmap_with_free_reserved_prefix_is_corruption() {
        let mut bmp = Bitmap::new();
        bmp.set_reserved(0);
        let err = Allocator::open(bmp, 128, 2).unwrap_err();
        assert!(err.is_corruption());
    }
}
