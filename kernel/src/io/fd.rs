/*
 * File Descriptor Table
 *
 * Per-process mapping from small integers to open files. Descriptors are
 * allocated lowest-free-first out of a fixed bitmap; the files themselves
 * sit in an ordered map keyed by descriptor. Descriptors 0 and 1 are the
 * console and never appear here; the table starts at FD_MIN.
 *
 * The table belongs to exactly one process and is only touched from its
 * own threads, so it carries no locking of its own.
 */

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use super::file::File;

/// Smallest allocatable descriptor. 0 and 1 name the console.
pub const FD_MIN: i32 = 2;

/// Largest descriptor value accepted by lookups.
pub const FD_MAX: i32 = 128;

/// Bitmap capacity.
const FD_SLOTS: usize = (FD_MAX - FD_MIN) as usize;

pub struct FdTable {
    /// Bit `s` set iff descriptor `FD_MIN + s` is live.
    bitmap: [u64; 2],
    files: BTreeMap<i32, Arc<dyn File>>,
}

impl FdTable {
    pub fn new() -> FdTable {
        FdTable { bitmap: [0; 2], files: BTreeMap::new() }
    }

    /// Bitmap slot for a descriptor, or None when it is out of range.
    fn slot_of(fd: i32) -> Option<usize> {
        if !(FD_MIN..=FD_MAX).contains(&fd) {
            return None;
        }
        let slot = (fd - FD_MIN) as usize;
        (slot < FD_SLOTS).then_some(slot)
    }

    fn bit(&self, slot: usize) -> bool {
        self.bitmap[slot / 64] & (1u64 << (slot % 64)) != 0
    }

    fn set_bit(&mut self, slot: usize, on: bool) {
        if on {
            self.bitmap[slot / 64] |= 1u64 << (slot % 64);
        } else {
            self.bitmap[slot / 64] &= !(1u64 << (slot % 64));
        }
    }

    /// Lowest clear slot, if any.
    fn scan_free(&self) -> Option<usize> {
        for word in 0..self.bitmap.len() {
            let free = (!self.bitmap[word]).trailing_zeros() as usize;
            if free < 64 {
                let slot = word * 64 + free;
                if slot < FD_SLOTS {
                    return Some(slot);
                }
            }
        }
        None
    }

    /// Registers a file under the lowest free descriptor. None when the
    /// bitmap is full; the caller reports that as its error value.
    pub fn insert(&mut self, file: Arc<dyn File>) -> Option<i32> {
        let slot = self.scan_free()?;
        let fd = FD_MIN + slot as i32;
        self.set_bit(slot, true);
        self.files.insert(fd, file);
        Some(fd)
    }

    /// Looks up a live descriptor.
    pub fn search(&self, fd: i32) -> Option<Arc<dyn File>> {
        let slot = Self::slot_of(fd)?;
        if !self.bit(slot) {
            return None;
        }
        self.files.get(&fd).cloned()
    }

    /// Removes a descriptor, returning its file so the caller can close
    /// it. Out-of-range and dead descriptors return None.
    pub fn remove(&mut self, fd: i32) -> Option<Arc<dyn File>> {
        let slot = Self::slot_of(fd)?;
        if !self.bit(slot) {
            return None;
        }
        self.set_bit(slot, false);
        self.files.remove(&fd)
    }

    /// Tears the table down, running `dtor` for every live entry.
    pub fn destroy(&mut self, dtor: Option<&mut dyn FnMut(Arc<dyn File>)>) {
        let files = core::mem::take(&mut self.files);
        self.bitmap = [0; 2];
        if let Some(dtor) = dtor {
            for (_, file) in files {
                dtor(file);
            }
        }
    }

    /// Number of live descriptors.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        FdTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    struct NullFile;

    impl File for NullFile {
        fn read(&self, _buf: &mut [u8]) -> usize {
            0
        }
        fn write(&self, buf: &[u8]) -> usize {
            buf.len()
        }
        fn seek(&self, _pos: u32) {}
        fn tell(&self) -> u32 {
            0
        }
        fn len(&self) -> u32 {
            0
        }
    }

    fn file() -> Arc<dyn File> {
        Arc::new(NullFile)
    }

    #[test]
    fn insert_search_remove_round_trip() {
        let mut t = FdTable::new();
        let f = file();
        let fd = t.insert(f.clone()).unwrap();
        assert_eq!(fd, FD_MIN);
        assert!(Arc::ptr_eq(&t.search(fd).unwrap(), &f));
        assert!(Arc::ptr_eq(&t.remove(fd).unwrap(), &f));
        assert!(t.search(fd).is_none());
        assert!(t.remove(fd).is_none());
    }

    #[test]
    fn descriptors_allocate_lowest_free_first() {
        let mut t = FdTable::new();
        let a = t.insert(file()).unwrap();
        let b = t.insert(file()).unwrap();
        let c = t.insert(file()).unwrap();
        assert_eq!((a, b, c), (FD_MIN, FD_MIN + 1, FD_MIN + 2));
        t.remove(b);
        assert_eq!(t.insert(file()).unwrap(), b);
    }

    #[test]
    fn out_of_range_descriptors_are_rejected() {
        let mut t = FdTable::new();
        t.insert(file()).unwrap();
        for fd in [-1, 0, 1, FD_MAX + 1, i32::MAX] {
            assert!(t.search(fd).is_none());
            assert!(t.remove(fd).is_none());
        }
    }

    #[test]
    fn exhausted_bitmap_reports_none() {
        let mut t = FdTable::new();
        let mut fds = Vec::new();
        while let Some(fd) = t.insert(file()) {
            fds.push(fd);
        }
        assert_eq!(fds.len(), FD_SLOTS);
        assert!(t.insert(file()).is_none());
        // Freeing any slot makes exactly that descriptor available again.
        t.remove(fds[40]);
        assert_eq!(t.insert(file()), Some(fds[40]));
    }

    #[test]
    fn destroy_runs_dtor_for_each_live_entry() {
        let mut t = FdTable::new();
        t.insert(file());
        t.insert(file());
        let mut closed = 0;
        t.destroy(Some(&mut |_f| closed += 1));
        assert_eq!(closed, 2);
        assert!(t.is_empty());
        // The bitmap was cleared along with the map.
        assert_eq!(t.insert(file()), Some(FD_MIN));
    }
}
