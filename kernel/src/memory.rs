/*
 * User Address-Space Contract
 *
 * Paging proper is outside the scheduling core; what the core needs is the
 * boundary between user and kernel addresses and a way to ask the current
 * address space whether a page is present and to move single bytes across.
 * The syscall gateway builds all of its pointer validation on these three
 * questions.
 *
 * `PageMap` is a page-granular in-memory implementation: enough for
 * program loaders that stage an image and for the scenario tests, and a
 * reference for what a real paging implementation must answer.
 */

use alloc::boxed::Box;
use alloc::collections::BTreeMap;

use bitflags::bitflags;
use spin::Mutex;

/// First kernel virtual address; everything below it is user space.
pub const PHYS_BASE: u32 = 0xC000_0000;

/// Page size in bytes.
pub const PGSIZE: u32 = 4096;

bitflags! {
    /// Mapping attributes of one user page.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u8 {
        const PRESENT  = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER     = 1 << 2;
    }
}

/// True for addresses on the user side of the split.
pub fn is_user_vaddr(vaddr: u32) -> bool {
    vaddr < PHYS_BASE
}

/// Rounds an address down to its page base.
pub fn pg_round_down(vaddr: u32) -> u32 {
    vaddr & !(PGSIZE - 1)
}

/// What the scheduling core asks of an address space.
///
/// Implementations are shared between the owning process and the syscall
/// gateway, so the byte accessors take `&self`; a paging implementation
/// synchronizes internally. `activate` runs in schedule-tail with
/// interrupts off each time a thread of this space is dispatched.
pub trait AddressSpace: Send + Sync {
    /// Whether `vaddr` falls on a present, user-accessible page.
    fn is_mapped(&self, vaddr: u32) -> bool;

    /// Reads one byte, or None when the address is unmapped.
    fn read_byte(&self, vaddr: u32) -> Option<u8>;

    /// Writes one byte; false when the address is unmapped or read-only.
    fn write_byte(&self, vaddr: u32, value: u8) -> bool;

    /// Makes this the active address space on the CPU.
    fn activate(&self) {}
}

struct PageEntry {
    flags: PageFlags,
    data: Box<[u8]>,
}

/// Page-granular in-memory address space.
pub struct PageMap {
    pages: Mutex<BTreeMap<u32, PageEntry>>,
}

impl PageMap {
    pub fn new() -> PageMap {
        PageMap { pages: Mutex::new(BTreeMap::new()) }
    }

    /// Maps the page containing `vaddr`, zero-filled. Kernel-side addresses
    /// are rejected: the map only describes user memory.
    pub fn map_page(&self, vaddr: u32, flags: PageFlags) -> bool {
        if !is_user_vaddr(vaddr) {
            return false;
        }
        let base = pg_round_down(vaddr);
        self.pages.lock().insert(
            base,
            PageEntry {
                flags: flags | PageFlags::PRESENT,
                data: alloc::vec![0u8; PGSIZE as usize].into_boxed_slice(),
            },
        );
        true
    }

    /// Copies `bytes` into the space, page by page. Pages must be mapped.
    pub fn write_bytes(&self, vaddr: u32, bytes: &[u8]) -> bool {
        for (i, &b) in bytes.iter().enumerate() {
            if !self.write_byte(vaddr + i as u32, b) {
                return false;
            }
        }
        true
    }
}

impl Default for PageMap {
    fn default() -> Self {
        PageMap::new()
    }
}

impl AddressSpace for PageMap {
    fn is_mapped(&self, vaddr: u32) -> bool {
        if !is_user_vaddr(vaddr) {
            return false;
        }
        self.pages
            .lock()
            .get(&pg_round_down(vaddr))
            .is_some_and(|p| p.flags.contains(PageFlags::PRESENT | PageFlags::USER))
    }

    fn read_byte(&self, vaddr: u32) -> Option<u8> {
        if !is_user_vaddr(vaddr) {
            return None;
        }
        let pages = self.pages.lock();
        let page = pages.get(&pg_round_down(vaddr))?;
        if !page.flags.contains(PageFlags::PRESENT | PageFlags::USER) {
            return None;
        }
        Some(page.data[(vaddr - pg_round_down(vaddr)) as usize])
    }

    fn write_byte(&self, vaddr: u32, value: u8) -> bool {
        if !is_user_vaddr(vaddr) {
            return false;
        }
        let mut pages = self.pages.lock();
        let base = pg_round_down(vaddr);
        let Some(page) = pages.get_mut(&base) else {
            return false;
        };
        if !page.flags.contains(PageFlags::PRESENT | PageFlags::USER | PageFlags::WRITABLE) {
            return false;
        }
        page.data[(vaddr - base) as usize] = value;
        true
    }
}

/// Reads a little-endian u32, validating every byte.
pub fn read_u32(space: &dyn AddressSpace, vaddr: u32) -> Option<u32> {
    let mut out = 0u32;
    for i in 0..4 {
        let b = space.read_byte(vaddr.checked_add(i)?)?;
        out |= (b as u32) << (8 * i);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmapped_and_kernel_addresses_fail() {
        let m = PageMap::new();
        assert!(!m.is_mapped(0x1000));
        assert_eq!(m.read_byte(0x1000), None);
        assert!(!m.map_page(PHYS_BASE, PageFlags::USER | PageFlags::WRITABLE));
        assert!(!m.is_mapped(PHYS_BASE));
    }

    #[test]
    fn mapped_page_round_trips_bytes() {
        let m = PageMap::new();
        assert!(m.map_page(0x8000, PageFlags::USER | PageFlags::WRITABLE));
        assert!(m.write_bytes(0x8004, b"tern"));
        assert_eq!(m.read_byte(0x8004), Some(b't'));
        assert_eq!(read_u32(&m, 0x8004), Some(u32::from_le_bytes(*b"tern")));
    }

    #[test]
    fn read_only_page_rejects_writes() {
        let m = PageMap::new();
        m.map_page(0x8000, PageFlags::USER);
        assert!(!m.write_byte(0x8000, 1));
        assert_eq!(m.read_byte(0x8000), Some(0));
    }

    #[test]
    fn read_u32_stops_at_page_gaps() {
        let m = PageMap::new();
        m.map_page(0x8000, PageFlags::USER | PageFlags::WRITABLE);
        // The last mapped byte of the page; the next byte is unmapped.
        assert_eq!(read_u32(&m, 0x8000 + PGSIZE - 2), None);
    }
}
