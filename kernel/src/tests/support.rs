/*
 * Simulated Collaborators
 *
 * In-memory stand-ins for the platform pieces outside the core: a console
 * that records output, a filesystem of byte vectors, and a loader that
 * maps one user page per image. The scenario tests install these exactly
 * where a platform layer would install the real thing.
 */

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::io::{Console, File, FileSys};
use crate::memory::{AddressSpace, PageFlags, PageMap};

/// Everything written to the simulated console since the last take.
static CONSOLE_OUT: Mutex<Vec<u8>> = Mutex::new(Vec::new());

pub(crate) struct SimConsole {
    /// The byte the keyboard "types" on every read.
    pub key: u8,
}

impl Console for SimConsole {
    fn putbuf(&self, bytes: &[u8]) {
        CONSOLE_OUT.lock().extend_from_slice(bytes);
    }

    fn getc(&self) -> u8 {
        self.key
    }
}

pub(crate) fn console_take() -> String {
    let bytes = core::mem::take(&mut *CONSOLE_OUT.lock());
    String::from_utf8_lossy(&bytes).into_owned()
}

/// A file as a byte vector with one shared cursor.
pub(crate) struct MemFile {
    data: Mutex<Vec<u8>>,
    pos: Mutex<u32>,
}

impl MemFile {
    pub(crate) fn new(contents: &[u8]) -> Arc<MemFile> {
        Arc::new(MemFile {
            data: Mutex::new(contents.to_vec()),
            pos: Mutex::new(0),
        })
    }
}

impl File for MemFile {
    fn read(&self, buf: &mut [u8]) -> usize {
        let data = self.data.lock();
        let mut pos = self.pos.lock();
        let start = (*pos as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        *pos += n as u32;
        n
    }

    fn write(&self, buf: &[u8]) -> usize {
        let mut data = self.data.lock();
        let mut pos = self.pos.lock();
        let start = *pos as usize;
        if data.len() < start + buf.len() {
            data.resize(start + buf.len(), 0);
        }
        data[start..start + buf.len()].copy_from_slice(buf);
        *pos += buf.len() as u32;
        buf.len()
    }

    fn seek(&self, pos: u32) {
        *self.pos.lock() = pos;
    }

    fn tell(&self) -> u32 {
        *self.pos.lock()
    }

    fn len(&self) -> u32 {
        self.data.lock().len() as u32
    }
}

/// In-memory filesystem keyed by name.
pub(crate) struct SimFs {
    files: Mutex<BTreeMap<String, Arc<MemFile>>>,
}

impl SimFs {
    pub(crate) fn new() -> SimFs {
        SimFs { files: Mutex::new(BTreeMap::new()) }
    }

    pub(crate) fn with_file(self, name: &str, contents: &[u8]) -> SimFs {
        self.files.lock().insert(name.into(), MemFile::new(contents));
        self
    }
}

impl FileSys for SimFs {
    fn create(&self, name: &str, initial_size: u32) -> bool {
        let mut files = self.files.lock();
        if files.contains_key(name) {
            return false;
        }
        files.insert(name.into(), MemFile::new(&alloc::vec![0u8; initial_size as usize]));
        true
    }

    fn remove(&self, name: &str) -> bool {
        self.files.lock().remove(name).is_some()
    }

    fn open(&self, name: &str) -> Option<Arc<dyn File>> {
        self.files.lock().get(name).cloned().map(|f| f as Arc<dyn File>)
    }
}

/// Base of the single user page the simulated loader maps.
pub(crate) const USER_PAGE: u32 = 0x0800_0000;

/// Loader that gives every image one writable user page; images named
/// "bad*" fail to load.
pub(crate) struct SimLoader;

impl crate::process::ProgramLoader for SimLoader {
    fn load(&self, name: &str) -> Option<Arc<dyn AddressSpace>> {
        if name.starts_with("bad") {
            return None;
        }
        let map = PageMap::new();
        assert!(map.map_page(USER_PAGE, PageFlags::USER | PageFlags::WRITABLE));
        Some(Arc::new(map))
    }
}

/// Writes 32-bit words into user memory at `base`.
pub(crate) fn poke_words(space: &dyn AddressSpace, base: u32, words: &[u32]) {
    for (i, w) in words.iter().enumerate() {
        for (j, b) in w.to_le_bytes().iter().enumerate() {
            assert!(space.write_byte(base + 4 * i as u32 + j as u32, *b));
        }
    }
}

/// Writes a NUL-terminated string into user memory at `base`.
pub(crate) fn poke_cstr(space: &dyn AddressSpace, base: u32, s: &str) {
    for (i, b) in s.as_bytes().iter().enumerate() {
        assert!(space.write_byte(base + i as u32, *b));
    }
    assert!(space.write_byte(base + s.len() as u32, 0));
}

/// Reads bytes back out of user memory.
pub(crate) fn peek_bytes(space: &dyn AddressSpace, base: u32, len: u32) -> Vec<u8> {
    (0..len).map(|i| space.read_byte(base + i).expect("unmapped byte")).collect()
}
