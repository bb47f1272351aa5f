//! Host-facing state the trap dispatcher reaches into: open files, the disk-transfer-area
//! search record, and the run loop's own control signal. These replace the teacher's
//! `Bus`/`Device`/`Signal` peripheral model — there is no second memory-mapped device here,
//! only host resources the BIOS/DOS trap table is the sole consumer of — but `Signal` keeps
//! the teacher's name and shape since the debugger and run loop still need exactly the same
//! three-way outcome.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

/// What a single run-loop iteration (or a debugger prompt) wants to happen next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Ok,
    Quit,
    NoOp,
}

pub const STDIN_HANDLE: u16 = 0;
pub const STDOUT_HANDLE: u16 = 1;
pub const STDERR_HANDLE: u16 = 2;
const FIRST_DYNAMIC_HANDLE: u16 = 3;

enum HandleKind {
    Standard(u16),
    File(File),
}

struct OpenFile {
    kind: HandleKind,
    position: u64,
}

/// The 16-bit-handle-to-host-file table. Handles 0/1/2 are pre-bound and close without
/// being closed; the next-handle counter only ever increases, so handles already returned
/// are never reused even after a close.
pub struct FileTable {
    next_handle: u16,
    open: std::collections::HashMap<u16, OpenFile>,
}

impl FileTable {
    pub fn new() -> Self {
        let mut open = std::collections::HashMap::new();
        open.insert(STDIN_HANDLE, OpenFile { kind: HandleKind::Standard(STDIN_HANDLE), position: 0 });
        open.insert(STDOUT_HANDLE, OpenFile { kind: HandleKind::Standard(STDOUT_HANDLE), position: 0 });
        open.insert(STDERR_HANDLE, OpenFile { kind: HandleKind::Standard(STDERR_HANDLE), position: 0 });
        FileTable { next_handle: FIRST_DYNAMIC_HANDLE, open }
    }

    pub fn is_open(&self, handle: u16) -> bool {
        self.open.contains_key(&handle)
    }

    pub fn register(&mut self, file: File) -> u16 {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.open.insert(handle, OpenFile { kind: HandleKind::File(file), position: 0 });
        handle
    }

    /// Standard handles succeed without being closed; dynamic handles are dropped.
    pub fn close(&mut self, handle: u16) -> bool {
        match self.open.get(&handle) {
            Some(OpenFile { kind: HandleKind::Standard(_), .. }) => true,
            Some(OpenFile { kind: HandleKind::File(_), .. }) => {
                self.open.remove(&handle);
                true
            }
            None => false,
        }
    }

    /// Closes every non-standard handle; called on program termination.
    pub fn close_all_dynamic(&mut self) {
        self.open.retain(|handle, _| *handle < FIRST_DYNAMIC_HANDLE);
    }

    pub fn read(&mut self, handle: u16, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.open.get_mut(&handle) {
            Some(OpenFile { kind: HandleKind::Standard(STDIN_HANDLE), .. }) => std::io::stdin().read(buf),
            Some(OpenFile { kind: HandleKind::Standard(_), .. }) => Ok(0),
            Some(entry @ OpenFile { kind: HandleKind::File(_), .. }) => {
                if let OpenFile { kind: HandleKind::File(file), position } = entry {
                    let n = file.read(buf)?;
                    *position += n as u64;
                    Ok(n)
                } else {
                    unreachable!()
                }
            }
            None => Ok(0),
        }
    }

    pub fn write(&mut self, handle: u16, buf: &[u8]) -> std::io::Result<usize> {
        match self.open.get_mut(&handle) {
            Some(OpenFile { kind: HandleKind::Standard(STDOUT_HANDLE), .. })
            | Some(OpenFile { kind: HandleKind::Standard(STDERR_HANDLE), .. }) => {
                std::io::stdout().write_all(buf)?;
                std::io::stdout().flush()?;
                Ok(buf.len())
            }
            Some(OpenFile { kind: HandleKind::Standard(_), .. }) => Ok(0),
            Some(entry @ OpenFile { kind: HandleKind::File(_), .. }) => {
                if let OpenFile { kind: HandleKind::File(file), position } = entry {
                    file.write_all(buf)?;
                    *position += buf.len() as u64;
                    Ok(buf.len())
                } else {
                    unreachable!()
                }
            }
            None => Ok(0),
        }
    }

    pub fn seek(&mut self, handle: u16, offset: i64, origin: SeekFrom) -> std::io::Result<u64> {
        match self.open.get_mut(&handle) {
            Some(OpenFile { kind: HandleKind::File(file), position }) => {
                let new_pos = file.seek(match origin {
                    SeekFrom::Start(_) => SeekFrom::Start(offset as u64),
                    SeekFrom::End(_) => SeekFrom::End(offset),
                    SeekFrom::Current(_) => SeekFrom::Current(offset),
                })?;
                *position = new_pos;
                Ok(new_pos)
            }
            _ => Ok(0),
        }
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A single matched directory entry, captured at find-first time so find-next can step
/// through the same listing.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub attribute: u8,
    pub size: u32,
    pub time: u16,
    pub date: u16,
}

/// The per-process disk-transfer-area record: the result of the most recent directory
/// search, plus the cursor find-next resumes from.
#[derive(Default)]
pub struct Dta {
    pub matches: VecDeque<DirEntry>,
    pub current: Option<DirEntry>,
}

impl Dta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_search(&mut self, matches: Vec<DirEntry>) -> bool {
        self.matches = matches.into();
        self.advance()
    }

    pub fn advance(&mut self) -> bool {
        self.current = self.matches.pop_front();
        self.current.is_some()
    }
}
