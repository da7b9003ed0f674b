use crate::error::{Error, Result};
use log::{debug, error};
use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::os::fd::BorrowedFd;

/// The bytes an open archive is read from.
pub(crate) enum Backing<'buf> {
    /// A caller-owned buffer.
    Borrowed(&'buf [u8]),
    /// A read-only mapping of a duplicated descriptor, both owned by the session.
    Mapped { map: Mmap, _file: File },
}

impl Backing<'_> {
    pub(crate) fn bytes(&self) -> &[u8] {
        match self {
            Backing::Borrowed(buffer) => buffer,
            Backing::Mapped { map, .. } => map,
        }
    }

    /// `map_descriptor` duplicates `fd` and maps the whole file read-only.
    /// The caller's descriptor, including its file offset, is left as it was.
    pub(crate) fn map_descriptor(fd: BorrowedFd<'_>) -> Result<Backing<'static>> {
        let mut file = File::from(fd.try_clone_to_owned()?);
        let position = file.stream_position()?;
        let size = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(position))?;
        if size == 0 {
            error!("Invalid archive size");
            return Err(Error::InvalidArchive("Invalid archive size"));
        }
        let Ok(len) = usize::try_from(size) else {
            error!("Archive too large for memory: {size} bytes");
            return Err(Error::InvalidArchive("Archive too large for memory"));
        };
        let map = unsafe { MmapOptions::new().len(len).map(&file)? };
        debug!("mapped {len} bytes");
        Ok(Backing::Mapped { map, _file: file })
    }
}
