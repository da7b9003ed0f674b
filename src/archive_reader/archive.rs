use super::backing::Backing;
use super::item::{ArchiveItem, ItemSource};
use super::listing::{self, DEFAULT_PARALLEL_THRESHOLD, Parallelism};
use crate::adapters::{ExtractCallback, InStream, OpenCallback};
use crate::com::ComPtr;
use crate::engine::{self, Engine};
use crate::error::{Error, LastError, Result, check};
use crate::sevenzip::{IArchiveExtractCallback, IArchiveOpenCallback, IInArchive, IInStream, S_FALSE, failed};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::fs::File;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::Path;
use std::sync::Arc;

/// `Archive` is a session over one archive at a time.
///
/// A session starts closed. Opening it, from a buffer, a path or a descriptor,
/// replaces whatever it had open before. Every query requires an open archive
/// and fails with [`Error::NotLoaded`] otherwise, or with [`Error::NotInitialized`]
/// if [`initialize`](crate::initialize) was never called.
pub struct Archive<'buf> {
    state: Option<OpenArchive<'buf>>,
    /// `workers` is the number of threads reading entries for listings and lookups.
    /// `None` uses every available hardware thread.
    workers: Option<usize>,
    /// `parallel_threshold` is the entry count below which a single thread is used.
    parallel_threshold: u32,
    last_error: Mutex<Option<LastError>>,
}

struct OpenArchive<'buf> {
    // Declared first so the engine object is released before its input goes away.
    handle: ComPtr<IInArchive>,
    _backing: Backing<'buf>,
    _engine: Arc<Engine>,
    format: String,
    password: Option<String>,
}

impl Drop for OpenArchive<'_> {
    fn drop(&mut self) {
        debug!("IInArchive::Close()");
        let hr = self.handle.close();
        if failed(hr) {
            warn!("IInArchive::Close failed with 0x{:08X}", hr as u32);
        }
    }
}

impl Default for Archive<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'buf> Archive<'buf> {
    /// `new` creates a closed session.
    pub fn new() -> Self {
        Archive {
            state: None,
            workers: None,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
            last_error: Mutex::new(None),
        }
    }

    /// `worker_count` sets how many threads read entries during listings and lookups.
    /// One forces single-threaded reading.
    pub fn worker_count(&mut self, workers: usize) -> &mut Self {
        self.workers = Some(workers.max(1));
        self
    }

    /// `reset_worker_count` goes back to one worker per hardware thread.
    pub fn reset_worker_count(&mut self) -> &mut Self {
        self.workers = None;
        self
    }

    /// `parallel_threshold` sets the entry count from which reading is spread across workers.
    pub fn parallel_threshold(&mut self, threshold: u32) -> &mut Self {
        self.parallel_threshold = threshold;
        self
    }

    /// `reset_parallel_threshold` resets the threshold back to the default value (500).
    pub fn reset_parallel_threshold(&mut self) -> &mut Self {
        self.parallel_threshold(DEFAULT_PARALLEL_THRESHOLD)
    }
}

// Opening and closing
impl<'buf> Archive<'buf> {
    /// `open_buffer` opens an archive held in memory. The buffer must outlive the session.
    ///
    /// With no `format`, the format is detected from the buffer's signature bytes.
    /// A non-empty `password` is offered to the engine while opening and kept for
    /// later extractions.
    pub fn open_buffer(&mut self, buffer: &'buf [u8], password: Option<&str>, format: Option<&str>) -> Result<()> {
        info!(
            "Archive::open_buffer(buffer: [{} bytes], password: {}, format: {format:?})",
            buffer.len(),
            redact(password)
        );
        self.state = None;
        let opened = engine::current()
            .and_then(|engine| self.open_backing(engine, Backing::Borrowed(buffer), password, format));
        self.record(opened)
    }

    /// `open_path` opens the archive file at `path`, mapped into memory read-only.
    pub fn open_path<P: AsRef<Path>>(&mut self, path: P, password: Option<&str>, format: Option<&str>) -> Result<()> {
        let path = path.as_ref();
        info!(
            r#"Archive::open_path(path: "{}", password: {}, format: {format:?})"#,
            path.display(),
            redact(password)
        );
        self.state = None;
        let opened = engine::current().and_then(|engine| {
            let file = File::open(path).map_err(|error| {
                error!(r#"path "{}" cannot be opened: {error}"#, path.display());
                Error::from(error)
            })?;
            let backing = Backing::map_descriptor(file.as_fd())?;
            self.open_backing(engine, backing, password, format)
        });
        self.record(opened)
    }

    /// `open_fd` opens the archive behind an already open descriptor.
    /// The descriptor is duplicated, never consumed, and its offset is left untouched.
    pub fn open_fd(&mut self, fd: BorrowedFd<'_>, password: Option<&str>, format: Option<&str>) -> Result<()> {
        info!(
            "Archive::open_fd(fd: {fd:?}, password: {}, format: {format:?})",
            redact(password)
        );
        self.state = None;
        let opened = engine::current().and_then(|engine| {
            let backing = Backing::map_descriptor(fd)?;
            self.open_backing(engine, backing, password, format)
        });
        self.record(opened)
    }

    fn open_backing(
        &mut self,
        engine: Arc<Engine>,
        backing: Backing<'buf>,
        password: Option<&str>,
        format: Option<&str>,
    ) -> Result<()> {
        let format = match format {
            Some(format) => format.to_string(),
            None => match engine.registry().detect(backing.bytes()) {
                Some(descriptor) => descriptor.name.clone(),
                None => {
                    error!("Unable to discover archive format");
                    return Err(Error::FormatDetectionFailed);
                }
            },
        };
        debug!("opening as {format}");
        let handle = engine.create_archive(&format)?;

        let password = password.filter(|password| !password.is_empty());
        let stream = unsafe { InStream::new(backing.bytes()) }.interface::<IInStream>();
        let callback = password.map(|password| OpenCallback::new(password).interface::<IArchiveOpenCallback>());
        let hr = handle.open(&stream, None, callback.as_ref());
        drop((stream, callback));
        if hr == S_FALSE {
            error!("{format}: not an archive of this format");
            return Err(Error::Engine {
                code: hr,
                context: format!("IInArchive::Open ({format})").into(),
            });
        }
        check(hr, "IInArchive::Open")?;

        self.state = Some(OpenArchive {
            handle,
            _backing: backing,
            _engine: engine,
            format,
            password: password.map(str::to_string),
        });
        Ok(())
    }

    /// `close` releases the open archive, if any. Closing a closed session succeeds.
    pub fn close(&mut self) -> Result<()> {
        info!("Archive::close()");
        if self.state.take().is_none() && !engine::is_initialized() {
            return self.record(Err(Error::NotInitialized));
        }
        Ok(())
    }

    /// `is_open` tells whether an archive is currently open.
    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }
}

// Queries
impl Archive<'_> {
    /// `format` returns the name of the open archive's format, given or detected.
    pub fn format(&self) -> Result<&str> {
        info!("Archive::format()");
        self.record(self.loaded()).map(|open| open.format.as_str())
    }

    /// `item_count` returns the number of entries the engine reports.
    pub fn item_count(&self) -> Result<u32> {
        info!("Archive::item_count()");
        let count = self.loaded().and_then(|open| open.handle.item_count());
        self.record(count)
    }

    /// `list_directory` returns the direct children of the directory at `path`, sorted by name.
    /// The root is `""`. Directories the archive only implies are returned as placeholders.
    ///
    /// Each returned item's `path` is its name within the listed directory.
    pub fn list_directory(&self, path: &str) -> Result<Vec<ArchiveItem>> {
        info!(r#"Archive::list_directory(path: "{path}")"#);
        let listed = self
            .loaded()
            .and_then(|open| listing::list(&open.handle, path, self.parallelism()));
        self.record(listed)
    }

    /// `item_by_path` returns the entry at `path`, or a directory placeholder when
    /// `path` is only implied by deeper entries.
    pub fn item_by_path(&self, path: &str) -> Result<ArchiveItem> {
        info!(r#"Archive::item_by_path(path: "{path}")"#);
        let found = self
            .loaded()
            .and_then(|open| listing::find(&open.handle, path, self.parallelism()));
        self.record(found)
    }

    /// `item_by_index` returns the entry with engine index `index`.
    pub fn item_by_index(&self, index: u32) -> Result<ArchiveItem> {
        info!("Archive::item_by_index(index: {index})");
        let item = self.loaded().and_then(|open| {
            validate_index(&open.handle, index)?;
            open.handle.item(index)
        });
        self.record(item)
    }

    /// `items` returns an iterator over the properties of every entry, in index order.
    pub fn items(&self) -> Result<impl Iterator<Item = Result<ArchiveItem>> + '_> {
        info!("Archive::items()");
        let open = self.record(self.loaded())?;
        let count = self.record(open.handle.item_count())?;
        Ok((0..count).map(move |index| self.record(open.handle.item(index))))
    }
}

// Extraction
impl Archive<'_> {
    /// `extract_index` writes the content of entry `index` into `destination`
    /// and returns the number of bytes written.
    ///
    /// Content beyond `destination.len()` is dropped. Without a `password`,
    /// the one given when opening is used.
    pub fn extract_index(&self, index: u32, destination: &mut [u8], password: Option<&str>) -> Result<usize> {
        info!(
            "Archive::extract_index(index: {index}, destination: [{} bytes], password: {})",
            destination.len(),
            redact(password)
        );
        let extracted = self
            .loaded()
            .and_then(|open| extract(open, index, destination, password));
        self.record(extracted)
    }

    /// `extract_path` resolves `path` to an entry and extracts it like [`Archive::extract_index`].
    pub fn extract_path(&self, path: &str, destination: &mut [u8], password: Option<&str>) -> Result<usize> {
        info!(
            r#"Archive::extract_path(path: "{path}", destination: [{} bytes], password: {})"#,
            destination.len(),
            redact(password)
        );
        let extracted = self.loaded().and_then(|open| {
            let index = entry_index(&listing::find(&open.handle, path, self.parallelism())?)?;
            extract(open, index, destination, password)
        });
        self.record(extracted)
    }

    /// `read_index_to_vec` extracts entry `index` into a buffer sized from its reported size.
    pub fn read_index_to_vec(&self, index: u32, password: Option<&str>) -> Result<Vec<u8>> {
        info!("Archive::read_index_to_vec(index: {index}, password: {})", redact(password));
        let content = self.loaded().and_then(|open| {
            validate_index(&open.handle, index)?;
            read_to_vec(open, &open.handle.item(index)?, password)
        });
        self.record(content)
    }

    /// `read_path_to_vec` extracts the entry at `path` into a buffer sized from its reported size.
    pub fn read_path_to_vec(&self, path: &str, password: Option<&str>) -> Result<Vec<u8>> {
        info!(r#"Archive::read_path_to_vec(path: "{path}", password: {})"#, redact(password));
        let content = self.loaded().and_then(|open| {
            let item = listing::find(&open.handle, path, self.parallelism())?;
            read_to_vec(open, &item, password)
        });
        self.record(content)
    }
}

// Errors and helpers
impl Archive<'_> {
    /// `last_error` returns the code and message of this session's most recent failure.
    pub fn last_error(&self) -> Option<LastError> {
        self.last_error.lock().clone()
    }

    fn record<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(error) = &result {
            *self.last_error.lock() = Some(error.into());
        }
        result
    }

    fn loaded(&self) -> Result<&OpenArchive<'_>> {
        match &self.state {
            Some(open) => Ok(open),
            None if engine::is_initialized() => {
                error!("Archive has not been loaded");
                Err(Error::NotLoaded)
            }
            None => {
                error!("GlobalInitialize has not been called");
                Err(Error::NotInitialized)
            }
        }
    }

    fn parallelism(&self) -> Parallelism {
        let workers = self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(1)
        });
        Parallelism {
            workers,
            threshold: self.parallel_threshold,
        }
    }
}

fn redact(password: Option<&str>) -> &'static str {
    match password {
        Some(_) => "Some(_)",
        None => "None",
    }
}

fn validate_index(handle: &ComPtr<IInArchive>, index: u32) -> Result<()> {
    let count = handle.item_count()?;
    if index >= count {
        error!("Invalid item index {index} (archive has {count} items)");
        return Err(Error::IndexOutOfRange { index, count });
    }
    Ok(())
}

fn entry_index(item: &ArchiveItem) -> Result<u32> {
    item.index.ok_or_else(|| {
        error!(r#""{}" is a directory placeholder"#, item.path);
        Error::InvalidArgument(format!("{} has no archive entry to extract", item.path))
    })
}

fn extract(open: &OpenArchive<'_>, index: u32, destination: &mut [u8], password: Option<&str>) -> Result<usize> {
    validate_index(&open.handle, index)?;
    let password = password.or(open.password.as_deref());
    let callback = unsafe { ExtractCallback::new(destination, password) };
    let hr = open
        .handle
        .extract(&[index], false, &callback.interface::<IArchiveExtractCallback>());
    let result = callback.operation_result();
    if result != 0 {
        let error = Error::Operation(result);
        error!("IInArchive::Extract(index: {index}): {error}");
        return Err(error);
    }
    check(hr, "IInArchive::Extract")?;
    debug!("extracted {} bytes from entry {index}", callback.written());
    Ok(callback.written())
}

fn read_to_vec(open: &OpenArchive<'_>, item: &ArchiveItem, password: Option<&str>) -> Result<Vec<u8>> {
    let index = entry_index(item)?;
    if item.size == 0 {
        return Ok(Vec::new());
    }
    let Ok(size) = usize::try_from(item.size) else {
        error!("entry {index} is too large for memory: {} bytes", item.size);
        return Err(Error::OutOfMemory);
    };
    let mut content = Vec::new();
    content.try_reserve_exact(size).map_err(|_| Error::OutOfMemory)?;
    content.resize(size, 0);
    let written = extract(open, index, &mut content, password)?;
    content.truncate(written);
    Ok(content)
}
