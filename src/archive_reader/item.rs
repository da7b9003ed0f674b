use crate::com::ComPtr;
use crate::error::{Error, Result};
use crate::sevenzip::{FileTime, HRESULT, IInArchive, KPID_IS_DIR, KPID_MTIME, KPID_PATH, KPID_SIZE, PROPID};
use log::error;

/// `ArchiveItem` carries the properties of one archive entry,
/// or of a directory the archive only implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveItem {
    /// Engine index of the entry. `None` for a synthesized directory placeholder.
    pub index: Option<u32>,
    /// Full path for lookups by index or path; a single component in listings.
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<FileTime>,
}

impl ArchiveItem {
    /// `placeholder` stands in for a directory with no entry of its own.
    pub fn placeholder(path: &str) -> Self {
        ArchiveItem {
            index: None,
            path: path.to_string(),
            is_dir: true,
            size: 0,
            modified: None,
        }
    }

    /// `is_placeholder` tells whether the item was synthesized rather than read from the archive.
    pub fn is_placeholder(&self) -> bool {
        self.index.is_none()
    }

    /// `name` returns the last path component.
    pub fn name(&self) -> &str {
        self.path.rsplit(SEPARATOR).next().unwrap_or_default()
    }
}

pub(crate) const SEPARATOR: char = '/';

/// Index-addressed access to an opened archive's entries.
/// Implementations are called from several worker threads at once.
pub(crate) trait ItemSource: Sync {
    fn item_count(&self) -> Result<u32>;

    /// Full path of an entry; `None` when the entry has no name.
    fn path(&self, index: u32) -> Result<Option<String>>;

    fn is_dir(&self, index: u32) -> Result<bool>;

    fn item(&self, index: u32) -> Result<ArchiveItem>;
}

fn property_error(hr: HRESULT, property: &'static str) -> Error {
    let error = Error::Engine {
        code: hr,
        context: format!("IInArchive::GetProperty({property})").into(),
    };
    error!("{error}");
    error
}

impl ComPtr<IInArchive> {
    fn required(&self, index: u32, property: PROPID, label: &'static str) -> Result<crate::sevenzip::Variant> {
        self.property(index, property)
            .map_err(|hr| property_error(hr, label))
    }
}

impl ItemSource for ComPtr<IInArchive> {
    fn item_count(&self) -> Result<u32> {
        self.number_of_items().map_err(|hr| {
            let error = Error::Engine {
                code: hr,
                context: "IInArchive::GetNumberOfItems".into(),
            };
            error!("{error}");
            error
        })
    }

    fn path(&self, index: u32) -> Result<Option<String>> {
        let path = self
            .property(index, KPID_PATH)
            .map_err(|hr| property_error(hr, "kpidPath"))?;
        Ok(path.as_bstr().map(|path| path.to_string_lossy()))
    }

    fn is_dir(&self, index: u32) -> Result<bool> {
        Ok(self.required(index, KPID_IS_DIR, "kpidIsDir")?.as_bool())
    }

    fn item(&self, index: u32) -> Result<ArchiveItem> {
        // A path that cannot be read leaves the entry unnamed.
        let path = self
            .property(index, KPID_PATH)
            .ok()
            .and_then(|path| path.as_bstr().map(|path| path.to_string_lossy()))
            .unwrap_or_default();
        let is_dir = self.is_dir(index)?;
        let size = self.required(index, KPID_SIZE, "kpidSize")?.as_u64();
        let modified = self.required(index, KPID_MTIME, "kpidMTime")?.as_file_time();
        Ok(ArchiveItem {
            index: Some(index),
            path,
            is_dir,
            size,
            modified,
        })
    }
}
