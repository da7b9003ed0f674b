use crate::error::Result;
use crate::sevenzip::{CreateDecoderFn, GetMethodPropertyFn, GetNumberOfMethodsFn, Library};
use log::info;
use std::path::{Path, PathBuf};

/// The three exports a codec module must provide.
#[derive(Clone, Copy)]
pub(crate) struct CodecEntryPoints {
    pub(crate) get_number_of_methods: GetNumberOfMethodsFn,
    pub(crate) get_method_property: GetMethodPropertyFn,
    pub(crate) create_decoder: CreateDecoderFn,
}

/// `CodecModule` is a loaded per-format decoder module.
/// The module stays loaded for as long as any archive object may call into it.
pub(crate) struct CodecModule {
    entry_points: CodecEntryPoints,
    path: PathBuf,
    _library: Option<Library>,
}

impl CodecModule {
    /// `load` loads the module and resolves its exports.
    /// The module is unloaded again if any of them is missing.
    pub(crate) fn load(path: &Path) -> Result<Self> {
        info!(r#"CodecModule::load(path: "{}")"#, path.display());
        let library = Library::open(path)?;
        let entry_points = unsafe {
            CodecEntryPoints {
                get_number_of_methods: library.symbol(c"GetNumberOfMethods")?,
                get_method_property: library.symbol(c"GetMethodProperty")?,
                create_decoder: library.symbol(c"CreateDecoder")?,
            }
        };
        Ok(CodecModule {
            entry_points,
            path: path.into(),
            _library: Some(library),
        })
    }

    /// A module whose exports live in this process.
    #[cfg(test)]
    pub(crate) fn from_entry_points(entry_points: CodecEntryPoints, path: &Path) -> Self {
        CodecModule {
            entry_points,
            path: path.into(),
            _library: None,
        }
    }

    pub(crate) fn entry_points(&self) -> &CodecEntryPoints {
        &self.entry_points
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for CodecModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecModule").field("path", &self.path).finish()
    }
}
