//! The loaded engine module: its exports, format registry and attached codecs.
mod codec;
mod global;
mod registry;

pub(crate) use codec::{CodecEntryPoints, CodecModule};
pub(crate) use global::{current, is_initialized};
#[cfg(test)]
pub(crate) use global::install;
pub use global::{add_codec, formats, initialize, last_error, supported_formats, uninitialize};
pub use registry::FormatDescriptor;
pub(crate) use registry::{FormatRegistry, HandlerProperties};

use crate::adapters::CodecsInfo;
use crate::com::{ComPtr, Interface};
use crate::error::{Error, Result, check};
use crate::sevenzip::{
    CreateObjectFn, E_NOINTERFACE, GetHandlerProperty2Fn, GetNumberOfFormatsFn, HandlerProperty,
    IInArchive, ICompressCodecsInfo, ISetCompressCodecsInfo, Library, PROPID, PROPVARIANT, Variant,
    failed,
};
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::ptr;
use std::sync::Arc;

/// The three exports an engine module must provide.
#[derive(Clone, Copy)]
pub(crate) struct EngineEntryPoints {
    pub(crate) create_object: CreateObjectFn,
    pub(crate) get_number_of_formats: GetNumberOfFormatsFn,
    pub(crate) get_handler_property2: GetHandlerProperty2Fn,
}

impl HandlerProperties for EngineEntryPoints {
    fn format_count(&self) -> Result<u32> {
        let mut count = 0;
        check(unsafe { (self.get_number_of_formats)(&mut count) }, "GetNumberOfFormats")?;
        Ok(count)
    }

    fn handler_property(&self, index: u32, property: HandlerProperty) -> Result<Variant> {
        let mut value = PROPVARIANT::empty();
        let hr = unsafe { (self.get_handler_property2)(index, property as PROPID, &mut value) };
        check(hr, format!("GetHandlerProperty2({})", property.label()))?;
        Ok(unsafe { value.into_variant() })
    }
}

/// `Engine` is an engine module with its format table.
/// Fields drop in order, so attached codecs are unloaded before the engine itself.
pub(crate) struct Engine {
    entry_points: EngineEntryPoints,
    registry: FormatRegistry,
    codecs: RwLock<HashMap<String, Arc<CodecModule>>>,
    _library: Option<Library>,
}

impl Engine {
    /// `load` loads the module at `path`, resolves its exports and reads its formats.
    pub(crate) fn load(path: &Path) -> Result<Self> {
        info!(r#"Engine::load(path: "{}")"#, path.display());
        let library = Library::open(path)?;
        let entry_points = unsafe {
            EngineEntryPoints {
                get_number_of_formats: library.symbol(c"GetNumberOfFormats")?,
                get_handler_property2: library.symbol(c"GetHandlerProperty2")?,
                create_object: library.symbol(c"CreateObject")?,
            }
        };
        let registry = FormatRegistry::populate(&entry_points)?;
        Ok(Engine {
            entry_points,
            registry,
            codecs: RwLock::new(HashMap::new()),
            _library: Some(library),
        })
    }

    /// An engine whose exports live in this process.
    #[cfg(test)]
    pub(crate) fn from_entry_points(entry_points: EngineEntryPoints) -> Result<Self> {
        let registry = FormatRegistry::populate(&entry_points)?;
        Ok(Engine {
            entry_points,
            registry,
            codecs: RwLock::new(HashMap::new()),
            _library: None,
        })
    }

    pub(crate) fn registry(&self) -> &FormatRegistry {
        &self.registry
    }

    /// `attach_codec` loads a codec module for `format`, replacing any earlier one.
    pub(crate) fn attach_codec(&self, format: &str, path: &Path) -> Result<()> {
        info!(r#"Engine::attach_codec(format: "{format}", path: "{}")"#, path.display());
        if self.registry.find(format).is_none() {
            error!("{format} is not a supported format");
            return Err(Error::FormatNotSupported(format.to_string()));
        }
        self.install_codec(format, CodecModule::load(path)?);
        Ok(())
    }

    pub(crate) fn install_codec(&self, format: &str, module: CodecModule) {
        let previous = self
            .codecs
            .write()
            .insert(format.to_string(), Arc::new(module));
        if let Some(previous) = previous {
            debug!("{format}: replaced codec {}", previous.path().display());
        }
    }

    /// `create_archive` instantiates an engine archive object for `format`,
    /// handing it the format's attached codec if there is one.
    pub(crate) fn create_archive(&self, format: &str) -> Result<ComPtr<IInArchive>> {
        let Some(descriptor) = self.registry.find(format) else {
            error!(r#""{format}" is not a supported format"#);
            return Err(Error::FormatNotSupported(format.to_string()));
        };
        let mut raw = ptr::null_mut();
        let hr = unsafe {
            (self.entry_points.create_object)(&descriptor.class_id, &IInArchive::IID, &mut raw)
        };
        check(hr, "CreateObject")?;
        let archive = unsafe { ComPtr::<IInArchive>::from_raw(raw) }.ok_or_else(|| {
            error!("CreateObject returned no object");
            Error::Engine {
                code: E_NOINTERFACE,
                context: "CreateObject".into(),
            }
        })?;

        let codec = self.codecs.read().get(format).cloned();
        if let Some(codec) = codec {
            match archive.query::<ISetCompressCodecsInfo>() {
                Ok(setter) => {
                    let info = CodecsInfo::new(codec).interface::<ICompressCodecsInfo>();
                    let hr = setter.set_compress_codecs_info(&info);
                    if failed(hr) {
                        warn!("{format}: SetCompressCodecsInfo failed with 0x{:08X}", hr as u32);
                    }
                }
                Err(_) => warn!("{format}: archive object does not accept external codecs"),
            }
        }
        Ok(archive)
    }
}
