use super::{Engine, FormatDescriptor};
use crate::error::{Error, LastError, Result};
use log::{error, info};
use parking_lot::{Mutex, RwLock, const_mutex, const_rwlock};
use std::path::Path;
use std::sync::Arc;

/// Process-wide engine. Sessions keep their own `Arc`, so uninitializing
/// never unloads a module an open archive still uses.
static ENGINE: RwLock<Option<Arc<Engine>>> = const_rwlock(None);

static LAST_ERROR: Mutex<Option<LastError>> = const_mutex(None);

fn record<T>(result: Result<T>) -> Result<T> {
    if let Err(error) = &result {
        *LAST_ERROR.lock() = Some(error.into());
    }
    result
}

/// `initialize` loads the engine module at `path` and reads its formats.
/// Any engine loaded before is torn down first; on failure none is left loaded.
pub fn initialize<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    info!(r#"initialize(path: "{}")"#, path.display());
    let mut engine = ENGINE.write();
    engine.take();
    record(Engine::load(path).map(|loaded| {
        engine.replace(Arc::new(loaded));
    }))
}

/// `add_codec` attaches the codec module at `path` to `format`.
pub fn add_codec<P: AsRef<Path>>(format: &str, path: P) -> Result<()> {
    let path = path.as_ref();
    info!(r#"add_codec(format: "{format}", path: "{}")"#, path.display());
    record(current().and_then(|engine| engine.attach_codec(format, path)))
}

/// `uninitialize` drops the engine, its formats and codecs. Calling it again is harmless.
pub fn uninitialize() {
    info!("uninitialize()");
    ENGINE.write().take();
}

/// `supported_formats` returns the registered format names joined with commas.
pub fn supported_formats() -> Result<String> {
    info!("supported_formats()");
    record(current().map(|engine| engine.registry().names().to_string()))
}

/// `formats` returns the registered formats in engine order.
pub fn formats() -> Result<Vec<FormatDescriptor>> {
    info!("formats()");
    record(current().map(|engine| engine.registry().formats().to_vec()))
}

/// `last_error` returns the most recent failure of a process-wide call.
pub fn last_error() -> Option<LastError> {
    LAST_ERROR.lock().clone()
}

pub(crate) fn current() -> Result<Arc<Engine>> {
    ENGINE.read().clone().ok_or_else(|| {
        error!("GlobalInitialize has not been called");
        Error::NotInitialized
    })
}

pub(crate) fn is_initialized() -> bool {
    ENGINE.read().is_some()
}

#[cfg(test)]
pub(crate) fn install(engine: Engine) {
    ENGINE.write().replace(Arc::new(engine));
}
