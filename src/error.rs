use crate::sevenzip::{self, HRESULT};
use log::{debug, error};
use std::borrow::Cow;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("GlobalInitialize has not been called")]
    NotInitialized,
    #[error("Archive has not been loaded")]
    NotLoaded,
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Format not supported: {0}")]
    FormatNotSupported(String),
    #[error("{0}")]
    InvalidArchive(&'static str),
    #[error("Unable to discover archive format")]
    FormatDetectionFailed,
    #[error("{context} failed with HRESULT {}", hresult_hex(.code))]
    Engine {
        code: HRESULT,
        context: Cow<'static, str>,
    },
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Path not found: {0}")]
    PathNotFound(String),
    #[error("Invalid item index {index} (archive has {count} items)")]
    IndexOutOfRange { index: u32, count: u32 },
    #[error("Malformed signature detected ({0})")]
    MalformedSignature(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unable to load module {path}: {reason}")]
    ModuleLoad { path: String, reason: String },
    #[error("Module {path} does not export {symbol}")]
    MissingSymbol { symbol: String, path: String },
    #[error("Extraction failed: {}", operation_reason(.0))]
    Operation(i32),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// `code` returns the numeric status reported alongside the message in [`LastError`].
    pub fn code(&self) -> i32 {
        match self {
            Error::Engine { code, .. } => *code,
            Error::Io(error) => error.raw_os_error().unwrap_or(sevenzip::E_FAIL),
            Error::OutOfMemory => sevenzip::E_OUTOFMEMORY,
            Error::InvalidArgument(_) | Error::IndexOutOfRange { .. } => sevenzip::E_INVALIDARG,
            _ => sevenzip::E_FAIL,
        }
    }
}

fn hresult_hex(code: &HRESULT) -> String {
    format!("0x{:08X}", *code as u32)
}

/// Result names of `NArchive::NExtract::NOperationResult`.
fn operation_reason(result: &i32) -> Cow<'static, str> {
    match *result {
        1 => "unsupported method".into(),
        2 => "data error".into(),
        3 => "CRC error".into(),
        4 => "unavailable data".into(),
        5 => "unexpected end of data".into(),
        6 => "data after end of archive".into(),
        7 => "not an archive".into(),
        8 => "headers error".into(),
        9 => "wrong password".into(),
        other => format!("operation result {other}").into(),
    }
}

/// `check` turns an engine status into a `Result`, naming the failed call.
pub(crate) fn check(hr: HRESULT, context: impl Into<Cow<'static, str>>) -> Result<()> {
    let context = context.into();
    if sevenzip::failed(hr) {
        let error = Error::Engine { code: hr, context };
        error!("{error}");
        return Err(error);
    }
    debug!("{context}: success");
    Ok(())
}

/// The code and message of the most recent failing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub code: i32,
    pub message: String,
}

impl From<&Error> for LastError {
    fn from(error: &Error) -> Self {
        LastError {
            code: error.code(),
            message: error.to_string(),
        }
    }
}
