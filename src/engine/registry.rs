use crate::error::{Error, Result};
use crate::sevenzip::{E_FAIL, Guid, HandlerProperty, Variant};
use log::{debug, error, info};

/// `FormatDescriptor` describes one archive format known to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescriptor {
    /// Display name, also the name accepted by `format` arguments.
    pub name: String,
    /// Class identifier passed to the engine's `CreateObject`.
    pub class_id: Guid,
    /// Byte sequences identifying the format. Empty when the engine reports none,
    /// in which case the format is only reachable by name.
    pub signatures: Vec<Vec<u8>>,
    /// Where the signatures are expected in the archive.
    pub signature_offset: u32,
}

impl FormatDescriptor {
    /// `matches` tells whether `buffer` carries one of the signatures at the expected offset.
    pub fn matches(&self, buffer: &[u8]) -> bool {
        let offset = self.signature_offset as usize;
        self.signatures.iter().any(|signature| {
            offset
                .checked_add(signature.len())
                .and_then(|end| buffer.get(offset..end))
                .is_some_and(|window| window == signature.as_slice())
        })
    }
}

/// Where handler metadata is read from: the engine's `GetNumberOfFormats` and
/// `GetHandlerProperty2` exports.
pub(crate) trait HandlerProperties {
    fn format_count(&self) -> Result<u32>;
    fn handler_property(&self, index: u32, property: HandlerProperty) -> Result<Variant>;
}

/// Formats in engine order, with their names joined for introspection.
#[derive(Debug, Default)]
pub(crate) struct FormatRegistry {
    formats: Vec<FormatDescriptor>,
    names: String,
}

impl FormatRegistry {
    pub(crate) fn populate(source: &impl HandlerProperties) -> Result<Self> {
        info!("FormatRegistry::populate()");
        let count = source.format_count()?;
        if count == 0 {
            error!("engine reports no formats");
            return Err(Error::Engine {
                code: E_FAIL,
                context: "No supported formats".into(),
            });
        }
        let mut formats = Vec::with_capacity(count as usize);
        for index in 0..count {
            formats.push(read_descriptor(source, index)?);
        }
        let names = formats
            .iter()
            .map(|format| format.name.as_str())
            .collect::<Vec<_>>()
            .join(",");
        debug!("registered formats: {names}");
        Ok(FormatRegistry { formats, names })
    }

    /// `detect` returns the first format, in registry order, whose signature is in `buffer`.
    pub(crate) fn detect(&self, buffer: &[u8]) -> Option<&FormatDescriptor> {
        self.formats.iter().find(|format| format.matches(buffer))
    }

    pub(crate) fn find(&self, name: &str) -> Option<&FormatDescriptor> {
        self.formats.iter().find(|format| format.name == name)
    }

    pub(crate) fn formats(&self) -> &[FormatDescriptor] {
        &self.formats
    }

    pub(crate) fn names(&self) -> &str {
        &self.names
    }
}

fn read_descriptor(source: &impl HandlerProperties, index: u32) -> Result<FormatDescriptor> {
    let name = source
        .handler_property(index, HandlerProperty::Name)?
        .as_bstr()
        .map(|name| name.to_string_lossy())
        .unwrap_or_default();
    let class_id = source
        .handler_property(index, HandlerProperty::ClassId)
        .map_err(|error| with_format(error, &name))?;
    let Some(class_id) = Guid::from_bytes(class_id.bytes()) else {
        error!("{name}: kClassID is not a GUID");
        return Err(Error::Engine {
            code: E_FAIL,
            context: format!("GetHandlerProperty2(kClassID) ({name})").into(),
        });
    };

    let single = source.handler_property(index, HandlerProperty::Signature);
    let signatures = match single {
        Ok(signature) if !signature.bytes().is_empty() => vec![signature.bytes().to_vec()],
        _ => match source.handler_property(index, HandlerProperty::MultiSignature) {
            Ok(blob) if !blob.bytes().is_empty() => parse_multi_signature(blob.bytes())
                .ok_or_else(|| {
                    error!("Malformed signature detected ({name})");
                    Error::MalformedSignature(name.clone())
                })?,
            _ => Vec::new(),
        },
    };

    let signature_offset = source
        .handler_property(index, HandlerProperty::SignatureOffset)
        .map_err(|error| with_format(error, &name))?
        .as_u64() as u32;

    debug!(
        "format {index}: {name} {class_id} ({} signatures at offset {signature_offset})",
        signatures.len()
    );
    Ok(FormatDescriptor {
        name,
        class_id,
        signatures,
        signature_offset,
    })
}

/// Appends the failing format's name to an engine error.
fn with_format(error: Error, name: &str) -> Error {
    match error {
        Error::Engine { code, context } => Error::Engine {
            code,
            context: format!("{context} ({name})").into(),
        },
        other => other,
    }
}

/// Splits a `[len][bytes][len][bytes]...` blob.
/// `None` when a length is the reserved `0xFF` or runs past the blob.
pub(crate) fn parse_multi_signature(mut blob: &[u8]) -> Option<Vec<Vec<u8>>> {
    let mut signatures = Vec::new();
    while let Some((&len, rest)) = blob.split_first() {
        if len == 0xFF || len as usize > rest.len() {
            return None;
        }
        let (signature, rest) = rest.split_at(len as usize);
        signatures.push(signature.to_vec());
        blob = rest;
    }
    Some(signatures)
}
