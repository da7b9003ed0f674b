//! Objects this crate hands to the engine.
mod callbacks;
mod codecs;
mod in_stream;
mod out_stream;

pub(crate) use callbacks::{ExtractCallback, OpenCallback};
pub(crate) use codecs::CodecsInfo;
pub(crate) use in_stream::InStream;
pub(crate) use out_stream::OutStream;
