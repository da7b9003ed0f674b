mod archive;
mod backing;
mod item;
mod listing;
#[cfg(test)]
pub(crate) mod tests;

pub use archive::*;
pub use item::ArchiveItem;
