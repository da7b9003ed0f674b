pub(crate) mod fake_engine;

use crate::engine::{self, Engine};
use crate::error::Result;
use parking_lot::{Mutex, MutexGuard, const_mutex};

/// Serializes tests that install or tear down the process-wide engine.
pub(crate) static ENGINE_LOCK: Mutex<()> = const_mutex(());

/// Installs the in-process engine for the duration of the returned guard.
pub(crate) fn with_fake_engine() -> Result<MutexGuard<'static, ()>> {
    let guard = ENGINE_LOCK.lock();
    crate::uninitialize();
    engine::install(Engine::from_entry_points(fake_engine::entry_points())?);
    Ok(guard)
}

/// Tears the engine down for the duration of the returned guard.
pub(crate) fn without_engine() -> MutexGuard<'static, ()> {
    let guard = ENGINE_LOCK.lock();
    crate::uninitialize();
    guard
}

/// An archive in the fake engine's text format.
fn fake_archive(lines: &[&str]) -> Vec<u8> {
    let mut text = String::from("FAKE\n");
    for line in lines {
        text.push_str(line);
        text.push('\n');
    }
    text.into_bytes()
}

const fn nested_entries() -> &'static [&'static str] {
    &[
        "d\tcontent/",
        "f\tcontent/first\tfirst",
        "f\tcontent/third\tthird",
        "d\tcontent/nested/",
        "f\tcontent/nested/second\tsecond",
    ]
}

fn names(items: &[crate::ArchiveItem]) -> Vec<&str> {
    items.iter().map(|item| item.path.as_str()).collect()
}
