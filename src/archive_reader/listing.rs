//! Rebuilds one level of the directory tree from the archive's flat entry list.
//!
//! Entries are read in contiguous index chunks, one chunk per worker. Each worker
//! classifies its entries against the queried directory and sends a partial result
//! over a channel; the calling thread merges the partials as they arrive.

use super::item::{ArchiveItem, ItemSource, SEPARATOR};
use crate::error::{Error, Result};
use crossbeam::channel;
use log::{debug, error};
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;

/// Below this many entries a single worker reads the whole archive.
pub(crate) const DEFAULT_PARALLEL_THRESHOLD: u32 = 500;

/// How many workers read entries, and from which archive size on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Parallelism {
    pub(crate) workers: usize,
    pub(crate) threshold: u32,
}

impl Parallelism {
    pub(crate) fn workers_for(&self, count: u32) -> usize {
        if count < self.threshold {
            1
        } else {
            self.workers.max(1)
        }
    }
}

/// Splits `[0, count)` into `workers` contiguous chunks; the last absorbs the remainder.
pub(crate) fn partition(count: u32, workers: usize) -> Vec<Range<u32>> {
    let workers = u32::try_from(workers.max(1)).unwrap_or(u32::MAX);
    let chunk = count / workers;
    (0..workers)
        .map(|worker| {
            let start = chunk * worker;
            let end = if worker == workers - 1 {
                count
            } else {
                chunk * (worker + 1)
            };
            start..end
        })
        .collect()
}

/// Removes trailing separators, so `"a/"` queries the same directory as `"a"`.
pub(crate) fn normalize(query: &str) -> &str {
    query.trim_end_matches(SEPARATOR)
}

/// Runs `work` over every chunk and feeds each partial result to `absorb`
/// on the calling thread. The first failure stops the remaining workers.
fn fan_out<T, W, A>(count: u32, workers: usize, work: W, mut absorb: A) -> Result<()>
where
    T: Send,
    W: Fn(Range<u32>, &AtomicBool) -> Result<T> + Sync,
    A: FnMut(T),
{
    let abort = AtomicBool::new(false);
    let chunks = partition(count, workers);
    if chunks.len() == 1 {
        absorb(work(0..count, &abort)?);
        return Ok(());
    }
    debug!("reading {count} entries with {} workers", chunks.len());
    thread::scope(|scope| {
        let (sender, receiver) = channel::unbounded();
        for chunk in chunks {
            let sender = sender.clone();
            let (work, abort) = (&work, &abort);
            scope.spawn(move || {
                let partial = work(chunk, abort);
                if partial.is_err() {
                    abort.store(true, Ordering::Relaxed);
                }
                let _ = sender.send(partial);
            });
        }
        drop(sender);

        let mut failure = None;
        for partial in receiver {
            match partial {
                Ok(partial) if failure.is_none() => absorb(partial),
                Ok(_) => {}
                Err(error) => {
                    failure.get_or_insert(error);
                }
            }
        }
        failure.map_or(Ok(()), Err)
    })
}

/// Where an entry sits relative to the queried directory.
#[derive(Debug, PartialEq, Eq)]
enum Placement<'a> {
    /// A direct child.
    Child(&'a str),
    /// Deeper down, below the direct child named here.
    Below(&'a str),
    /// The queried directory itself.
    Itself,
    Outside,
}

fn place<'a>(path: &'a str, query: &str) -> Placement<'a> {
    // Unnamed entries (single-stream formats) sit at the root.
    if path.is_empty() {
        return if query.is_empty() {
            Placement::Child(path)
        } else {
            Placement::Outside
        };
    }
    let relative = if query.is_empty() {
        path
    } else if path == query {
        return Placement::Itself;
    } else {
        match path
            .strip_prefix(query)
            .and_then(|rest| rest.strip_prefix(SEPARATOR))
        {
            Some(relative) => relative,
            None => return Placement::Outside,
        }
    };
    let relative = relative.trim_end_matches(SEPARATOR);
    match relative.split_once(SEPARATOR) {
        _ if relative.is_empty() => Placement::Itself,
        Some((child, _)) => Placement::Below(child),
        None => Placement::Child(relative),
    }
}

#[derive(Default)]
struct Partial {
    children: HashMap<String, ArchiveItem>,
    discovered: HashSet<String>,
    exists: bool,
}

/// Keeps the entry with the higher index when two share a name,
/// as a sequential pass over the archive would.
fn keep_latest(children: &mut HashMap<String, ArchiveItem>, name: String, item: ArchiveItem) {
    match children.get(&name) {
        Some(existing) if !existing.is_placeholder() && existing.index > item.index => {}
        _ => {
            children.insert(name, item);
        }
    }
}

fn scan_chunk(source: &impl ItemSource, query: &str, chunk: Range<u32>, abort: &AtomicBool) -> Result<Partial> {
    let mut partial = Partial::default();
    for index in chunk {
        if abort.load(Ordering::Relaxed) {
            break;
        }
        let Ok(path) = source.path(index) else {
            continue;
        };
        let path = path.unwrap_or_default();
        if query.is_empty() {
            partial.exists = true;
        }
        match place(&path, query) {
            Placement::Child(name) => {
                partial.exists = true;
                let item = source.item(index)?;
                keep_latest(&mut partial.children, name.to_string(), item);
            }
            Placement::Below(name) => {
                partial.exists = true;
                partial.discovered.insert(name.to_string());
            }
            Placement::Itself if !query.is_empty() => {
                if path.ends_with(SEPARATOR) || source.is_dir(index)? {
                    partial.exists = true;
                }
            }
            Placement::Itself | Placement::Outside => {}
        }
    }
    Ok(partial)
}

/// `list` returns the direct children of `query`, sorted by name.
/// Fails with `PathNotFound` unless some entry proves the directory exists.
pub(crate) fn list(source: &impl ItemSource, query: &str, parallelism: Parallelism) -> Result<Vec<ArchiveItem>> {
    let query = normalize(query);
    let count = source.item_count()?;
    let mut children: HashMap<String, ArchiveItem> = HashMap::new();
    let mut discovered = HashSet::new();
    let mut exists = false;
    fan_out(
        count,
        parallelism.workers_for(count),
        |chunk, abort| scan_chunk(source, query, chunk, abort),
        |partial| {
            exists |= partial.exists;
            for (name, item) in partial.children {
                keep_latest(&mut children, name, item);
            }
            discovered.extend(partial.discovered);
        },
    )?;
    if !exists {
        error!(r#"directory "{query}" not found"#);
        return Err(Error::PathNotFound(query.to_string()));
    }
    for name in discovered {
        children
            .entry(name)
            .or_insert_with_key(|name| ArchiveItem::placeholder(name));
    }
    let mut items: Vec<_> = children
        .into_iter()
        .map(|(name, mut item)| {
            item.path = name;
            item
        })
        .collect();
    items.sort_by(|left, right| left.path.cmp(&right.path));
    Ok(items)
}

#[derive(Default)]
struct Lookup {
    exact: Option<u32>,
    directory: bool,
}

/// `find` looks `query` up by full path. A path that only prefixes other entries
/// yields a directory placeholder; the root is never synthesized.
///
/// Once some worker finds an exact match, workers scanning higher indices stop.
pub(crate) fn find(source: &impl ItemSource, query: &str, parallelism: Parallelism) -> Result<ArchiveItem> {
    let query = normalize(query);
    let count = source.item_count()?;
    let mut lookup = Lookup::default();
    let lowest_hit = AtomicU32::new(u32::MAX);
    fan_out(
        count,
        parallelism.workers_for(count),
        |chunk, abort| {
            let mut partial = Lookup::default();
            for index in chunk {
                if abort.load(Ordering::Relaxed) || index > lowest_hit.load(Ordering::Relaxed) {
                    break;
                }
                let Ok(path) = source.path(index) else {
                    continue;
                };
                let path = path.unwrap_or_default();
                match place(&path, query) {
                    _ if normalize(&path) == query => {
                        partial.exact.get_or_insert(index);
                        lowest_hit.fetch_min(index, Ordering::Relaxed);
                        break;
                    }
                    Placement::Child(_) | Placement::Below(_) => partial.directory = true,
                    Placement::Itself | Placement::Outside => {}
                }
            }
            Ok(partial)
        },
        |partial| {
            lookup.directory |= partial.directory;
            lookup.exact = match (lookup.exact, partial.exact) {
                (Some(left), Some(right)) => Some(left.min(right)),
                (left, right) => left.or(right),
            };
        },
    )?;
    match lookup.exact {
        Some(index) => source.item(index),
        None if lookup.directory && !query.is_empty() => Ok(ArchiveItem::placeholder(query)),
        None => {
            error!(r#"path "{query}" not found"#);
            Err(Error::PathNotFound(query.to_string()))
        }
    }
}
