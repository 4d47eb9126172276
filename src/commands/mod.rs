//! Handlers for the commands users type, e.g. `rd`.
pub mod dump;
pub mod info;
pub mod map;
pub mod mem;
pub mod tables;

pub use dump::*;
pub use info::*;
pub use map::*;
pub use mem::*;

use crate::linkmap::LinkMapIndex;
use crate::space::AddressSpace;
use crate::utils;
use std::cell::OnceCell;

/// Everything the commands operate on: the loaded core and the lazily built
/// link map index. Walking the link map costs dozens of memory reads and
/// plenty of cores are missing the pieces, so it only happens when a command
/// first needs symbols.
pub struct Session {
    pub space: AddressSpace,
    index: OnceCell<Option<LinkMapIndex>>,
}

impl Session {
    pub fn new(space: AddressSpace) -> Session {
        Session {
            space,
            index: OnceCell::new(),
        }
    }

    /// The link map index, None when this core doesn't have a walkable one.
    pub fn index(&self) -> Option<&LinkMapIndex> {
        self.index
            .get_or_init(|| match LinkMapIndex::new(&self.space) {
                Ok(index) => {
                    if !index.complete {
                        utils::warn("link map is incomplete, some objects may be missing");
                    }
                    Some(index)
                }
                Err(err) => {
                    utils::warn(&format!("can't walk the link map: {err}"));
                    None
                }
            })
            .as_ref()
    }
}
