//! Managed-runtime object graph walks. The analyzer itself knows nothing
//! about any particular runtime's heap layout; a runtime plugin implements
//! [`ObjectModel`] on top of the address space and the generic operations
//! here (heap statistics, reference searches) work against that.
//!
//! Objects are opaque handles, in practice the object's address. All the
//! traversals are early-stoppable and treat unreadable memory as "the walk
//! ends here": a damaged core yields partial statistics, not a failure.
use crate::space::Result;
use std::collections::BTreeMap;
use std::ops::ControlFlow;

/// An object in the target runtime's heap, identified by address. Two
/// handles are the same object exactly when they're equal.
pub type ObjectHandle = u64;

pub trait ObjectModel {
    /// Visits every live object until the callback breaks. Returns Err only
    /// when the heap walk itself hits unreadable memory; whatever was
    /// visited before that already happened.
    fn for_each_object(
        &self,
        visit: &mut dyn FnMut(ObjectHandle) -> ControlFlow<()>,
    ) -> Result<()>;

    /// Visits the objects directly referenced by `object`.
    fn for_each_reference(
        &self,
        object: ObjectHandle,
        visit: &mut dyn FnMut(ObjectHandle) -> ControlFlow<()>,
    ) -> Result<()>;

    fn class_of(&self, object: ObjectHandle) -> Result<String>;

    fn size_of(&self, object: ObjectHandle) -> Result<u64>;
}

#[derive(Clone, Copy, Default)]
pub struct ClassStats {
    pub count: u64,
    pub bytes: u64,
}

pub struct HeapStats {
    /// Keyed by class name, sorted for stable output.
    pub classes: BTreeMap<String, ClassStats>,
    pub total_count: u64,
    pub total_bytes: u64,

    /// False when parts of the heap were unreadable; the numbers then are a
    /// lower bound.
    pub complete: bool,
}

/// Aggregates object counts and bytes per class across the whole heap.
/// Objects whose header can't be read are counted as missing, not fatal.
pub fn heap_stats(model: &dyn ObjectModel) -> HeapStats {
    let mut stats = HeapStats {
        classes: BTreeMap::new(),
        total_count: 0,
        total_bytes: 0,
        complete: true,
    };
    let walk = model.for_each_object(&mut |object| {
        match (model.class_of(object), model.size_of(object)) {
            (Ok(class), Ok(size)) => {
                let entry = stats.classes.entry(class).or_default();
                entry.count += 1;
                entry.bytes += size;
                stats.total_count += 1;
                stats.total_bytes += size;
            }
            _ => stats.complete = false,
        }
        ControlFlow::Continue(())
    });
    if walk.is_err() {
        stats.complete = false;
    }
    stats
}

/// Finds up to `limit` objects that directly reference `target`. This is the
/// expensive direction (the whole heap gets scanned) which is why the limit
/// exists: finding one referer of a leaked object shouldn't cost a full scan.
pub fn referers(
    model: &dyn ObjectModel,
    target: ObjectHandle,
    limit: usize,
) -> Result<Vec<ObjectHandle>> {
    let mut found = Vec::new();
    model.for_each_object(&mut |object| {
        let mut references_target = false;
        let _ = model.for_each_reference(object, &mut |reference| {
            if reference == target {
                references_target = true;
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        });
        if references_target {
            found.push(object);
            if found.len() >= limit {
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    })?;
    Ok(found)
}
