//! Every way a read against the reconstructed address space can fail. These
//! are per-call errors: commands report them and move on, traversals treat
//! them as a reason to stop early, never as a reason to crash.
use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    /// The address is outside every load block.
    #[error("address {0:#x} is not mapped")]
    NotMapped(u64),

    /// The range starts inside a block but crosses its end, or spans a gap
    /// in every requested backing source. We never silently zero-fill.
    #[error("range [{addr:#x}, {end:#x}) is only partially backed")]
    PartiallyUnmapped { addr: u64, end: u64 },

    /// The caller forced a source the covering block cannot serve, e.g.
    /// `--mmap` for a block whose backing file couldn't be opened. The field
    /// can't be called `source`, thiserror reserves that name for a cause.
    #[error("no {which} bytes available at {addr:#x}")]
    SourceUnavailable { addr: u64, which: Source },

    /// A live target vanished or denied access mid-read. Bulk operations
    /// downgrade to a partial result when they see this.
    #[error("target became unreadable: {0}")]
    TargetUnreadable(String),

    /// The snapshot itself is inconsistent. Reported once at build time;
    /// whatever parsed cleanly stays usable.
    #[error("malformed core image: {0}")]
    MalformedInput(String),

    /// Header or layout computation for a reconstructed core failed. Fatal
    /// to the reconstruction: a half-written core is worse than none.
    #[error("core reconstruction failed: {0}")]
    ReconstructionFailed(String),
}

/// Where the resolver gets bytes from. Priority is a caller choice; the
/// default is most-recently-applied wins: overlay, then mmap, then origin.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Source {
    /// Operator patches applied this session.
    Overlay,

    /// The on-disk file the target had mapped at this range.
    Mapped,

    /// Bytes embedded in the core file itself.
    Origin,
}

pub const DEFAULT_PRIORITY: &[Source] = &[Source::Overlay, Source::Mapped, Source::Origin];

impl fmt::Display for Source {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Source::Overlay => fmt.write_str("overlay"),
            Source::Mapped => fmt.write_str("mmap"),
            Source::Origin => fmt.write_str("origin"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_name_the_address() {
        insta::assert_snapshot!(
            Error::NotMapped(0x7fff_dead_0000).to_string(),
            @"address 0x7fffdead0000 is not mapped");
        insta::assert_snapshot!(
            Error::PartiallyUnmapped { addr: 0x1ff8, end: 0x2008 }.to_string(),
            @"range [0x1ff8, 0x2008) is only partially backed");
        insta::assert_snapshot!(
            Error::SourceUnavailable { addr: 0x1000, which: Source::Mapped }.to_string(),
            @"no mmap bytes available at 0x1000");
    }
}
