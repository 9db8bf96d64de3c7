//! Spill/reload placement and rematerialization for SSA-based register
//! allocators.
//!
//! This crate is compatible with `#![no_std]` and only requires `alloc`.
//!
//! # Usage
//!
//! This crate does not decide *which* values need to be spilled: that is the
//! job of the register assignment algorithm. Once it has determined that a
//! value doesn't fit in registers at some points of the program, it records
//! its decisions in a [`SpillEnv`]:
//!
//! - [`SpillEnv::register_spill`] requests that a value be stored to memory
//!   after a given point.
//! - [`SpillEnv::register_reload`] requests that a value be made available in
//!   a register again before a given consumer, either by reloading it from
//!   memory or by recomputing it (rematerialization).
//! - [`SpillEnv::spill_phi`] requests that a phi be replaced entirely by a
//!   memory phi of the spilled phi operands.
//!
//! [`SpillEnv::insert_spills_reloads`] then places all of the spill, reload and
//! rematerialization operations into the [`Function`], choosing between
//! reloading and rematerializing based on the costs reported by the
//! [`ArchInfo`] implementation and the block execution frequencies, and
//! finally reconstructs SSA form so that every consumer of a spilled value
//! once again has a single reaching definition.
//!
//! # Validation
//!
//! When developing a new client of this crate, it is highly recommended to
//! use [`debug_utils::validate_ssa`] on the function before and after
//! spilling. If the input is not in valid SSA form then the spiller may panic
//! or produce garbage results.
//!
//! [`SpillEnv`]: spill::SpillEnv
//! [`SpillEnv::register_spill`]: spill::SpillEnv::register_spill
//! [`SpillEnv::register_reload`]: spill::SpillEnv::register_reload
//! [`SpillEnv::spill_phi`]: spill::SpillEnv::spill_phi
//! [`SpillEnv::insert_spills_reloads`]: spill::SpillEnv::insert_spills_reloads
//! [`Function`]: function::Function
//! [`ArchInfo`]: arch::ArchInfo

#![no_std]
#![warn(rust_2018_idioms, missing_docs)]
#![allow(
    clippy::too_many_arguments,
    clippy::collapsible_if,
    clippy::collapsible_else_if,
    clippy::single_char_add_str,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::too_many_lines,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::doc_markdown
)]
#![warn(
    clippy::explicit_iter_loop,
    clippy::range_plus_one,
    clippy::map_unwrap_or,
    clippy::cloned_instead_of_copied,
    clippy::semicolon_if_nothing_returned,
    clippy::must_use_candidate,
    clippy::iter_without_into_iter,
    clippy::uninlined_format_args,
    clippy::ignored_unit_patterns
)]

extern crate alloc;

use core::fmt;

use function::{Block, RegClass, Value};

// Even when trace logging is disabled, the trace macro has a significant
// performance cost so we disable it in release builds.
macro_rules! trace {
    ($($tt:tt)*) => {
        if cfg!(feature = "trace-log") {
            ::log::trace!(target: "regspill", $($tt)*);
        }
    };
}

// Macro for collecting statistics.
macro_rules! stat {
    ($stats:expr, $field:ident) => {
        $stats.$field += 1
    };
    ($stats:expr, $field:ident, $count:expr) => {
        $stats.$field += $count
    };
}

#[macro_use]
pub mod entity;

pub mod arch;
pub mod cfg;
pub mod debug_utils;
pub mod function;
pub mod spill;
pub mod ssa;

/// Configuration options for the spiller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Options {
    /// Whether reloads may be replaced by recomputing the value.
    ///
    /// When disabled, every reload request is satisfied with a load from a
    /// spill slot, unless the caller already provided a replacement.
    pub rematerialize: bool,

    /// Whether to remove operations that became dead after spilling from the
    /// schedule.
    ///
    /// This covers spill/reload/remat operations that ended up unused as well
    /// as spilled phis and rematerializable values whose uses were all
    /// replaced.
    pub prune_dead_copies: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            rematerialize: true,
            prune_dead_copies: true,
        }
    }
}

/// Error returned by the spiller when it is used incorrectly or when the input
/// function is malformed.
///
/// These indicate a bug in the caller: there is no way to recover from them
/// other than abandoning the compilation of the function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SpillError {
    /// A spill or reload was requested for a value marked as never needing
    /// a spill.
    DontSpill(Value),

    /// A spill was requested immediately before a phi.
    ///
    /// Spills must be placed after all the phis of a block.
    SpillBeforePhi {
        /// The value being spilled.
        value: Value,
        /// The requested spill point.
        after: Value,
    },

    /// A reload was requested before a spill or keep-alive operation.
    InvalidReloadPoint {
        /// The value being reloaded.
        value: Value,
        /// The requested reload point.
        before: Value,
    },

    /// Reloads of the same value were requested into different register
    /// classes.
    ReloadClassMismatch {
        /// The value being reloaded.
        value: Value,
        /// Class of the earlier reload requests.
        expected: RegClass,
        /// Class of the offending reload request.
        found: RegClass,
    },

    /// A block doesn't end with a terminator, so there is no place to insert
    /// code at its end.
    MissingTerminator(Block),

    /// SSA reconstruction reached a block without predecessors while looking
    /// for a definition of a value.
    NoReachingDefinition {
        /// The value whose uses were being rewritten.
        value: Value,
        /// The block in which the search failed.
        block: Block,
    },
}

impl fmt::Display for SpillError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SpillError::DontSpill(value) => {
                write!(f, "{value} is marked as never needing a spill")
            }
            SpillError::SpillBeforePhi { value, after } => {
                write!(f, "spill of {value} after {after} would precede a phi")
            }
            SpillError::InvalidReloadPoint { value, before } => {
                write!(f, "reload of {value} requested before non-reloadable point {before}")
            }
            SpillError::ReloadClassMismatch {
                value,
                expected,
                found,
            } => write!(
                f,
                "reload of {value} into {found} conflicts with earlier reloads into {expected}"
            ),
            SpillError::MissingTerminator(block) => {
                write!(f, "{block} doesn't end with a terminator")
            }
            SpillError::NoReachingDefinition { value, block } => {
                write!(f, "no definition of {value} reaches {block}")
            }
        }
    }
}

/// Statistics collected by the spiller.
///
/// The set of statistics may vary between versions of this crate. Other than
/// the accessors below, the only supported operations on this type are
/// default initialization and printing with `Debug` or `Display`.
#[derive(Debug, Default, Clone)]
pub struct Stats {
    // Ledger.
    spill_requests: usize,
    reload_requests: usize,
    spill_cost_computations: usize,
    dominating_spills_added: usize,

    // Materialization.
    spills: usize,
    reloads: usize,
    remats: usize,
    forced_remats: usize,
    spilled_phis: usize,

    // SSA reconstruction and cleanup.
    ssa_phis: usize,
    rewritten_uses: usize,
    dead_copies_pruned: usize,
}

impl Stats {
    /// Number of spill operations inserted.
    #[must_use]
    pub fn spills(&self) -> usize {
        self.spills
    }

    /// Number of reload operations inserted.
    #[must_use]
    pub fn reloads(&self) -> usize {
        self.reloads
    }

    /// Number of values recomputed instead of reloaded.
    ///
    /// Operands which had to be recomputed along with a value are not counted
    /// separately.
    #[must_use]
    pub fn remats(&self) -> usize {
        self.remats
    }

    /// Number of phis replaced by a memory phi.
    #[must_use]
    pub fn spilled_phis(&self) -> usize {
        self.spilled_phis
    }

    /// Number of phis inserted by SSA reconstruction.
    #[must_use]
    pub fn ssa_phis(&self) -> usize {
        self.ssa_phis
    }

    /// Number of times the spill cost of a value was actually computed.
    #[must_use]
    pub fn spill_cost_computations(&self) -> usize {
        self.spill_cost_computations
    }

    /// Number of dead operations removed after spilling.
    #[must_use]
    pub fn dead_copies_pruned(&self) -> usize {
        self.dead_copies_pruned
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:#?}")
    }
}
