#![cfg_attr(
    test,
    deny(
        missing_docs,
        future_incompatible,
        nonstandard_style,
        rust_2018_idioms,
        missing_copy_implementations,
        trivial_casts,
        trivial_numeric_casts,
        unused_qualifications,
    )
)]
#![cfg_attr(test, deny(
    clippy::cast_lossless,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::decimal_literal_representation,
    clippy::doc_markdown,
    // clippy::else_if_without_else,
    clippy::empty_enum,
    clippy::explicit_into_iter_loop,
    clippy::explicit_iter_loop,
    clippy::expl_impl_clone_on_copy,
    clippy::fallible_impl_from,
    clippy::filter_map_next,
    clippy::float_arithmetic,
    clippy::get_unwrap,
    clippy::if_not_else,
    clippy::indexing_slicing,
    clippy::inline_always,
    clippy::integer_arithmetic,
    clippy::invalid_upcast_comparisons,
    clippy::items_after_statements,
    clippy::manual_find_map,
    clippy::map_entry,
    clippy::map_flatten,
    clippy::match_like_matches_macro,
    clippy::match_same_arms,
    clippy::maybe_infinite_iter,
    clippy::mem_forget,
    // clippy::missing_docs_in_private_items,
    clippy::module_name_repetitions,
    clippy::multiple_inherent_impl,
    clippy::mut_mut,
    clippy::needless_borrow,
    clippy::needless_continue,
    clippy::needless_pass_by_value,
    clippy::non_ascii_literal,
    clippy::path_buf_push_overwrite,
    // clippy::print_stdout,
    clippy::redundant_closure_for_method_calls,
    clippy::shadow_reuse,
    clippy::shadow_same,
    clippy::shadow_unrelated,
    clippy::single_match_else,
    clippy::string_add,
    clippy::string_add_assign,
    clippy::type_repetition_in_bounds,
    clippy::unicode_not_nfc,
    clippy::unimplemented,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding,
    clippy::wildcard_dependencies,
))]
#![cfg_attr(
    test,
    warn(
        clippy::missing_const_for_fn,
        clippy::multiple_crate_versions,
        clippy::wildcard_enum_match_arm,
    )
)]

//! Lock-free, copy-on-write concurrent collections built on immutable snapshots.
//!
//! [`CowSet`] is an ordered set and [`CowMap`] is a key-value map. Each
//! one owns a single atomic pointer to an immutable snapshot of its whole
//! contents. Every write reads the installed snapshot, builds a complete
//! successor reflecting the change, and installs the successor with one
//! compare-and-swap, retrying from scratch against the winner if another
//! write got there first. Writes that would not change anything return
//! without touching the pointer.
//!
//! Reads never retry and never block. They either borrow the installed
//! snapshot for the duration of one call (`contains`, `get`, ...) or hand
//! out the snapshot itself via `snapshot`, which stays unchanged for as
//! long as the caller holds on to it, no matter how many writes happen
//! in the meantime.
//!
//! This trades write throughput for read simplicity: each successful write
//! costs a full copy of the collection. It is a good fit for collections
//! that are read constantly and written rarely, such as membership lists,
//! routing tables, or registries of subscribers.
//!
//! Like the `ebr` reclamation handles they carry, both containers are
//! `Send` but not `Sync`. To use one from several threads, clone it: all
//! clones operate on the same underlying collection.
//!
//! ```
//! let set = cow_collections::CowSet::<u64>::default();
//!
//! assert!(set.insert(3));
//! assert!(set.insert(1));
//! assert!(!set.insert(3));
//!
//! let before = set.snapshot();
//!
//! assert_eq!(set.pop_first(), Some(1));
//!
//! // snapshots are immutable, later writes are not observed through them
//! assert!(before.contains(&1));
//! assert!(!set.contains(&1));
//! ```

#[cfg(not(feature = "fault_injection"))]
#[inline]
const fn debug_delay() -> bool {
    false
}

/// This function is useful for inducing spurious compare-and-swap
/// failures, shaking out more possible interleavings of the retry
/// loops quickly. It gets fully eliminated by the compiler in
/// non-test code.
#[cfg(feature = "fault_injection")]
fn debug_delay() -> bool {
    use rand::{thread_rng, Rng};

    let mut rng = thread_rng();

    rng.gen_ratio(1, 20)
}

mod map;
mod set;
mod slot;

#[cfg(feature = "serde")]
mod serde;

use std::fmt;

pub use crate::map::CowMap;
pub use crate::set::{CowSet, Iter};

/// Error type for the [`CowMap::cas`] operation.
#[derive(Debug, PartialEq, Eq)]
pub struct CasFailure<V> {
    /// The current actual value that failed the comparison
    pub actual: Option<V>,
    /// The value that was proposed as a new value, which could
    /// not be installed due to the comparison failure.
    pub returned_new_value: Option<V>,
}

impl<V> fmt::Display for CasFailure<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.actual {
            Some(_) => f.write_str("compare and swap failed: key is bound to a different value"),
            None => f.write_str("compare and swap failed: key is not bound"),
        }
    }
}

impl<V: fmt::Debug> std::error::Error for CasFailure<V> {}

const fn _test_impls() {
    const fn send<T: Send>() {}
    const fn clone<T: Clone>() {}
    send::<CowSet<usize>>();
    clone::<CowSet<usize>>();
    send::<CowMap<usize, usize>>();
    clone::<CowMap<usize, usize>>();
}
