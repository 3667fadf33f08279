//! Host stack headroom for recursive evaluation.
//!
//! Script recursion recurses on the host stack.  Wrapping the recursive
//! entry points keeps the configured call-depth limit reachable on any
//! thread, so running out of depth is a Zen runtime error and never a
//! process abort.

/// Space that must remain before the stack is grown.
const RED_ZONE: usize = 128 * 1024;

/// Size of each newly allocated stack segment.
const STACK_PER_RECURSION: usize = 2 * 1024 * 1024;

/// Run `f`, first moving to a fresh stack segment if less than
/// [`RED_ZONE`] bytes remain.
#[inline]
#[cfg(not(target_arch = "wasm32"))]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

#[inline]
#[cfg(target_arch = "wasm32")]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    f()
}
