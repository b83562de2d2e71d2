//! The error type used throughout the crate.
//!
//! There is only one, [`Failed`]. It indicates that an operation could not
//! complete, that all diagnostic information has already been logged, and
//! that the caller need not do anything beyond unwinding its own state.


//------------ Failed --------------------------------------------------------

/// An operation has failed to complete.
///
/// This error type is used to indicate that an operation has failed,
/// diagnostic information has been printed or logged, and the caller can’t
/// really do anything to recover.
#[derive(Clone, Copy, Debug)]
pub struct Failed;
