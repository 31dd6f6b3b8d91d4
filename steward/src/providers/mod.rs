//! Provider implementations shipped with the runtime.
//!
//! Concrete HTTP backends live out of tree; what ships here is the
//! [`MockProvider`] used by the test suite and by callers embedding the
//! runtime in deterministic harnesses.

mod mock;

pub use mock::MockProvider;
