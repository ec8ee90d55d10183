pub mod diagnostics;
pub mod types;

pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use types::*;
