//! LMD-GHOST head selection with a Casper-FFG finality gate.

mod fork_choice;

pub use crate::fork_choice::{Error, ForkChoice};
