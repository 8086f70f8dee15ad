//! Extensions to the standard library. A collection of helper functions
//! used throughout switchboard.

pub mod env;
pub mod path;
