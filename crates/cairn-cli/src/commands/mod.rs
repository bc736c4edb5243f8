//! Command implementations

pub mod args;
pub mod dump;
pub mod inspect;
pub mod restore;
