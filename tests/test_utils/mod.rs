#![allow(dead_code)]

mod setup;
mod tree;

pub use self::setup::*;
pub use self::tree::*;
