#![allow(dead_code)]

mod protocol;

pub use protocol::*;
