#![cfg_attr(doc, warn(missing_docs))]
#![doc = include_str!("../README.md")]

pub mod addr;
pub mod dbg;
pub mod plat;
pub mod repl;
pub mod trace;
