#![doc = include_str!("../README.md")]

mod config;
mod error;
mod event;
mod firefox;
mod heap;
mod parser;
pub mod report;
mod stats;

pub use config::*;
pub use error::*;
pub use event::*;
pub use firefox::*;
pub use heap::*;
pub use parser::*;
pub use stats::*;
