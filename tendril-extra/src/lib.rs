#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

pub mod fetch;
pub mod future;
pub mod map;
pub mod mutex;

pub use fetch::{fetch_and_classify, FetchError, FetchOptions, RequestResult};
pub use future::{next_dispatch, wait_for};
pub use map::{map, map_or_recover, try_map};
pub use mutex::TaskMutex;
