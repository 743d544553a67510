//! Merge views and the derived path → source map

mod map;
mod view;

pub use map::{MergeMap, path_key};
pub use view::{MergeView, Node};
