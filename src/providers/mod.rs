//! Frame source implementations

pub mod live;
pub mod replay;

pub use live::LiveSource;
pub use replay::ReplaySource;
