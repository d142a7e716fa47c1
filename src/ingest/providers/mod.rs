pub mod feed;
pub mod forum;
