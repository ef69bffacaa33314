pub mod link;
pub mod tag;
