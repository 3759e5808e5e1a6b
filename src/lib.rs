pub mod common;
pub mod index;
pub mod inference;
pub mod normalize;
pub mod server;
pub mod session;
pub mod store;
pub mod utils;
