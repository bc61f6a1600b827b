pub mod api;
pub mod models;
pub mod status;

pub use status::FriendshipStatus;
