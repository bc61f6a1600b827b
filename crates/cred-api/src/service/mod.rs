pub mod friendship;
pub mod resource;
pub mod user;
