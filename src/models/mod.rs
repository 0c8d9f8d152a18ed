pub mod chat;
pub mod location;
pub mod shift;
pub mod typing;
