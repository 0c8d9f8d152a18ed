pub mod broadcaster;
pub mod chat;
pub mod gate;
pub mod throttle;
pub mod tracking;
pub mod typing;
