//! Stateless repositories over `&Connection`.

pub mod conversation;
pub mod user;
