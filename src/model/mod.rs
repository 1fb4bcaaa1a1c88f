pub mod message;
pub mod user;

pub use message::{ChatMessage, MessageKind};
pub use user::User;
