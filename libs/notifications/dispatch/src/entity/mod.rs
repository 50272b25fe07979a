pub mod notification;
pub mod user;
pub mod user_preferences;
