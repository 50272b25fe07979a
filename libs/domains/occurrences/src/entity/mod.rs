pub mod history;
pub mod occurrence;
