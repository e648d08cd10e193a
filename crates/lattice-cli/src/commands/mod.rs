pub mod catalog;
pub mod clean;
pub mod expand;
