pub mod cli;
pub mod domain;
pub mod library;
pub mod repository;
pub mod services;
pub mod utils;

pub use library::{Library, LibraryError};
