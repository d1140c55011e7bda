pub mod build;
pub mod error;
pub mod options;
pub mod paths;
pub mod runner;
pub mod source;
pub mod triplet;
pub mod verify;
