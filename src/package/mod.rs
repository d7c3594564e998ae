pub mod discovery;
pub mod installer;
pub mod manager;
pub mod manifest;
pub mod registry;
pub mod sandbox;
pub mod vcs;

pub use manager::PackageManager;
