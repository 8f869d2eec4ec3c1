pub mod config;
pub mod crypto;
pub mod display;
pub mod error;
pub mod events;
pub mod fetch;
pub mod gallery;
pub mod layout;
pub mod loader;
pub mod manifest;
pub mod visibility;
pub mod tasks {
    pub mod gallery;
    pub mod scroll;
}
