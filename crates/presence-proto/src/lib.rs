pub mod config;
pub mod media;
pub mod platform;
pub mod presence;
pub mod protocol;
pub mod timeline;
pub mod view;
