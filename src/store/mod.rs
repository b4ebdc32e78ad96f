// src/store/mod.rs
pub mod init;
pub mod items;
pub mod settings;
pub mod sources;
