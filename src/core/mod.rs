pub mod auth;
pub mod browser;
pub mod errors;
pub mod google_drive;
pub mod harvester;
pub mod models;
pub mod navigator;
pub mod observer;
pub mod portal;
pub mod sanitize;
pub mod service;
pub mod settings_store;
pub mod uploader;
pub mod wait;
