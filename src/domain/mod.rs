pub mod dictionary;
pub mod generation;
pub mod media;
pub mod models;
pub mod settings;
pub mod time_sync;
