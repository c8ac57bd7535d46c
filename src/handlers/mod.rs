// src/handlers/mod.rs

pub mod play;
pub mod rooms;
pub mod sessions;
