// src/models/mod.rs

pub mod answer;
pub mod event;
pub mod participation;
pub mod question;
pub mod session;
pub mod user;
