// src/services/mod.rs

pub mod identity;
pub mod locks;
pub mod notifier;
pub mod orchestrator;
pub mod question_bank;
pub mod registry;
pub mod scoring;
pub mod timers;
pub mod tracker;
