pub mod commands;
pub mod interactive;
