//! meshctl library - exposes the front end for integration tests

pub mod cli;
pub mod commands;
pub mod errors;
pub mod logging;
pub mod menu;
pub mod terminal;
