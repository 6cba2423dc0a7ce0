//! Built-in reference plugins. Each is a minimal, dependency-light
//! implementation that exercises the full `Plugin` contract so the
//! registry, engine and CLI have something real to run end to end.

pub mod ai_echo;
pub mod input_csv;
pub mod output_console;
pub mod process_passthrough;
