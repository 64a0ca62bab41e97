pub mod discover;
pub mod parse;
pub mod run;
pub mod status;
pub mod validate;

// Re-export handler functions for convenience
pub use discover::handle_discover_command;
pub use parse::handle_parse_command;
pub use run::handle_run_command;
pub use status::handle_status_command;
pub use validate::handle_validate_path_command;
