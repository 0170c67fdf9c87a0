//! Command-line interface.

pub mod commands;
pub mod context;
pub mod output;
pub mod types;

pub use types::{Cli, Commands};

use crate::domain::errors::DomainError;

/// Print an error (human or JSON) and exit non-zero.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    let code = exit_code(&err);
    if json_mode {
        let causes: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
        let body = serde_json::json!({
            "success": false,
            "error": err.to_string(),
            "causes": causes,
        });
        eprintln!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("{} {err}", console::style("error:").red().bold());
        for cause in err.chain().skip(1) {
            eprintln!("  caused by: {cause}");
        }
    }
    std::process::exit(code)
}

/// 2 for invalid input or configuration, 1 for everything else.
fn exit_code(err: &anyhow::Error) -> i32 {
    let invalid_input = err.chain().any(|cause| {
        cause.is::<crate::infrastructure::config::ConfigError>()
            || matches!(
                cause.downcast_ref::<DomainError>(),
                Some(DomainError::ValidationFailed(_))
            )
    });
    if invalid_input {
        2
    } else {
        1
    }
}
