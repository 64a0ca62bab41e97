use crate::discovery::{validate_path, PathValidation};
use anyhow::Result;
use colored::Colorize;

pub fn handle_validate_path_command(path: String, limit: usize) -> Result<()> {
    let result = validate_path(&path, limit);
    print_validation(&result);
    Ok(())
}

fn print_validation(result: &PathValidation) {
    println!("🔍 Path Validation");
    println!("═══════════════════════════════════════");
    println!("Path: {}", result.path);

    if result.accessible {
        println!("Status: {}", "accessible".green().bold());
    } else {
        println!("Status: {}", "not accessible".red().bold());
        if let Some(error) = &result.error {
            println!("Error: {}", error);
        }
        return;
    }

    match &result.files {
        Some(files) if !files.is_empty() => {
            println!("\n📁 Entries ({}):", files.len());
            for file in files {
                println!("  • {}", file);
            }
        }
        _ => println!("\n📁 Directory is empty"),
    }
}
