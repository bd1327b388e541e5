//! `parley doctor`: check configuration and storage.

use parley_config::AppConfig;
use parley_core::provider::Provider;
use parley_store::SqliteStore;
use std::path::PathBuf;

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Parley Doctor");
    println!("=============\n");

    let mut issues = 0;
    let path = config_path.unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));
    if !path.exists() {
        println!("  ⚠️  No config file at {}, defaults in use (run `parley init`)", path.display());
        issues += 1;
    }

    let config = match AppConfig::load_with_env(&path) {
        Ok(config) => {
            println!("  ✅ Configuration valid");
            config
        }
        Err(e) => {
            println!("  ❌ Configuration invalid: {e}");
            println!("\n  1 blocking issue found.");
            return Ok(());
        }
    };

    match parley_providers::from_config(&config) {
        Ok(provider) => {
            println!("  ✅ API key configured");
            match provider.health_check().await {
                Ok(true) => println!("  ✅ Endpoint reachable: {}", config.api_url),
                Ok(false) => {
                    println!("  ⚠️  Endpoint {} answered with an error", config.api_url);
                    issues += 1;
                }
                Err(e) => {
                    println!("  ❌ Endpoint {} unreachable: {e}", config.api_url);
                    issues += 1;
                }
            }
        }
        Err(e) => {
            println!("  ⚠️  {e}");
            issues += 1;
        }
    }
    println!("  Default model: {}", config.default_model);

    let db_path = config.database.path();
    match SqliteStore::open(&db_path.to_string_lossy()).await {
        Ok(_) => println!("  ✅ Database opens: {}", db_path.display()),
        Err(e) => {
            println!("  ❌ Database {} cannot be opened: {e}", db_path.display());
            issues += 1;
        }
    }

    let interpreters = &config.tools.interpreters;
    if interpreters.is_empty() {
        println!("  ⚠️  No interpreters allowed; proposed capabilities cannot run");
        issues += 1;
    } else {
        println!("  ✅ Interpreters: {}", interpreters.join(", "));
    }

    println!();
    if issues == 0 {
        println!("  All checks passed.");
    } else {
        println!("  {issues} issue(s) found. See above for details.");
    }
    Ok(())
}
