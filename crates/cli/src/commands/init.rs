//! `parley init`: write a default configuration file.

use parley_config::AppConfig;
use std::path::PathBuf;

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path.unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));

    println!("Parley setup");
    println!("==============\n");

    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
        && !dir.exists()
    {
        std::fs::create_dir_all(dir)?;
        println!("✅ Created directory: {}", dir.display());
    }

    if path.exists() {
        println!("⚠️  Config already exists at: {}", path.display());
        println!("   Edit it manually or delete it and re-run init.\n");
        return Ok(());
    }

    std::fs::write(&path, AppConfig::default_toml())?;
    println!("✅ Created config at: {}", path.display());
    println!("\nNext steps:");
    println!("  1. Set api_key in the config, or export PARLEY_API_KEY");
    println!("  2. parley session create demo");
    println!("  3. parley agent add demo Alice --prompt \"You are Alice, a curious scientist.\"");
    println!("  4. parley run demo -n 4");
    Ok(())
}
