//! `parley tools`: inspect and remove capabilities.

use crate::runtime::Runtime;

pub async fn list(rt: &Runtime) -> Result<(), Box<dyn std::error::Error>> {
    let capabilities = rt.repo.list_capabilities().await?;
    println!("{:<22} {:<9} DESCRIPTION", "NAME", "KIND");
    for cap in capabilities {
        let kind = if cap.builtin {
            "builtin".to_string()
        } else {
            cap.interpreter.clone().unwrap_or_else(|| "user".into())
        };
        println!("{:<22} {:<9} {}", cap.name, kind, cap.description);
    }
    Ok(())
}

pub async fn show(rt: &Runtime, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let Some(cap) = rt.repo.get_capability(name).await? else {
        return Err(format!("No capability named '{name}'").into());
    };
    println!("{} ({})", cap.name, if cap.builtin { "builtin" } else { "user" });
    println!("  {}", cap.description);
    println!("\nParameters:\n{}", serde_json::to_string_pretty(&cap.parameters)?);
    if !cap.builtin {
        println!("\nCode ({}):\n{}", cap.interpreter.as_deref().unwrap_or("default"), cap.code);
    }
    Ok(())
}

pub async fn remove(rt: &Runtime, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    if rt.repo.delete_capability(name).await? {
        println!("✅ Removed {name}");
    } else {
        println!("No capability named '{name}'");
    }
    Ok(())
}
