use std::path::Path;

use gremesh_core::MeshConfig;

pub fn check(path: &Path) -> anyhow::Result<()> {
    let config = MeshConfig::from_file(path)?;
    println!("✓ {} is valid", path.display());
    println!("{}", config.to_toml_string()?);
    Ok(())
}

pub fn print_default() -> anyhow::Result<()> {
    println!("{}", MeshConfig::default().to_toml_string()?);
    Ok(())
}
