use anyhow::Result;
use calcache_core::settings::Settings;
use owo_colors::OwoColorize;

pub fn run(settings: &Settings) -> Result<()> {
    let config_path = Settings::config_path()?;

    println!("{}", "Paths".bold());
    println!("  Config:  {}", config_path.display());
    println!("  Cache:   {}", settings.cache_db_path().display());
    println!();
    println!("{}", "Settings".bold());
    print!("{}", settings.to_display_toml()?);

    Ok(())
}
