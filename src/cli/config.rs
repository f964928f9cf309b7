use crate::config::generate::generate_starter_config;
use std::fs;
use std::path::PathBuf;

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_content = generate_starter_config();

    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    let config_dir = dirs::home_dir()
        .ok_or("could not determine home directory")?
        .join(".config/logfold");
    let config_path = config_dir.join("config.yml");

    if config_path.exists() {
        return Err(format!(
            "config already exists at {}; remove it first or use --stdout",
            config_path.display()
        )
        .into());
    }

    fs::create_dir_all(&config_dir)?;
    fs::write(&config_path, config_content)?;
    println!("Wrote starter config to {}", config_path.display());
    print_next_steps(&config_path);

    Ok(())
}

fn print_next_steps(config_path: &PathBuf) {
    println!();
    println!("Next steps:");
    println!("  1. Edit {} for your storage backend", config_path.display());
    println!("  2. Run 'logfold run' to aggregate the latest window");
}
