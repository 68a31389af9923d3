//! CLI subcommand: `hostlock paths`
//!
//! Prints all resolved paths for debugging and scripting.

use anyhow::Result;

use crate::config::Config;

pub fn run(config_override: Option<&str>) -> Result<()> {
    let config = Config::load_with_override(config_override)?;
    let paths = &config.paths;

    println!("hostlock Paths");
    println!("==============");
    println!();
    println!("Config:     {}", paths.config_dir.display());
    println!("  config.toml:    {}", paths.config_file().display());
    println!();
    println!("State:      {}", paths.state_dir.display());
    println!("  logs:           {}", paths.logs_dir().display());
    println!();
    match paths.runtime_dir {
        Some(ref dir) => println!("Runtime:    {}", dir.display()),
        None => println!("Runtime:    (not available, using state dir)"),
    }
    println!("  PID file:       {}", paths.pid_file().display());
    println!();
    let sockets_dir = config.sockets_dir()?;
    println!("Sockets:    {}", sockets_dir.display());
    println!(
        "  leader socket:  {}",
        crate::agentapi::leader_path(&sockets_dir).display()
    );

    Ok(())
}
