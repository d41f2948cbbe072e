//! Status command — configuration and room overview.

use anyhow::Result;
use colored::Colorize;

use crewgate_core::config::{get_config_path, load_config};
use crewgate_core::rooms::RoomManager;
use crewgate_core::utils::get_data_path;

pub fn run() -> Result<()> {
    let config = load_config(None);

    println!("{}", "crewgate status".bold());
    println!("config: {}", get_config_path().display());
    println!("data:   {}", get_data_path().display());
    println!();

    println!("{}", "providers".bold());
    for name in crewgate_core::config::schema::ProvidersConfig::NAMES {
        let configured = config
            .providers
            .get_by_name(name)
            .map(|p| p.is_configured())
            .unwrap_or(false);
        let mark = if configured { "✓".green() } else { "—".dimmed() };
        println!("  {mark} {name}");
    }
    println!();

    println!("{}", "routing".bold());
    println!(
        "  default model: {} (routing {})",
        config.agents.defaults.model,
        if config.routing.enabled { "on" } else { "off" }
    );
    println!();

    println!("{}", "team".bold());
    println!("  {} + leader: {}", config.team.name, config.team.bots.join(", "));
    println!();

    match RoomManager::new(get_data_path()) {
        Ok(rooms) => {
            println!("{}", "rooms".bold());
            for room in rooms.list_rooms() {
                println!(
                    "  {} ({:?}) — bots: {}, tasks: {}",
                    room.id,
                    room.room_type,
                    room.participants.join(", "),
                    room.tasks.len()
                );
            }
        }
        Err(e) => println!("rooms unavailable: {e}"),
    }

    Ok(())
}
