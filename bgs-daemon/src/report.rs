//! Read-only operator commands.
//!
//! These open the databases, print one answer and exit:
//!
//! ```bash
//! bgsd --region Sol
//! bgsd --conflicts "East India Company"
//! ```

use bgs_core::conflict::TickConflicts;
use bgs_core::notify::format_conflict_report;
use bgs_core::{Config, ConflictReducer, Database, FactStore, RegionSnapshot, RegionStore};

/// A one-shot command given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Region(String),
    Conflicts(String),
}

/// Parse `--region <name>` or `--conflicts <faction>`. The first one wins.
pub fn parse_command(args: &[String]) -> Option<Command> {
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--region" => {
                if let Some(name) = args.get(i + 1) {
                    return Some(Command::Region(name.clone()));
                }
            }
            "--conflicts" => {
                if let Some(faction) = args.get(i + 1) {
                    return Some(Command::Conflicts(faction.clone()));
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

pub fn run(config: &Config, command: &Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Region(name) => print_region(config, name),
        Command::Conflicts(faction) => print_conflicts(config, faction),
    }
}

fn print_region(config: &Config, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let regions = RegionStore::new(Database::open(&config.feed_database)?);
    match regions.get(name)? {
        Some(snapshot) => print!("{}", render_region(&snapshot)),
        None => println!("No snapshot for {name}"),
    }
    Ok(())
}

fn print_conflicts(config: &Config, faction: &str) -> Result<(), Box<dyn std::error::Error>> {
    let reducer = ConflictReducer::new(FactStore::new(Database::open(&config.telemetry_database)?));
    let recent = reducer.recent(faction)?;

    for (label, section) in [("Current tick", &recent.current), ("Previous tick", &recent.previous)] {
        println!("== {label} ==");
        match section {
            Some(conflicts) if !conflicts.view.is_empty() => {
                println!("{}", format_conflict_report(faction, conflicts));
            }
            Some(TickConflicts { tick, .. }) => println!("No {faction} conflicts (tick {tick})"),
            None => println!("No tick data"),
        }
        println!();
    }
    Ok(())
}

fn render_region(snapshot: &RegionSnapshot) -> String {
    let info = &snapshot.info;
    let or_dash = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());

    let mut out = String::new();
    out.push_str(&format!("{}\n", info.region));
    out.push_str(&format!("  Controlling faction: {}\n", or_dash(&info.controlling_faction)));
    out.push_str(&format!("  Controlling power:   {}\n", or_dash(&info.controlling_power)));
    out.push_str(&format!(
        "  Population:          {}\n",
        info.population.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string())
    ));
    out.push_str(&format!("  Updated:             {}\n", info.updated_at.to_rfc3339()));

    if !snapshot.factions.is_empty() {
        out.push_str("  Factions:\n");
        for faction in &snapshot.factions {
            out.push_str(&format!(
                "    {:<40} {:>6.2}%  {}\n",
                faction.name,
                faction.influence * 100.0,
                faction.state.as_deref().unwrap_or("None")
            ));
        }
    }

    for conflict in &snapshot.conflicts {
        out.push_str(&format!(
            "  Conflict ({}): {} vs {} [{}]\n",
            conflict.war_type.as_deref().unwrap_or("?"),
            conflict.side_a.name,
            conflict.side_b.name,
            conflict.status.as_deref().unwrap_or("?")
        ));
    }

    for sphere in &snapshot.spheres {
        out.push_str(&format!(
            "  Powerplay: {} ({})\n",
            sphere.powers.join(", "),
            sphere.state.as_deref().unwrap_or("-")
        ));
    }
    out
}
