use authzone::blocking::{AllowedZoneManager, BlockedZoneManager, DomainListManager};
use authzone::config::ZoneConfig;
use authzone::dns::DNSPacket;
use authzone::dns::enums::DNSResourceType;
use authzone::zone::constants::DEFAULT_ZONES_PER_PAGE;
use authzone::zone::{JsonZoneStorage, ZoneManager};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Offline management of Authzone lists and zone snapshots
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file; AUTHZONE_* environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage the allow list
    Allow {
        #[command(subcommand)]
        action: ListAction,
    },
    /// Manage the block list
    Block {
        #[command(subcommand)]
        action: ListAction,
    },
    /// Inspect stored zones
    Zones {
        #[command(subcommand)]
        action: ZonesAction,
    },
    /// Report whether a domain is allowed, blocked or unlisted
    Check { domain: String },
}

#[derive(Subcommand, Debug)]
enum ListAction {
    /// Add one or more domains
    Add {
        #[arg(required = true)]
        domains: Vec<String>,
    },
    /// Remove one or more domains
    Remove {
        #[arg(required = true)]
        domains: Vec<String>,
    },
    /// Print every listed domain
    List,
}

#[derive(Subcommand, Debug)]
enum ZonesAction {
    /// Print one page of the zone listing
    List {
        #[arg(long, default_value = "1")]
        page: usize,

        #[arg(long, default_value_t = DEFAULT_ZONES_PER_PAGE)]
        per_page: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => ZoneConfig::from_toml_file(path)?,
        None => ZoneConfig::from_env()?,
    };
    info!("Using config folder {}", config.config_folder.display());

    match args.command {
        Command::Allow { action } => {
            let allowed = AllowedZoneManager::new(&config);
            allowed.load_zone_file();
            run_list_action(&allowed, action, |domain| allowed.allow_zone(domain))?;
        }
        Command::Block { action } => {
            let blocked = BlockedZoneManager::new(&config);
            blocked.load_zone_file();
            run_list_action(&blocked, action, |domain| blocked.block_zone(domain))?;
        }
        Command::Zones {
            action: ZonesAction::List { page, per_page },
        } => {
            let storage = Arc::new(JsonZoneStorage::new(config.zones_folder()));
            let zones = ZoneManager::new(config).with_storage(storage);
            zones.load_all_zone_files()?;

            let listing = zones.get_zones_page(page, per_page)?;
            for zone in &listing.zones {
                let serial = zone.serial.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
                let state = if zone.disabled {
                    "disabled"
                } else if zone.is_expired {
                    "expired"
                } else {
                    "active"
                };
                println!("{:<40} {:<10} {:>10} {}", zone.display_name(), zone.zone_type, serial, state);
            }
            println!(
                "page {} of {} ({} zones)",
                listing.page_number, listing.total_pages, listing.total_zones
            );
        }
        Command::Check { domain } => {
            let allowed = AllowedZoneManager::new(&config);
            allowed.load_zone_file();
            let blocked = BlockedZoneManager::new(&config);
            blocked.load_zone_file();

            let request = DNSPacket::query(&domain, DNSResourceType::A);
            let verdict = if allowed.is_allowed(&request) {
                "allowed"
            } else if blocked.is_blocked(&request) {
                "blocked"
            } else {
                "not listed"
            };
            println!("{} is {}", domain, verdict);
        }
    }

    Ok(())
}

fn run_list_action(
    list: &DomainListManager,
    action: ListAction,
    add: impl Fn(&str) -> authzone::zone::Result<bool>,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ListAction::Add { domains } => {
            for domain in &domains {
                if add(domain)? {
                    println!("added {}", domain);
                } else {
                    println!("{} is already listed", domain);
                }
            }
            list.save_zone_file()?;
        }
        ListAction::Remove { domains } => {
            for domain in &domains {
                if list.delete_zone(domain) {
                    println!("removed {}", domain);
                } else {
                    println!("{} is not listed", domain);
                }
            }
            list.save_zone_file()?;
        }
        ListAction::List => {
            for zone in list.get_all_zones() {
                println!("{}", zone.display_name());
            }
        }
    }
    Ok(())
}
