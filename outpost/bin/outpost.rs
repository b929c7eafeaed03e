//! Self-hosted mail relay: accepts authenticated submissions and delivers
//! them straight to each recipient domain's mail servers.

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use outpost::{
    controller::Controller,
    discovery::find_config_file,
    records::{self, RecordStatus},
};
use outpost_common::{config::RelayConfig, logging};
use outpost_relay::DnsResolver;

#[derive(Parser, Debug)]
#[command(name = "outpost")]
#[command(about = "Relay authenticated submissions directly to recipient MX hosts", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults: $OUTPOST_CONFIG, ./outpost.config.ron, /etc/outpost/outpost.config.ron)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Default)]
enum Command {
    /// Accept submissions and relay them (default)
    #[default]
    Serve,
    /// Print the SPF, DKIM and DMARC records to publish for the sending domain
    Records,
    /// Look up the published SPF, DKIM and DMARC records and compare them
    CheckDns,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let path = find_config_file(cli.config.as_deref())?;
    let config = RelayConfig::load(&path)?;

    match cli.command.unwrap_or_default() {
        Command::Serve => {
            logging::init();
            tracing::info!("Loaded configuration from {}", path.display());
            Controller::new(config).run().await
        }
        Command::Records => {
            for record in records::expected_records(&config) {
                println!("{record}");
            }
            if records::dkim_record(&config).is_none() {
                println!("(no dkim.public_key configured, DKIM record omitted)");
            }
            Ok(())
        }
        Command::CheckDns => check_dns(&config).await,
    }
}

async fn check_dns(config: &RelayConfig) -> anyhow::Result<()> {
    let resolver = DnsResolver::new(config.timeouts.dns())?;
    let mut healthy = true;

    for record in records::expected_records(config) {
        let found = match resolver.lookup_txt(&record.name).await {
            Ok(found) => found,
            Err(err) => {
                tracing::debug!("TXT lookup for {} failed: {err}", record.name);
                Vec::new()
            }
        };

        let status = records::check(&record, &found);
        healthy &= status == RecordStatus::Present;
        println!("{:<6} {:<40} {status}", record.kind, record.name);
        if status != RecordStatus::Present {
            println!("       expected: \"{}\"", record.value);
        }
    }

    if !healthy {
        anyhow::bail!("Some DNS records are missing or out of date");
    }

    Ok(())
}
