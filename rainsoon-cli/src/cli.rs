use std::{
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use inquire::{CustomType, MultiSelect, Select, Text};
use rainsoon_core::{Config, GeolocatorId, RainChecker, RainRequest, RainsoonServer, outcome_json};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "rainsoon", version, about = "Will it rain soon where this IP is?")]
pub struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the MCP server over stdio (the default).
    Serve,

    /// Check for rain once and print the JSON result.
    Check {
        /// IP address to check; omit to auto-detect the public IP.
        #[arg(long)]
        ip: Option<String>,

        /// Percent chance at or above which rain is reported.
        #[arg(long, allow_negative_numbers = true)]
        threshold: Option<i64>,
    },

    /// Interactively edit the configuration file.
    Configure,

    /// Print the path of the configuration file.
    ConfigPath,
}

impl Cli {
    fn config_path(&self) -> anyhow::Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => Config::config_file_path(),
        }
    }

    /// Run the selected command, returning the process exit code.
    pub async fn run(self) -> anyhow::Result<i32> {
        let path = self.config_path()?;

        match self.command.unwrap_or(Command::Serve) {
            Command::Serve => {
                let config = Config::load_from(&path)?;
                tracing::info!(config = %path.display(), "Starting rainsoon MCP server");
                let checker = RainChecker::from_config(&config)?;
                RainsoonServer::new(checker, config.default_threshold).run_stdio().await?;
                Ok(0)
            }
            Command::Check { ip, threshold } => {
                let config = Config::load_from(&path)?;
                let checker = RainChecker::from_config(&config)?;
                let request =
                    RainRequest::new(ip, threshold.unwrap_or(config.default_threshold));

                run_check(&checker, &request, &mut std::io::stdout()).await
            }
            Command::Configure => {
                configure(load_or_default(&path), &path)?;
                Ok(0)
            }
            Command::ConfigPath => {
                println!("{}", path.display());
                Ok(0)
            }
        }
    }
}

/// Run one check and write its JSON payload to `out`.
///
/// Returns exit code 1 when the payload describes an error.
pub async fn run_check<W: Write>(
    checker: &RainChecker,
    request: &RainRequest,
    out: &mut W,
) -> anyhow::Result<i32> {
    let outcome = checker.check_for_rain(request).await;
    let json = serde_json::to_string_pretty(&outcome_json(&outcome))?;
    writeln!(out, "{json}").context("Failed to write check result")?;

    Ok(if outcome.is_ok() { 0 } else { 1 })
}

/// Config to start `configure` from; an unreadable file is replaced by defaults.
fn load_or_default(path: &Path) -> Config {
    Config::load_from(path).unwrap_or_else(|err| {
        tracing::warn!(
            config = %path.display(),
            error = %format!("{err:#}"),
            "Ignoring unreadable config, starting from defaults"
        );
        Config::default()
    })
}

/// Ask for the fallback order of `picked` one provider at a time.
///
/// `choose` gets the providers not yet placed and returns the next one.
fn order_providers<F>(
    mut picked: Vec<GeolocatorId>,
    mut choose: F,
) -> anyhow::Result<Vec<GeolocatorId>>
where
    F: FnMut(Vec<GeolocatorId>) -> anyhow::Result<GeolocatorId>,
{
    let mut ordered = Vec::with_capacity(picked.len());

    while picked.len() > 1 {
        let next = choose(picked.clone())?;
        let idx = picked
            .iter()
            .position(|id| *id == next)
            .ok_or_else(|| anyhow::anyhow!("'{next}' was not one of the selected providers"))?;
        ordered.push(picked.remove(idx));
    }
    ordered.extend(picked);

    Ok(ordered)
}

fn configure(mut config: Config, path: &Path) -> anyhow::Result<()> {
    config.default_threshold = CustomType::<i64>::new("Default rain threshold (percent):")
        .with_default(config.default_threshold)
        .with_error_message("Please enter a whole number")
        .prompt()
        .context("Threshold prompt aborted")?;

    let current = config.geolocator_ids().unwrap_or_default();
    let options: Vec<GeolocatorId> = GeolocatorId::all().to_vec();
    let defaults: Vec<usize> = options
        .iter()
        .enumerate()
        .filter(|(_, id)| current.contains(id))
        .map(|(i, _)| i)
        .collect();

    let picked = MultiSelect::new("Geolocation providers to use:", options)
        .with_default(&defaults)
        .prompt()
        .context("Provider prompt aborted")?;
    if picked.is_empty() {
        anyhow::bail!("At least one geolocation provider must be selected");
    }

    let mut position = 0;
    let ordered = order_providers(picked, |remaining| {
        position += 1;
        Select::new(&format!("Provider to try #{position}:"), remaining)
            .prompt()
            .context("Provider order prompt aborted")
    })?;
    config.geolocation.order = ordered.iter().map(|id| id.as_str().to_string()).collect();

    if ordered.contains(&GeolocatorId::IpInfo) {
        let token = Text::new("ipinfo token (blank for none):")
            .with_initial_value(config.geolocation.ipinfo_token.as_deref().unwrap_or(""))
            .prompt()
            .context("Token prompt aborted")?;
        config.set_ipinfo_token(&token);
    }

    config.save_to(path)?;
    println!("Saved configuration to {}", path.display());
    Ok(())
}
