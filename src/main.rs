//! weather-comparer CLI.
//!
//! Entry point. Loads `.env` and configuration, initialises structured
//! logging, then compares the requested cities and prints the result.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use weather_comparer::config::AppConfig;
use weather_comparer::data::forecast::compass_direction;
use weather_comparer::engine::compare::{CityComparer, CityReport};
use weather_comparer::engine::multi_year::MAX_NUM_YEARS;
use weather_comparer::types::MonthlySeries;

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

#[derive(Debug, Parser)]
#[command(name = "weather-comparer", version, about = "Compare monthly weather between cities")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Print reports as JSON instead of tables.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Current conditions and multi-year monthly averages.
    Compare {
        /// City names, e.g. "London" "New York".
        #[arg(required = true)]
        cities: Vec<String>,

        /// Override the number of past years to average.
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_NUM_YEARS)))]
        years: Option<u32>,
    },

    /// Monthly statistics for a single past year.
    Annual {
        #[arg(required = true)]
        cities: Vec<String>,

        #[arg(long)]
        year: i32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    let mut cfg = AppConfig::load_or_default(&cli.config)?;

    init_logging();

    info!(config = %cli.config.display(), "weather-comparer starting");

    let reports = match cli.command {
        Command::Compare { cities, years } => {
            if let Some(years) = years {
                cfg.comparison.num_years = years;
            }
            let comparer = CityComparer::from_config(&cfg)?;
            comparer.compare_averages(&cities).await
        }
        Command::Annual { cities, year } => {
            let comparer = CityComparer::from_config(&cfg)?;
            comparer.compare_year(&cities, year).await
        }
    };

    if cli.json {
        let out = serde_json::to_string_pretty(&reports).context("Failed to serialise reports")?;
        println!("{out}");
    } else {
        for report in &reports {
            print_report(report);
        }
    }

    Ok(())
}

fn print_report(report: &CityReport) {
    println!("== {} ==", report.name);
    if let Some(coords) = &report.coordinates {
        println!("{coords}");
    }
    if let Some(now) = &report.current {
        let wind_from = now
            .wind_direction
            .map(|d| format!(" from {}", compass_direction(d)))
            .unwrap_or_default();
        println!("Now ({}): {now}{wind_from}", now.timestamp);
    }
    if let Some(avg) = &report.averages {
        println!("Averages {}:", avg.year_range);
        print_months(&avg.monthly_data, &avg.temp_unit, &avg.precip_unit);
    }
    if let Some(annual) = &report.annual {
        print_months(&annual.monthly_data, &annual.temp_unit, &annual.precip_unit);
    }
    for err in &report.errors {
        println!("! {err}");
    }
    println!();
}

fn print_months(series: &MonthlySeries, temp_unit: &str, precip_unit: &str) {
    let cell = |v: Option<f64>, unit: &str| match v {
        Some(v) => format!("{v:.2}{unit}"),
        None => "-".to_string(),
    };
    for (name, stat) in MONTHS.iter().zip(series) {
        println!(
            "  {name}  {:>10}  {:>10}",
            cell(stat.avg_temp, temp_unit),
            cell(stat.total_precip, precip_unit)
        );
    }
}

/// Initialise the `tracing` subscriber.
///
/// Uses `RUST_LOG` for filtering (defaults to `weather_comparer=info`).
/// Set `WEATHER_LOG_JSON=1` for JSON-formatted output.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("weather_comparer=info"));

    let json_logging = std::env::var("WEATHER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_years_flag_is_bounded() {
        let ok = Cli::try_parse_from(["weather-comparer", "compare", "London", "--years", "10"]);
        assert!(matches!(
            ok.unwrap().command,
            Command::Compare { years: Some(10), .. }
        ));

        for bad in ["0", "101", "2147483648", "-3"] {
            let parsed =
                Cli::try_parse_from(["weather-comparer", "compare", "London", "--years", bad]);
            assert!(parsed.is_err(), "--years {bad} accepted");
        }
    }

    #[test]
    fn test_annual_requires_year() {
        assert!(Cli::try_parse_from(["weather-comparer", "annual", "Paris"]).is_err());
        let cli = Cli::try_parse_from(["weather-comparer", "annual", "Paris", "--year", "2022"])
            .unwrap();
        assert_eq!(cli.config, PathBuf::from("config.toml"));
    }
}
