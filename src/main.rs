use clap::{Parser, Subcommand};
use std::path::PathBuf;

use product_guide::Result;
use product_guide::commands::{
    build_index, crawl_catalog, init_config, serve_api, show_config, show_status,
};
use product_guide::config::{Config, default_data_dir};

#[derive(Parser)]
#[command(name = "product-guide")]
#[command(about = "Catalog crawler, vector indexer and recommendation chat API for a single merchant")]
#[command(version)]
struct Cli {
    /// Data directory holding config.toml, the catalog snapshot and the
    /// vector store (defaults to the user config dir).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or initialize the configuration
    Config {
        /// Print the active configuration instead of writing it
        #[arg(long)]
        show: bool,
    },
    /// Scrape the merchant storefront into a catalog snapshot
    Crawl,
    /// Embed the catalog snapshot and build the vector index
    Index,
    /// Serve the chat API
    Serve {
        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Show pipeline status (snapshot, index manifest, stored vectors)
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir().map_err(|e| product_guide::GuideError::Config(e.to_string()))?,
    };
    let mut config = Config::load(&data_dir)?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config)?;
            } else {
                init_config(&config)?;
            }
        }
        Commands::Crawl => {
            crawl_catalog(&config).await?;
        }
        Commands::Index => {
            build_index(&config).await?;
        }
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            serve_api(&config).await?;
        }
        Commands::Status => {
            show_status(&config).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn cli_parsing() {
        let cli = Cli::try_parse_from(["product-guide", "status"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            matches!(parsed.command, Commands::Status);
        }
    }

    #[test]
    fn serve_with_port_override() {
        let cli = Cli::try_parse_from(["product-guide", "serve", "--port", "9100"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Serve { port } = parsed.command {
                assert_eq!(port, Some(9100));
            }
        }
    }

    #[test]
    fn config_show_flag() {
        let cli = Cli::try_parse_from(["product-guide", "config", "--show"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Config { show } = parsed.command {
                assert!(show);
            }
        }
    }

    #[test]
    fn global_data_dir_flag() {
        let cli = Cli::try_parse_from(["product-guide", "--data-dir", "/tmp/guide", "index"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert_eq!(parsed.data_dir, Some(PathBuf::from("/tmp/guide")));
        }
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["product-guide", "invalid"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["product-guide", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}
