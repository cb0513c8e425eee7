use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "leafscan")]
#[command(version, about = "Mango leaf disease scanner with local capture history", long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// History database, overrides the config file
    #[arg(long, global = true, env = "LEAFSCAN_DB")]
    db: Option<PathBuf>,

    /// Classifier service root, overrides the config file
    #[arg(long, global = true, env = "LEAFSCAN_CLASSIFIER_URL")]
    classifier_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Record a capture without analyzing it
    Add {
        /// Image locator (path or URI)
        locator: String,
    },
    /// Upload an image for classification and record the result
    Analyze {
        /// Image file to classify
        image: PathBuf,
        /// Locator to record instead of the file path
        #[arg(long)]
        locator: Option<String>,
    },
    /// Show recent captures, newest first
    List {
        /// Print the raw stored JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete one capture by id
    Delete { id: String },
    /// Delete every capture
    Clear {
        /// Skip the confirmation guard
        #[arg(long)]
        yes: bool,
    },
    /// Show treatment steps for a disease
    Prescriptions {
        /// Disease label, all categories when omitted
        label: Option<String>,
        /// Append a step under the label and publish it (needs a token)
        #[arg(long, requires = "label", conflicts_with_all = ["edit", "remove"])]
        add: Option<String>,
        /// Replace step N (as listed) with --text
        #[arg(long, value_name = "N", requires_all = ["label", "text"], conflicts_with = "remove")]
        edit: Option<usize>,
        /// New wording for --edit
        #[arg(long, requires = "edit")]
        text: Option<String>,
        /// Delete step N (as listed)
        #[arg(long, value_name = "N", requires = "label")]
        remove: Option<usize>,
    },
    /// Check the classifier service
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so `list --json` stays pipeable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "leafscan_cli=info,leafscan_core=info,leafscan_api=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            let mut config = leafscan_core::Config::load_from(path)?;
            config.apply_env();
            config
        }
        None => leafscan_core::Config::load()?,
    };
    if let Some(db) = cli.db {
        config.store.database_path = Some(db);
    }
    if let Some(url) = cli.classifier_url {
        config.classifier.base_url = url;
    }

    commands::run(cli.command, &config).await
}
