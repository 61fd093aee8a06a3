//! `photoflow`: worker and operator commands for the product-photo pipeline.
//!
//! Usage:
//!   photoflow worker
//!   photoflow upload <SKU> <FILE> [--product-name <NAME>] [--country <CODE>]
//!   photoflow show <SKU>
//!   photoflow check-wordpress
//!
//! All commands read `DATABASE_URL` (and the rest of the environment, see
//! `photoflow_core::app::config`), loading `.env` first if present.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use photoflow_core::agents::{ColorCorrectAgent, PublishAgent};
use photoflow_core::app::{AppBuilder, Config, UploadRequest, init_tracing, upload_photo};
use photoflow_core::domain::Stage;
use photoflow_core::impls::{
    ImageCrateEnhancer, MOD_SECURITY_HINT, OpenAiVisionClient, SqliteTaskStore, WordPressClient,
};
use photoflow_core::ports::{
    Clock, MediaPublisher, SystemClock, TaskStore, UlidGenerator, VisionClient,
};

#[derive(Parser, Debug)]
#[command(name = "photoflow", about = "Product-photo pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch task changes and run the pipeline agents until Ctrl+C.
    Worker,

    /// Attach a local photo to a SKU's task and start the pipeline.
    Upload {
        sku: String,
        file: PathBuf,

        #[arg(long, default_value = "UNKNOWN")]
        product_name: String,

        #[arg(long, default_value = "US")]
        country: String,
    },

    /// Print the task document for a SKU.
    Show { sku: String },

    /// Check that the WordPress REST API is reachable and the credentials work.
    CheckWordpress,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    let cli = Cli::parse();
    let config = Config::from_env().context("loading configuration")?;
    if let Command::CheckWordpress = cli.command {
        return check_wordpress(&config).await;
    }

    let store = SqliteTaskStore::connect(&config.database_url, config.change_poll_interval)
        .await
        .with_context(|| format!("opening task store at {}", config.database_url))?;
    let store: Arc<dyn TaskStore> = Arc::new(store);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match cli.command {
        Command::Worker => run_worker(&config, store, clock).await,
        Command::Upload {
            sku,
            file,
            product_name,
            country,
        } => {
            let request = UploadRequest::new(sku, file)
                .product_name(product_name)
                .country(country);
            let receipt = upload_photo(
                store.as_ref(),
                &UlidGenerator::new(SystemClock),
                clock.as_ref(),
                request,
            )
            .await?;
            println!(
                "{} {} -> {} ({} photos)",
                if receipt.created { "created" } else { "updated" },
                receipt.task_id,
                receipt.task.status,
                receipt.task.metadata.photo_urls.len()
            );
            Ok(())
        }
        Command::Show { sku } => {
            let Some(task) = store.find_by_sku(&sku).await? else {
                bail!("no task for SKU {sku}");
            };
            println!("{}", serde_json::to_string_pretty(&task)?);
            Ok(())
        }
        Command::CheckWordpress => Ok(()),
    }
}

async fn check_wordpress(config: &Config) -> anyhow::Result<()> {
    let Some(creds) = &config.wordpress else {
        bail!("WORDPRESS_URL, WORDPRESS_USER and WORDPRESS_PASSWORD must all be set");
    };
    println!("site: {}", creds.site_url);
    println!("user: {}", creds.username);

    let client = WordPressClient::new(creds.clone(), config.http_timeout)?;
    match client.api_status().await {
        Ok(200) => println!("REST API reachable"),
        Ok(status) => println!("REST API answered {status}"),
        Err(e) => println!("REST API unreachable: {e}"),
    }

    let result = client.verify().await;
    if matches!(&result, Err(e) if e.status_code() == Some(406)) {
        println!("{MOD_SECURITY_HINT}");
    }
    let name = result.context("authenticating against users/me")?;
    println!("authenticated as {name}");
    Ok(())
}

async fn run_worker(
    config: &Config,
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<()> {
    let mut color = ColorCorrectAgent::new(
        store.clone(),
        Arc::new(ImageCrateEnhancer::new()),
        clock.clone(),
    );
    match &config.vision {
        Some(vision) => {
            let client: Arc<dyn VisionClient> = Arc::new(OpenAiVisionClient::new(
                &vision.api_key,
                &vision.base_url,
                &vision.model,
                config.http_timeout,
            )?);
            color = color.with_vision(client);
        }
        None => info!("OPENAI_API_KEY not set; remote photos will fail individually"),
    }

    let publisher: Option<Arc<dyn MediaPublisher>> = match &config.wordpress {
        Some(creds) => {
            let client = WordPressClient::new(creds.clone(), config.http_timeout)?;
            Some(Arc::new(client) as Arc<dyn MediaPublisher>)
        }
        None => {
            info!("WordPress credentials not fully configured; publishing will be skipped");
            None
        }
    };
    let publish = PublishAgent::new(store.clone(), publisher, clock);

    let app = AppBuilder::new(store)
        .register(Arc::new(color))?
        .register(Arc::new(publish))?
        .expect_stages(&Stage::all())
        .supervisor_config(config.supervisor_config())
        .build()?;

    let handle = Arc::new(app.supervisor()).spawn();
    let trigger = handle.shutdown_trigger();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("stopping (Ctrl+C pressed); finishing the current event");
            trigger.fire();
        }
    });

    handle.join().await?;
    Ok(())
}
