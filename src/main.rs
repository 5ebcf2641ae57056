use anyhow::{anyhow, Context, Result};
use clap::Parser;
use inquire::Select;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use url::Url;

use tokybook_dl::core::config::{Config, DEFAULT_CONFIG_PATH};
use tokybook_dl::core::io::FolderTarget;
use tokybook_dl::core::state::{ChapterMap, ChapterRecord};
use tokybook_dl::services::archive::{ArchiveBuilder, BuildOptions};
use tokybook_dl::services::fetch::{HttpTransport, MediaClient};
use tokybook_dl::services::page::load_book_page;
use tokybook_dl::services::resolver::resolve;
use tokybook_dl::services::ui::{Surface, TerminalSurface};

const DOWNLOAD_ALL: &str = "Download all (zip)";

#[derive(Parser)]
#[command(author, version, about = "Download audiobook chapters from a Tokybook page")]
struct Cli {
    /// Book page URL
    url: String,

    /// Download a single chapter by its track number
    #[arg(long, conflicts_with = "all")]
    chapter: Option<u32>,

    /// Download every chapter into one zip archive
    #[arg(long)]
    all: bool,

    /// Leave the cover image out of the archive
    #[arg(long)]
    no_cover: bool,

    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Output directory (overrides the config file)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Write the effective settings back to the config file
    #[arg(long)]
    save_config: bool,
}

enum Action {
    All,
    Single(u32),
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            log::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = Config::load(&cli.config)?;
    if let Some(output) = &cli.output {
        config.output_folder = output.to_string_lossy().to_string();
    }
    if cli.no_cover {
        config.include_cover = false;
    }
    if cli.save_config {
        config.save(&cli.config)?;
        println!("Configuration saved.");
    }
    config.ensure_directories()?;

    let page_url = Url::parse(&cli.url).with_context(|| format!("Invalid book URL: {}", cli.url))?;
    let surface: Arc<dyn Surface> = Arc::new(TerminalSurface::new());

    let transport = HttpTransport::new(&config)?;
    let page = load_book_page(&transport, &page_url).await?;
    let Some(title) = page.title().map(str::to_string) else {
        log::info!("No book title found on this page.");
        return Ok(ExitCode::SUCCESS);
    };

    let chapters = match resolve(page.scripts()) {
        Ok(Some(chapters)) if !chapters.is_empty() => chapters,
        Ok(_) => {
            log::error!("No chapter data on {}", page_url);
            surface.alert("Could not extract book chapters.");
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => {
            log::error!("{}", e);
            surface.alert("Could not extract book chapters.");
            return Ok(ExitCode::FAILURE);
        }
    };
    println!("{} ({} chapters)", title, chapters.len());

    let action = match (cli.all, cli.chapter) {
        (_, Some(index)) => Action::Single(index),
        (true, None) => Action::All,
        (false, None) => choose_action(&chapters)?,
    };

    let builder = ArchiveBuilder::new(
        MediaClient::from_config(transport, &config),
        Arc::new(FolderTarget::new(&config.output_folder)),
        surface.clone(),
        config.compression_level(),
    );

    let outcome = match action {
        Action::Single(index) => {
            let record = chapters
                .get(index)
                .ok_or_else(|| anyhow!("Chapter {} not found on this page", index))?;
            builder.download_single(record).await.map(Some)
        }
        Action::All => {
            let options = BuildOptions {
                include_cover: config.include_cover,
                cover_url: page.cover_url().map(str::to_string),
            };
            builder.build_archive(&title, &chapters, &options).await
        }
    };

    // Errors were already reported to the user by the builder.
    match outcome {
        Ok(Some(name)) => {
            println!("Saved {}", name);
            Ok(ExitCode::SUCCESS)
        }
        Ok(None) => Ok(ExitCode::SUCCESS),
        Err(_) => Ok(ExitCode::FAILURE),
    }
}

fn choose_action(chapters: &ChapterMap) -> Result<Action> {
    let records: Vec<&ChapterRecord> = chapters.iter().collect();
    let mut options = vec![DOWNLOAD_ALL.to_string()];
    options.extend(records.iter().map(|r| format!("{:>3}. {}", r.index, r.name)));

    let selection = Select::new("Select a download:", options.clone()).prompt()?;
    if selection == DOWNLOAD_ALL {
        return Ok(Action::All);
    }

    let position = options
        .iter()
        .position(|o| *o == selection)
        .ok_or_else(|| anyhow!("Unknown selection: {}", selection))?;
    Ok(Action::Single(records[position - 1].index))
}
