use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use resume_client::api::HttpJobApi;
use resume_client::clock::SystemClock;
use resume_client::config::Config;
use resume_client::models::GenerationInput;
use resume_client::session::SessionClient;
use resume_client::store::FileStore;
use resume_client::templates::TemplateCatalog;
use resume_client::{GenerationTracker, PollPolicy, TrackerDeps};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
/// Submit and track resume generation jobs
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and store the session token
    Login {
        #[arg(long, value_name = "EMAIL")]
        email: String,

        #[arg(long, value_name = "PASSWORD")]
        password: String,
    },
    /// Forget the stored session token
    Logout,
    /// Start a new generation job and follow it to completion
    Submit {
        /// Job description document (PDF, DOCX or text)
        #[arg(long, value_name = "PATH")]
        document: PathBuf,

        #[arg(long, value_name = "NAME")]
        company: String,

        #[arg(long, value_name = "TITLE")]
        title: String,

        /// Skill to emphasize; repeatable
        #[arg(long = "skill", value_name = "SKILL")]
        skills: Vec<String>,

        #[arg(long, value_name = "TEMPLATE_ID")]
        template: Option<String>,

        /// Write the generated content to this file
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Resume tracking a job interrupted by a restart
    Resume {
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Print the persisted state of the last job
    Status,
    /// Forget the tracked job
    Reset,
    /// List available resume templates
    Templates,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("resume_client={}", &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Resume client v{}", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(FileStore::new(&config.state_dir));
    let session = Arc::new(
        SessionClient::new(&config.backend_url, config.http_timeout, store.clone())
            .context("Failed to build session client")?,
    );
    if let Some(token) = &config.auth_token {
        session.set_token(token.clone()).await;
    } else if !session.load().await {
        info!("No stored session token; requests will be unauthenticated");
    }

    let api = Arc::new(
        HttpJobApi::new(&config.backend_url, config.http_timeout, session.token())
            .context("Failed to build job API client")?,
    );
    let clock = Arc::new(SystemClock);

    let tracker = GenerationTracker::new(
        TrackerDeps {
            api: api.clone(),
            credits: session.clone(),
            store,
            clock: clock.clone(),
        },
        PollPolicy::from_config(&config),
        &config.session_id,
    );

    match args.command {
        Command::Login { email, password } => {
            let user = session.login(&email, &password).await?;
            println!("Logged in as {}", user.email);
        }
        Command::Logout => {
            session.logout().await;
            println!("Logged out");
        }
        Command::Submit {
            document,
            company,
            title,
            skills,
            template,
            output,
        } => {
            if !session.validate_token().await {
                anyhow::bail!(
                    "No session token accepted by the backend; run `resume-client login` first"
                );
            }
            let bytes = tokio::fs::read(&document)
                .await
                .with_context(|| format!("Failed to read {}", document.display()))?;
            let input = GenerationInput {
                document: Bytes::from(bytes),
                file_name: file_name_of(&document),
                company_name: company,
                job_title: title,
                skills,
                template_id: template,
            };

            let job_id = tracker.submit(input).await?;
            println!("Started generation job {job_id}");
            follow(&tracker, output.as_deref()).await?;
        }
        Command::Resume { output } => {
            if tracker.restore().await? {
                follow(&tracker, output.as_deref()).await?;
            } else {
                println!("No generation job in progress");
            }
        }
        Command::Status => {
            tracker.load().await?;
            println!("{}", serde_json::to_string_pretty(&tracker.view().await)?);
        }
        Command::Reset => {
            tracker.reset().await?;
            println!("Generation state cleared");
        }
        Command::Templates => {
            let catalog = TemplateCatalog::new(api, clock);
            for template in catalog.templates().await {
                println!("{:<16} {:<24} {}", template.id, template.name, template.description);
            }
        }
    }

    if let Some(user) = session.cached_user().await {
        if let Some(credits) = user.credits {
            info!("Remaining credits for {}: {credits}", user.email);
        }
    }

    Ok(())
}

/// Prints progress once per second until tracking stops.
async fn follow(tracker: &GenerationTracker, output: Option<&Path>) -> Result<()> {
    let mut last_line = String::new();
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let view = tracker.view().await;

        let line = format!(
            "[{}] {:>3.0}% {}",
            view.formatted_elapsed_time, view.progress_percentage, view.current_step_label
        );
        if line != last_line {
            println!("{line}");
            last_line = line;
        }

        if !view.is_polling {
            if let Some(error) = &view.error {
                anyhow::bail!("Generation did not complete: {error}");
            }
            break;
        }
    }

    let view = tracker.view().await;
    if view.is_failed {
        anyhow::bail!("Generation failed after {}", view.formatted_elapsed_time);
    }

    if let Some(result) = tracker.result().await {
        println!(
            "Generation completed in {} for {}",
            view.formatted_elapsed_time,
            result.job_title.as_deref().unwrap_or("untitled role")
        );
        match output {
            Some(path) => {
                tokio::fs::write(path, &result.content)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("Resume written to {}", path.display());
            }
            None => println!("{}", result.content),
        }
    }
    Ok(())
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "job_description".to_string())
}
