mod ai;
mod app;
mod command;
mod config;
mod constants;
mod credentials;
mod error;
mod interactions;
mod mail;
mod oauth2;
mod preferences;
mod retry;
#[cfg(test)]
mod testing;
mod token;

use anyhow::Result;
use std::env;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::App;
use crate::command::{ParsedCommand, available_commands, parse_command};
use crate::config::Config;
use crate::mail::{DraftUpdate, ItemBody, Message, NewDraft};

fn setup_logging() {
    use std::fs::OpenOptions;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,graphdraft=debug"));

    // Try to create a log file in the data directory
    let log_file = Config::data_dir()
        .ok()
        .and_then(|dir| std::fs::create_dir_all(&dir).ok().map(|_| dir))
        .map(|dir| dir.join("graphdraft.log"))
        .and_then(|path| OpenOptions::new().create(true).append(true).open(&path).ok());

    if let Some(file) = log_file {
        // Log to file
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false),
            )
            .init();
    } else {
        // Fallback to stderr if file logging fails
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn print_usage() {
    let commands = available_commands();
    let width = commands.iter().map(|c| c.usage.len()).max().unwrap_or(0);

    eprintln!("graphdraft - AI reply drafting for Microsoft 365 mailboxes\n");
    eprintln!("Usage: graphdraft <command>\n");
    eprintln!("Commands:");
    for command in &commands {
        eprintln!("    {:width$}  {}", command.usage, command.description);
    }
    eprintln!(
        "\nConfiguration file: {}",
        Config::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "~/.config/graphdraft/config.toml".to_string())
    );
}

fn print_message(message: &Message) {
    println!("Id:      {}", message.id);
    println!("From:    {}", message.display_from());
    println!("To:      {}", message.display_to());
    println!("Subject: {}", message.subject());
    if let Some(received) = message.received_date_time {
        println!("Date:    {}", received.format("%Y-%m-%d %H:%M UTC"));
    }
    println!("\n{}", message.body_text());
}

/// Explain a failed command the way the route layer would answer it.
fn report_failure(err: &anyhow::Error, development: bool) {
    match err.downcast_ref::<error::Error>() {
        Some(e) => {
            let summary = match e.status_code() {
                401 => "User not authenticated, run `graphdraft authorize` and `graphdraft login`",
                _ => "Request failed",
            };
            eprintln!("{} ({})", summary, e.status_code());
            if let Some(detail) = e.public_detail(development) {
                eprintln!("Details: {}", detail);
            }
        }
        None => eprintln!("Error: {:#}", err),
    }
}

/// Write a starting config; refuses to overwrite an existing one.
fn run_init(tenant_id: &str, client_id: &str) -> Result<()> {
    let path = Config::config_path()?;
    if path.exists() {
        anyhow::bail!("Configuration already exists at {}", path.display());
    }

    let config = Config::for_registration(tenant_id, client_id);
    config.validate()?;
    config.ensure_dirs()?;
    config.save()?;

    println!("Configuration saved to {}", path.display());
    println!(
        "Set the client secret with {} (or identity.client_secret), then run: graphdraft authorize",
        config::CLIENT_SECRET_ENV
    );
    Ok(())
}

fn print_fine_tune_job(job: &ai::FineTuneJob) {
    println!("Job:    {}", job.id);
    println!("Base:   {}", job.model);
    println!("File:   {}", job.training_file);
    println!("Status: {}", job.status);
    if let Some(model) = &job.fine_tuned_model {
        println!("Model:  {}", model);
        println!("Set [ai].model = \"{}\" to draft with it.", model);
    }
}

async fn run_status(app: &App) -> Result<()> {
    println!("Configuration: {}", Config::config_path()?.display());
    println!("Authority:     {}", app.config.identity.authority());
    println!("Mailbox API:   {}", app.config.mailbox.base_url);
    println!(
        "AI drafting:   {}",
        if app.config.ai.is_enabled() {
            app.config.ai.model.as_str()
        } else {
            "disabled (no API key)"
        }
    );
    println!();
    print!("{}", app.store_status);
    Ok(())
}

async fn execute(app: &App, command: ParsedCommand) -> Result<()> {
    match command {
        ParsedCommand::Help => print_usage(),
        ParsedCommand::Init {
            tenant_id,
            client_id,
        } => run_init(&tenant_id, &client_id)?,
        ParsedCommand::Status => run_status(app).await?,
        ParsedCommand::Authorize => {
            let request = app
                .tokens
                .authorization_url(&app.config.identity.redirect_uri)?;
            println!("Open this URL to grant mailbox access:\n\n{}\n", request.url);
            println!("Expected state: {}", request.state);
            println!("Then run: graphdraft login <code>");
        }
        ParsedCommand::Login { code } => {
            let account = app
                .tokens
                .exchange_authorization_code(
                    &code,
                    &app.config.identity.scopes,
                    &app.config.identity.redirect_uri,
                )
                .await?;
            println!("Signed in as {} <{}>", account.display_name, account.username);
            println!("User id: {}", account.user_id);
        }
        ParsedCommand::Refresh {
            user_id,
            refresh_token,
        } => {
            let renewed = app
                .tokens
                .refresh_access_token(&user_id, &refresh_token)
                .await?;
            println!("{}", serde_json::to_string_pretty(&renewed)?);
        }
        ParsedCommand::Message {
            user_id,
            message_id,
        } => {
            let message = app.mailbox.fetch_message(&user_id, &message_id).await?;
            print_message(&message);
        }
        ParsedCommand::Thread {
            user_id,
            conversation_id,
        } => {
            let thread = app.mailbox.fetch_thread(&user_id, &conversation_id).await?;
            for (i, message) in thread.iter().enumerate() {
                if i > 0 {
                    println!("\n-------------------\n");
                }
                print_message(message);
            }
        }
        ParsedCommand::Draft {
            user_id,
            subject,
            to,
            body,
        } => {
            let draft = NewDraft::plain(&subject, &to, &body);
            let created = app.mailbox.create_draft(&user_id, &draft).await?;
            println!("Draft created: {}", created.id);
        }
        ParsedCommand::PatchDraft {
            user_id,
            message_id,
            subject,
            body,
        } => {
            let update = DraftUpdate {
                subject: Some(subject),
                body: Some(ItemBody::text(body)),
                ..Default::default()
            };
            let patched = app
                .mailbox
                .patch_draft(&user_id, &message_id, &update)
                .await?;
            println!("Draft updated: {}", patched.id);
        }
        ParsedCommand::Reply {
            user_id,
            message_id,
        } => {
            let reply = app
                .drafter()?
                .generate_reply(&user_id, &message_id)
                .await?;
            println!("{}", reply);
        }
        ParsedCommand::LogSent {
            user_id,
            message_id,
            original_reply,
            sent_content,
        } => {
            app.drafter()?
                .log_sent_reply(&user_id, &message_id, &original_reply, &sent_content)
                .await?;
            println!("Logged sent reply for {}", message_id);
        }
        ParsedCommand::FineTune => {
            let run = app.fine_tuner()?.start().await?;
            println!(
                "Uploaded {} training examples as {} ({}, {} bytes)",
                run.examples, run.file.id, run.file.filename, run.file.bytes
            );
            print_fine_tune_job(&run.job);
        }
        ParsedCommand::FineTuneStatus { job_id } => {
            let job = app.fine_tuner()?.status(&job_id).await?;
            print_fine_tune_job(&job);
        }
        ParsedCommand::Preferences { user_id } => match app.preferences.get(&user_id).await? {
            Some(stored) => println!("{}", serde_json::to_string_pretty(&stored)?),
            None => println!("No preferences stored for {}", user_id),
        },
        ParsedCommand::SetPreferences {
            user_id,
            preferences,
        } => {
            let patch = preferences::parse_update(&preferences)?;
            let stored = app.preferences.update(&user_id, patch).await?;
            println!("{}", serde_json::to_string_pretty(&stored)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();

    let command = match parse_command(&args) {
        Ok(ParsedCommand::Help) => {
            print_usage();
            return Ok(());
        }
        Ok(command) => command,
        Err(message) => {
            eprintln!("{}", message);
            print_usage();
            std::process::exit(2);
        }
    };

    setup_logging();

    if let ParsedCommand::Init {
        tenant_id,
        client_id,
    } = &command
    {
        return run_init(tenant_id, client_id);
    }

    let config = Config::load()?;
    config.ensure_dirs()?;
    let development = config.development;

    let app = App::init(config)?;

    if let Err(err) = execute(&app, command).await {
        tracing::error!("Command failed: {:#}", err);
        report_failure(&err, development);
        std::process::exit(1);
    }
    Ok(())
}
