mod admin;
mod config;
mod dom;
mod origin;
mod params;
mod widget;

use crate::admin::{AdminPanel, HttpRpcTransport, authsub_request_url};
use crate::config::AppConfig;
use crate::dom::{Document, EventModel, HtmlDocument};
use crate::origin::ScriptMatcher;
use crate::params::namespace_from_search;
use crate::widget::Ytd;
use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ytd-embed", about = "Submission widget runner and admin client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the widget against a host page and print the resulting markup.
    Embed(EmbedArgs),
    /// Print the query parameters of a URL as JSON.
    Params { url: String },
    /// Read or write the application configuration over JSON-RPC.
    Admin {
        #[command(subcommand)]
        action: AdminAction,
        /// Namespace; overrides YTD_NAMESPACE.
        #[arg(long)]
        ns: Option<String>,
        /// Admin page URL; its `ns=` parameter is used when --ns is absent.
        #[arg(long)]
        admin_url: Option<String>,
    },
}

#[derive(Debug, clap::Args)]
struct EmbedArgs {
    /// Host page HTML file.
    #[arg(long)]
    page: PathBuf,
    /// URL the host page was loaded from.
    #[arg(long)]
    url: String,
    #[arg(long, default_value = "ytdContainer")]
    container: String,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    #[arg(long)]
    call_to_action: Option<String>,
    #[arg(long)]
    assignment_id: Option<String>,
    #[arg(long)]
    article_url: Option<String>,
    /// Click the call-to-action instead of running the page-ready check.
    #[arg(long)]
    click: bool,
    /// Fire the iframe's load event after embedding.
    #[arg(long)]
    fire_load: bool,
    #[arg(long, value_enum, default_value_t = EventModelArg::Standard)]
    event_model: EventModelArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EventModelArg {
    Standard,
    Legacy,
    None,
}

impl From<EventModelArg> for EventModel {
    fn from(arg: EventModelArg) -> Self {
        match arg {
            EventModelArg::Standard => EventModel::Standard,
            EventModelArg::Legacy => EventModel::Legacy,
            EventModelArg::None => EventModel::Unsupported,
        }
    }
}

#[derive(Debug, Subcommand)]
enum AdminAction {
    Get,
    /// Load, apply `key=value` edits, and save.
    Set { assignments: Vec<String> },
    /// Print the AuthSub URL the Authenticate button opens.
    AuthUrl { host: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    match cli.command {
        Command::Embed(args) => run_embed(&config, args),
        Command::Params { url } => {
            let params = crate::params::parse_params(&url);
            println!("{}", serde_json::to_string_pretty(&params)?);
            Ok(())
        }
        Command::Admin {
            action,
            ns,
            admin_url,
        } => {
            let ns = ns.or_else(|| {
                admin_url
                    .as_deref()
                    .and_then(|url| url.split_once('?'))
                    .and_then(|(_, search)| namespace_from_search(search))
            });
            run_admin(&config, action, ns).await
        }
    }
}

fn run_embed(config: &AppConfig, args: EmbedArgs) -> anyhow::Result<()> {
    let html = std::fs::read_to_string(&args.page)
        .with_context(|| format!("reading host page {:?}", args.page))?;
    let mut doc = HtmlDocument::parse(&html, &args.url)?.with_event_model(args.event_model.into());

    let matcher = ScriptMatcher::new(&config.embed_script)?;
    let mut ytd: Ytd<HtmlDocument> = Ytd::with_matcher(matcher);
    ytd.set_container(&doc, &args.container, args.width, args.height)?;
    if let Some(cta) = &args.call_to_action {
        ytd.set_call_to_action(&doc, cta)?;
    }
    if let Some(id) = args.assignment_id {
        ytd.set_assignment_id(id);
    }
    if let Some(url) = args.article_url {
        ytd.set_article_url(url);
    }

    tracing::debug!(
        auth_return = ytd.is_auth_return(&doc),
        state = ?ytd.state(),
        width = ytd.config().width,
        height = ytd.config().height,
        "widget configured"
    );
    if args.click {
        ytd.click_call_to_action(&mut doc)?;
    } else if !ytd.ready(&mut doc)? {
        tracing::info!("not an auth return; embedding directly");
        ytd.embed(&mut doc)?;
    }

    if args.fire_load
        && let Some(embedded) = ytd.embedded().cloned()
    {
        doc.dispatch_event(&embedded.iframe, "load");
        tracing::debug!(
            placeholder_display = ?doc.style(&embedded.placeholder, "display"),
            "fired iframe load"
        );
    }
    tracing::debug!(listeners = doc.listener_count(), "registered listeners");

    if let Some(embedded) = ytd.embedded() {
        eprintln!("iframe: {}", embedded.url);
    }
    eprintln!("location: {}", doc.location().href());
    println!("{}", doc.to_html());
    Ok(())
}

async fn run_admin(config: &AppConfig, action: AdminAction, ns: Option<String>) -> anyhow::Result<()> {
    if let AdminAction::AuthUrl { host } = &action {
        println!("{}", authsub_request_url(host));
        return Ok(());
    }
    let namespace = ns.or_else(|| config.namespace.clone());
    let transport =
        HttpRpcTransport::new(&config.jsonrpc_url, namespace.as_deref(), config.rpc_timeout)?;
    tracing::debug!(endpoint = %transport.endpoint(), "admin json-rpc endpoint");
    let mut panel = AdminPanel::new(transport);
    let result = async {
        let mut form = panel.get_admin_config().await?;
        if let AdminAction::Set { assignments } = &action {
            for assignment in assignments {
                let (key, value) = assignment
                    .split_once('=')
                    .with_context(|| format!("expected key=value, got {assignment}"))?;
                form.set(key, value)?;
            }
            panel.update_admin_config(&form).await?;
        }
        anyhow::Ok(form)
    }
    .await;

    for message in panel.log().messages() {
        eprintln!("{message}");
    }
    let form = result?;
    for (key, value) in &form.values {
        println!("{key}={value}");
    }
    println!("moderationEmail={}", form.moderation_email);
    println!("photoSubmissionEnabled={}", form.photo_submission_enabled);
    match &form.authenticated_as {
        Some(user) => println!("authenticated as {user}"),
        None => println!("not authenticated ({})", form.authenticate_label()),
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}
