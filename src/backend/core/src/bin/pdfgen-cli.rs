//! pdfgen CLI - command-line client for a running pdfgen server.
//!
//! Manages templates and renders previews over the HTTP API.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Serialize};
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};
use uuid::Uuid;

use pdfgen_core::api::dto::{
    CreateTemplateRequest, HistoryResponse, ListTemplatesResponse, PreviewRequest,
    TemplateResponse, UpdateTemplateRequest,
};
use pdfgen_core::error::ErrorResponse;
use pdfgen_core::events::{Template, TemplateContent, TemplateSummary};
use pdfgen_core::templates::HistoryEntry;

// ═══════════════════════════════════════════════════════════════════════════════
// CLI Structure
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Parser)]
#[command(
    name = "pdfgen",
    version,
    about = "Manage pdfgen document templates",
    propagate_version = true
)]
struct Cli {
    /// Server base URL
    #[arg(short, long, global = true, env = "PDFGEN_SERVER", default_value = "http://localhost:8080")]
    server: String,

    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    format: OutputFormat,

    /// Request timeout in seconds
    #[arg(long, global = true, default_value = "30")]
    timeout: u64,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    Text,
    Json,
    #[default]
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// List templates (newest first)
    List {
        /// Hide archived templates
        #[arg(long)]
        active: bool,
    },

    /// Show one template
    Get {
        id: Uuid,
    },

    /// Create a template
    Create {
        #[arg(short, long)]
        name: String,

        #[arg(short, long, default_value = "")]
        description: String,

        /// JSON file with the template content
        #[arg(short, long)]
        content: Option<PathBuf>,
    },

    /// Update a template; omitted fields keep their current value
    Update {
        id: Uuid,

        #[arg(short, long)]
        name: Option<String>,

        #[arg(short, long)]
        description: Option<String>,

        /// JSON file with the new template content
        #[arg(short, long)]
        content: Option<PathBuf>,

        /// Fail with a conflict unless the template is at this version
        #[arg(long)]
        expected_version: Option<u64>,
    },

    /// Archive a template
    Archive {
        id: Uuid,
    },

    /// Show the event history of a template
    History {
        id: Uuid,
    },

    /// Render typst source to PDF
    Preview {
        /// Typst source file
        #[arg(short, long)]
        source: PathBuf,

        /// Template variable, repeatable
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,

        /// Output PDF path
        #[arg(short, long, default_value = "preview.pdf")]
        out: PathBuf,
    },

    /// Check server health
    Health,
}

fn parse_var(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Table Rows
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Description")]
    description: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Updated")]
    updated_at: String,
}

impl From<&TemplateSummary> for SummaryRow {
    fn from(s: &TemplateSummary) -> Self {
        Self {
            id: s.id.to_string(),
            name: s.name.clone(),
            description: s.description.clone(),
            status: format_status(s.archived),
            updated_at: s.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "Version")]
    version: u64,
    #[tabled(rename = "Event")]
    kind: String,
    #[tabled(rename = "Recorded")]
    recorded_at: String,
}

impl From<&HistoryEntry> for HistoryRow {
    fn from(h: &HistoryEntry) -> Self {
        Self {
            version: h.version,
            kind: h.kind.clone(),
            recorded_at: h.recorded_at.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        }
    }
}

fn format_status(archived: bool) -> String {
    if archived {
        "archived".dimmed().to_string()
    } else {
        "active".green().to_string()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Output Helpers
// ═══════════════════════════════════════════════════════════════════════════════

struct OutputHelper {
    format: OutputFormat,
}

impl OutputHelper {
    fn new(format: OutputFormat, no_color: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format }
    }

    fn print_success(&self, message: &str) {
        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"status": "success", "message": message}));
            }
            _ => println!("{} {}", "[OK]".green().bold(), message),
        }
    }

    fn print_error(&self, message: &str) {
        match self.format {
            OutputFormat::Json => {
                eprintln!("{}", serde_json::json!({"status": "error", "message": message}));
            }
            _ => eprintln!("{} {}", "[ERROR]".red().bold(), message),
        }
    }

    fn print_table<T: Tabled>(&self, items: &[T]) {
        if items.is_empty() {
            println!("{}", "No results found.".dimmed());
            return;
        }
        let table = Table::new(items)
            .with(Style::rounded())
            .with(Modify::new(Columns::first()).with(Alignment::left()))
            .to_string();
        println!("{}", table);
    }

    fn print_json<T: Serialize>(&self, data: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(data)?);
        Ok(())
    }

    fn print_key_value(&self, key: &str, value: &str) {
        println!("  {}: {}", key.cyan(), value);
    }

    fn print_template(&self, template: &Template) -> Result<()> {
        if matches!(self.format, OutputFormat::Json) {
            return self.print_json(template);
        }
        println!();
        println!("{}", template.name.bold().underline());
        println!();
        self.print_key_value("ID", &template.id.to_string());
        self.print_key_value("Description", &template.description);
        self.print_key_value("Status", &format_status(template.archived));
        self.print_key_value("Version", &template.version.to_string());
        self.print_key_value("Created", &template.created_at.to_rfc3339());
        self.print_key_value("Updated", &template.updated_at.to_rfc3339());
        self.print_key_value(
            "Grid",
            &format!("{} columns, gap {}", template.content.grid.columns, template.content.grid.gap),
        );
        self.print_key_value("Components", &template.content.components.len().to_string());
        self.print_key_value("Variables", &template.content.variables.len().to_string());
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTTP Client
// ═══════════════════════════════════════════════════════════════════════════════

struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(response: Response) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(err) => bail!("{} ({:?}): {}", status, err.error.code, err.error.message),
            Err(_) => bail!("{}: {}", status, body.trim()),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.url(path);
        let response = self
            .http
            .request(method.clone(), &url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("{} {} failed", method, url))?;
        Ok(Self::check(response).await?.json().await?)
    }
}

fn read_content(path: &Path) -> Result<TemplateContent> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not template content", path.display()))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Command Handlers
// ═══════════════════════════════════════════════════════════════════════════════

async fn run(command: Commands, client: &ApiClient, output: &OutputHelper) -> Result<()> {
    match command {
        Commands::List { active } => {
            let mut list: ListTemplatesResponse = client.get_json("/api/templates").await?;
            if active {
                list.templates.retain(|t| !t.archived);
            }
            match output.format {
                OutputFormat::Json => output.print_json(&list)?,
                OutputFormat::Table => {
                    let rows: Vec<SummaryRow> = list.templates.iter().map(SummaryRow::from).collect();
                    output.print_table(&rows);
                }
                OutputFormat::Text => {
                    for t in &list.templates {
                        println!("{}  {}  {}", t.id, t.name.bold(), format_status(t.archived));
                    }
                }
            }
        }

        Commands::Get { id } => {
            let response: TemplateResponse = client.get_json(&format!("/api/templates/{}", id)).await?;
            output.print_template(&response.template)?;
        }

        Commands::Create {
            name,
            description,
            content,
        } => {
            let content = match content {
                Some(path) => read_content(&path)?,
                None => TemplateContent::default(),
            };
            let request = CreateTemplateRequest {
                name,
                description,
                content,
            };
            let response: TemplateResponse = client
                .send_json(reqwest::Method::POST, "/api/templates", &request)
                .await?;
            output.print_success(&format!("Created template {}", response.template.id));
            output.print_template(&response.template)?;
        }

        Commands::Update {
            id,
            name,
            description,
            content,
            expected_version,
        } => {
            let path = format!("/api/templates/{}", id);
            let current: TemplateResponse = client.get_json(&path).await?;
            let current = current.template;
            let request = UpdateTemplateRequest {
                name: name.unwrap_or(current.name),
                description: description.unwrap_or(current.description),
                content: match content {
                    Some(path) => read_content(&path)?,
                    None => current.content,
                },
                expected_version: Some(expected_version.unwrap_or(current.version)),
            };
            let response: TemplateResponse = client
                .send_json(reqwest::Method::PUT, &path, &request)
                .await?;
            output.print_success(&format!(
                "Updated template {} to version {}",
                id, response.template.version
            ));
        }

        Commands::Archive { id } => {
            let response = client
                .http
                .delete(client.url(&format!("/api/templates/{}", id)))
                .send()
                .await?;
            ApiClient::check(response).await?;
            output.print_success(&format!("Archived template {}", id));
        }

        Commands::History { id } => {
            let history: HistoryResponse = client
                .get_json(&format!("/api/templates/{}/history", id))
                .await?;
            match output.format {
                OutputFormat::Json => output.print_json(&history)?,
                _ => {
                    let rows: Vec<HistoryRow> = history.events.iter().map(HistoryRow::from).collect();
                    output.print_table(&rows);
                }
            }
        }

        Commands::Preview { source, vars, out } => {
            let typst_code = std::fs::read_to_string(&source)
                .with_context(|| format!("reading {}", source.display()))?;
            let request = PreviewRequest {
                typst_code,
                variables: vars.into_iter().collect::<HashMap<_, _>>(),
            };
            let response = client
                .http
                .post(client.url("/api/templates/preview"))
                .json(&request)
                .send()
                .await?;
            let bytes = ApiClient::check(response).await?.bytes().await?;
            std::fs::write(&out, &bytes).with_context(|| format!("writing {}", out.display()))?;
            output.print_success(&format!("Wrote {} ({} bytes)", out.display(), bytes.len()));
        }

        Commands::Health => {
            let health: serde_json::Value = client.get_json("/api/health").await?;
            match output.format {
                OutputFormat::Json => output.print_json(&health)?,
                _ => {
                    let status = health["status"].as_str().unwrap_or("unknown");
                    let version = health["version"].as_str().unwrap_or("?");
                    output.print_success(&format!("Server is {} (version {})", status, version));
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = OutputHelper::new(cli.format, cli.no_color);

    let result = match ApiClient::new(&cli.server, Duration::from_secs(cli.timeout)) {
        Ok(client) => run(cli.command, &client, &output).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        output.print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
