use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the live-event admission gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway status
    Status,
    /// Show the current metrics snapshot
    Metrics,
    /// Query the audit log
    Audit {
        /// Maximum entries to return
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
        /// Filter by severity (low, medium, high, critical)
        #[arg(short, long)]
        severity: Option<String>,
        /// Filter by event type (e.g. RATE_LIMIT_EXCEEDED)
        #[arg(short, long)]
        event_type: Option<String>,
        /// Filter by source IP
        #[arg(long)]
        ip: Option<String>,
    },
    /// Show the active configuration
    Config,
    /// Block a source IP and disconnect its active connections
    Block {
        ip: String,
        #[arg(default_value = "manual block via gateway-cli")]
        reason: String,
    },
    /// Remove a source IP from the blocklist
    Unblock { ip: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    match cli.command {
        Commands::Status => {
            let res = client
                .get(format!("{}/admin/status", cli.url))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Metrics => {
            let res = client
                .get(format!("{}/admin/metrics", cli.url))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Audit {
            limit,
            severity,
            event_type,
            ip,
        } => {
            let mut query: Vec<(&str, String)> = vec![("limit", limit.to_string())];
            if let Some(severity) = severity {
                query.push(("severity", severity));
            }
            if let Some(event_type) = event_type {
                query.push(("event_type", event_type));
            }
            if let Some(ip) = ip {
                query.push(("ip", ip));
            }
            let res = client
                .get(format!("{}/admin/audit", cli.url))
                .query(&query)
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Config => {
            let res = client
                .get(format!("{}/admin/config", cli.url))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Block { ip, reason } => {
            let res = client
                .post(format!("{}/admin/block", cli.url))
                .json(&serde_json::json!({ "ip": ip, "reason": reason }))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Unblock { ip } => {
            let res = client
                .post(format!("{}/admin/unblock", cli.url))
                .json(&serde_json::json!({ "ip": ip }))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
