use clap::{Parser, Subcommand};
use reqwest::header::{HeaderValue, ACCEPT};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "mcp-bridge-cli")]
#[command(about = "Inspect and drive a running MCP bridge", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8931")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show bridge and backend status
    Health,
    /// List the tools the backend exposes
    Tools,
    /// Invoke a tool
    Call {
        name: String,
        /// Tool arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Health => {
            let res = client.get(format!("{}/health", base)).send().await?;
            print_response(res).await?;
        }
        Commands::Tools => {
            let body = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"});
            let res = post_rpc(&client, base, &body).await?;
            print_response(res).await?;
        }
        Commands::Call { name, args } => {
            let arguments: Value = serde_json::from_str(&args)?;
            let body = json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "tools/call",
                "params": {"name": name, "arguments": arguments},
            });
            let res = post_rpc(&client, base, &body).await?;
            print_response(res).await?;
        }
    }

    Ok(())
}

async fn post_rpc(
    client: &reqwest::Client,
    base: &str,
    body: &Value,
) -> Result<reqwest::Response, reqwest::Error> {
    client
        .post(format!("{}/mcp", base))
        .header(ACCEPT, HeaderValue::from_static("application/json"))
        .json(body)
        .send()
        .await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: bridge returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    if let Some(error) = json.get("error") {
        eprintln!("RPC error: {}", serde_json::to_string_pretty(error)?);
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
