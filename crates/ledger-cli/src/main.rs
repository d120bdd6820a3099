use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ledger-cli")]
#[command(about = "CLI client for a ledger node's HTTP control API")]
struct Cli {
    /// Node API base URL
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    node: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a transaction and gossip it to the node's peers
    Submit {
        /// Sender
        #[arg(long)]
        from: String,
        /// Recipient
        #[arg(long)]
        to: String,
        /// Amount
        #[arg(long)]
        amount: f64,
    },
    /// Mine the pending transactions into a block
    Mine,
    /// Print the node's chain
    Chain {
        /// One line per block instead of full JSON
        #[arg(long)]
        summary: bool,
    },
    /// Print the tip height and hash
    Head,
    /// Print the pending transactions
    Pool,
    /// Net amount received by an account
    Balance { id: String },
    /// Print the node's peer list
    Peers,
}

#[derive(Serialize)]
struct Tx {
    from: String,
    to: String,
    amount: f64,
}

fn endpoint(node: &str, path: &str) -> String {
    format!("{}{path}", node.trim_end_matches('/'))
}

async fn show(res: reqwest::Response) -> Result<()> {
    let status = res.status();
    let body = res.text().await?;
    debug!(%status, "response");
    if !status.is_success() {
        bail!("node answered {status}: {body}");
    }
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{body}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let node = cli.node;

    match cli.cmd {
        Command::Submit { from, to, amount } => {
            let tx = Tx { from, to, amount };
            let res = client.post(endpoint(&node, "/tx")).json(&tx).send().await?;
            show(res).await?;
        }
        Command::Mine => {
            let res = client.post(endpoint(&node, "/mine")).send().await?;
            show(res).await?;
        }
        Command::Chain { summary } => {
            if summary {
                let lines: Vec<String> = client
                    .get(endpoint(&node, "/chain/summary"))
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                for line in lines {
                    println!("{line}");
                }
            } else {
                show(client.get(endpoint(&node, "/chain")).send().await?).await?;
            }
        }
        Command::Head => show(client.get(endpoint(&node, "/chain/head")).send().await?).await?,
        Command::Pool => show(client.get(endpoint(&node, "/pool")).send().await?).await?,
        Command::Balance { id } => {
            let res = client
                .get(endpoint(&node, &format!("/balance/{id}")))
                .send()
                .await?;
            show(res).await?;
        }
        Command::Peers => {
            let peers: Vec<String> = client
                .get(endpoint(&node, "/peers"))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            if peers.is_empty() {
                println!("(no peers)");
            }
            for peer in peers {
                println!("{peer}");
            }
        }
    }
    Ok(())
}
