use clap::Parser;
use tracing::error;

use shardscale::admin_api::{ScaleRequest, ScalingAction};
use shardscale::api_client::AdminApiClient;
use shardscale::Result;

#[derive(Parser)]
#[command(name = "shardscale-admin")]
#[command(about = "One-shot scaling commands against a running autoscaler")]
pub struct Cli {
    /// Stream to operate on
    #[arg(long)]
    pub stream_name: String,

    /// scaleUp, scaleDown, resize or report
    #[arg(long, value_enum)]
    pub scaling_action: CliAction,

    /// Shards to add or remove, or the resize target
    #[arg(long)]
    pub count: Option<u32>,

    /// Percentage to scale by; count wins when both are given
    #[arg(long)]
    pub pct: Option<u32>,

    #[arg(long)]
    pub min_shards: Option<u32>,

    #[arg(long)]
    pub max_shards: Option<u32>,

    /// Provider region the daemon's clients operate in
    #[arg(long)]
    pub region: Option<String>,

    /// Split this single shard at its midpoint (resize only)
    #[arg(long)]
    pub shard_id: Option<String>,

    /// Wait for the stream to settle before returning
    #[arg(long)]
    pub wait_for_completion: bool,

    /// Base URL of the autoscaler admin API
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    pub api_url: String,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[value(rename_all = "camelCase")]
pub enum CliAction {
    ScaleUp,
    ScaleDown,
    Resize,
    Report,
}

impl From<CliAction> for ScalingAction {
    fn from(action: CliAction) -> Self {
        match action {
            CliAction::ScaleUp => ScalingAction::ScaleUp,
            CliAction::ScaleDown => ScalingAction::ScaleDown,
            CliAction::Resize => ScalingAction::Resize,
            CliAction::Report => ScalingAction::Report,
        }
    }
}

fn usage_error(message: &str) -> ! {
    eprintln!("error: {message}");
    std::process::exit(1);
}

fn validate(cli: &Cli) {
    match cli.scaling_action {
        CliAction::ScaleUp | CliAction::ScaleDown => {
            if cli.count.is_none() && cli.pct.is_none() {
                usage_error("scaleUp/scaleDown require --count or --pct");
            }
            if cli.shard_id.is_some() {
                usage_error("--shard-id only applies to resize");
            }
        }
        CliAction::Resize => {
            if cli.count.is_none() && cli.shard_id.is_none() {
                usage_error("resize requires --count (target shards) or --shard-id");
            }
        }
        CliAction::Report => {}
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(parse_error) => {
            let _ = parse_error.print();
            std::process::exit(1);
        }
    };
    validate(&cli);

    if let Err(operational_error) = run(&cli).await {
        error!(stream = %cli.stream_name, error = %operational_error, "command failed");
        std::process::exit(2);
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let client = AdminApiClient::new(&cli.api_url);

    let report = match cli.scaling_action {
        CliAction::Report => client.stream_report(&cli.stream_name).await?,
        action => {
            let command = ScaleRequest {
                action: action.into(),
                count: cli.count,
                pct: cli.pct,
                min_shards: cli.min_shards,
                max_shards: cli.max_shards,
                shard_id: cli.shard_id.clone(),
                wait_for_completion: cli.wait_for_completion,
            };
            client.scale(&cli.stream_name, &command).await?
        }
    };

    println!("{}", report.as_json());
    eprintln!("{report}");
    Ok(())
}
