use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use packvote::net::types::PlaceQuery;
use packvote::render::{render_dashboard, render_itinerary, render_places};
use packvote::session::{self, DashboardSession};
use packvote::state::dashboard::Commit;
use packvote::state::forms::{GroupForm, InviteForm};
use packvote::{ApiConfig, ClientError, HttpTripApi, TripApi};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("no recommended destination named {0:?}; run `sync` to see the ranking")]
    UnknownDestination(String),
    #[error("itinerary for {0} was superseded")]
    Superseded(String),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "packvote", about = "PackVote group trip-planning client")]
struct Cli {
    /// Backend origin, e.g. `http://127.0.0.1:8000`.
    #[arg(long, env = "PACKVOTE_API_URL")]
    base_url: Option<String>,

    /// Request timeout in seconds; overrides `PACKVOTE_REQUEST_TIMEOUT_SECS`.
    #[arg(long)]
    request_timeout_secs: Option<u64>,

    /// Print JSON instead of text where supported.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the backend is reachable.
    Ping,
    Group(GroupCommand),
    /// Invite a participant and show the refreshed squad.
    Invite {
        group_id: Uuid,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },
    /// Pull survey responses and rank destinations.
    Sync { group_id: Uuid },
    /// Generate an itinerary for one of the ranked destinations.
    Plan { group_id: Uuid, destination: String },
    /// Search places without a group.
    Explore {
        #[arg(long)]
        max_budget: Option<f64>,
        #[arg(long = "state")]
        states: Vec<String>,
        #[arg(long)]
        query: Option<String>,
    },
}

#[derive(Args, Debug)]
struct GroupCommand {
    #[command(subcommand)]
    command: GroupSubcommand,
}

#[derive(Subcommand, Debug)]
enum GroupSubcommand {
    Create(CreateArgs),
    Show {
        group_id: Uuid,
    },
    /// Re-render the dashboard every few seconds until Ctrl-C.
    Watch {
        group_id: Uuid,
        #[arg(long, default_value_t = 10)]
        interval_secs: u64,
    },
}

#[derive(Args, Debug)]
struct CreateArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    creator_email: String,
    #[arg(long)]
    start_city: String,
    #[arg(long, default_value_t = packvote::state::forms::DEFAULT_MAX_BUDGET)]
    max_budget: f64,
    #[arg(long, default_value = packvote::state::forms::DEFAULT_TRAVEL_MONTH)]
    travel_month: String,
    #[arg(long, default_value_t = packvote::state::forms::DEFAULT_DURATION_DAYS)]
    duration: u32,
    #[arg(long, default_value_t = packvote::state::forms::DEFAULT_GROUP_SIZE)]
    group_size: u32,
}

impl From<CreateArgs> for GroupForm {
    fn from(args: CreateArgs) -> Self {
        Self {
            name: args.name,
            creator_email: args.creator_email,
            start_city: args.start_city,
            max_budget: args.max_budget,
            travel_month: args.travel_month,
            duration: args.duration,
            group_size: args.group_size,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let api: Arc<dyn TripApi> = Arc::new(HttpTripApi::new(build_config(&cli)?)?);

    match cli.command {
        Command::Ping => {
            api.ping().await?;
            println!("ok");
            Ok(())
        }
        Command::Group(group) => run_group(api, group, cli.json).await,
        Command::Invite { group_id, name, email } => run_invite(api, group_id, name, email).await,
        Command::Sync { group_id } => run_sync(api, group_id, cli.json).await,
        Command::Plan { group_id, destination } => run_plan(api, group_id, &destination).await,
        Command::Explore { max_budget, states, query } => {
            let places = api.browse_places(&PlaceQuery { max_budget, preferred_states: states, query }).await?;
            if cli.json {
                print_json(&serde_json::to_value(&places)?)
            } else {
                print!("{}", render_places(&places));
                Ok(())
            }
        }
    }
}

fn build_config(cli: &Cli) -> Result<ApiConfig, ClientError> {
    let mut config = ApiConfig::from_env()?;
    if let Some(url) = &cli.base_url {
        config.base_url = ApiConfig::new(url)?.base_url;
    }
    if let Some(secs) = cli.request_timeout_secs.filter(|s| *s > 0) {
        config.timeouts.request_secs = secs;
    }
    tracing::debug!(base_url = %config.base_url, request_secs = config.timeouts.request_secs, "backend configured");
    Ok(config)
}

async fn run_group(api: Arc<dyn TripApi>, group: GroupCommand, as_json: bool) -> Result<(), CliError> {
    match group.command {
        GroupSubcommand::Create(args) => {
            let form = GroupForm::from(args);
            let group_id = session::create_group(api.as_ref(), &form).await?;
            eprintln!("created group {group_id} -> {}", session::dashboard_path(group_id));
            let dashboard = DashboardSession::open(api, group_id).await?;
            show(&dashboard, as_json).await
        }
        GroupSubcommand::Show { group_id } => {
            let dashboard = DashboardSession::open(api, group_id).await?;
            show(&dashboard, as_json).await
        }
        GroupSubcommand::Watch { group_id, interval_secs } => watch(api, group_id, interval_secs).await,
    }
}

async fn run_invite(api: Arc<dyn TripApi>, group_id: Uuid, name: String, email: String) -> Result<(), CliError> {
    let dashboard = DashboardSession::open(api, group_id).await?;
    let mut form = InviteForm::new(name, email);
    let result = dashboard.invite(&mut form).await;
    print_alerts(&dashboard).await;
    let receipt = result?;
    if let Some(link) = &receipt.link {
        eprintln!("survey link: {link}");
    }
    print!("{}", render_dashboard(&dashboard.snapshot().await));
    Ok(())
}

async fn run_sync(api: Arc<dyn TripApi>, group_id: Uuid, as_json: bool) -> Result<(), CliError> {
    let dashboard = DashboardSession::open(api, group_id).await?;
    let result = dashboard.sync_and_rank().await;
    print_alerts(&dashboard).await;
    result?;
    show(&dashboard, as_json).await
}

async fn run_plan(api: Arc<dyn TripApi>, group_id: Uuid, destination: &str) -> Result<(), CliError> {
    let dashboard = DashboardSession::open(api, group_id).await?;
    let ranked = dashboard.sync_and_rank().await;
    print_alerts(&dashboard).await;
    ranked?;

    let state = dashboard.snapshot().await;
    let place = state
        .recommendations()
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(destination.trim()))
        .cloned()
        .ok_or_else(|| CliError::UnknownDestination(destination.to_owned()))?;

    let generated = dashboard.generate_itinerary(&place).await;
    print_alerts(&dashboard).await;
    if generated? == Commit::Superseded {
        return Err(CliError::Superseded(place.name));
    }
    if let Some(itinerary) = dashboard.snapshot().await.itinerary() {
        print!("{}", render_itinerary(itinerary));
    }
    Ok(())
}

async fn watch(api: Arc<dyn TripApi>, group_id: Uuid, interval_secs: u64) -> Result<(), CliError> {
    let dashboard = DashboardSession::open(api, group_id).await?;
    let period = Duration::from_secs(interval_secs.max(1));
    dashboard
        .watch(period, tokio::signal::ctrl_c(), |state, alerts| {
            println!("----- {} -----", session::dashboard_path(group_id));
            print!("{}", render_dashboard(state));
            for alert in alerts {
                eprintln!("! {alert}");
            }
        })
        .await;
    eprintln!("stopped watching {group_id}");
    Ok(())
}

async fn show(dashboard: &DashboardSession, as_json: bool) -> Result<(), CliError> {
    let state = dashboard.snapshot().await;
    if as_json {
        return print_json(&json!({
            "group": state.group(),
            "participants": state.participants(),
            "recommendations": state.recommendations(),
        }));
    }
    print!("{}", render_dashboard(&state));
    Ok(())
}

async fn print_alerts(dashboard: &DashboardSession) {
    for alert in dashboard.take_alerts().await {
        eprintln!("! {alert}");
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
