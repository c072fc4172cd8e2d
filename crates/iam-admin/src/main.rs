//! IAM service admin CLI entry point.
//!
//! Every subcommand builds one message or query, runs it against the
//! configured `PostgreSQL` store and prints the result as JSON on stdout.

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use iam_core::clock::SystemClock;
use iam_core::event::DomainEvent;
use iam_core::mapper::Mapper;
use iam_core::repository::{OutBox, SessionFactory};
use iam_event_store::pg_event_store::PgEventStore;
use iam_identity::application::query_handlers::{get_group_by_id, get_user_by_id};
use iam_identity::bootstrap;
use iam_identity::domain::commands::{
    CreateUser, IamCommand, MakePurchase, RequestCreateGroup, UserCommand,
};
use iam_identity::domain::permissions::AccessPermission;
use iam_service::message_bus::{Message, MessageBus};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod config;
mod error;

use config::Settings;
use error::AppError;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending schema migrations.
    Migrate,
    /// Register a user.
    CreateUser {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        email: String,
    },
    /// Buy access permissions for a user.
    Purchase {
        #[arg(long)]
        user_id: Uuid,
        /// Flag names such as `academic` or `gpu-for-doc`.
        #[arg(long = "access", required = true)]
        access: Vec<AccessPermission>,
        /// Record the purchase as a group purchase.
        #[arg(long)]
        group: bool,
    },
    /// Ask for a new group owned by the user.
    RequestGroup {
        #[arg(long)]
        user_id: Uuid,
        #[arg(long)]
        name: String,
    },
    /// Print a user.
    ShowUser {
        #[arg(long)]
        user_id: Uuid,
    },
    /// Print a group.
    ShowGroup {
        #[arg(long)]
        group_id: Uuid,
    },
    /// Page through the event log in global order.
    Notifications {
        #[arg(long, default_value_t = 1)]
        start: i64,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// List outbox rows waiting for the publisher.
    Outbox {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
}

#[derive(Debug, Serialize)]
struct Handled {
    aggregate_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
struct NotificationView {
    notification_id: i64,
    id: String,
    version: i64,
    topic: String,
    state_bytes: usize,
}

#[derive(Debug, Serialize)]
struct OutboxView {
    id: Uuid,
    aggregate_id: Uuid,
    version: i64,
    topic: String,
    processed: bool,
}

fn print_json(value: &impl Serialize) -> Result<(), AppError> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout).map_err(serde_json::Error::io)?;
    Ok(())
}

async fn dispatch(
    bus: &MessageBus<IamCommand, Uuid>,
    command: IamCommand,
) -> Result<(), AppError> {
    let aggregate_ids = bus.handle(Message::Command(command)).await?;
    print_json(&Handled { aggregate_ids })
}

async fn run(cli: Cli, settings: Settings) -> Result<(), AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.database_url)
        .await?;

    if let Command::Migrate = cli.command {
        sqlx::migrate!("../../migrations").run(&pool).await?;
        tracing::info!("migrations applied");
        return Ok(());
    }

    let factory: Arc<dyn SessionFactory> = Arc::new(PgEventStore::new(pool));
    let mapper = Arc::new(bootstrap::mapper());
    let bus = bootstrap::message_bus(factory, Arc::clone(&mapper), Arc::new(SystemClock));

    match cli.command {
        Command::Migrate => Ok(()),
        Command::CreateUser { name, email } => {
            dispatch(&bus, IamCommand::CreateUser(CreateUser { name, email })).await
        }
        Command::Purchase {
            user_id,
            access,
            group,
        } => {
            let command = UserCommand::MakePurchase(MakePurchase {
                requested_access: access,
                is_group_purchase: group,
            });
            dispatch(&bus, IamCommand::ExecuteUser { user_id, command }).await
        }
        Command::RequestGroup { user_id, name } => {
            let command = UserCommand::RequestCreateGroup(RequestCreateGroup { name });
            dispatch(&bus, IamCommand::ExecuteUser { user_id, command }).await
        }
        Command::ShowUser { user_id } => {
            let view = get_user_by_id(&mut bus.unit_of_work(), user_id).await?;
            print_json(&view)
        }
        Command::ShowGroup { group_id } => {
            let view = get_group_by_id(&mut bus.unit_of_work(), group_id).await?;
            print_json(&view)
        }
        Command::Notifications { start, limit } => {
            let mut uow = bus.unit_of_work();
            let mut open = uow.begin().await?;
            let page = open.select_notifications(start, limit).await?;
            open.rollback().await?;
            let views: Vec<NotificationView> = page
                .into_iter()
                .map(|n| NotificationView {
                    notification_id: n.notification_id,
                    id: n.stored.id,
                    version: n.stored.version,
                    topic: n.stored.topic,
                    state_bytes: n.stored.state.len(),
                })
                .collect();
            print_json(&views)
        }
        Command::Outbox { limit } => {
            let mut uow = bus.unit_of_work();
            let mut open = uow.begin().await?;
            let rows = open.outboxes().unprocessed(limit).await?;
            open.rollback().await?;
            let views = rows
                .iter()
                .map(|row| outbox_view(&mapper, row))
                .collect::<Result<Vec<_>, _>>()?;
            print_json(&views)
        }
    }
}

fn outbox_view(mapper: &Mapper, row: &OutBox) -> Result<OutboxView, AppError> {
    let event = mapper.outbox_to_domain_event(row)?;
    Ok(OutboxView {
        id: row.id,
        aggregate_id: row.aggregate_id,
        version: event.metadata().version,
        topic: row.topic.clone(),
        processed: row.processed,
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match Settings::from_env() {
        Ok(settings) => {
            tracing::info!(stage = %settings.stage, "starting iam-admin");
            run(cli, settings).await
        }
        Err(err) => Err(err),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "iam-admin failed");
            ExitCode::FAILURE
        }
    }
}
