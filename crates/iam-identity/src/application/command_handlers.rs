//! Command handlers for the identity context.
//!
//! Each command opens its own transaction: load or create the aggregate,
//! execute the command, add the aggregate to its repository and commit.

use std::sync::Arc;

use async_trait::async_trait;
use iam_core::aggregate::Aggregate;
use iam_core::clock::Clock;
use iam_core::error::DomainError;
use iam_service::error::ServiceError;
use iam_service::handler::{CommandHandler, require_uow};
use iam_service::unit_of_work::{OpenUnitOfWork, UnitOfWork};
use tracing::info;
use uuid::Uuid;

use crate::application::repositories::IdentityRepositories;
use crate::domain::aggregates::{Group, User};
use crate::domain::commands::{CreateGroup, CreateUser, GroupCommand, IamCommand, UserCommand};

const HANDLER: &str = "IdentityCommandHandler";

/// Handles every [`IamCommand`] and returns the id of the aggregate it
/// touched.
pub struct IdentityCommandHandler {
    clock: Arc<dyn Clock>,
}

impl IdentityCommandHandler {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

#[async_trait]
impl CommandHandler<IamCommand, Uuid> for IdentityCommandHandler {
    async fn handle(
        &self,
        command: IamCommand,
        uow: Option<&mut UnitOfWork>,
    ) -> Result<Uuid, ServiceError> {
        let uow = require_uow(uow, HANDLER)?;
        let mut open = uow.begin().await?;
        let id = match command {
            IamCommand::CreateUser(create) => {
                create_user(&mut open, create, self.clock.as_ref()).await?
            }
            IamCommand::CreateGroup(create) => {
                create_group(&mut open, create, self.clock.as_ref()).await?
            }
            IamCommand::ExecuteUser { user_id, command } => {
                execute_user(&mut open, user_id, command, self.clock.as_ref()).await?
            }
            IamCommand::ExecuteGroup { group_id, command } => {
                execute_group(&mut open, group_id, command, self.clock.as_ref()).await?
            }
        };
        open.commit().await?;
        Ok(id)
    }
}

fn require_name(name: &str, what: &str) -> Result<(), DomainError> {
    if name.trim().is_empty() {
        return Err(DomainError::Validation(format!("{what} name must not be empty")));
    }
    Ok(())
}

async fn create_user(
    open: &mut OpenUnitOfWork<'_>,
    command: CreateUser,
    clock: &dyn Clock,
) -> Result<Uuid, DomainError> {
    require_name(&command.name, "user")?;
    let mut user = User::create(command, clock)?;
    open.users().add(&mut user).await?;
    info!(user_id = %user.id(), "user created");
    Ok(user.id())
}

async fn create_group(
    open: &mut OpenUnitOfWork<'_>,
    command: CreateGroup,
    clock: &dyn Clock,
) -> Result<Uuid, DomainError> {
    require_name(&command.name, "group")?;
    let created_by = command.user_id;
    let mut group = Group::create(command, clock)?;
    open.groups().add(&mut group).await?;
    info!(group_id = %group.id(), %created_by, "group created");
    Ok(group.id())
}

async fn execute_user(
    open: &mut OpenUnitOfWork<'_>,
    user_id: Uuid,
    command: UserCommand,
    clock: &dyn Clock,
) -> Result<Uuid, DomainError> {
    let mut users = open.users();
    let mut user = users.get(user_id).await?;
    user.execute(command, clock)?;
    users.add(&mut user).await?;
    info!(%user_id, version = user.version(), "user command executed");
    Ok(user_id)
}

async fn execute_group(
    open: &mut OpenUnitOfWork<'_>,
    group_id: Uuid,
    command: GroupCommand,
    clock: &dyn Clock,
) -> Result<Uuid, DomainError> {
    let mut groups = open.groups();
    let mut group = groups.get(group_id).await?;
    group.execute(command, clock)?;
    groups.add(&mut group).await?;
    info!(%group_id, version = group.version(), "group command executed");
    Ok(group_id)
}
