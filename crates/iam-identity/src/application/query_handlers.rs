//! Query handlers for the identity context.
//!
//! Queries rebuild the aggregate inside a read-only transaction and return
//! a serializable view of it.

use chrono::{DateTime, Utc};
use iam_core::aggregate::Aggregate;
use iam_core::error::DomainError;
use iam_service::unit_of_work::UnitOfWork;
use serde::Serialize;
use uuid::Uuid;

use crate::application::repositories::IdentityRepositories;
use crate::domain::aggregates::{Group, GroupRole, User};
use crate::domain::permissions::{AccessPermission, GroupPermission};

/// Read-only view of a user aggregate.
#[derive(Debug, Serialize)]
pub struct UserView {
    /// The user identifier.
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub email_verified: bool,
    /// Held access permissions, `DEFAULT` included.
    pub permissions: Vec<AccessPermission>,
    /// Groups the user asked to found.
    pub groups: Vec<Uuid>,
    /// Current version (event count).
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Read-only view of a group role.
#[derive(Debug, Serialize)]
pub struct RoleView {
    /// Derived from the group id and the role name.
    pub role_id: Uuid,
    pub name: String,
    pub permissions: Vec<AccessPermission>,
    pub group_permissions: Vec<GroupPermission>,
}

impl From<&GroupRole> for RoleView {
    fn from(role: &GroupRole) -> Self {
        Self {
            role_id: role.id,
            name: role.name.clone(),
            permissions: role.permissions.list(),
            group_permissions: role.group_permissions.list(),
        }
    }
}

/// Read-only view of a group aggregate.
#[derive(Debug, Serialize)]
pub struct GroupView {
    /// The group identifier.
    pub group_id: Uuid,
    pub name: String,
    /// The user who founded the group.
    pub created_by: Uuid,
    /// Access bought for the group as a whole.
    pub permissions: Vec<AccessPermission>,
    pub group_permissions: Vec<GroupPermission>,
    /// Roles ordered by name.
    pub roles: Vec<RoleView>,
    /// Current version (event count).
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Retrieves a user by its aggregate ID.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if no events exist for the ID.
/// Returns `DomainError::Infrastructure` if the store is unavailable.
pub async fn get_user_by_id(uow: &mut UnitOfWork, user_id: Uuid) -> Result<UserView, DomainError> {
    let mut open = uow.begin().await?;
    let loaded = open.users().get(user_id).await;
    open.rollback().await?;
    let user = loaded?;
    Ok(UserView {
        user_id,
        name: user.name.clone(),
        email: user.email.clone(),
        email_verified: user.email_verified,
        permissions: user.permissions.list(),
        groups: user.groups.iter().copied().collect(),
        version: user.version(),
        created_at: user.root().created_at(),
        updated_at: user.root().updated_at(),
    })
}

/// Retrieves a group by its aggregate ID.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if no events exist for the ID.
/// Returns `DomainError::Infrastructure` if the store is unavailable.
pub async fn get_group_by_id(
    uow: &mut UnitOfWork,
    group_id: Uuid,
) -> Result<GroupView, DomainError> {
    let mut open = uow.begin().await?;
    let loaded = open.groups().get(group_id).await;
    open.rollback().await?;
    let group: Group = loaded?;
    Ok(GroupView {
        group_id,
        name: group.name.clone(),
        created_by: group.created_by,
        permissions: group.permissions.list(),
        group_permissions: group.group_permissions.list(),
        roles: group.roles.values().map(RoleView::from).collect(),
        version: group.version(),
        created_at: group.root().created_at(),
        updated_at: group.root().updated_at(),
    })
}
