//! Commands for the identity context.

use iam_core::command::Command;
use uuid::Uuid;

use super::permissions::{AccessPermission, GroupPermission};

/// Registers a new user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateUser {
    pub name: String,
    /// May be empty; verification happens outside this service.
    pub email: String,
}

/// Founds a group on behalf of a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateGroup {
    pub name: String,
    /// The founding user, recorded as `created_by`.
    pub user_id: Uuid,
    /// Id the new group is created under.
    pub group_id: Uuid,
}

/// Buys access permissions, for a user or for a whole group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MakePurchase {
    pub requested_access: Vec<AccessPermission>,
    /// Bought for a group. A user's group purchase grants the user nothing,
    /// and a group only accepts group purchases.
    pub is_group_purchase: bool,
}

impl MakePurchase {
    /// The grant that follows a successful purchase.
    #[must_use]
    pub fn chained(&self) -> AssignPermission {
        AssignPermission {
            requested_access: self.requested_access.clone(),
        }
    }
}

/// Grants access permissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignPermission {
    pub requested_access: Vec<AccessPermission>,
}

/// Revokes access permissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpirePermission {
    /// Flags to clear; flags not held are ignored.
    pub expired_permissions: Vec<AccessPermission>,
}

/// Asks for a new group owned by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestCreateGroup {
    pub name: String,
}

/// Adds a named role to a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateGroupRole {
    /// Unique within the group; a taken name leaves the group unchanged.
    pub role_name: String,
    /// Unioned into the role's group permission mask.
    pub group_permissions: Vec<GroupPermission>,
}

/// Commands executed against an existing user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    MakePurchase(MakePurchase),
    AssignPermission(AssignPermission),
    RequestCreateGroup(RequestCreateGroup),
    ExpirePermission(ExpirePermission),
}

/// Commands executed against an existing group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupCommand {
    MakePurchase(MakePurchase),
    AssignPermission(AssignPermission),
    CreateGroupRole(CreateGroupRole),
}

/// Every command the identity message bus accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IamCommand {
    CreateUser(CreateUser),
    CreateGroup(CreateGroup),
    ExecuteUser { user_id: Uuid, command: UserCommand },
    ExecuteGroup { group_id: Uuid, command: GroupCommand },
}

/// Command types under which the bus routes [`IamCommand`]s.
pub const CREATE_USER: &str = "CreateUser";
pub const CREATE_GROUP: &str = "CreateGroup";
pub const EXECUTE_USER: &str = "ExecuteUser";
pub const EXECUTE_GROUP: &str = "ExecuteGroup";

impl Command for IamCommand {
    fn command_type(&self) -> &'static str {
        match self {
            Self::CreateUser(_) => CREATE_USER,
            Self::CreateGroup(_) => CREATE_GROUP,
            Self::ExecuteUser { .. } => EXECUTE_USER,
            Self::ExecuteGroup { .. } => EXECUTE_GROUP,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chained_purchase_assigns_the_same_access() {
        let purchase = MakePurchase {
            requested_access: vec![AccessPermission::Academic, AccessPermission::Pdf],
            is_group_purchase: false,
        };

        let assign = purchase.chained();

        assert_eq!(assign.requested_access, purchase.requested_access);
    }

    #[test]
    fn test_command_types_are_stable() {
        let command = IamCommand::ExecuteUser {
            user_id: Uuid::new_v4(),
            command: UserCommand::RequestCreateGroup(RequestCreateGroup { name: "SVB".into() }),
        };

        assert_eq!(command.command_type(), "ExecuteUser");
        assert_eq!(
            IamCommand::CreateUser(CreateUser {
                name: "Migo".into(),
                email: String::new(),
            })
            .command_type(),
            "CreateUser"
        );
    }
}
