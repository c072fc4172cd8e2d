//! Domain events for the identity context.

use iam_core::error::DomainError;
use iam_core::event::{Event, EventKind, Payload};
use iam_core::topic::TopicResolver;
use iam_core::transcoder::Fields;
use uuid::Uuid;

use super::permissions::{AccessPermission, GroupPermission, Permissions};

/// Topic of the user aggregate.
pub const USER_TOPIC: &str = "iam.user";
/// Topic of the group aggregate.
pub const GROUP_TOPIC: &str = "iam.group";

pub const USER_CREATED: &str = "iam.user.created";
pub const USER_PURCHASE_MADE: &str = "iam.user.purchase_made";
pub const USER_PERMISSION_ASSIGNED: &str = "iam.user.permission_assigned";
pub const USER_PERMISSION_EXPIRED: &str = "iam.user.permission_expired";
pub const USER_CREATE_GROUP_REQUESTED: &str = "iam.user.create_group_requested";

pub const GROUP_CREATED: &str = "iam.group.created";
pub const GROUP_PURCHASE_MADE: &str = "iam.group.purchase_made";
pub const GROUP_PERMISSION_ASSIGNED: &str = "iam.group.permission_assigned";
pub const GROUP_ROLE_CREATED: &str = "iam.group.role_created";

/// Payload for a user being registered.
#[derive(Debug, Clone, PartialEq)]
pub struct UserCreated {
    /// The display name.
    pub name: String,
    /// The contact address, possibly empty.
    pub email: String,
    /// The initial access permissions.
    pub permissions: Permissions<AccessPermission>,
}

impl Payload for UserCreated {
    fn to_fields(&self) -> Fields {
        Fields::new()
            .with("name", self.name.as_str())
            .with("email", self.email.as_str())
            .with("permissions", self.permissions)
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, DomainError> {
        Ok(Self {
            name: fields.take("name")?,
            email: fields.take_or_default("email")?,
            permissions: fields.take("permissions")?,
        })
    }
}

/// Payload for a purchase of access permissions.
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseMade {
    /// The purchased flags.
    pub requested_access: Vec<AccessPermission>,
    /// Whether the purchase was made on behalf of a group.
    pub is_group_purchase: bool,
}

impl Payload for PurchaseMade {
    fn to_fields(&self) -> Fields {
        Fields::new()
            .with("requested_access", self.requested_access.clone())
            .with("is_group_purchase", self.is_group_purchase)
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, DomainError> {
        Ok(Self {
            requested_access: fields.take("requested_access")?,
            is_group_purchase: fields.take_or_default("is_group_purchase")?,
        })
    }
}

/// Payload for access permissions being granted.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionAssigned {
    /// The granted flags.
    pub requested_access: Vec<AccessPermission>,
}

impl Payload for PermissionAssigned {
    fn to_fields(&self) -> Fields {
        Fields::new().with("requested_access", self.requested_access.clone())
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, DomainError> {
        Ok(Self {
            requested_access: fields.take("requested_access")?,
        })
    }
}

/// Payload for access permissions running out.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionExpired {
    /// The revoked flags.
    pub expired_permissions: Vec<AccessPermission>,
}

impl Payload for PermissionExpired {
    fn to_fields(&self) -> Fields {
        Fields::new().with("expired_permissions", self.expired_permissions.clone())
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, DomainError> {
        Ok(Self {
            expired_permissions: fields.take("expired_permissions")?,
        })
    }
}

/// Payload for a user asking for a new group.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateGroupRequested {
    /// The requested group name.
    pub name: String,
    /// The requesting user.
    pub user_id: Uuid,
    /// The id reserved for the new group.
    pub group_id: Uuid,
}

impl Payload for CreateGroupRequested {
    fn to_fields(&self) -> Fields {
        Fields::new()
            .with("name", self.name.as_str())
            .with("user_id", self.user_id)
            .with("group_id", self.group_id)
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, DomainError> {
        Ok(Self {
            name: fields.take("name")?,
            user_id: fields.take("user_id")?,
            group_id: fields.take("group_id")?,
        })
    }
}

/// Payload for a group being founded.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupCreated {
    /// The group name.
    pub name: String,
    /// The founding user.
    pub created_by: Uuid,
}

impl Payload for GroupCreated {
    fn to_fields(&self) -> Fields {
        Fields::new()
            .with("name", self.name.as_str())
            .with("created_by", self.created_by)
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, DomainError> {
        Ok(Self {
            name: fields.take("name")?,
            created_by: fields.take("created_by")?,
        })
    }
}

/// Payload for a role being added to a group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRoleCreated {
    /// The role name, unique inside the group.
    pub role_name: String,
    /// The management flags granted by the role.
    pub group_permissions: Vec<GroupPermission>,
    /// The owning group.
    pub group_id: Uuid,
}

impl Payload for GroupRoleCreated {
    fn to_fields(&self) -> Fields {
        Fields::new()
            .with("role_name", self.role_name.as_str())
            .with("group_permissions", self.group_permissions.clone())
            .with("group_id", self.group_id)
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, DomainError> {
        Ok(Self {
            role_name: fields.take("role_name")?,
            group_permissions: fields.take("group_permissions")?,
            group_id: fields.take("group_id")?,
        })
    }
}

/// Events of the user aggregate.
#[derive(Debug, Clone, PartialEq)]
pub enum UserEventKind {
    Created(UserCreated),
    PurchaseMade(PurchaseMade),
    PermissionAssigned(PermissionAssigned),
    PermissionExpired(PermissionExpired),
    CreateGroupRequested(CreateGroupRequested),
}

impl EventKind for UserEventKind {
    fn topic(&self) -> &'static str {
        match self {
            Self::Created(_) => USER_CREATED,
            Self::PurchaseMade(_) => USER_PURCHASE_MADE,
            Self::PermissionAssigned(_) => USER_PERMISSION_ASSIGNED,
            Self::PermissionExpired(_) => USER_PERMISSION_EXPIRED,
            Self::CreateGroupRequested(_) => USER_CREATE_GROUP_REQUESTED,
        }
    }

    fn is_creation(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    fn externally_notifiable(&self) -> bool {
        matches!(self, Self::PurchaseMade(_))
    }

    fn internally_notifiable(&self) -> bool {
        matches!(self, Self::CreateGroupRequested(_))
    }

    fn to_fields(&self) -> Fields {
        match self {
            Self::Created(p) => p.to_fields(),
            Self::PurchaseMade(p) => p.to_fields(),
            Self::PermissionAssigned(p) => p.to_fields(),
            Self::PermissionExpired(p) => p.to_fields(),
            Self::CreateGroupRequested(p) => p.to_fields(),
        }
    }
}

/// Events of the group aggregate.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupEventKind {
    Created(GroupCreated),
    PurchaseMade(PurchaseMade),
    PermissionAssigned(PermissionAssigned),
    GroupRoleCreated(GroupRoleCreated),
}

impl EventKind for GroupEventKind {
    fn topic(&self) -> &'static str {
        match self {
            Self::Created(_) => GROUP_CREATED,
            Self::PurchaseMade(_) => GROUP_PURCHASE_MADE,
            Self::PermissionAssigned(_) => GROUP_PERMISSION_ASSIGNED,
            Self::GroupRoleCreated(_) => GROUP_ROLE_CREATED,
        }
    }

    fn is_creation(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    fn externally_notifiable(&self) -> bool {
        matches!(self, Self::PurchaseMade(_))
    }

    fn to_fields(&self) -> Fields {
        match self {
            Self::Created(p) => p.to_fields(),
            Self::PurchaseMade(p) => p.to_fields(),
            Self::PermissionAssigned(p) => p.to_fields(),
            Self::GroupRoleCreated(p) => p.to_fields(),
        }
    }
}

pub type UserEvent = Event<UserEventKind>;
pub type GroupEvent = Event<GroupEventKind>;

/// Registers a factory for every identity event topic.
pub fn register_topics(resolver: &mut TopicResolver) {
    resolver
        .register(USER_CREATED, |f| Event::decode(f, UserEventKind::Created))
        .register(USER_PURCHASE_MADE, |f| Event::decode(f, UserEventKind::PurchaseMade))
        .register(USER_PERMISSION_ASSIGNED, |f| {
            Event::decode(f, UserEventKind::PermissionAssigned)
        })
        .register(USER_PERMISSION_EXPIRED, |f| {
            Event::decode(f, UserEventKind::PermissionExpired)
        })
        .register(USER_CREATE_GROUP_REQUESTED, |f| {
            Event::decode(f, UserEventKind::CreateGroupRequested)
        })
        .register(GROUP_CREATED, |f| Event::decode(f, GroupEventKind::Created))
        .register(GROUP_PURCHASE_MADE, |f| Event::decode(f, GroupEventKind::PurchaseMade))
        .register(GROUP_PERMISSION_ASSIGNED, |f| {
            Event::decode(f, GroupEventKind::PermissionAssigned)
        })
        .register(GROUP_ROLE_CREATED, |f| {
            Event::decode(f, GroupEventKind::GroupRoleCreated)
        });
}
