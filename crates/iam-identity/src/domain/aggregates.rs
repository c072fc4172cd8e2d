//! User and Group aggregates.

use std::collections::{BTreeMap, BTreeSet};

use iam_core::aggregate::{self, Aggregate, AggregateRoot};
use iam_core::clock::Clock;
use iam_core::error::DomainError;
use iam_core::event::{Event, EventKind};
use uuid::Uuid;

use super::commands::{
    AssignPermission, CreateGroup, CreateGroupRole, CreateUser, ExpirePermission, GroupCommand,
    MakePurchase, RequestCreateGroup, UserCommand,
};
use super::events::{
    CreateGroupRequested, GROUP_TOPIC, GroupCreated, GroupEventKind, GroupRoleCreated,
    PermissionAssigned, PermissionExpired, PurchaseMade, USER_TOPIC, UserCreated, UserEventKind,
};
use super::permissions::{AccessPermission, GroupPermission, Permissions};

/// Name of the role every group starts with.
pub const DEFAULT_ROLE: &str = "default";
/// Name of the role held by the group's founder.
pub const OWNER_ROLE: &str = "owner";

/// A person holding access permissions.
#[derive(Debug)]
pub struct User {
    root: AggregateRoot<UserEventKind>,
    pub name: String,
    pub email: String,
    pub email_verified: bool,
    pub permissions: Permissions<AccessPermission>,
    /// Groups this user asked to found.
    pub groups: BTreeSet<Uuid>,
}

impl User {
    /// Registers a new user with default permissions.
    ///
    /// # Errors
    ///
    /// Propagates errors from `aggregate::create`.
    pub fn create(command: CreateUser, clock: &dyn Clock) -> Result<Self, DomainError> {
        aggregate::create(
            None,
            UserEventKind::Created(UserCreated {
                name: command.name,
                email: command.email,
                permissions: Permissions::default(),
            }),
            clock,
        )
    }

    /// Executes `command` against this user.
    ///
    /// # Errors
    ///
    /// Propagates version errors from `trigger`.
    pub fn execute(&mut self, command: UserCommand, clock: &dyn Clock) -> Result<(), DomainError> {
        match command {
            UserCommand::MakePurchase(purchase) => self.make_purchase(purchase, clock),
            UserCommand::AssignPermission(assign) => self.assign_permission(assign, clock),
            UserCommand::RequestCreateGroup(request) => self.request_create_group(request, clock),
            UserCommand::ExpirePermission(expire) => self.expire_permission(expire, clock),
        }
    }

    fn make_purchase(
        &mut self,
        purchase: MakePurchase,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        let chained = purchase.chained();
        let is_group_purchase = purchase.is_group_purchase;
        self.trigger(
            UserEventKind::PurchaseMade(PurchaseMade {
                requested_access: purchase.requested_access,
                is_group_purchase,
            }),
            clock,
        )?;
        if is_group_purchase {
            return Ok(());
        }
        self.assign_permission(chained, clock)
    }

    fn assign_permission(
        &mut self,
        assign: AssignPermission,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        self.trigger(
            UserEventKind::PermissionAssigned(PermissionAssigned {
                requested_access: assign.requested_access,
            }),
            clock,
        )
    }

    fn request_create_group(
        &mut self,
        request: RequestCreateGroup,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        let user_id = self.id();
        self.trigger(
            UserEventKind::CreateGroupRequested(CreateGroupRequested {
                name: request.name,
                user_id,
                group_id: Uuid::new_v4(),
            }),
            clock,
        )
    }

    fn expire_permission(
        &mut self,
        expire: ExpirePermission,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        self.trigger(
            UserEventKind::PermissionExpired(PermissionExpired {
                expired_permissions: expire.expired_permissions,
            }),
            clock,
        )
    }
}

impl Aggregate for User {
    type Kind = UserEventKind;
    const TOPIC: &'static str = USER_TOPIC;

    fn root(&self) -> &AggregateRoot<UserEventKind> {
        &self.root
    }

    fn root_mut(&mut self) -> &mut AggregateRoot<UserEventKind> {
        &mut self.root
    }

    fn from_created(event: &Event<UserEventKind>) -> Result<Self, DomainError> {
        match &event.kind {
            UserEventKind::Created(created) => Ok(Self {
                root: AggregateRoot::from_created(&event.metadata),
                name: created.name.clone(),
                email: created.email.clone(),
                email_verified: false,
                permissions: created.permissions,
                groups: BTreeSet::new(),
            }),
            other => Err(DomainError::NotAggregate(format!(
                "`{}` does not create a user",
                other.topic()
            ))),
        }
    }

    fn apply(&mut self, event: &Event<UserEventKind>) {
        match &event.kind {
            UserEventKind::PermissionAssigned(assigned) => {
                if !self.permissions.has(&assigned.requested_access) {
                    self.permissions.add(&assigned.requested_access);
                }
            }
            UserEventKind::PermissionExpired(expired) => {
                self.permissions.remove(&expired.expired_permissions);
            }
            UserEventKind::CreateGroupRequested(request) => {
                self.groups.insert(request.group_id);
            }
            UserEventKind::Created(_) | UserEventKind::PurchaseMade(_) => {}
        }
    }
}

/// A named role inside a group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRole {
    pub id: Uuid,
    pub name: String,
    pub group_id: Uuid,
    pub permissions: Permissions<AccessPermission>,
    pub group_permissions: Permissions<GroupPermission>,
}

impl GroupRole {
    fn new(group_id: Uuid, name: &str, group_permissions: Permissions<GroupPermission>) -> Self {
        Self {
            id: Uuid::new_v5(&group_id, name.as_bytes()),
            name: name.to_owned(),
            group_id,
            permissions: Permissions::from_bits(0),
            group_permissions,
        }
    }
}

/// A set of users sharing purchased access.
#[derive(Debug)]
pub struct Group {
    root: AggregateRoot<GroupEventKind>,
    pub name: String,
    /// The user who founded the group.
    pub created_by: Uuid,
    pub permissions: Permissions<AccessPermission>,
    /// Mask of group-management rights.
    pub group_permissions: Permissions<GroupPermission>,
    /// Keyed by role name.
    pub roles: BTreeMap<String, GroupRole>,
}

impl Group {
    /// Founds a group under the id reserved by the command.
    ///
    /// # Errors
    ///
    /// Propagates errors from `aggregate::create`.
    pub fn create(command: CreateGroup, clock: &dyn Clock) -> Result<Self, DomainError> {
        aggregate::create(
            Some(command.group_id),
            GroupEventKind::Created(GroupCreated {
                name: command.name,
                created_by: command.user_id,
            }),
            clock,
        )
    }

    /// Executes `command` against this group.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidOperation` for a purchase not flagged as
    /// a group purchase.
    pub fn execute(&mut self, command: GroupCommand, clock: &dyn Clock) -> Result<(), DomainError> {
        match command {
            GroupCommand::MakePurchase(purchase) => self.make_purchase(purchase, clock),
            GroupCommand::AssignPermission(assign) => self.assign_permission(assign, clock),
            GroupCommand::CreateGroupRole(role) => self.create_group_role(role, clock),
        }
    }

    fn make_purchase(
        &mut self,
        purchase: MakePurchase,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        if !purchase.is_group_purchase {
            return Err(DomainError::InvalidOperation(format!(
                "group {} only accepts group purchases",
                self.id()
            )));
        }
        let chained = purchase.chained();
        self.trigger(
            GroupEventKind::PurchaseMade(PurchaseMade {
                requested_access: purchase.requested_access,
                is_group_purchase: true,
            }),
            clock,
        )?;
        self.assign_permission(chained, clock)
    }

    fn assign_permission(
        &mut self,
        assign: AssignPermission,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        self.trigger(
            GroupEventKind::PermissionAssigned(PermissionAssigned {
                requested_access: assign.requested_access,
            }),
            clock,
        )
    }

    fn create_group_role(
        &mut self,
        role: CreateGroupRole,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        let group_id = self.id();
        self.trigger(
            GroupEventKind::GroupRoleCreated(GroupRoleCreated {
                role_name: role.role_name,
                group_permissions: role.group_permissions,
                group_id,
            }),
            clock,
        )
    }

    /// Looks up a role by name.
    #[must_use]
    pub fn role(&self, name: &str) -> Option<&GroupRole> {
        self.roles.get(name)
    }
}

impl Aggregate for Group {
    type Kind = GroupEventKind;
    const TOPIC: &'static str = GROUP_TOPIC;

    fn root(&self) -> &AggregateRoot<GroupEventKind> {
        &self.root
    }

    fn root_mut(&mut self) -> &mut AggregateRoot<GroupEventKind> {
        &mut self.root
    }

    fn from_created(event: &Event<GroupEventKind>) -> Result<Self, DomainError> {
        match &event.kind {
            GroupEventKind::Created(created) => {
                let id = event.metadata.aggregate_id;
                let roles = [DEFAULT_ROLE, OWNER_ROLE]
                    .into_iter()
                    .map(|name| {
                        let role = GroupRole::new(id, name, Permissions::from_bits(0));
                        (name.to_owned(), role)
                    })
                    .collect();
                Ok(Self {
                    root: AggregateRoot::from_created(&event.metadata),
                    name: created.name.clone(),
                    created_by: created.created_by,
                    permissions: Permissions::default(),
                    group_permissions: Permissions::default(),
                    roles,
                })
            }
            other => Err(DomainError::NotAggregate(format!(
                "`{}` does not create a group",
                other.topic()
            ))),
        }
    }

    fn apply(&mut self, event: &Event<GroupEventKind>) {
        match &event.kind {
            GroupEventKind::PermissionAssigned(assigned) => {
                if !self.permissions.has(&assigned.requested_access) {
                    self.permissions.add(&assigned.requested_access);
                }
            }
            GroupEventKind::GroupRoleCreated(created) => {
                if !self.roles.contains_key(&created.role_name) {
                    let role = GroupRole::new(
                        self.id(),
                        &created.role_name,
                        Permissions::from_flags(&created.group_permissions),
                    );
                    self.roles.insert(created.role_name.clone(), role);
                }
            }
            GroupEventKind::Created(_) | GroupEventKind::PurchaseMade(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iam_test_support::FixedClock;

    fn migo(clock: &FixedClock) -> User {
        User::create(
            CreateUser {
                name: "Migo".into(),
                email: "whatsoever@mail.com".into(),
            },
            clock,
        )
        .unwrap()
    }

    fn svb(clock: &FixedClock) -> Group {
        Group::create(
            CreateGroup {
                name: "SVB".into(),
                user_id: Uuid::new_v4(),
                group_id: Uuid::new_v4(),
            },
            clock,
        )
        .unwrap()
    }

    fn purchase(access: &[AccessPermission], is_group_purchase: bool) -> MakePurchase {
        MakePurchase {
            requested_access: access.to_vec(),
            is_group_purchase,
        }
    }

    #[test]
    fn test_create_user_starts_with_default_permissions() {
        // Arrange
        let clock = FixedClock::standard();

        // Act
        let mut user = migo(&clock);

        // Assert
        assert_eq!(user.version(), 1);
        assert_eq!(user.name, "Migo");
        assert_eq!(user.email, "whatsoever@mail.com");
        assert!(!user.email_verified);
        assert_eq!(user.permissions.bits(), 0);
        assert!(user.groups.is_empty());
        let pending = user.collect();
        assert_eq!(pending.len(), 1);
        assert!(matches!(pending[0].kind, UserEventKind::Created(_)));
    }

    #[test]
    fn test_user_purchase_chains_assignment() {
        // Arrange
        let clock = FixedClock::standard();
        let mut user = migo(&clock);
        user.collect();

        // Act
        user.execute(
            UserCommand::MakePurchase(purchase(&[AccessPermission::Academic], false)),
            &clock,
        )
        .unwrap();

        // Assert
        let pending = user.collect();
        assert_eq!(pending.len(), 2);
        assert!(matches!(pending[0].kind, UserEventKind::PurchaseMade(_)));
        assert!(matches!(pending[1].kind, UserEventKind::PermissionAssigned(_)));
        assert!(pending[0].metadata.externally_notifiable);
        assert_eq!(user.version(), 3);
        assert!(user.permissions.has(&[AccessPermission::Academic]));
    }

    #[test]
    fn test_user_group_purchase_is_not_assigned_to_the_user() {
        let clock = FixedClock::standard();
        let mut user = migo(&clock);

        user.execute(
            UserCommand::MakePurchase(purchase(&[AccessPermission::Gpu], true)),
            &clock,
        )
        .unwrap();

        assert_eq!(user.version(), 2);
        assert!(!user.permissions.has(&[AccessPermission::Gpu]));
    }

    #[test]
    fn test_expire_permission_removes_flags() {
        // Arrange
        let clock = FixedClock::standard();
        let mut user = migo(&clock);
        user.execute(
            UserCommand::AssignPermission(AssignPermission {
                requested_access: vec![AccessPermission::Legal, AccessPermission::Chem],
            }),
            &clock,
        )
        .unwrap();

        // Act
        user.execute(
            UserCommand::ExpirePermission(ExpirePermission {
                expired_permissions: vec![AccessPermission::Legal],
            }),
            &clock,
        )
        .unwrap();

        // Assert
        assert_eq!(
            user.permissions.list(),
            vec![AccessPermission::Default, AccessPermission::Chem]
        );
    }

    #[test]
    fn test_request_create_group_is_internally_notifiable() {
        // Arrange
        let clock = FixedClock::standard();
        let mut user = migo(&clock);
        user.collect();

        // Act
        user.execute(
            UserCommand::RequestCreateGroup(RequestCreateGroup { name: "SVB".into() }),
            &clock,
        )
        .unwrap();

        // Assert
        let pending = user.collect();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].metadata.internally_notifiable);
        assert!(!pending[0].metadata.externally_notifiable);
        match &pending[0].kind {
            UserEventKind::CreateGroupRequested(request) => {
                assert_eq!(request.name, "SVB");
                assert_eq!(request.user_id, user.id());
                assert_eq!(user.groups, BTreeSet::from([request.group_id]));
            }
            other => panic!("expected CreateGroupRequested, got {other:?}"),
        }
    }

    #[test]
    fn test_requested_groups_survive_replay() {
        // Arrange
        let clock = FixedClock::standard();
        let mut user = migo(&clock);
        for name in ["SVB", "Acme"] {
            user.execute(
                UserCommand::RequestCreateGroup(RequestCreateGroup { name: name.into() }),
                &clock,
            )
            .unwrap();
        }
        let log = user.collect();

        // Act
        let replayed = aggregate::replay::<User, _>(log).unwrap().unwrap();

        // Assert
        assert_eq!(replayed.groups.len(), 2);
        assert_eq!(replayed.groups, user.groups);
    }

    #[test]
    fn test_user_replay_rebuilds_the_same_state() {
        // Arrange
        let clock = FixedClock::standard();
        let mut user = migo(&clock);
        user.execute(
            UserCommand::MakePurchase(purchase(
                &[AccessPermission::Patent, AccessPermission::Pdf],
                false,
            )),
            &clock,
        )
        .unwrap();
        let log = user.collect();

        // Act
        let replayed = aggregate::replay::<User, _>(log).unwrap().unwrap();

        // Assert
        assert_eq!(replayed.version(), user.version());
        assert_eq!(replayed.permissions, user.permissions);
        assert_eq!(replayed.root().pending().count(), 0);
    }

    #[test]
    fn test_create_group_adds_default_and_owner_roles() {
        let clock = FixedClock::standard();

        let group = svb(&clock);

        assert_eq!(group.version(), 1);
        assert_eq!(group.group_permissions.bits(), 1);
        let names: Vec<&str> = group.roles.keys().map(String::as_str).collect();
        assert_eq!(names, vec![DEFAULT_ROLE, OWNER_ROLE]);
        let owner = group.role(OWNER_ROLE).unwrap();
        assert_eq!(owner.group_id, group.id());
        assert_eq!(owner.group_permissions.bits(), 0);
    }

    #[test]
    fn test_role_ids_are_stable_across_replay() {
        // Arrange
        let clock = FixedClock::standard();
        let mut group = svb(&clock);
        let owner_id = group.role(OWNER_ROLE).unwrap().id;

        // Act
        let replayed = aggregate::replay::<Group, _>(group.collect()).unwrap().unwrap();

        // Assert
        assert_eq!(replayed.role(OWNER_ROLE).unwrap().id, owner_id);
    }

    #[test]
    fn test_group_rejects_individual_purchase() {
        // Arrange
        let clock = FixedClock::standard();
        let mut group = svb(&clock);

        // Act
        let result = group.execute(
            GroupCommand::MakePurchase(purchase(&[AccessPermission::Academic], false)),
            &clock,
        );

        // Assert
        assert!(matches!(result, Err(DomainError::InvalidOperation(_))));
        assert_eq!(group.version(), 1);
    }

    #[test]
    fn test_group_purchase_grants_group_access() {
        let clock = FixedClock::standard();
        let mut group = svb(&clock);

        group
            .execute(
                GroupCommand::MakePurchase(purchase(&[AccessPermission::GpuForDoc], true)),
                &clock,
            )
            .unwrap();

        assert_eq!(group.version(), 3);
        assert!(group.permissions.has(&[AccessPermission::GpuForDoc]));
    }

    #[test]
    fn test_create_group_role_unions_flags_and_ignores_duplicates() {
        // Arrange
        let clock = FixedClock::standard();
        let mut group = svb(&clock);
        let editor = || {
            GroupCommand::CreateGroupRole(CreateGroupRole {
                role_name: "editor".into(),
                group_permissions: vec![GroupPermission::AddUser, GroupPermission::RemoveUser],
            })
        };

        // Act
        group.execute(editor(), &clock).unwrap();
        group
            .execute(
                GroupCommand::CreateGroupRole(CreateGroupRole {
                    role_name: "editor".into(),
                    group_permissions: vec![GroupPermission::Admin],
                }),
                &clock,
            )
            .unwrap();

        // Assert
        assert_eq!(group.version(), 3);
        assert_eq!(group.roles.len(), 3);
        assert_eq!(group.role("editor").unwrap().group_permissions.bits(), 2 + 4);
    }
}
