//! Identity repositories on an open unit of work.

use iam_service::repository::Repository;
use iam_service::unit_of_work::OpenUnitOfWork;

use crate::domain::aggregates::{Group, User};

/// `users` and `groups` handles over the unit of work's shared event-store
/// proxy. Both feed the same backlogs.
pub trait IdentityRepositories {
    /// Repository for [`User`] aggregates.
    fn users(&mut self) -> Repository<'_, User>;

    /// Repository for [`Group`] aggregates.
    fn groups(&mut self) -> Repository<'_, Group>;
}

impl IdentityRepositories for OpenUnitOfWork<'_> {
    fn users(&mut self) -> Repository<'_, User> {
        self.repository::<User>()
    }

    fn groups(&mut self) -> Repository<'_, Group> {
        self.repository::<Group>()
    }
}
