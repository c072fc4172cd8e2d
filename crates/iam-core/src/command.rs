//! Command abstractions.

/// Trait that all bus-level commands implement.
pub trait Command: Send + Sync + std::fmt::Debug + 'static {
    /// The type name for this command, used for handler routing and logging.
    fn command_type(&self) -> &'static str;
}
