//! Permission flags and the bitmask that holds them.

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use iam_core::error::DomainError;
use iam_core::transcoder::{FromValue, Value};
use serde::{Deserialize, Serialize};

/// A single-bit permission flag.
pub trait Flag: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// Every flag in declaration order.
    const ALL: &'static [Self];
    /// The flag a fresh holder starts with.
    const DEFAULT: Self;

    /// Bit value of the flag.
    fn bits(self) -> i64;

    /// Canonical upper-case name.
    fn name(self) -> &'static str;
}

fn parse_flag<F: Flag>(text: &str) -> Result<F, DomainError> {
    let wanted = text.trim().replace('-', "_").to_ascii_uppercase();
    F::ALL
        .iter()
        .copied()
        .find(|flag| flag.name() == wanted)
        .ok_or_else(|| DomainError::Validation(format!("unknown permission `{text}`")))
}

/// Access to a translation domain or platform feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessPermission {
    Default,
    Patent,
    Elec,
    Claims,
    Legal,
    Chem,
    Contract,
    Academic,
    Statute,
    General,
    Docs,
    Pdf,
    Project,
    Gpu,
    GpuForDoc,
}

impl Flag for AccessPermission {
    const ALL: &'static [Self] = &[
        Self::Default,
        Self::Patent,
        Self::Elec,
        Self::Claims,
        Self::Legal,
        Self::Chem,
        Self::Contract,
        Self::Academic,
        Self::Statute,
        Self::General,
        Self::Docs,
        Self::Pdf,
        Self::Project,
        Self::Gpu,
        Self::GpuForDoc,
    ];
    const DEFAULT: Self = Self::Default;

    fn bits(self) -> i64 {
        match self {
            Self::Default => 0,
            Self::Patent => 1,
            Self::Elec => 2,
            Self::Claims => 4,
            Self::Legal => 8,
            Self::Chem => 16,
            Self::Contract => 32,
            Self::Academic => 64,
            Self::Statute => 128,
            Self::General => 256,
            Self::Docs => 512,
            Self::Pdf => 1024,
            Self::Project => 2048,
            Self::Gpu => 4096,
            Self::GpuForDoc => 8192,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Default => "DEFAULT",
            Self::Patent => "PATENT",
            Self::Elec => "ELEC",
            Self::Claims => "CLAIMS",
            Self::Legal => "LEGAL",
            Self::Chem => "CHEM",
            Self::Contract => "CONTRACT",
            Self::Academic => "ACADEMIC",
            Self::Statute => "STATUTE",
            Self::General => "GENERAL",
            Self::Docs => "DOCS",
            Self::Pdf => "PDF",
            Self::Project => "PROJECT",
            Self::Gpu => "GPU",
            Self::GpuForDoc => "GPU_FOR_DOC",
        }
    }
}

/// Management rights inside a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupPermission {
    Default,
    AddUser,
    RemoveUser,
    GrantAccessPermission,
    RevokeAccessPermission,
    Admin,
}

impl Flag for GroupPermission {
    const ALL: &'static [Self] = &[
        Self::Default,
        Self::AddUser,
        Self::RemoveUser,
        Self::GrantAccessPermission,
        Self::RevokeAccessPermission,
        Self::Admin,
    ];
    const DEFAULT: Self = Self::Default;

    fn bits(self) -> i64 {
        match self {
            Self::Default => 1,
            Self::AddUser => 2,
            Self::RemoveUser => 4,
            Self::GrantAccessPermission => 8,
            Self::RevokeAccessPermission => 16,
            Self::Admin => 32,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Default => "DEFAULT",
            Self::AddUser => "ADD_USER",
            Self::RemoveUser => "REMOVE_USER",
            Self::GrantAccessPermission => "GRANT_ACCESS_PERMISSION",
            Self::RevokeAccessPermission => "REVOKE_ACCESS_PERMISSION",
            Self::Admin => "ADMIN",
        }
    }
}

macro_rules! flag_conversions {
    ($flag:ty) => {
        impl FromStr for $flag {
            type Err = DomainError;

            fn from_str(text: &str) -> Result<Self, Self::Err> {
                parse_flag(text)
            }
        }

        impl fmt::Display for $flag {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl From<$flag> for Value {
            fn from(flag: $flag) -> Self {
                Value::String(flag.name().to_owned())
            }
        }

        impl FromValue for $flag {
            fn from_value(value: Value) -> Result<Self, DomainError> {
                let name = String::from_value(value)?;
                parse_flag(&name).map_err(|e| DomainError::Transcoding(e.to_string()))
            }
        }
    };
}

flag_conversions!(AccessPermission);
flag_conversions!(GroupPermission);

/// A set of flags stored as a bitmask.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Permissions<F> {
    bits: i64,
    flag: PhantomData<F>,
}

impl<F: Flag> Permissions<F> {
    /// Wraps a raw bitmask.
    #[must_use]
    pub fn from_bits(bits: i64) -> Self {
        Self {
            bits,
            flag: PhantomData,
        }
    }

    /// The union of `flags`.
    #[must_use]
    pub fn from_flags(flags: &[F]) -> Self {
        let mut permissions = Self::from_bits(0);
        permissions.add(flags);
        permissions
    }

    /// The raw bitmask.
    #[must_use]
    pub fn bits(self) -> i64 {
        self.bits
    }

    /// Sets every flag not yet held.
    pub fn add(&mut self, flags: &[F]) {
        for &flag in flags {
            if !self.has(&[flag]) {
                self.bits |= flag.bits();
            }
        }
    }

    /// Clears every flag currently held.
    pub fn remove(&mut self, flags: &[F]) {
        for &flag in flags {
            if self.has(&[flag]) {
                self.bits &= !flag.bits();
            }
        }
    }

    /// `true` only if every flag in `flags` is held.
    #[must_use]
    pub fn has(self, flags: &[F]) -> bool {
        flags
            .iter()
            .all(|flag| self.bits & flag.bits() == flag.bits())
    }

    /// Held flags in declaration order. A zero-valued flag is always held.
    #[must_use]
    pub fn list(self) -> Vec<F> {
        F::ALL.iter().copied().filter(|flag| self.has(&[*flag])).collect()
    }
}

impl<F: Flag> Default for Permissions<F> {
    fn default() -> Self {
        Self::from_bits(F::DEFAULT.bits())
    }
}

impl<F: Flag> fmt::Debug for Permissions<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.list()).finish()
    }
}

impl<F: Flag> From<Permissions<F>> for Value {
    fn from(permissions: Permissions<F>) -> Self {
        Value::Int(permissions.bits)
    }
}

impl<F: Flag> FromValue for Permissions<F> {
    fn from_value(value: Value) -> Result<Self, DomainError> {
        i64::from_value(value).map(Self::from_bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_access_is_zero_and_always_held() {
        let permissions = Permissions::<AccessPermission>::default();

        assert_eq!(permissions.bits(), 0);
        assert!(permissions.has(&[AccessPermission::Default]));
        assert_eq!(permissions.list(), vec![AccessPermission::Default]);
    }

    #[test]
    fn test_default_group_permission_is_one() {
        let permissions = Permissions::<GroupPermission>::default();

        assert_eq!(permissions.bits(), 1);
        assert!(!permissions.has(&[GroupPermission::Admin]));
    }

    #[test]
    fn test_add_is_idempotent() {
        // Arrange
        let mut permissions = Permissions::<AccessPermission>::default();

        // Act
        permissions.add(&[AccessPermission::Academic, AccessPermission::Academic]);
        permissions.add(&[AccessPermission::Academic, AccessPermission::Pdf]);

        // Assert
        assert_eq!(permissions.bits(), 64 + 1024);
        assert!(permissions.has(&[AccessPermission::Academic, AccessPermission::Pdf]));
    }

    #[test]
    fn test_has_requires_every_flag() {
        let permissions = Permissions::from_flags(&[AccessPermission::Legal]);

        assert!(permissions.has(&[AccessPermission::Legal]));
        assert!(!permissions.has(&[AccessPermission::Legal, AccessPermission::Chem]));
    }

    #[test]
    fn test_remove_only_clears_held_flags() {
        // Arrange
        let mut permissions =
            Permissions::from_flags(&[AccessPermission::Gpu, AccessPermission::Docs]);

        // Act
        permissions.remove(&[AccessPermission::Gpu, AccessPermission::Patent]);

        // Assert
        assert_eq!(permissions.bits(), 512);
    }

    #[test]
    fn test_list_follows_declaration_order() {
        let permissions =
            Permissions::from_flags(&[AccessPermission::GpuForDoc, AccessPermission::Patent]);

        assert_eq!(
            permissions.list(),
            vec![AccessPermission::Default, AccessPermission::Patent, AccessPermission::GpuForDoc]
        );
    }

    #[test]
    fn test_flags_parse_case_insensitively() {
        assert_eq!("academic".parse::<AccessPermission>().unwrap(), AccessPermission::Academic);
        assert_eq!("gpu-for-doc".parse::<AccessPermission>().unwrap(), AccessPermission::GpuForDoc);
        assert_eq!("ADD_USER".parse::<GroupPermission>().unwrap(), GroupPermission::AddUser);
        assert!(matches!(
            "root".parse::<AccessPermission>(),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn test_flag_values_convert_through_names() {
        let value = Value::from(AccessPermission::Statute);

        assert_eq!(value, Value::String("STATUTE".into()));
        assert_eq!(AccessPermission::from_value(value).unwrap(), AccessPermission::Statute);
    }
}
