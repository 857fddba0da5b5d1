//! Operation errors and their exit-code mapping.
//!
//! Every component returns a structured error; this umbrella preserves the
//! kind and translates it to the CLI contract: 1 for user errors, 2 for
//! system errors. Stack traces never cross the CLI boundary.

use thiserror::Error;

use crate::core::builder::BuildError;
use crate::core::catalog::CatalogError;
use crate::core::detect::DetectError;
use crate::core::recipe::RecipeError;
use crate::core::resolver::ResolveError;
use crate::core::sandbox::SandboxError;
use crate::io::cache::CacheError;
use crate::io::fetch::FetchError;
use crate::paths::LayoutError;
use crate::registry::forge::ForgeError;
use crate::registry::system::SystemPmError;
use crate::store::db::DbError;
use crate::store::generations::ProfileError;
use crate::store::lock::LockError;
use crate::store::state::StateError;
use crate::store::StoreError;

pub const EXIT_USER: i32 = 1;
pub const EXIT_SYSTEM: i32 = 2;

#[derive(Error, Debug)]
pub enum OpError {
    #[error("invalid package spec {0:?}")]
    BadSpec(String),

    #[error("package {0:?} not found: no system package, recipe, or matching repo")]
    NotFound(String),

    #[error("package {0:?} is not installed")]
    NotInstalled(String),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Recipe(#[from] RecipeError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Forge(#[from] ForgeError),

    #[error(transparent)]
    SystemPm(#[from] SystemPmError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OpError {
    /// CLI exit code: 1 when the user can fix it, 2 when the system failed.
    pub fn exit_code(&self) -> i32 {
        match self {
            OpError::BadSpec(_)
            | OpError::NotFound(_)
            | OpError::NotInstalled(_)
            | OpError::Catalog(CatalogError::InvalidName(_))
            | OpError::Catalog(CatalogError::Recipe(_))
            | OpError::Recipe(_)
            | OpError::Resolve(_)
            | OpError::Db(DbError::RepoExists(_))
            | OpError::Db(DbError::RepoMissing(_))
            | OpError::Profile(ProfileError::NoPreviousGeneration)
            | OpError::State(StateError::Parse { .. }) => EXIT_USER,

            OpError::Build(BuildError::Detect(DetectError::NoBuildSystem(_)))
            | OpError::Build(BuildError::Sandbox(SandboxError::BuildFailed { .. }))
            | OpError::Build(BuildError::Sandbox(SandboxError::BuildTimeout { .. })) => EXIT_USER,

            OpError::Catalog(CatalogError::Db(DbError::RepoExists(_)))
            | OpError::Catalog(CatalogError::Db(DbError::RepoMissing(_))) => EXIT_USER,

            _ => EXIT_SYSTEM,
        }
    }
}
