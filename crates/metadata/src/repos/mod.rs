//! Repository traits for metadata operations.

pub mod api_keys;
pub mod gc;
pub mod manifests;
pub mod registries;
pub mod repositories;
pub mod users;

pub use api_keys::{AddApiKeyArgs, AddApiKeyScope, ApiKeyRepo};
pub use gc::GcRepo;
pub use manifests::{ManifestIndexRepo, UpsertManifestIndexArgs};
pub use registries::{AddRegistryWithKeyArgs, RegistryRepo};
pub use repositories::RepositoryRepo;
pub use users::UserRepo;
