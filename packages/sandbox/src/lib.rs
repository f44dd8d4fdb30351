// ABOUTME: Ephemeral sandbox integration for generated code previews
// ABOUTME: Provider traits, the E2B client, reuse-or-create policy and keep-alive maintenance

pub mod maintenance;
pub mod manager;
pub mod providers;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use maintenance::{MaintenanceConfig, MaintenanceSweeper, SweepReport};
pub use manager::{ManagerError, SandboxManager, SandboxManagerConfig, SandboxResolution};
pub use providers::{
    CommandResult, E2BProvider, OutputChunk, ProviderError, SandboxHandle, SandboxProvider,
    StreamType,
};
