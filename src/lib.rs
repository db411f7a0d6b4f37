// src/lib.rs - Threshold secret backup: sharing, distribution and recovery

pub mod config;
pub mod distribution;
pub mod error;
pub mod group;
pub mod messaging;
pub mod metrics;
pub mod recovery;
pub mod service;
pub mod share;
pub mod sharing;
pub mod storage;

// Re-export commonly used items for convenience
pub use config::Config;
pub use distribution::{DistributionRecord, DistributionStatus, ShareDistributor};
pub use error::{KeeperError, Result};
pub use group::{BackupGroup, KeyHolder};
pub use messaging::{MemoryRelayNetwork, Messenger};
pub use metrics::Metrics;
pub use recovery::{
    InboundHandler, RecoveryCoordinator, RecoveryRequest, RecoveryResponse, RecoveryStatus,
    RecoveryStatusView, ResponseStatus,
};
pub use service::{BackupReceipt, VaultService};
pub use share::{Share, ShareMetadata};
pub use sharing::{SecretSharingEngine, ShareCount, SplitConfig, Threshold};
pub use storage::{create_storage, FileStorage, MemoryStorage, Storage};

/// Sharekeeper version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get build information
pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: VERSION,
        cli: cfg!(feature = "cli"),
        git_sha: option_env!("VERGEN_GIT_SHA").unwrap_or("unknown"),
        rust_version: option_env!("VERGEN_RUSTC_SEMVER").unwrap_or("unknown"),
    }
}

/// Build information structure
#[derive(Debug, Clone)]
pub struct BuildInfo {
    pub version: &'static str,
    pub cli: bool,
    pub git_sha: &'static str,
    pub rust_version: &'static str,
}

impl std::fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Sharekeeper v{} ({})\nCLI: {}\nBuilt with Rust {}",
            self.version, self.git_sha, self.cli, self.rust_version
        )
    }
}

/// Prelude module for common imports
pub mod prelude {
    pub use crate::{
        BackupGroup, Config, KeeperError, KeyHolder, Messenger, RecoveryStatus, Result, Share,
        SecretSharingEngine, Storage, VaultService,
    };
}
