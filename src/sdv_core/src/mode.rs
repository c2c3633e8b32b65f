//! Application modes and the service profile each mode selects.

use sdv_runtime::LoadPolicy;

/// Declared role of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    Standalone,
    External,
    Isolated,
    Main,
    Essential,
    Maintenance,
}

impl AppMode {
    pub fn parse(text: &str) -> Option<AppMode> {
        match text {
            "Standalone" => Some(AppMode::Standalone),
            "External" => Some(AppMode::External),
            "Isolated" => Some(AppMode::Isolated),
            "Main" => Some(AppMode::Main),
            "Essential" => Some(AppMode::Essential),
            "Maintenance" => Some(AppMode::Maintenance),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppMode::Standalone => "Standalone",
            AppMode::External => "External",
            AppMode::Isolated => "Isolated",
            AppMode::Main => "Main",
            AppMode::Essential => "Essential",
            AppMode::Maintenance => "Maintenance",
        }
    }

    /// The fixed role matrix.
    pub fn profile(self) -> ModeProfile {
        match self {
            AppMode::Standalone => ModeProfile {
                load_manifests: false,
                rpc_client: false,
                rpc_server: false,
                load_policy: LoadPolicy::Unrestricted,
            },
            AppMode::External => ModeProfile {
                load_manifests: false,
                rpc_client: true,
                rpc_server: false,
                load_policy: LoadPolicy::Unrestricted,
            },
            AppMode::Isolated => ModeProfile {
                load_manifests: true,
                rpc_client: true,
                rpc_server: false,
                // One context module on top of the platform services.
                load_policy: LoadPolicy::Limited(1),
            },
            AppMode::Main => ModeProfile {
                load_manifests: true,
                rpc_client: true,
                rpc_server: true,
                load_policy: LoadPolicy::Unrestricted,
            },
            AppMode::Essential => ModeProfile {
                load_manifests: false,
                rpc_client: false,
                rpc_server: false,
                load_policy: LoadPolicy::Unrestricted,
            },
            AppMode::Maintenance => ModeProfile {
                load_manifests: false,
                rpc_client: true,
                rpc_server: false,
                load_policy: LoadPolicy::Forbidden,
            },
        }
    }

    /// Only main-mode processes take the host-wide instance lock.
    pub fn takes_instance_lock(self) -> bool {
        self == AppMode::Main
    }

    /// Main and isolated applications listen for external shutdown
    /// requests.
    pub fn listens_for_shutdown_requests(self) -> bool {
        matches!(self, AppMode::Main | AppMode::Isolated)
    }
}

/// Services and permissions a mode selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeProfile {
    /// Consult the installation manifests during class lookup.
    pub load_manifests: bool,
    /// Assume the RPC client role (the RPC layer itself is an external
    /// collaborator).
    pub rpc_client: bool,
    /// Assume the RPC server role.
    pub rpc_server: bool,
    /// Module loading restriction applied after startup.
    pub load_policy: LoadPolicy,
}

/// Verbosity of console reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsoleReport {
    Silent,
    #[default]
    Normal,
    Verbose,
}

impl ConsoleReport {
    pub fn parse(text: &str) -> Option<ConsoleReport> {
        match text {
            "Silent" => Some(ConsoleReport::Silent),
            "Normal" => Some(ConsoleReport::Normal),
            "Verbose" => Some(ConsoleReport::Verbose),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parsing_round_trips() {
        for mode in [
            AppMode::Standalone,
            AppMode::External,
            AppMode::Isolated,
            AppMode::Main,
            AppMode::Essential,
            AppMode::Maintenance,
        ] {
            assert_eq!(AppMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(AppMode::parse("Sideways"), None);
    }

    #[test]
    fn role_matrix() {
        assert!(!AppMode::Standalone.profile().rpc_client);
        assert!(AppMode::External.profile().rpc_client);
        assert!(!AppMode::External.profile().rpc_server);
        assert!(AppMode::Isolated.profile().load_manifests);
        assert_eq!(
            AppMode::Isolated.profile().load_policy,
            LoadPolicy::Limited(1)
        );
        let main = AppMode::Main.profile();
        assert!(main.load_manifests && main.rpc_client && main.rpc_server);
        assert_eq!(
            AppMode::Maintenance.profile().load_policy,
            LoadPolicy::Forbidden
        );
        assert!(AppMode::Main.takes_instance_lock());
        assert!(!AppMode::Isolated.takes_instance_lock());
    }
}
