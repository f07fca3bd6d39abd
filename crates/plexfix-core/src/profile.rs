use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

pub const DEFAULT_SERVICE_UNIT: &str = "plexmediaserver";
pub const DEFAULT_CONTAINER_NAME: &str = "plex";
pub const OFFICIAL_IMAGES: &[&str] = &["plexinc/pms-docker"];
pub const COMMUNITY_IMAGES: &[&str] = &["lscr.io/linuxserver/plex", "linuxserver/plex"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ContainerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The four entries of the startup menu, before any identifier is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileKind {
    BareMetal,
    Official,
    Community,
    Custom,
}

impl ProfileKind {
    pub const ALL: [Self; 4] = [Self::BareMetal, Self::Official, Self::Community, Self::Custom];

    #[must_use]
    pub fn menu_label(self) -> &'static str {
        match self {
            Self::BareMetal => "Bare-metal install (systemd/SysV service)",
            Self::Official => "Official container (plexinc/pms-docker)",
            Self::Community => "Community container (linuxserver/plex)",
            Self::Custom => "Custom install (container or bare-metal)",
        }
    }

    /// Images scanned when guessing the container identifier.
    #[must_use]
    pub fn images(self) -> &'static [&'static str] {
        match self {
            Self::Official => OFFICIAL_IMAGES,
            Self::Community => COMMUNITY_IMAGES,
            Self::BareMetal | Self::Custom => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomTarget {
    Container(ContainerId),
    Bare { unit: String },
}

/// Deployment topology, chosen once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Profile {
    BareMetal { unit: String },
    Official { container: ContainerId },
    Community { container: ContainerId },
    Custom(CustomTarget),
}

/// What the service controller acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceTarget<'a> {
    Unit(&'a str),
    Container(&'a ContainerId),
}

impl Display for ServiceTarget<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unit(unit) => write!(f, "service {unit}"),
            Self::Container(container) => write!(f, "container {container}"),
        }
    }
}

/// Which UID/GID convention governs ownership of the config tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStrategy {
    HostOwner,
    CommunityEnv,
    OfficialEnv,
}

impl Profile {
    #[must_use]
    pub fn kind(&self) -> ProfileKind {
        match self {
            Self::BareMetal { .. } => ProfileKind::BareMetal,
            Self::Official { .. } => ProfileKind::Official,
            Self::Community { .. } => ProfileKind::Community,
            Self::Custom(_) => ProfileKind::Custom,
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::BareMetal { .. } => "bare-metal",
            Self::Official { .. } => "official-container",
            Self::Community { .. } => "community-container",
            Self::Custom(CustomTarget::Container(_)) => "custom-container",
            Self::Custom(CustomTarget::Bare { .. }) => "custom-bare-metal",
        }
    }

    #[must_use]
    pub fn service_target(&self) -> ServiceTarget<'_> {
        match self {
            Self::BareMetal { unit } | Self::Custom(CustomTarget::Bare { unit }) => {
                ServiceTarget::Unit(unit)
            }
            Self::Official { container }
            | Self::Community { container }
            | Self::Custom(CustomTarget::Container(container)) => {
                ServiceTarget::Container(container)
            }
        }
    }

    #[must_use]
    pub fn container(&self) -> Option<&ContainerId> {
        match self.service_target() {
            ServiceTarget::Container(container) => Some(container),
            ServiceTarget::Unit(_) => None,
        }
    }

    #[must_use]
    pub fn permission_strategy(&self) -> PermissionStrategy {
        match self {
            Self::BareMetal { .. } | Self::Custom(CustomTarget::Bare { .. }) => {
                PermissionStrategy::HostOwner
            }
            Self::Community { .. } => PermissionStrategy::CommunityEnv,
            Self::Official { .. } | Self::Custom(CustomTarget::Container(_)) => {
                PermissionStrategy::OfficialEnv
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionSource {
    Detected,
    Fallback,
}

/// A value produced by best-effort detection, tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detected<T> {
    pub value: T,
    pub source: DetectionSource,
}

impl<T> Detected<T> {
    #[must_use]
    pub fn detected(value: T) -> Self {
        Self { value, source: DetectionSource::Detected }
    }

    #[must_use]
    pub fn fallback(value: T) -> Self {
        Self { value, source: DetectionSource::Fallback }
    }

    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.source == DetectionSource::Fallback
    }
}
