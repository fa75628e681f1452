//! Mount configuration.
//!
//! A mount is described either by a [`MountOptions`] value or by a
//! parameter string of `key=value` pairs (`packages=…;type=system`), the
//! form an embedding host passes through its mount command.

use std::path::PathBuf;

use packagefs_shared::control::MountType;
use packagefs_shared::{PackageFsError, PackageFsResult};

/// Which shine-through layout to apply; defaults are derived from the
/// mount type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShineThrough {
    System,
    Home,
    None,
}

/// Options for mounting a volume.
#[derive(Debug, Clone)]
pub struct MountOptions {
    /// The packages directory to serve. Required.
    pub packages_directory: PathBuf,
    /// Volume name; derived from the mount type when unset.
    pub volume_name: Option<String>,
    pub mount_type: MountType,
    /// Shine-through selection; derived from the mount type when unset.
    pub shine_through: Option<ShineThrough>,
    /// Name of an archived packages state to mount instead of the live one.
    pub packages_state: Option<String>,
    /// Directory the volume is mounted over; defaults to the parent of the
    /// packages directory. Shine-through directories and the installation
    /// root are resolved against it.
    pub mount_point: Option<PathBuf>,
    /// Device id the host assigned to this volume.
    pub volume_id: u64,
}

impl MountOptions {
    pub fn new(packages_directory: impl Into<PathBuf>) -> Self {
        Self {
            packages_directory: packages_directory.into(),
            volume_name: None,
            mount_type: MountType::Custom,
            shine_through: None,
            packages_state: None,
            mount_point: None,
            volume_id: 0,
        }
    }

    /// Parse a mount parameter string. Recognized keys: `packages`,
    /// `volume-name`, `type`, `shine-through`, `state`. Unknown keys are
    /// ignored.
    pub fn parse(parameters: &str) -> PackageFsResult<Self> {
        let mut packages: Option<String> = None;
        let mut volume_name: Option<String> = None;
        let mut mount_type = MountType::Custom;
        let mut shine_through: Option<ShineThrough> = None;
        let mut packages_state: Option<String> = None;

        for token in parameters
            .split(|c: char| c == ';' || c.is_whitespace())
            .filter(|token| !token.is_empty())
        {
            let Some((key, value)) = token.split_once('=') else {
                return Err(PackageFsError::bad_value(format!(
                    "malformed mount parameter: {token}"
                )));
            };

            match key {
                "packages" => packages = Some(value.to_owned()),
                "volume-name" => volume_name = Some(value.to_owned()),
                "type" => {
                    mount_type = match value {
                        "system" => MountType::System,
                        "home" => MountType::Home,
                        "custom" => MountType::Custom,
                        other => {
                            return Err(PackageFsError::bad_value(format!(
                                "invalid mount type: {other}"
                            )));
                        }
                    };
                }
                "shine-through" => {
                    shine_through = Some(match value {
                        "system" => ShineThrough::System,
                        "home" => ShineThrough::Home,
                        "none" => ShineThrough::None,
                        other => {
                            return Err(PackageFsError::bad_value(format!(
                                "invalid shine-through setting: {other}"
                            )));
                        }
                    });
                }
                "state" => packages_state = Some(value.to_owned()),
                _ => {}
            }
        }

        let packages = packages
            .filter(|path| !path.is_empty())
            .ok_or_else(|| PackageFsError::bad_value("missing 'packages' mount parameter"))?;

        Ok(Self {
            packages_directory: PathBuf::from(packages),
            volume_name,
            mount_type,
            shine_through,
            packages_state,
            mount_point: None,
            volume_id: 0,
        })
    }

    /// The effective volume name.
    pub fn effective_volume_name(&self) -> String {
        match &self.volume_name {
            Some(name) => name.clone(),
            None => match self.mount_type {
                MountType::System => "system".to_owned(),
                MountType::Home => "config".to_owned(),
                MountType::Custom => "Package FS".to_owned(),
            },
        }
    }

    /// The effective shine-through selection.
    pub fn effective_shine_through(&self) -> ShineThrough {
        match self.shine_through {
            Some(setting) => setting,
            None => match self.mount_type {
                MountType::System => ShineThrough::System,
                MountType::Home => ShineThrough::Home,
                MountType::Custom => ShineThrough::None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let options = MountOptions::parse(
            "packages=/sys/packages;volume-name=sys;type=system;shine-through=none;state=state_1",
        )
        .unwrap();
        assert_eq!(options.packages_directory, PathBuf::from("/sys/packages"));
        assert_eq!(options.volume_name.as_deref(), Some("sys"));
        assert_eq!(options.mount_type, MountType::System);
        assert_eq!(options.shine_through, Some(ShineThrough::None));
        assert_eq!(options.packages_state.as_deref(), Some("state_1"));
    }

    #[test]
    fn test_packages_is_required() {
        assert!(MountOptions::parse("type=system").is_err());
        assert!(MountOptions::parse("packages=;type=system").is_err());
    }

    #[test]
    fn test_defaults_follow_mount_type() {
        let options = MountOptions::parse("packages=/p;type=system").unwrap();
        assert_eq!(options.effective_volume_name(), "system");
        assert_eq!(options.effective_shine_through(), ShineThrough::System);

        let options = MountOptions::parse("packages=/p;type=home").unwrap();
        assert_eq!(options.effective_volume_name(), "config");

        let options = MountOptions::parse("packages=/p").unwrap();
        assert_eq!(options.effective_volume_name(), "Package FS");
        assert_eq!(options.effective_shine_through(), ShineThrough::None);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(MountOptions::parse("packages=/p;type=weird").is_err());
        assert!(MountOptions::parse("packages=/p;shine-through=all").is_err());
        assert!(MountOptions::parse("packages=/p;bogus").is_err());
    }
}
