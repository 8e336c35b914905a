//! OS 種別

use crate::error::FleetError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// パッケージ管理の系統
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsFamily {
    /// apt / dpkg
    Debian,
    /// yum / rpm
    RedHat,
}

/// サポート対象の OS バージョン
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OsVersion {
    #[serde(rename = "Ubuntu 14")]
    Ubuntu14,
    #[serde(rename = "Ubuntu 16")]
    Ubuntu16,
    #[serde(rename = "CentOS 6")]
    CentOS6,
    #[serde(rename = "CentOS 7")]
    CentOS7,
    #[serde(rename = "RHEL 7")]
    Rhel7,
    #[serde(rename = "Debian 8")]
    Debian8,
    #[serde(rename = "Debian 9")]
    Debian9,
}

impl OsVersion {
    pub const ALL: [OsVersion; 7] = [
        OsVersion::Ubuntu14,
        OsVersion::Ubuntu16,
        OsVersion::CentOS6,
        OsVersion::CentOS7,
        OsVersion::Rhel7,
        OsVersion::Debian8,
        OsVersion::Debian9,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ubuntu14 => "Ubuntu 14",
            Self::Ubuntu16 => "Ubuntu 16",
            Self::CentOS6 => "CentOS 6",
            Self::CentOS7 => "CentOS 7",
            Self::Rhel7 => "RHEL 7",
            Self::Debian8 => "Debian 8",
            Self::Debian9 => "Debian 9",
        }
    }

    pub fn family(&self) -> OsFamily {
        match self {
            Self::Ubuntu14 | Self::Ubuntu16 | Self::Debian8 | Self::Debian9 => OsFamily::Debian,
            Self::CentOS6 | Self::CentOS7 | Self::Rhel7 => OsFamily::RedHat,
        }
    }

    /// コンテナ内の init が chroot 経由のサービス制御を横取りする OS
    ///
    /// これらの OS ではコンテナ内コマンドをコンソールログイン経由で実行する。
    pub fn uses_console_login(&self) -> bool {
        matches!(self, Self::CentOS7 | Self::Rhel7)
    }

    /// `/etc/*release` の内容から OS を判定する
    pub fn from_release_text(text: &str) -> Option<Self> {
        if text.contains("Ubuntu") {
            if text.contains("14.04") {
                return Some(Self::Ubuntu14);
            }
            if text.contains("16.04") {
                return Some(Self::Ubuntu16);
            }
        } else if text.contains("CentOS") {
            if text.contains("release 6.") {
                return Some(Self::CentOS6);
            }
            if text.contains("release 7.") {
                return Some(Self::CentOS7);
            }
        } else if text.contains("Red Hat Enterprise Linux") {
            if text.contains("7.") {
                return Some(Self::Rhel7);
            }
        } else if text.contains("Debian") {
            if text.contains("(jessie)") {
                return Some(Self::Debian8);
            }
            if text.contains("(stretch)") {
                return Some(Self::Debian9);
            }
        }
        None
    }
}

impl fmt::Display for OsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OsVersion {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim();
        Self::ALL
            .into_iter()
            .find(|os| os.as_str().eq_ignore_ascii_case(normalized))
            .ok_or_else(|| FleetError::InvalidConfig(format!("未対応の OS です: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        for os in OsVersion::ALL {
            assert_eq!(os.as_str().parse::<OsVersion>().unwrap(), os);
        }
        assert_eq!("centos 7".parse::<OsVersion>().unwrap(), OsVersion::CentOS7);
        assert!("Windows 10".parse::<OsVersion>().is_err());
    }

    #[test]
    fn test_from_release_text() {
        let ubuntu = "DISTRIB_ID=Ubuntu\nDISTRIB_RELEASE=16.04\n";
        assert_eq!(
            OsVersion::from_release_text(ubuntu),
            Some(OsVersion::Ubuntu16)
        );

        let centos = "CentOS Linux release 7.4.1708 (Core)";
        assert_eq!(
            OsVersion::from_release_text(centos),
            Some(OsVersion::CentOS7)
        );

        let rhel = "Red Hat Enterprise Linux Server release 7.5 (Maipo)";
        assert_eq!(OsVersion::from_release_text(rhel), Some(OsVersion::Rhel7));

        let debian = "PRETTY_NAME=\"Debian GNU/Linux 9 (stretch)\"";
        assert_eq!(
            OsVersion::from_release_text(debian),
            Some(OsVersion::Debian9)
        );

        assert_eq!(OsVersion::from_release_text("Arch Linux"), None);
        assert_eq!(OsVersion::from_release_text("Ubuntu 18.04"), None);
    }

    #[test]
    fn test_family() {
        assert_eq!(OsVersion::Debian8.family(), OsFamily::Debian);
        assert_eq!(OsVersion::CentOS6.family(), OsFamily::RedHat);
        assert!(OsVersion::Rhel7.uses_console_login());
        assert!(!OsVersion::CentOS6.uses_console_login());
        assert!(!OsVersion::Ubuntu16.uses_console_login());
    }

    #[test]
    fn test_serde_uses_display_names() {
        let json = serde_json::to_string(&OsVersion::Rhel7).unwrap();
        assert_eq!(json, "\"RHEL 7\"");
        let back: OsVersion = serde_json::from_str("\"Ubuntu 14\"").unwrap();
        assert_eq!(back, OsVersion::Ubuntu14);
    }
}
