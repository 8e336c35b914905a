//! ノードに導入されるコンポーネント

use serde::{Deserialize, Serialize};
use std::fmt;

/// コンポーネントタグ
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Component {
    /// プロダクト本体（インストーラ完了済み）
    Product,
    OxAuth,
    OxTrust,
    OpenLdap,
    OpenDj,
    Shibboleth,
    OxAuthRp,
    Asimba,
    Passport,
    /// ファイル同期グループに参加済み
    FileSync,
    /// プロキシ層
    Proxy,
}

impl Component {
    /// マーカーパスで検出できるコンポーネント
    pub const DETECTABLE: [Component; 9] = [
        Component::Product,
        Component::OxAuth,
        Component::OxTrust,
        Component::OpenLdap,
        Component::OpenDj,
        Component::Shibboleth,
        Component::OxAuthRp,
        Component::Asimba,
        Component::Passport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::OxAuth => "oxauth",
            Self::OxTrust => "oxtrust",
            Self::OpenLdap => "openldap",
            Self::OpenDj => "opendj",
            Self::Shibboleth => "shibboleth",
            Self::OxAuthRp => "oxauth-rp",
            Self::Asimba => "asimba",
            Self::Passport => "passport",
            Self::FileSync => "file-sync",
            Self::Proxy => "proxy",
        }
    }

    /// コンテナルートからの相対マーカーパス
    pub fn marker_path(&self) -> Option<&'static str> {
        match self {
            Self::Product => Some("install/community-edition-setup/setup.properties.last"),
            Self::OxAuth => Some("opt/gluu/jetty/oxauth"),
            Self::OxTrust => Some("opt/gluu/jetty/identity"),
            Self::OpenLdap => Some("opt/symas/etc/openldap"),
            Self::OpenDj => Some("opt/opendj"),
            Self::Shibboleth => Some("opt/shibboleth-idp"),
            Self::OxAuthRp => Some("opt/gluu/jetty/oxauth-rp"),
            Self::Asimba => Some("opt/gluu/jetty/asimba"),
            Self::Passport => Some("opt/gluu/node/passport"),
            Self::FileSync | Self::Proxy => None,
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detectable_components_have_markers() {
        for c in Component::DETECTABLE {
            assert!(c.marker_path().is_some(), "{} has no marker", c);
        }
        assert!(Component::FileSync.marker_path().is_none());
    }
}
