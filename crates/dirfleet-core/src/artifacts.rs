//! ノードへ配布するテキスト設定の生成
//!
//! テンプレートの置換値はコアが決め、レンダリングは Tera に任せる。

use crate::error::{FleetError, Result};
use crate::model::Node;
use serde::Serialize;
use tera::{Context, Tera};

/// ピア設定ファイル（コンテナルートからの相対パス）
pub const PEER_PROPERTIES_PATH: &str = "etc/gluu/conf/ox-ldap.properties";

/// インストーラ入力ファイル（コンテナルートからの相対パス）
pub const SETUP_PROPERTIES_PATH: &str = "install/community-edition-setup/setup.properties";

/// インストーラ完了後に残るファイル
pub const SETUP_PROPERTIES_LAST_PATH: &str =
    "install/community-edition-setup/setup.properties.last";

/// 組み込みプロキシ設定テンプレート
pub const DEFAULT_PROXY_TEMPLATE: &str = r#"user www-data;
worker_processes auto;
pid /run/nginx.pid;

events {
    worker_connections 768;
}

http {
    upstream backend_id {
        ip_hash;
{% for backend in backends %}{{ backend }}
{% endfor %}    }

    upstream backend {
{% for backend in backends %}{{ backend }}
{% endfor %}    }

    server {
        listen 80;
        server_name {{ proxy_host }};
        return 301 https://$host$request_uri;
    }

    server {
        listen 443 ssl;
        server_name {{ proxy_host }};

        ssl_certificate /etc/nginx/ssl/httpd.crt;
        ssl_certificate_key /etc/nginx/ssl/httpd.key;

        location ~ ^(/)$ {
            proxy_pass https://backend;
        }

        location /oxauth {
            proxy_pass https://backend/oxauth;
        }

        location /identity {
            proxy_pass https://backend_id/identity;
        }

        location /idp {
            proxy_pass https://backend/idp;
        }

        location /passport {
            proxy_pass https://backend/passport;
        }
    }
}
"#;

/// 組み込みファイル同期グループテンプレート
pub const DEFAULT_SYNC_GROUP_TEMPLATE: &str = r#"group {{ group }}
{
{% for host in hosts %}  host {{ host }};
{% endfor %}
  key {{ key_path }};

{% for path in includes %}  include {{ path }};
{% endfor %}
{% for path in excludes %}  exclude {{ path }};
{% endfor %}
  action
  {
    logfile "/var/log/csync2_action.log";
    do-local;
  }

  backup-directory /var/backups/csync2;
  backup-generations 3;

  auto younger;
}
"#;

/// ピア設定の `servers:` 行を書き換える
///
/// 既存行はすべて置換し、無ければ末尾に追加する。その他の行は保持する。
pub fn rewrite_peer_properties(content: &str, endpoints: &[String]) -> String {
    let servers_line = format!("servers: {}", endpoints.join(","));
    let mut replaced = false;
    let mut lines: Vec<String> = content
        .lines()
        .map(|line| {
            if line.starts_with("servers:") {
                replaced = true;
                servers_line.clone()
            } else {
                line.to_string()
            }
        })
        .collect();
    if !replaced {
        lines.push(servers_line);
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// `key=value` 形式のプロパティ値を取り出す
pub fn property_value<'a>(content: &'a str, key: &str) -> Option<&'a str> {
    content.lines().find_map(|line| {
        let (k, v) = line.split_once('=')?;
        (k.trim() == key).then(|| v.trim())
    })
}

/// プロパティを差し替える（無ければ追加）
pub fn set_property(content: &str, key: &str, value: &str) -> String {
    let mut replaced = false;
    let mut lines: Vec<String> = content
        .lines()
        .map(|line| match line.split_once('=') {
            Some((k, _)) if k.trim() == key => {
                replaced = true;
                format!("{}={}", key, value)
            }
            _ => line.to_string(),
        })
        .collect();
    if !replaced {
        lines.push(format!("{}={}", key, value));
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// プライマリのインストーラ設定を対象ノード向けに書き換える
pub fn rewrite_setup_properties(content: &str, node: &Node) -> String {
    set_property(content, "ip", &node.ip)
}

/// プロキシのバックエンド行
pub fn proxy_backend_lines(backends: &[&Node]) -> Vec<String> {
    backends
        .iter()
        .map(|n| format!("  server {}:443 max_fails=2 fail_timeout=10s;", n.hostname))
        .collect()
}

#[derive(Serialize)]
struct ProxyValues<'a> {
    proxy_host: &'a str,
    backends: Vec<String>,
}

/// プロキシ設定を生成する
///
/// `template` が None の場合は組み込みテンプレートを使う。
pub fn render_proxy_config(
    template: Option<&str>,
    proxy_host: &str,
    backends: &[&Node],
) -> Result<String> {
    let values = ProxyValues {
        proxy_host,
        backends: proxy_backend_lines(backends),
    };
    render("proxy", template.unwrap_or(DEFAULT_PROXY_TEMPLATE), &values)
}

/// ファイル同期グループの設定値
#[derive(Debug, Clone, Serialize)]
pub struct SyncGroupSpec {
    pub group: String,
    pub hosts: Vec<String>,
    pub key_path: String,
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
}

impl SyncGroupSpec {
    pub fn new(group: impl Into<String>, members: &[&Node]) -> Self {
        Self {
            group: group.into(),
            hosts: members.iter().map(|n| n.hostname.clone()).collect(),
            key_path: "/etc/csync2.key".to_string(),
            includes: Vec::new(),
            excludes: Vec::new(),
        }
    }

    pub fn with_includes(mut self, includes: impl IntoIterator<Item = String>) -> Self {
        self.includes.extend(includes);
        self
    }

    pub fn with_excludes(mut self, excludes: impl IntoIterator<Item = String>) -> Self {
        self.excludes.extend(excludes);
        self
    }
}

/// ファイル同期グループ設定を生成する
pub fn render_sync_group(spec: &SyncGroupSpec) -> Result<String> {
    render("sync-group", DEFAULT_SYNC_GROUP_TEMPLATE, spec)
}

/// ホストエイリアス表へ `<ip> <hostname>` を非破壊的にマージする
///
/// 既存行は一切変更しない。ホスト名が既にどこかの行に登録されていれば追加しない。
pub fn merge_host_aliases(existing: &str, entries: &[(&str, &str)]) -> String {
    let mut out = existing.to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    for (ip, hostname) in entries {
        let present = out.lines().any(|line| {
            let line = line.split('#').next().unwrap_or_default();
            line.split_whitespace().skip(1).any(|name| name == *hostname)
        });
        if !present {
            out.push_str(&format!("{} {}\n", ip, hostname));
        }
    }
    out
}

/// ファイル同期で常に除外するパス
pub const SYNC_EXCLUDES: [&str; 3] = [
    "/etc/gluu/conf/ox-ldap.properties",
    "/etc/gluu/conf/oxTrustLogRotationConfiguration.xml",
    "/etc/gluu/conf/openldap/salt",
];

/// ファイル同期エージェントの待受ポート
pub const SYNC_PORT: u16 = 30865;

/// inetd の同期エージェント行
pub fn inetd_sync_line(hostname: &str) -> String {
    format!(
        "csync2\tstream\ttcp\tnowait\troot\t/usr/sbin/csync2\tcsync2 -i -N {}",
        hostname
    )
}

/// `inetd.conf` の同期エージェント行を差し替える（無ければ追加）
pub fn rewrite_inetd_conf(content: &str, hostname: &str) -> String {
    let line = inetd_sync_line(hostname);
    let mut replaced = false;
    let mut lines: Vec<String> = content
        .lines()
        .map(|l| {
            if l.starts_with("csync2") {
                replaced = true;
                line.clone()
            } else {
                l.to_string()
            }
        })
        .collect();
    if !replaced {
        lines.push(line);
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// xinetd の同期エージェント定義
pub fn xinetd_sync_entry(hostname: &str) -> String {
    format!(
        "service csync2\n\
         {{\n\
         flags           = REUSE\n\
         socket_type     = stream\n\
         wait            = no\n\
         user            = root\n\
         group           = root\n\
         server          = /usr/sbin/csync2\n\
         server_args     = -i -N {}\n\
         port            = {}\n\
         type            = UNLISTED\n\
         disable         = no\n\
         }}\n",
        hostname, SYNC_PORT
    )
}

/// 毎分同期する cron エントリ
pub fn sync_cron_entry(hostname: &str) -> String {
    format!(
        "* * * * *    root    /usr/sbin/csync2 -N {} -xv 2>/var/log/csync2.log\n",
        hostname
    )
}

/// 毎分時刻同期する cron エントリ
pub const TIME_SYNC_CRON_ENTRY: &str = "* * * * *    root    /usr/sbin/ntpdate -s time.nist.gov\n";

fn render<T: Serialize>(name: &str, template: &str, values: &T) -> Result<String> {
    let context = Context::from_serialize(values).map_err(|e| FleetError::Template {
        name: name.to_string(),
        message: e.to_string(),
    })?;
    Tera::one_off(template, &context, false).map_err(|e| FleetError::Template {
        name: name.to_string(),
        message: tera_error_detail(&e),
    })
}

fn tera_error_detail(e: &tera::Error) -> String {
    use std::error::Error;

    let mut details = vec![e.to_string()];
    let mut source = e.source();
    while let Some(err) = source {
        details.push(err.to_string());
        source = err.source();
    }
    details.join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_inetd_conf() {
        let content = "ftp\tstream\ttcp\tnowait\troot\t/usr/sbin/tcpd\tin.ftpd\ncsync2\tstream\ttcp\tnowait\troot\t/usr/sbin/csync2\tcsync2 -i\n";
        let out = rewrite_inetd_conf(content, "b.example.org");
        assert_eq!(out.lines().count(), 2);
        assert!(out.ends_with("csync2 -i -N b.example.org\n"));
        assert!(out.starts_with("ftp\t"));

        let out = rewrite_inetd_conf("", "a");
        assert_eq!(out, format!("{}\n", inetd_sync_line("a")));
    }

    #[test]
    fn test_sync_entries() {
        assert!(xinetd_sync_entry("a").contains("server_args     = -i -N a\n"));
        assert!(xinetd_sync_entry("a").contains("port            = 30865\n"));
        assert_eq!(
            sync_cron_entry("a"),
            "* * * * *    root    /usr/sbin/csync2 -N a -xv 2>/var/log/csync2.log\n"
        );
    }

    #[test]
    fn test_rewrite_peer_properties_replaces_line() {
        let content = "bindDN: cn=directory manager\nservers: localhost:1636\nuseSSL: true\n";
        let endpoints = vec!["localhost:1636".to_string(), "A:1636".to_string()];
        let out = rewrite_peer_properties(content, &endpoints);
        assert_eq!(
            out,
            "bindDN: cn=directory manager\nservers: localhost:1636,A:1636\nuseSSL: true\n"
        );
    }

    #[test]
    fn test_rewrite_peer_properties_appends_when_missing() {
        let out = rewrite_peer_properties("useSSL: true", &["localhost:1636".to_string()]);
        assert_eq!(out, "useSSL: true\nservers: localhost:1636\n");
    }

    #[test]
    fn test_setup_properties() {
        let content = "hostname=idp.example.org\nip=10.0.0.1\nldapPass=s3cret\n";
        assert_eq!(property_value(content, "ldapPass"), Some("s3cret"));
        assert_eq!(property_value(content, "missing"), None);

        let node = Node::new(2, "b.example.org", "10.0.0.2");
        let out = rewrite_setup_properties(content, &node);
        assert!(out.contains("ip=10.0.0.2\n"));
        assert!(!out.contains("ip=10.0.0.1"));
        assert!(out.contains("hostname=idp.example.org"));
    }

    #[test]
    fn test_render_proxy_config() {
        let a = Node::new(1, "a.example.org", "10.0.0.1");
        let b = Node::new(2, "b.example.org", "10.0.0.2");
        let out = render_proxy_config(None, "lb.example.org", &[&a, &b]).unwrap();
        assert!(out.contains("server_name lb.example.org;"));
        assert!(out.contains("  server a.example.org:443 max_fails=2 fail_timeout=10s;"));
        assert!(out.contains("  server b.example.org:443 max_fails=2 fail_timeout=10s;"));

        let custom = "{{ proxy_host }}\n{% for b in backends %}{{ b }}\n{% endfor %}";
        let out = render_proxy_config(Some(custom), "lb", &[&a]).unwrap();
        assert_eq!(out, "lb\n  server a.example.org:443 max_fails=2 fail_timeout=10s;\n");
    }

    #[test]
    fn test_render_proxy_config_bad_template() {
        let err = render_proxy_config(Some("{{ missing_value }}"), "lb", &[]).unwrap_err();
        assert!(matches!(err, FleetError::Template { .. }));
    }

    #[test]
    fn test_render_sync_group() {
        let a = Node::new(1, "a.example.org", "10.0.0.1");
        let b = Node::new(2, "b.example.org", "10.0.0.2");
        let spec = SyncGroupSpec::new("gluucluster", &[&a, &b])
            .with_includes(["/opt/gluu-server-3.1.6/etc/certs".to_string()])
            .with_excludes(["/opt/gluu-server-3.1.6/etc/gluu/conf/ox-ldap.properties".to_string()]);
        let out = render_sync_group(&spec).unwrap();
        assert!(out.starts_with("group gluucluster\n{\n"));
        assert!(out.contains("  host a.example.org;\n  host b.example.org;\n"));
        assert!(out.contains("  key /etc/csync2.key;"));
        assert!(out.contains("  include /opt/gluu-server-3.1.6/etc/certs;"));
        assert!(out.contains("  exclude /opt/gluu-server-3.1.6/etc/gluu/conf/ox-ldap.properties;"));
        assert!(out.contains("backup-generations 3;"));
    }

    #[test]
    fn test_merge_host_aliases_is_non_destructive() {
        let existing = "127.0.0.1 localhost\n10.0.0.1 a.example.org a\n# 10.0.0.9 old.example.org";
        let out = merge_host_aliases(
            existing,
            &[
                ("10.0.0.1", "a.example.org"),
                ("10.0.0.2", "b.example.org"),
                ("10.0.0.9", "old.example.org"),
            ],
        );
        assert!(out.starts_with(existing));
        assert_eq!(out.matches("a.example.org").count(), 1);
        assert!(out.contains("10.0.0.2 b.example.org\n"));
        assert!(out.ends_with("10.0.0.9 old.example.org\n"));

        let again = merge_host_aliases(
            &out,
            &[("10.0.0.2", "b.example.org")],
        );
        assert_eq!(again, out);
    }
}
