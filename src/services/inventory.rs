//! Inventory INI synthesis — renders structured hosts and groups into the
//! text format the playbook engine consumes.

use std::collections::BTreeMap;
use std::collections::HashSet;

use crate::models::group::{Group, HostGroupMapping};
use crate::models::host::Host;

const SSH_COMMON_ARGS_KEY: &str = "ansible_ssh_common_args";
const SSH_COMMON_ARGS_DEFAULT: &str = "-o StrictHostKeyChecking=no -o ControlMaster=no";

/// Render hosts and groups as INI inventory text.
///
/// Groups with at least one member are emitted first, each host on its own
/// line; hosts belonging to no group land under `[ungrouped]`. An inventory
/// with zero hosts renders as the empty string and the executor falls back
/// to localhost.
pub fn render_inventory(
    hosts: &[Host],
    groups: &[Group],
    memberships: &[HostGroupMapping],
) -> String {
    let mut out = String::new();
    let mut grouped: HashSet<i64> = HashSet::new();

    for group in groups {
        let member_hosts: Vec<&Host> = memberships
            .iter()
            .filter(|m| m.group_id == group.id)
            .filter_map(|m| hosts.iter().find(|h| h.id == m.host_id))
            .collect();

        if member_hosts.is_empty() {
            continue;
        }

        out.push_str(&format!("[{}]\n", group.name));
        for host in member_hosts {
            out.push_str(&format_host_line(host));
            grouped.insert(host.id);
        }
        out.push('\n');
    }

    let ungrouped: Vec<&Host> = hosts.iter().filter(|h| !grouped.contains(&h.id)).collect();
    if !ungrouped.is_empty() {
        out.push_str("[ungrouped]\n");
        for host in ungrouped {
            out.push_str(&format_host_line(host));
        }
        out.push('\n');
    }

    out
}

/// Format one host line: name plus `k=v` variables in sorted key order.
/// Values containing spaces are double-quoted. The SSH hardening args are
/// always present: injected when absent, appended to an existing value.
fn format_host_line(host: &Host) -> String {
    let mut vars: BTreeMap<String, String> = host
        .variables
        .as_ref()
        .and_then(|v| v.as_object())
        .map(|obj| {
            obj.iter()
                .map(|(k, v)| (k.clone(), render_value(v)))
                .collect()
        })
        .unwrap_or_default();

    match vars.get_mut(SSH_COMMON_ARGS_KEY) {
        Some(existing) => existing.push_str(" -o ControlMaster=no"),
        None => {
            vars.insert(
                SSH_COMMON_ARGS_KEY.to_string(),
                SSH_COMMON_ARGS_DEFAULT.to_string(),
            );
        }
    }

    let mut line = host.name.clone();
    for (key, value) in &vars {
        if value.contains(' ') {
            line.push_str(&format!(" {key}=\"{value}\""));
        } else {
            line.push_str(&format!(" {key}={value}"));
        }
    }
    line.push('\n');
    line
}

/// Strings render bare; everything else renders as its JSON text.
fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;

    fn host(id: i64, name: &str, variables: Option<serde_json::Value>) -> Host {
        Host {
            id,
            inventory_id: 1,
            name: name.to_string(),
            variables,
            enabled: true,
            created_at: Utc::now(),
        }
    }

    fn group(id: i64, name: &str) -> Group {
        Group {
            id,
            inventory_id: 1,
            name: name.to_string(),
            variables: None,
            created_at: Utc::now(),
        }
    }

    fn mapping(id: i64, group_id: i64, host_id: i64) -> HostGroupMapping {
        HostGroupMapping {
            id,
            group_id,
            host_id,
        }
    }

    #[test]
    fn grouped_and_ungrouped_sections() {
        let hosts = vec![
            host(1, "web1", Some(json!({"ansible_user": "root"}))),
            host(2, "db1", None),
        ];
        let groups = vec![group(10, "webservers")];
        let memberships = vec![mapping(1, 10, 1)];

        let text = render_inventory(&hosts, &groups, &memberships);

        assert!(text.starts_with("[webservers]\nweb1 "));
        assert!(text.contains("web1 ansible_user=root"));
        assert!(text.contains("\n[ungrouped]\ndb1 "));
    }

    #[test]
    fn values_with_spaces_are_quoted() {
        let hosts = vec![host(1, "node", Some(json!({"a": "x y", "b": 1})))];
        let text = render_inventory(&hosts, &[], &[]);

        let line = text.lines().nth(1).unwrap();
        assert!(line.starts_with("node "));
        assert!(line.contains(r#"a="x y""#));
        assert!(line.contains(" b=1"));
        assert!(line.contains(
            r#"ansible_ssh_common_args="-o StrictHostKeyChecking=no -o ControlMaster=no""#
        ));
    }

    #[test]
    fn existing_ssh_args_get_control_master_appended() {
        let hosts = vec![host(
            1,
            "node",
            Some(json!({"ansible_ssh_common_args": "-o ProxyJump=bastion"})),
        )];
        let text = render_inventory(&hosts, &[], &[]);

        assert!(text
            .contains(r#"ansible_ssh_common_args="-o ProxyJump=bastion -o ControlMaster=no""#));
    }

    #[test]
    fn empty_groups_are_skipped() {
        let hosts = vec![host(1, "db1", None)];
        let groups = vec![group(10, "webservers")];

        let text = render_inventory(&hosts, &groups, &[]);

        assert!(!text.contains("[webservers]"));
        assert!(text.starts_with("[ungrouped]\n"));
    }

    #[test]
    fn no_hosts_renders_empty() {
        assert_eq!(render_inventory(&[], &[], &[]), "");
    }

    #[test]
    fn non_string_values_render_as_json() {
        let hosts = vec![host(
            1,
            "node",
            Some(json!({"port": 22, "fast": true})),
        )];
        let text = render_inventory(&hosts, &[], &[]);

        assert!(text.contains(" port=22"));
        assert!(text.contains(" fast=true"));
    }

    #[test]
    fn host_in_two_groups_appears_in_both() {
        let hosts = vec![host(1, "dual", None)];
        let groups = vec![group(10, "alpha"), group(11, "beta")];
        let memberships = vec![mapping(1, 10, 1), mapping(2, 11, 1)];

        let text = render_inventory(&hosts, &groups, &memberships);

        assert!(text.contains("[alpha]\ndual "));
        assert!(text.contains("[beta]\ndual "));
        assert!(!text.contains("[ungrouped]"));
    }
}
