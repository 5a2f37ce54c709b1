//! Typed network commands
//!
//! The complete set of interface, peer and firewall operations burrow issues
//! on either host. Each variant renders to one deterministic, shell-quoted
//! command line; key material is passed by file path, never inline.

use std::fmt;

use crate::exec::join_words;

/// A firewall rule installed for a tunnel interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardRule {
    /// Accept traffic arriving from the tunnel
    AcceptIn { interface: String },
    /// Accept traffic leaving into the tunnel
    AcceptOut { interface: String },
    /// Masquerade tunnel traffic leaving through `egress`
    Masquerade { source: String, egress: String },
}

impl ForwardRule {
    /// The forwarding and NAT rules for a tunnel routed through `egress`
    pub fn for_tunnel(interface: &str, subnet: &str, egress: &str) -> Vec<ForwardRule> {
        vec![
            ForwardRule::AcceptIn {
                interface: interface.to_string(),
            },
            ForwardRule::AcceptOut {
                interface: interface.to_string(),
            },
            ForwardRule::Masquerade {
                source: subnet.to_string(),
                egress: egress.to_string(),
            },
        ]
    }

    fn argv(&self, action: &str) -> Vec<String> {
        let mut argv = vec!["iptables".to_string()];
        match self {
            ForwardRule::AcceptIn { interface } => {
                argv.extend([action, "FORWARD", "-i", interface.as_str(), "-j", "ACCEPT"].map(String::from));
            }
            ForwardRule::AcceptOut { interface } => {
                argv.extend([action, "FORWARD", "-o", interface.as_str(), "-j", "ACCEPT"].map(String::from));
            }
            ForwardRule::Masquerade { source, egress } => {
                argv.extend(
                    [
                        "-t",
                        "nat",
                        action,
                        "POSTROUTING",
                        "-s",
                        source.as_str(),
                        "-o",
                        egress.as_str(),
                        "-j",
                        "MASQUERADE",
                    ]
                    .map(String::from),
                );
            }
        }
        argv
    }
}

impl fmt::Display for ForwardRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardRule::AcceptIn { interface } => write!(f, "accept in on {}", interface),
            ForwardRule::AcceptOut { interface } => write!(f, "accept out on {}", interface),
            ForwardRule::Masquerade { source, egress } => {
                write!(f, "masquerade {} via {}", source, egress)
            }
        }
    }
}

/// Supported interface, peer and firewall operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetCommand {
    /// Create a kernel tunnel interface
    CreateInterface { name: String },
    /// Delete an interface (kernel or userspace)
    DeleteInterface { name: String },
    /// Probe whether an interface exists
    InterfaceExists { name: String },
    /// Assign an address to an interface
    SetAddress { name: String, cidr: String },
    /// Bring an interface up
    LinkUp { name: String },
    /// Load a tunnel configuration file into an interface
    SetConf { name: String, path: String },
    /// Add or update a peer
    SetPeer {
        name: String,
        public_key: String,
        allowed_ips: Vec<String>,
        endpoint: Option<String>,
        keepalive: Option<u16>,
    },
    /// Remove a peer
    RemovePeer { name: String, public_key: String },
    /// Append a firewall rule
    AddForwardRule(ForwardRule),
    /// Check whether a firewall rule is present
    CheckForwardRule(ForwardRule),
    /// Delete one instance of a firewall rule
    DeleteForwardRule(ForwardRule),
    /// Enable IPv4 forwarding
    EnableIpForward,
    /// Per-peer transfer counters
    ShowTransfer { name: String },
    /// Full machine-readable interface state
    ShowDump { name: String },
    /// Bring up an interface from a quick-style config file
    QuickUp { path: String },
    /// Tear down an interface described by a quick-style config file
    QuickDown { path: String },
}

impl NetCommand {
    /// Argument vector for this command
    pub fn argv(&self) -> Vec<String> {
        fn words(w: &[&str]) -> Vec<String> {
            w.iter().map(|s| s.to_string()).collect()
        }

        match self {
            NetCommand::CreateInterface { name } => {
                words(&["ip", "link", "add", "dev", name, "type", "wireguard"])
            }
            NetCommand::DeleteInterface { name } => words(&["ip", "link", "del", "dev", name]),
            NetCommand::InterfaceExists { name } => words(&["ip", "link", "show", "dev", name]),
            NetCommand::SetAddress { name, cidr } => {
                words(&["ip", "address", "add", cidr, "dev", name])
            }
            NetCommand::LinkUp { name } => words(&["ip", "link", "set", "dev", name, "up"]),
            NetCommand::SetConf { name, path } => words(&["wg", "setconf", name, path]),
            NetCommand::SetPeer {
                name,
                public_key,
                allowed_ips,
                endpoint,
                keepalive,
            } => {
                let mut argv = words(&["wg", "set", name, "peer", public_key]);
                argv.push("allowed-ips".to_string());
                argv.push(allowed_ips.join(","));
                if let Some(endpoint) = endpoint {
                    argv.push("endpoint".to_string());
                    argv.push(endpoint.clone());
                }
                if let Some(keepalive) = keepalive {
                    argv.push("persistent-keepalive".to_string());
                    argv.push(keepalive.to_string());
                }
                argv
            }
            NetCommand::RemovePeer { name, public_key } => {
                words(&["wg", "set", name, "peer", public_key, "remove"])
            }
            NetCommand::AddForwardRule(rule) => rule.argv("-A"),
            NetCommand::CheckForwardRule(rule) => rule.argv("-C"),
            NetCommand::DeleteForwardRule(rule) => rule.argv("-D"),
            NetCommand::EnableIpForward => words(&["sysctl", "-w", "net.ipv4.ip_forward=1"]),
            NetCommand::ShowTransfer { name } => words(&["wg", "show", name, "transfer"]),
            NetCommand::ShowDump { name } => words(&["wg", "show", name, "dump"]),
            NetCommand::QuickUp { path } => words(&["wg-quick", "up", path]),
            NetCommand::QuickDown { path } => words(&["wg-quick", "down", path]),
        }
    }

    /// Quoted command line
    pub fn render(&self) -> String {
        join_words(self.argv())
    }

    /// Whether the command needs root
    pub fn needs_privilege(&self) -> bool {
        !matches!(self, NetCommand::InterfaceExists { .. })
    }

    /// Whether a failure's stderr just means the target is already absent
    ///
    /// Teardown treats these as success so it can be re-run safely.
    pub fn is_already_absent(&self, stderr: &str) -> bool {
        const ABSENT: &[&str] = &[
            "Cannot find device",
            "does not exist",
            "No such device",
            "No such file or directory",
            "Bad rule",
            "No chain/target/match",
            "is not a WireGuard interface",
        ];
        match self {
            NetCommand::DeleteInterface { .. }
            | NetCommand::RemovePeer { .. }
            | NetCommand::DeleteForwardRule(_)
            | NetCommand::QuickDown { .. } => ABSENT.iter().any(|m| stderr.contains(m)),
            _ => false,
        }
    }

    /// Whether a failure's stderr just means the target already exists
    pub fn is_already_present(&self, stderr: &str) -> bool {
        match self {
            NetCommand::CreateInterface { .. } | NetCommand::SetAddress { .. } => {
                stderr.contains("File exists")
            }
            _ => false,
        }
    }
}

impl fmt::Display for NetCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// How commands needing root are escalated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Privilege {
    /// Already root
    #[default]
    Root,
    /// Passwordless sudo (`sudo -n`)
    Sudo,
    /// Sudo with the password supplied on stdin (`sudo -S`)
    SudoWithPassword,
}

impl Privilege {
    /// Prefix `command` with the escalation for this privilege level
    pub fn wrap(&self, command: &str) -> String {
        match self {
            Privilege::Root => command.to_string(),
            Privilege::Sudo => format!("sudo -n {}", command),
            Privilege::SudoWithPassword => format!("sudo -S -p '' {}", command),
        }
    }

    /// Escalate a typed command if it needs root
    pub fn wrap_command(&self, command: &NetCommand) -> String {
        if command.needs_privilege() {
            self.wrap(&command.render())
        } else {
            command.render()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_delete_interface() {
        let create = NetCommand::CreateInterface {
            name: "bws21".to_string(),
        };
        assert_eq!(create.render(), "ip link add dev bws21 type wireguard");

        let delete = NetCommand::DeleteInterface {
            name: "bws21".to_string(),
        };
        assert_eq!(delete.render(), "ip link del dev bws21");
    }

    #[test]
    fn test_set_peer_renders_optional_parts() {
        let cmd = NetCommand::SetPeer {
            name: "bws21".to_string(),
            public_key: "abc+/=".to_string(),
            allowed_ips: vec!["10.99.1.2/32".to_string(), "192.168.5.0/24".to_string()],
            endpoint: None,
            keepalive: Some(25),
        };
        assert_eq!(
            cmd.render(),
            "wg set bws21 peer abc+/= allowed-ips 10.99.1.2/32,192.168.5.0/24 persistent-keepalive 25"
        );
    }

    #[test]
    fn test_forward_rules() {
        let rules = ForwardRule::for_tunnel("bws21", "10.99.1.0/24", "eth0");
        assert_eq!(rules.len(), 3);

        assert_eq!(
            NetCommand::AddForwardRule(rules[0].clone()).render(),
            "iptables -A FORWARD -i bws21 -j ACCEPT"
        );
        assert_eq!(
            NetCommand::DeleteForwardRule(rules[2].clone()).render(),
            "iptables -t nat -D POSTROUTING -s 10.99.1.0/24 -o eth0 -j MASQUERADE"
        );
        assert_eq!(
            NetCommand::CheckForwardRule(rules[1].clone()).render(),
            "iptables -C FORWARD -o bws21 -j ACCEPT"
        );
    }

    #[test]
    fn test_hostile_names_are_quoted() {
        let cmd = NetCommand::DeleteInterface {
            name: "x; reboot".to_string(),
        };
        assert_eq!(cmd.render(), "ip link del dev 'x; reboot'");
    }

    #[test]
    fn test_already_absent_only_for_teardown() {
        let delete = NetCommand::DeleteInterface {
            name: "bws21".to_string(),
        };
        assert!(delete.is_already_absent("Cannot find device \"bws21\""));

        let create = NetCommand::CreateInterface {
            name: "bws21".to_string(),
        };
        assert!(!create.is_already_absent("Cannot find device"));
        assert!(create.is_already_present("RTNETLINK answers: File exists"));
    }

    #[test]
    fn test_privilege_wrap() {
        let cmd = NetCommand::LinkUp {
            name: "bwc21".to_string(),
        };
        assert_eq!(Privilege::Root.wrap_command(&cmd), "ip link set dev bwc21 up");
        assert_eq!(
            Privilege::Sudo.wrap_command(&cmd),
            "sudo -n ip link set dev bwc21 up"
        );
        assert_eq!(
            Privilege::SudoWithPassword.wrap_command(&cmd),
            "sudo -S -p '' ip link set dev bwc21 up"
        );

        let probe = NetCommand::InterfaceExists {
            name: "bwc21".to_string(),
        };
        assert_eq!(Privilege::Sudo.wrap_command(&probe), "ip link show dev bwc21");
    }
}
