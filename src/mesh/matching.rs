//! Best-effort matching of container hostnames to mesh registry entries.
//!
//! Mesh entries are often registered under a decorated name (`web1-ct101`)
//! or the container carries a decorated hostname while the entry does not.
//! The decorations tried are listed in [`APPEND_PATTERNS`] and
//! [`STRIP_PATTERNS`]; a miss is an ordinary outcome.

use tracing::debug;

use super::MeshNode;

/// Hostname decoration that may distinguish a container from its mesh entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SuffixPattern {
    /// `-ct`
    DashCt,
    /// `-<vmid>`
    DashVmid,
    /// `-ct<vmid>`
    DashCtVmid,
    /// `ct<vmid>`
    CtVmid,
}

impl SuffixPattern {
    /// Renders the suffix, or `None` when it needs a vmid and none is known.
    #[must_use]
    pub fn render(self, vmid: Option<u32>) -> Option<String> {
        match (self, vmid) {
            (Self::DashCt, _) => Some(String::from("-ct")),
            (Self::DashVmid, Some(id)) => Some(format!("-{id}")),
            (Self::DashCtVmid, Some(id)) => Some(format!("-ct{id}")),
            (Self::CtVmid, Some(id)) => Some(format!("ct{id}")),
            (_, None) => None,
        }
    }
}

/// Suffixes appended to the container hostname, in the order tried.
pub const APPEND_PATTERNS: [SuffixPattern; 3] = [
    SuffixPattern::DashCt,
    SuffixPattern::DashVmid,
    SuffixPattern::DashCtVmid,
];

/// Suffixes stripped from the container hostname, in the order tried.
pub const STRIP_PATTERNS: [SuffixPattern; 4] = [
    SuffixPattern::DashVmid,
    SuffixPattern::DashCtVmid,
    SuffixPattern::DashCt,
    SuffixPattern::CtVmid,
];

/// Finds the registry entry for a container.
///
/// Tries, first match winning: the hostname as given, the hostname with each
/// append pattern, then the hostname with a trailing strip pattern removed.
/// Each candidate name is matched exactly against every entry before the
/// domain-stripped comparison is attempted.
#[must_use]
pub fn find_match<'a>(
    nodes: &'a [MeshNode],
    hostname: &str,
    vmid: Option<u32>,
) -> Option<&'a MeshNode> {
    if let Some(node) = match_name(nodes, hostname) {
        debug!(hostname, node = %node.name, "mesh entry matched hostname");
        return Some(node);
    }

    for suffix in APPEND_PATTERNS.iter().filter_map(|pattern| pattern.render(vmid)) {
        let candidate = format!("{hostname}{suffix}");
        if let Some(node) = match_name(nodes, &candidate) {
            debug!(hostname, candidate = %candidate, node = %node.name, "mesh entry matched with suffix");
            return Some(node);
        }
    }

    for suffix in STRIP_PATTERNS.iter().filter_map(|pattern| pattern.render(vmid)) {
        let Some(base) = strip_suffix_ignore_case(hostname, &suffix) else {
            continue;
        };
        if base.is_empty() {
            continue;
        }
        if let Some(node) = match_name(nodes, base) {
            debug!(hostname, candidate = base, node = %node.name, "mesh entry matched after removing suffix");
            return Some(node);
        }
    }

    debug!(hostname, ?vmid, "no mesh entry matches container");
    None
}

/// Exact match on bare or qualified name, then match on the first label of
/// either name.
fn match_name<'a>(nodes: &'a [MeshNode], wanted: &str) -> Option<&'a MeshNode> {
    nodes
        .iter()
        .find(|node| {
            node.hostname.eq_ignore_ascii_case(wanted) || node.name.eq_ignore_ascii_case(wanted)
        })
        .or_else(|| {
            nodes.iter().find(|node| {
                [node.hostname.as_str(), node.name.as_str()]
                    .into_iter()
                    .filter_map(|name| name.split_once('.'))
                    .any(|(label, _)| label.eq_ignore_ascii_case(wanted))
            })
        })
}

fn strip_suffix_ignore_case<'a>(value: &'a str, suffix: &str) -> Option<&'a str> {
    let split = value.len().checked_sub(suffix.len())?;
    let (head, tail) = (value.get(..split)?, value.get(split..)?);
    tail.eq_ignore_ascii_case(suffix).then_some(head)
}
