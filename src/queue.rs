//! Pending mutation intents, keyed by IP.
//!
//! The queue is plain data. It is owned by the engine worker between cycles
//! and handed to [`crate::merge::reconcile`], which consumes matching entries
//! and clears whatever is left at the end of the pass. Iteration order of the
//! maps is insertion order, which fixes where brand-new records land in the
//! output.

use indexmap::{IndexMap, IndexSet};

/// Removal token meaning "every hostname for this IP".
pub const WILDCARD: &str = "*";

/// Hostname argument accepted by the mutation calls: a single name or a
/// list of names.
///
/// Note the wildcard is only recognized in the single-name form;
/// `["*"]` queues a literal hostname `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostArg {
    One(String),
    Many(Vec<String>),
}

impl HostArg {
    pub(crate) fn tokens(&self) -> impl Iterator<Item = &str> {
        match self {
            HostArg::One(h) => std::slice::from_ref(h).iter(),
            HostArg::Many(hs) => hs.iter(),
        }
        .map(String::as_str)
    }
}

impl From<&str> for HostArg {
    fn from(host: &str) -> Self {
        HostArg::One(host.to_string())
    }
}

impl From<String> for HostArg {
    fn from(host: String) -> Self {
        HostArg::One(host)
    }
}

impl From<Vec<String>> for HostArg {
    fn from(hosts: Vec<String>) -> Self {
        HostArg::Many(hosts)
    }
}

impl From<Vec<&str>> for HostArg {
    fn from(hosts: Vec<&str>) -> Self {
        HostArg::Many(hosts.into_iter().map(String::from).collect())
    }
}

impl From<&[&str]> for HostArg {
    fn from(hosts: &[&str]) -> Self {
        HostArg::Many(hosts.iter().map(|h| h.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for HostArg {
    fn from(hosts: [&str; N]) -> Self {
        HostArg::Many(hosts.iter().map(|h| h.to_string()).collect())
    }
}

/// Queued removal for one IP.
///
/// Once `All` is set for an IP it absorbs later removal requests for that
/// IP; specific names queued earlier are discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    Names(Vec<String>),
    All,
}

/// The three intent maps, cleared together at the end of each merge pass.
#[derive(Debug, Clone, Default)]
pub struct MutationQueue {
    pub(crate) additions: IndexMap<String, Vec<String>>,
    pub(crate) removals: IndexMap<String, Removal>,
    pub(crate) host_removals: IndexSet<String>,
}

impl MutationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue hostnames to append to `ip`'s record. Names accumulate across
    /// calls and are not deduplicated here; duplicate suppression happens
    /// against the file's own line during the merge.
    pub fn add(&mut self, ip: impl Into<String>, hosts: impl Into<HostArg>) {
        let entry = self.additions.entry(ip.into()).or_default();
        match hosts.into() {
            HostArg::One(host) => entry.push(host),
            HostArg::Many(list) => entry.extend(list),
        }
    }

    /// Queue hostnames to strip from `ip`'s record. The single name `"*"`
    /// switches the entry to [`Removal::All`].
    pub fn remove(&mut self, ip: impl Into<String>, hosts: impl Into<HostArg>) {
        let arg = hosts.into();
        let slot = self
            .removals
            .entry(ip.into())
            .or_insert_with(|| Removal::Names(Vec::new()));

        let names = match slot {
            Removal::All => return,
            Removal::Names(names) => names,
        };

        match arg {
            HostArg::One(host) if host == WILDCARD => *slot = Removal::All,
            HostArg::One(host) => names.push(host),
            HostArg::Many(list) => names.extend(list),
        }
    }

    /// Queue a hostname to strip from every record, whichever IP owns it.
    pub fn remove_host(&mut self, host: impl Into<String>) {
        self.host_removals.insert(host.into());
    }

    /// Discard all pending intents without merging them.
    pub fn clear(&mut self) {
        self.additions.clear();
        self.removals.clear();
        self.host_removals.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty() && self.host_removals.is_empty()
    }
}
