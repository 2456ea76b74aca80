//! Bulk-transfer tool negotiation.
//!
//! A pure decision over two booleans: is the resumable tool available here,
//! and is it available on the remote end.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMethod {
    /// Resumable, progress-capable tool on both ends
    Resumable,
    /// Plain copy streamed over the SSH session
    PlainCopy,
}

impl fmt::Display for TransferMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferMethod::Resumable => f.write_str("resumable"),
            TransferMethod::PlainCopy => f.write_str("plain-copy"),
        }
    }
}

/// Operator answers when the resumable tool is missing somewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackChoice {
    InstallRemote,
    InstallLocal,
    PlainCopy,
    Abort,
}

impl FallbackChoice {
    pub fn label(self) -> &'static str {
        match self {
            FallbackChoice::InstallRemote => "install-remote",
            FallbackChoice::InstallLocal => "install-local",
            FallbackChoice::PlainCopy => "plain-copy",
            FallbackChoice::Abort => "abort",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        [
            FallbackChoice::InstallRemote,
            FallbackChoice::InstallLocal,
            FallbackChoice::PlainCopy,
            FallbackChoice::Abort,
        ]
        .into_iter()
        .find(|c| c.label() == label)
    }
}

impl fmt::Display for FallbackChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiation {
    /// Nothing to decide
    Ready(TransferMethod),
    /// Local has the tool, remote does not
    RemoteMissing,
    /// Local lacks the tool (remote state is checked again after installing)
    LocalMissing,
}

impl Negotiation {
    /// Options the operator must pick from; empty when [`Negotiation::Ready`].
    pub fn choices(self) -> &'static [FallbackChoice] {
        match self {
            Negotiation::Ready(_) => &[],
            Negotiation::RemoteMissing => &[
                FallbackChoice::InstallRemote,
                FallbackChoice::PlainCopy,
                FallbackChoice::Abort,
            ],
            Negotiation::LocalMissing => &[
                FallbackChoice::InstallLocal,
                FallbackChoice::PlainCopy,
                FallbackChoice::Abort,
            ],
        }
    }

    pub fn question(self, tool: &str) -> String {
        match self {
            Negotiation::Ready(method) => format!("Using {} transfer", method),
            Negotiation::RemoteMissing => format!("{} is not installed on the remote host", tool),
            Negotiation::LocalMissing => format!("{} is not installed on this host", tool),
        }
    }
}

pub fn negotiate(local_has_tool: bool, remote_has_tool: bool) -> Negotiation {
    match (local_has_tool, remote_has_tool) {
        (true, true) => Negotiation::Ready(TransferMethod::Resumable),
        (true, false) => Negotiation::RemoteMissing,
        (false, _) => Negotiation::LocalMissing,
    }
}
