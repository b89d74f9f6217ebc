use crate::error::Rejection;

/// Room-control commands that only the host may issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    SetTrack,
    Play,
    Pause,
    Seek,
    NextTrack,
    PreviousTrack,
}

impl CommandKind {
    pub const ALL: [CommandKind; 6] = [
        Self::SetTrack,
        Self::Play,
        Self::Pause,
        Self::Seek,
        Self::NextTrack,
        Self::PreviousTrack,
    ];
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::SetTrack => "set track",
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Seek => "seek",
            Self::NextTrack => "next track",
            Self::PreviousTrack => "previous track",
        })
    }
}

/// Local pre-flight check that keeps guests from sending host commands.
///
/// This only spares a round trip. The server enforces the same rule and
/// stays the authority.
#[derive(Debug, Default)]
pub struct RoleGate {
    is_host: bool,
}

impl RoleGate {
    pub fn is_host(&self) -> bool {
        self.is_host
    }

    pub fn set_host(&mut self, is_host: bool) {
        self.is_host = is_host;
    }

    pub fn authorize(&self, kind: CommandKind) -> Result<(), Rejection> {
        if self.is_host {
            Ok(())
        } else {
            tracing::debug!(%kind, "Blocked host-only command");
            Err(Rejection::NotHost(kind))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_is_rejected_for_every_command() {
        let gate = RoleGate::default();
        for kind in CommandKind::ALL {
            assert_eq!(gate.authorize(kind), Err(Rejection::NotHost(kind)));
        }
    }

    #[test]
    fn host_is_allowed_every_command() {
        let mut gate = RoleGate::default();
        gate.set_host(true);
        for kind in CommandKind::ALL {
            assert!(gate.authorize(kind).is_ok());
        }
    }

    #[test]
    fn demotion_revokes_access() {
        let mut gate = RoleGate::default();
        gate.set_host(true);
        gate.set_host(false);
        assert!(!gate.is_host());
        assert!(gate.authorize(CommandKind::Seek).is_err());
    }
}
