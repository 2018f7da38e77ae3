//! Endpoint role.

/// Which side of the connection this endpoint is.
///
/// The role decides masking (RFC 6455 Section 5.3) and who echoes a close
/// frame: servers answer a peer's close, clients just hang up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Dials out and sends the upgrade request.
    Client,
    /// Accepts an upgrade request.
    Server,
}

impl Role {
    /// Clients mask every frame they send.
    #[inline]
    #[must_use]
    pub const fn must_mask(&self) -> bool {
        matches!(self, Role::Client)
    }

    /// Servers only accept masked frames.
    #[inline]
    #[must_use]
    pub const fn expects_masked(&self) -> bool {
        matches!(self, Role::Server)
    }

    /// Servers echo a close frame received from the peer.
    #[inline]
    #[must_use]
    pub const fn echoes_close(&self) -> bool {
        matches!(self, Role::Server)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masking_rules() {
        assert!(Role::Client.must_mask());
        assert!(!Role::Client.expects_masked());
        assert!(!Role::Server.must_mask());
        assert!(Role::Server.expects_masked());
    }

    #[test]
    fn test_only_server_echoes_close() {
        assert!(Role::Server.echoes_close());
        assert!(!Role::Client.echoes_close());
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Client.to_string(), "client");
        assert_eq!(Role::Server.to_string(), "server");
    }
}
