//! Share links: `#<exportedKey>,<sessionId>,<directionChar>`.
//!
//! The fragment never reaches a server, so it is the only place the key travels.
//! Direction char tells the *link recipient* which side to take.

use std::fmt;

use crate::key::{self, KeyError, TransferKey};

/// Which side of the transfer a peer plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// This peer sends the file (`S`).
    Send,
    /// This peer receives the file (`R`).
    Receive,
}

impl Direction {
    pub fn as_char(self) -> char {
        match self {
            Direction::Send => 'S',
            Direction::Receive => 'R',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'S' => Some(Direction::Send),
            'R' => Some(Direction::Receive),
            _ => None,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Send => Direction::Receive,
            Direction::Receive => Direction::Send,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Send => f.write_str("send"),
            Direction::Receive => f.write_str("receive"),
        }
    }
}

/// Parsed share-link fragment. Holds the exported key string, not the key itself.
#[derive(Clone, PartialEq, Eq)]
pub struct ShareLink {
    pub exported_key: String,
    pub session_id: String,
    /// Role the recipient of this link should assume.
    pub direction: Direction,
}

impl ShareLink {
    /// Fragment including the leading `#`.
    pub fn to_fragment(&self) -> String {
        format!(
            "#{},{},{}",
            self.exported_key,
            self.session_id,
            self.direction.as_char()
        )
    }

    /// `<base>/#fragment`, trailing slashes on `base` collapsed.
    pub fn to_url(&self, base: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), self.to_fragment())
    }

    /// Parse a fragment (`#a,b,S`), a bare fragment (`a,b,S`) or a full URL.
    pub fn parse(input: &str) -> Result<Self, LinkError> {
        let input = input.trim();
        let fragment = match input.rfind('#') {
            Some(i) => &input[i + 1..],
            None => input,
        };
        let mut parts = fragment.split(',');
        let exported_key = parts.next().filter(|s| !s.is_empty()).ok_or(LinkError::MissingField("key"))?;
        let session_id = parts.next().ok_or(LinkError::MissingField("session id"))?;
        let direction = parts.next().ok_or(LinkError::MissingField("direction"))?;
        if parts.next().is_some() {
            return Err(LinkError::UnexpectedField);
        }
        if session_id.is_empty() {
            return Err(LinkError::EmptySessionId);
        }
        let mut chars = direction.chars();
        let direction = match (chars.next(), chars.next()) {
            (Some(c), None) => Direction::from_char(c),
            _ => None,
        }
        .ok_or_else(|| LinkError::InvalidDirection(direction.to_string()))?;
        Ok(Self {
            exported_key: exported_key.to_string(),
            session_id: session_id.to_string(),
            direction,
        })
    }

    pub fn import_key(&self) -> Result<TransferKey, LinkError> {
        key::import_from_exported(&self.exported_key).map_err(LinkError::InvalidKey)
    }
}

impl fmt::Debug for ShareLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShareLink")
            .field("exported_key", &"<redacted>")
            .field("session_id", &self.session_id)
            .field("direction", &self.direction)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("share link is missing the {0}")]
    MissingField(&'static str),
    #[error("share link has more than three fields")]
    UnexpectedField,
    #[error("share link has an empty session id")]
    EmptySessionId,
    #[error("invalid direction {0:?}, expected S or R")]
    InvalidDirection(String),
    #[error(transparent)]
    InvalidKey(#[from] KeyError),
}

/// New opaque session id (UUID v4, hyphenated; never contains `,`).
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Everything one peer needs to run its side of a transfer.
#[derive(Debug)]
pub struct Invite {
    pub key: TransferKey,
    pub session_id: String,
    /// Direction this peer takes.
    pub local_direction: Direction,
}

impl Invite {
    /// Initiator side: fresh key and session id. Returns the invite and the link
    /// to hand to the other peer, whose direction is the opposite of ours.
    pub fn create(local_direction: Direction) -> (Self, ShareLink) {
        let (key, exported_key) = key::generate();
        let session_id = new_session_id();
        let link = ShareLink {
            exported_key,
            session_id: session_id.clone(),
            direction: local_direction.opposite(),
        };
        (
            Self {
                key,
                session_id,
                local_direction,
            },
            link,
        )
    }

    /// Recipient side: import the key before anything touches the network.
    pub fn accept(link: &ShareLink) -> Result<Self, LinkError> {
        let key = link.import_key()?;
        Ok(Self {
            key,
            session_id: link.session_id.clone(),
            local_direction: link.direction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::EXPORTED_KEY_LEN;

    fn sample() -> ShareLink {
        ShareLink {
            exported_key: "A".repeat(EXPORTED_KEY_LEN),
            session_id: "5f0c8c3e-7a51-4b8e-9d43-0e2a6f1b9c77".to_string(),
            direction: Direction::Receive,
        }
    }

    #[test]
    fn fragment_format_is_exact() {
        let link = sample();
        assert_eq!(
            link.to_fragment(),
            format!(
                "#{},5f0c8c3e-7a51-4b8e-9d43-0e2a6f1b9c77,R",
                "A".repeat(EXPORTED_KEY_LEN)
            )
        );
        assert_eq!(
            link.to_url("https://example.com/"),
            format!("https://example.com/{}", link.to_fragment())
        );
    }

    #[test]
    fn parse_accepts_fragment_bare_and_url() {
        let link = sample();
        let fragment = link.to_fragment();
        assert_eq!(ShareLink::parse(&fragment).unwrap(), link);
        assert_eq!(ShareLink::parse(&fragment[1..]).unwrap(), link);
        assert_eq!(
            ShareLink::parse(&link.to_url("https://example.com")).unwrap(),
            link
        );
    }

    #[test]
    fn parse_rejects_bad_direction() {
        let key = "A".repeat(EXPORTED_KEY_LEN);
        for dir in ["X", "s", "SR", ""] {
            let r = ShareLink::parse(&format!("#{key},abc,{dir}"));
            assert!(matches!(r, Err(LinkError::InvalidDirection(_))), "{dir}");
        }
    }

    #[test]
    fn parse_rejects_missing_and_extra_fields() {
        assert!(matches!(
            ShareLink::parse("#"),
            Err(LinkError::MissingField("key"))
        ));
        assert!(matches!(
            ShareLink::parse("#key"),
            Err(LinkError::MissingField("session id"))
        ));
        assert!(matches!(
            ShareLink::parse("#key,abc"),
            Err(LinkError::MissingField("direction"))
        ));
        assert!(matches!(
            ShareLink::parse("#key,,S"),
            Err(LinkError::EmptySessionId)
        ));
        assert!(matches!(
            ShareLink::parse("#key,abc,S,extra"),
            Err(LinkError::UnexpectedField)
        ));
    }

    #[test]
    fn invite_link_carries_opposite_direction() {
        let (invite, link) = Invite::create(Direction::Send);
        assert_eq!(invite.local_direction, Direction::Send);
        assert_eq!(link.direction, Direction::Receive);
        assert_eq!(link.session_id, invite.session_id);
        assert!(!invite.session_id.contains(','));

        let accepted = Invite::accept(&ShareLink::parse(&link.to_fragment()).unwrap()).unwrap();
        assert_eq!(accepted.key.as_bytes(), invite.key.as_bytes());
        assert_eq!(accepted.local_direction, Direction::Receive);
        assert_eq!(accepted.session_id, invite.session_id);
    }

    #[test]
    fn accept_rejects_malformed_key() {
        let link = ShareLink::parse("#not-a-key,abc,S").unwrap();
        assert!(matches!(
            Invite::accept(&link),
            Err(LinkError::InvalidKey(KeyError::InvalidKeyFormat(_)))
        ));
    }

    #[test]
    fn debug_hides_key() {
        let link = sample();
        assert!(!format!("{link:?}").contains(&link.exported_key));
    }
}
