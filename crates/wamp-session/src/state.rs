//! Session lifecycle states, the legal edges between them, and which inbound
//! message types each state accepts.

use std::fmt;

use wamp_core::MessageType;

/// Which side of the handshake a session plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Initiator: sends HELLO.
    Active,
    /// Acceptor: answers HELLO.
    Passive,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Passive => "passive",
        })
    }
}

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Created, nothing exchanged yet.
    Init,
    /// Active: HELLO sent.
    SentHello,
    /// Active: CHALLENGE received.
    RecvChallenge,
    /// Active: AUTHENTICATE sent.
    SentAuth,
    /// Passive: HELLO received.
    RecvHello,
    /// Passive: CHALLENGE sent.
    SentChallenge,
    /// Passive: AUTHENTICATE received.
    RecvAuth,
    /// Handshake complete; RPC and pub/sub allowed.
    Open,
    /// GOODBYE exchanged; teardown in progress.
    Closing,
    /// Terminal.
    Closed,
}

impl SessionState {
    /// Wire-log name of the state.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::SentHello => "sent_hello",
            Self::RecvChallenge => "recv_challenge",
            Self::SentAuth => "sent_auth",
            Self::RecvHello => "recv_hello",
            Self::SentChallenge => "sent_challenge",
            Self::RecvAuth => "recv_auth",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    /// Whether `next` is a legal successor of `self`.
    pub const fn can_transition_to(self, next: Self) -> bool {
        use SessionState::{
            Closed, Closing, Init, Open, RecvAuth, RecvChallenge, RecvHello, SentAuth,
            SentChallenge, SentHello,
        };
        matches!(
            (self, next),
            (Init, SentHello | RecvHello | Closed)
                | (SentHello, RecvChallenge | Open | Closed)
                | (RecvChallenge, SentAuth | Closed)
                | (SentAuth, Open | Closed)
                | (RecvHello, SentChallenge | Open | Closed)
                | (SentChallenge, RecvAuth | Closed)
                | (RecvAuth, Open | Closed)
                | (Open, Closing | Closed)
                | (Closing, Closed)
        )
    }

    /// Handshake in progress (including `Init`).
    pub const fn is_pending_open(self) -> bool {
        matches!(
            self,
            Self::Init
                | Self::SentHello
                | Self::RecvChallenge
                | Self::SentAuth
                | Self::RecvHello
                | Self::SentChallenge
                | Self::RecvAuth
        )
    }

    /// `Closing` or `Closed`.
    pub const fn is_terminating(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }

    /// Whether an inbound message of type `ty` is legal in this state.
    ///
    /// `Closing` and `Closed` accept nothing; the dispatcher drops frames in
    /// those states before asking.
    pub fn permits(self, role: Role, ty: MessageType) -> bool {
        use MessageType as T;
        match self {
            Self::Init => role == Role::Passive && ty == T::Hello,
            Self::SentHello => matches!(ty, T::Welcome | T::Challenge | T::Abort),
            Self::SentAuth => matches!(ty, T::Welcome | T::Abort),
            Self::SentChallenge => matches!(ty, T::Authenticate | T::Abort),
            Self::RecvHello | Self::RecvChallenge | Self::RecvAuth => ty == T::Abort,
            Self::Open => !ty.is_handshake(),
            Self::Closing | Self::Closed => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
