//! WAMP v2 message catalogue.
//!
//! A message travels as a JSON array whose first element is the integer type
//! code; the remaining elements are positional and defined per type. This
//! module converts between that array form and the typed [`Message`] enum.
//!
//! Trailing `Arguments|list` and `ArgumentsKw|dict` elements are optional on
//! the types that carry a payload and are represented by [`WampArgs`].

use std::fmt;

use serde_json::{Map, Value};

use crate::errors::DecodeError;

/// JSON object used for options, details and extras.
pub type Dict = Map<String, Value>;

// ─────────────────────────────────────────────────────────────────────────────
// MessageType
// ─────────────────────────────────────────────────────────────────────────────

/// Message type codes of the supported catalogue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// `[1, Realm, Details]`
    Hello,
    /// `[2, Session, Details]`
    Welcome,
    /// `[3, Details, Reason]`
    Abort,
    /// `[4, AuthMethod, Extra]`
    Challenge,
    /// `[5, Signature, Extra]`
    Authenticate,
    /// `[6, Details, Reason]`
    Goodbye,
    /// `[7, IncomingSeq, OutgoingSeq, Discard?]`
    Heartbeat,
    /// `[8, RequestType, Request, Details, Error, Args?, Kwargs?]`
    Error,
    /// `[16, Request, Options, Topic, Args?, Kwargs?]`
    Publish,
    /// `[17, Request, Publication]`
    Published,
    /// `[32, Request, Options, Topic]`
    Subscribe,
    /// `[33, Request, Subscription]`
    Subscribed,
    /// `[34, Request, Subscription]`
    Unsubscribe,
    /// `[35, Request]`
    Unsubscribed,
    /// `[36, Subscription, Publication, Details, Args?, Kwargs?]`
    Event,
    /// `[48, Request, Options, Procedure, Args?, Kwargs?]`
    Call,
    /// `[50, Request, Details, Args?, Kwargs?]`
    Result,
    /// `[64, Request, Options, Procedure]`
    Register,
    /// `[65, Request, Registration]`
    Registered,
    /// `[66, Request, Registration]`
    Unregister,
    /// `[67, Request]`
    Unregistered,
    /// `[68, Request, Registration, Details, Args?, Kwargs?]`
    Invocation,
    /// `[70, Request, Options, Args?, Kwargs?]`
    Yield,
}

impl MessageType {
    /// Wire code for this type.
    pub const fn code(self) -> u64 {
        match self {
            Self::Hello => 1,
            Self::Welcome => 2,
            Self::Abort => 3,
            Self::Challenge => 4,
            Self::Authenticate => 5,
            Self::Goodbye => 6,
            Self::Heartbeat => 7,
            Self::Error => 8,
            Self::Publish => 16,
            Self::Published => 17,
            Self::Subscribe => 32,
            Self::Subscribed => 33,
            Self::Unsubscribe => 34,
            Self::Unsubscribed => 35,
            Self::Event => 36,
            Self::Call => 48,
            Self::Result => 50,
            Self::Register => 64,
            Self::Registered => 65,
            Self::Unregister => 66,
            Self::Unregistered => 67,
            Self::Invocation => 68,
            Self::Yield => 70,
        }
    }

    /// Look up a type by wire code.
    pub const fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            1 => Self::Hello,
            2 => Self::Welcome,
            3 => Self::Abort,
            4 => Self::Challenge,
            5 => Self::Authenticate,
            6 => Self::Goodbye,
            7 => Self::Heartbeat,
            8 => Self::Error,
            16 => Self::Publish,
            17 => Self::Published,
            32 => Self::Subscribe,
            33 => Self::Subscribed,
            34 => Self::Unsubscribe,
            35 => Self::Unsubscribed,
            36 => Self::Event,
            48 => Self::Call,
            50 => Self::Result,
            64 => Self::Register,
            65 => Self::Registered,
            66 => Self::Unregister,
            67 => Self::Unregistered,
            68 => Self::Invocation,
            70 => Self::Yield,
            _ => return None,
        })
    }

    /// Whether this type belongs to session establishment.
    pub const fn is_handshake(self) -> bool {
        matches!(
            self,
            Self::Hello | Self::Welcome | Self::Abort | Self::Challenge | Self::Authenticate
        )
    }

    /// Upper-case protocol name, as used in logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Hello => "HELLO",
            Self::Welcome => "WELCOME",
            Self::Abort => "ABORT",
            Self::Challenge => "CHALLENGE",
            Self::Authenticate => "AUTHENTICATE",
            Self::Goodbye => "GOODBYE",
            Self::Heartbeat => "HEARTBEAT",
            Self::Error => "ERROR",
            Self::Publish => "PUBLISH",
            Self::Published => "PUBLISHED",
            Self::Subscribe => "SUBSCRIBE",
            Self::Subscribed => "SUBSCRIBED",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Unsubscribed => "UNSUBSCRIBED",
            Self::Event => "EVENT",
            Self::Call => "CALL",
            Self::Result => "RESULT",
            Self::Register => "REGISTER",
            Self::Registered => "REGISTERED",
            Self::Unregister => "UNREGISTER",
            Self::Unregistered => "UNREGISTERED",
            Self::Invocation => "INVOCATION",
            Self::Yield => "YIELD",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WampArgs
// ─────────────────────────────────────────────────────────────────────────────

/// Positional and keyword payload of a call, result, event or error.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WampArgs {
    /// `Arguments|list`.
    pub args: Vec<Value>,
    /// `ArgumentsKw|dict`.
    pub kwargs: Dict,
}

impl WampArgs {
    /// Empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Positional-only payload.
    pub fn list(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: Dict::new(),
        }
    }

    /// Attach keyword arguments.
    #[must_use]
    pub fn with_kwargs(mut self, kwargs: Dict) -> Self {
        self.kwargs = kwargs;
        self
    }

    /// True when neither list nor dict carries anything.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }

    /// Append the optional tail; a dict is always preceded by a list.
    fn append_to(&self, frame: &mut Vec<Value>) {
        if !self.kwargs.is_empty() {
            frame.push(Value::Array(self.args.clone()));
            frame.push(Value::Object(self.kwargs.clone()));
        } else if !self.args.is_empty() {
            frame.push(Value::Array(self.args.clone()));
        }
    }
}

impl From<Vec<Value>> for WampArgs {
    fn from(args: Vec<Value>) -> Self {
        Self::list(args)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded protocol message.
#[derive(Clone, Debug, PartialEq)]
#[allow(missing_docs)]
pub enum Message {
    Hello {
        realm: String,
        details: Dict,
    },
    Welcome {
        session_id: u64,
        details: Dict,
    },
    Abort {
        details: Dict,
        reason: String,
    },
    Challenge {
        auth_method: String,
        extra: Dict,
    },
    Authenticate {
        signature: String,
        extra: Dict,
    },
    Goodbye {
        details: Dict,
        reason: String,
    },
    Heartbeat {
        incoming_seq: u64,
        outgoing_seq: u64,
    },
    Error {
        request_type: u64,
        request_id: u64,
        details: Dict,
        error: String,
        args: WampArgs,
    },
    Publish {
        request_id: u64,
        options: Dict,
        topic: String,
        args: WampArgs,
    },
    Published {
        request_id: u64,
        publication_id: u64,
    },
    Subscribe {
        request_id: u64,
        options: Dict,
        topic: String,
    },
    Subscribed {
        request_id: u64,
        subscription_id: u64,
    },
    Unsubscribe {
        request_id: u64,
        subscription_id: u64,
    },
    Unsubscribed {
        request_id: u64,
    },
    Event {
        subscription_id: u64,
        publication_id: u64,
        details: Dict,
        args: WampArgs,
    },
    Call {
        request_id: u64,
        options: Dict,
        procedure: String,
        args: WampArgs,
    },
    Result {
        request_id: u64,
        details: Dict,
        args: WampArgs,
    },
    Register {
        request_id: u64,
        options: Dict,
        procedure: String,
    },
    Registered {
        request_id: u64,
        registration_id: u64,
    },
    Unregister {
        request_id: u64,
        registration_id: u64,
    },
    Unregistered {
        request_id: u64,
    },
    Invocation {
        request_id: u64,
        registration_id: u64,
        details: Dict,
        args: WampArgs,
    },
    Yield {
        request_id: u64,
        options: Dict,
        args: WampArgs,
    },
}

impl Message {
    /// Type code of this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Hello { .. } => MessageType::Hello,
            Self::Welcome { .. } => MessageType::Welcome,
            Self::Abort { .. } => MessageType::Abort,
            Self::Challenge { .. } => MessageType::Challenge,
            Self::Authenticate { .. } => MessageType::Authenticate,
            Self::Goodbye { .. } => MessageType::Goodbye,
            Self::Heartbeat { .. } => MessageType::Heartbeat,
            Self::Error { .. } => MessageType::Error,
            Self::Publish { .. } => MessageType::Publish,
            Self::Published { .. } => MessageType::Published,
            Self::Subscribe { .. } => MessageType::Subscribe,
            Self::Subscribed { .. } => MessageType::Subscribed,
            Self::Unsubscribe { .. } => MessageType::Unsubscribe,
            Self::Unsubscribed { .. } => MessageType::Unsubscribed,
            Self::Event { .. } => MessageType::Event,
            Self::Call { .. } => MessageType::Call,
            Self::Result { .. } => MessageType::Result,
            Self::Register { .. } => MessageType::Register,
            Self::Registered { .. } => MessageType::Registered,
            Self::Unregister { .. } => MessageType::Unregister,
            Self::Unregistered { .. } => MessageType::Unregistered,
            Self::Invocation { .. } => MessageType::Invocation,
            Self::Yield { .. } => MessageType::Yield,
        }
    }

    /// Build an ERROR reply to a request.
    pub fn error(
        request_type: MessageType,
        request_id: u64,
        error: impl Into<String>,
        args: WampArgs,
    ) -> Self {
        Self::Error {
            request_type: request_type.code(),
            request_id,
            details: Dict::new(),
            error: error.into(),
            args,
        }
    }

    /// Build an ABORT carrying a human-readable `message` detail.
    pub fn abort(reason: impl Into<String>, message: impl Into<String>) -> Self {
        let mut details = Dict::new();
        let _ = details.insert("message".into(), Value::String(message.into()));
        Self::Abort {
            details,
            reason: reason.into(),
        }
    }

    /// Build a GOODBYE with empty details.
    pub fn goodbye(reason: impl Into<String>) -> Self {
        Self::Goodbye {
            details: Dict::new(),
            reason: reason.into(),
        }
    }

    /// Encode into the positional array form.
    pub fn to_frame(&self) -> Vec<Value> {
        let code = Value::from(self.message_type().code());
        match self {
            Self::Hello { realm, details } => {
                vec![code, Value::from(realm.as_str()), obj(details)]
            }
            Self::Welcome {
                session_id,
                details,
            } => vec![code, Value::from(*session_id), obj(details)],
            Self::Abort { details, reason } | Self::Goodbye { details, reason } => {
                vec![code, obj(details), Value::from(reason.as_str())]
            }
            Self::Challenge { auth_method, extra } => {
                vec![code, Value::from(auth_method.as_str()), obj(extra)]
            }
            Self::Authenticate { signature, extra } => {
                vec![code, Value::from(signature.as_str()), obj(extra)]
            }
            Self::Heartbeat {
                incoming_seq,
                outgoing_seq,
            } => vec![code, Value::from(*incoming_seq), Value::from(*outgoing_seq)],
            Self::Error {
                request_type,
                request_id,
                details,
                error,
                args,
            } => {
                let mut frame = vec![
                    code,
                    Value::from(*request_type),
                    Value::from(*request_id),
                    obj(details),
                    Value::from(error.as_str()),
                ];
                args.append_to(&mut frame);
                frame
            }
            Self::Publish {
                request_id,
                options,
                topic,
                args,
            } => {
                let mut frame = vec![
                    code,
                    Value::from(*request_id),
                    obj(options),
                    Value::from(topic.as_str()),
                ];
                args.append_to(&mut frame);
                frame
            }
            Self::Call {
                request_id,
                options,
                procedure,
                args,
            } => {
                let mut frame = vec![
                    code,
                    Value::from(*request_id),
                    obj(options),
                    Value::from(procedure.as_str()),
                ];
                args.append_to(&mut frame);
                frame
            }
            Self::Published {
                request_id,
                publication_id: second,
            }
            | Self::Subscribed {
                request_id,
                subscription_id: second,
            }
            | Self::Unsubscribe {
                request_id,
                subscription_id: second,
            }
            | Self::Registered {
                request_id,
                registration_id: second,
            }
            | Self::Unregister {
                request_id,
                registration_id: second,
            } => vec![code, Value::from(*request_id), Value::from(*second)],
            Self::Subscribe {
                request_id,
                options,
                topic: uri,
            }
            | Self::Register {
                request_id,
                options,
                procedure: uri,
            } => vec![
                code,
                Value::from(*request_id),
                obj(options),
                Value::from(uri.as_str()),
            ],
            Self::Unsubscribed { request_id } | Self::Unregistered { request_id } => {
                vec![code, Value::from(*request_id)]
            }
            Self::Event {
                subscription_id,
                publication_id,
                details,
                args,
            } => {
                let mut frame = vec![
                    code,
                    Value::from(*subscription_id),
                    Value::from(*publication_id),
                    obj(details),
                ];
                args.append_to(&mut frame);
                frame
            }
            Self::Result {
                request_id,
                details: dict,
                args,
            }
            | Self::Yield {
                request_id,
                options: dict,
                args,
            } => {
                let mut frame = vec![code, Value::from(*request_id), obj(dict)];
                args.append_to(&mut frame);
                frame
            }
            Self::Invocation {
                request_id,
                registration_id,
                details,
                args,
            } => {
                let mut frame = vec![
                    code,
                    Value::from(*request_id),
                    Value::from(*registration_id),
                    obj(details),
                ];
                args.append_to(&mut frame);
                frame
            }
        }
    }

    /// Decode a message array.
    ///
    /// Checks the element count against the type's layout and the JSON type
    /// of every positional element.
    pub fn decode(frame: &[Value]) -> Result<Self, DecodeError> {
        let first = frame.first().ok_or(DecodeError::Empty)?;
        let code = first.as_u64().ok_or(DecodeError::BadTypeCode)?;
        let kind = MessageType::from_code(code).ok_or(DecodeError::UnknownType(code))?;
        let f = Fields { kind, frame };

        let message = match kind {
            MessageType::Hello => {
                f.arity(3, 3)?;
                Self::Hello {
                    realm: f.string(1)?,
                    details: f.dict(2)?,
                }
            }
            MessageType::Welcome => {
                f.arity(3, 3)?;
                Self::Welcome {
                    session_id: f.id(1)?,
                    details: f.dict(2)?,
                }
            }
            MessageType::Abort => {
                f.arity(3, 3)?;
                Self::Abort {
                    details: f.dict(1)?,
                    reason: f.string(2)?,
                }
            }
            MessageType::Challenge => {
                f.arity(3, 3)?;
                Self::Challenge {
                    auth_method: f.string(1)?,
                    extra: f.dict(2)?,
                }
            }
            MessageType::Authenticate => {
                f.arity(3, 3)?;
                Self::Authenticate {
                    signature: f.string(1)?,
                    extra: f.dict(2)?,
                }
            }
            MessageType::Goodbye => {
                f.arity(3, 3)?;
                Self::Goodbye {
                    details: f.dict(1)?,
                    reason: f.string(2)?,
                }
            }
            MessageType::Heartbeat => {
                f.arity(3, 4)?;
                Self::Heartbeat {
                    incoming_seq: f.id(1)?,
                    outgoing_seq: f.id(2)?,
                }
            }
            MessageType::Error => {
                f.arity(5, 7)?;
                Self::Error {
                    request_type: f.id(1)?,
                    request_id: f.id(2)?,
                    details: f.dict(3)?,
                    error: f.string(4)?,
                    args: f.args(5)?,
                }
            }
            MessageType::Publish => {
                f.arity(4, 6)?;
                Self::Publish {
                    request_id: f.id(1)?,
                    options: f.dict(2)?,
                    topic: f.string(3)?,
                    args: f.args(4)?,
                }
            }
            MessageType::Published => {
                f.arity(3, 3)?;
                Self::Published {
                    request_id: f.id(1)?,
                    publication_id: f.id(2)?,
                }
            }
            MessageType::Subscribe => {
                f.arity(4, 4)?;
                Self::Subscribe {
                    request_id: f.id(1)?,
                    options: f.dict(2)?,
                    topic: f.string(3)?,
                }
            }
            MessageType::Subscribed => {
                f.arity(3, 3)?;
                Self::Subscribed {
                    request_id: f.id(1)?,
                    subscription_id: f.id(2)?,
                }
            }
            MessageType::Unsubscribe => {
                f.arity(3, 3)?;
                Self::Unsubscribe {
                    request_id: f.id(1)?,
                    subscription_id: f.id(2)?,
                }
            }
            MessageType::Unsubscribed => {
                f.arity(2, 2)?;
                Self::Unsubscribed {
                    request_id: f.id(1)?,
                }
            }
            MessageType::Event => {
                f.arity(4, 6)?;
                Self::Event {
                    subscription_id: f.id(1)?,
                    publication_id: f.id(2)?,
                    details: f.dict(3)?,
                    args: f.args(4)?,
                }
            }
            MessageType::Call => {
                f.arity(4, 6)?;
                Self::Call {
                    request_id: f.id(1)?,
                    options: f.dict(2)?,
                    procedure: f.string(3)?,
                    args: f.args(4)?,
                }
            }
            MessageType::Result => {
                f.arity(3, 5)?;
                Self::Result {
                    request_id: f.id(1)?,
                    details: f.dict(2)?,
                    args: f.args(3)?,
                }
            }
            MessageType::Register => {
                f.arity(4, 4)?;
                Self::Register {
                    request_id: f.id(1)?,
                    options: f.dict(2)?,
                    procedure: f.string(3)?,
                }
            }
            MessageType::Registered => {
                f.arity(3, 3)?;
                Self::Registered {
                    request_id: f.id(1)?,
                    registration_id: f.id(2)?,
                }
            }
            MessageType::Unregister => {
                f.arity(3, 3)?;
                Self::Unregister {
                    request_id: f.id(1)?,
                    registration_id: f.id(2)?,
                }
            }
            MessageType::Unregistered => {
                f.arity(2, 2)?;
                Self::Unregistered {
                    request_id: f.id(1)?,
                }
            }
            MessageType::Invocation => {
                f.arity(4, 6)?;
                Self::Invocation {
                    request_id: f.id(1)?,
                    registration_id: f.id(2)?,
                    details: f.dict(3)?,
                    args: f.args(4)?,
                }
            }
            MessageType::Yield => {
                f.arity(3, 5)?;
                Self::Yield {
                    request_id: f.id(1)?,
                    options: f.dict(2)?,
                    args: f.args(3)?,
                }
            }
        };
        Ok(message)
    }
}

fn obj(dict: &Dict) -> Value {
    Value::Object(dict.clone())
}

/// Positional accessor that reports failures against the message type.
struct Fields<'a> {
    kind: MessageType,
    frame: &'a [Value],
}

impl Fields<'_> {
    fn arity(&self, min: usize, max: usize) -> Result<(), DecodeError> {
        let got = self.frame.len();
        if got < min || got > max {
            return Err(DecodeError::Arity {
                kind: self.kind,
                min,
                max,
                got,
            });
        }
        Ok(())
    }

    fn wrong(&self, index: usize, expected: &'static str) -> DecodeError {
        DecodeError::FieldType {
            kind: self.kind,
            index,
            expected,
        }
    }

    fn id(&self, index: usize) -> Result<u64, DecodeError> {
        self.frame
            .get(index)
            .and_then(Value::as_u64)
            .ok_or_else(|| self.wrong(index, "unsigned integer"))
    }

    fn string(&self, index: usize) -> Result<String, DecodeError> {
        self.frame
            .get(index)
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| self.wrong(index, "string"))
    }

    fn dict(&self, index: usize) -> Result<Dict, DecodeError> {
        self.frame
            .get(index)
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| self.wrong(index, "object"))
    }

    fn args(&self, start: usize) -> Result<WampArgs, DecodeError> {
        let args = match self.frame.get(start) {
            None => Vec::new(),
            Some(Value::Array(list)) => list.clone(),
            Some(_) => return Err(self.wrong(start, "array")),
        };
        let kwargs = match self.frame.get(start + 1) {
            None => Dict::new(),
            Some(Value::Object(dict)) => dict.clone(),
            Some(_) => return Err(self.wrong(start + 1, "object")),
        };
        Ok(WampArgs { args, kwargs })
    }
}
