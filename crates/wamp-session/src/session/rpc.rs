//! RPC and pub/sub: the outbound API and the open-state message handlers.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use serde_json::Value;
use tracing::{debug, info, trace, warn};
use wamp_core::{Dict, Message, MessageType, WampArgs, uri};

use super::{Session, Teardown};
use crate::errors::SessionError;
use crate::reply::Reply;
use crate::server::ServerHandler;
use crate::state::SessionState;
use crate::tables::{
    PendingCall, PendingRegister, PendingRemoval, PendingSubscribe, Procedure, Subscription,
};
use crate::types::{AckCallback, CallResult, ErrorReply, Event, Invocation, RequestId};

impl Session {
    // ── Outbound: callee / subscriber ───────────────────────────────────

    /// Register `procedure`. `handler` runs for each INVOCATION once the
    /// router acknowledged; `ack` receives the registration id or the error.
    pub fn provide<H, A>(
        &self,
        procedure: impl Into<String>,
        options: Dict,
        handler: H,
        ack: A,
    ) -> Result<RequestId, SessionError>
    where
        H: Fn(Invocation) + Send + Sync + 'static,
        A: FnOnce(Result<u64, ErrorReply>) + Send + 'static,
    {
        let procedure = procedure.into();
        let name = procedure.clone();
        self.request(
            |request_id| Message::Register {
                request_id,
                options,
                procedure: name,
            },
            |pending, request_id| {
                let _ = pending.registers.insert(
                    request_id,
                    PendingRegister {
                        procedure,
                        handler: Arc::new(handler),
                        ack: Box::new(ack),
                    },
                );
            },
        )
    }

    /// Withdraw a registration. `ack` receives the registration id.
    pub fn unprovide<A>(&self, registration_id: u64, ack: A) -> Result<RequestId, SessionError>
    where
        A: FnOnce(Result<u64, ErrorReply>) + Send + 'static,
    {
        self.request(
            |request_id| Message::Unregister {
                request_id,
                registration_id,
            },
            |pending, request_id| {
                let _ = pending.unregisters.insert(
                    request_id,
                    PendingRemoval {
                        id: registration_id,
                        ack: Box::new(ack),
                    },
                );
            },
        )
    }

    /// Subscribe to `topic`. `handler` runs for each EVENT once the router
    /// acknowledged; `ack` receives the subscription id or the error.
    pub fn subscribe<H, A>(
        &self,
        topic: impl Into<String>,
        options: Dict,
        handler: H,
        ack: A,
    ) -> Result<RequestId, SessionError>
    where
        H: Fn(Event) + Send + Sync + 'static,
        A: FnOnce(Result<u64, ErrorReply>) + Send + 'static,
    {
        let topic = topic.into();
        let name = topic.clone();
        self.request(
            |request_id| Message::Subscribe {
                request_id,
                options,
                topic: name,
            },
            |pending, request_id| {
                let _ = pending.subscribes.insert(
                    request_id,
                    PendingSubscribe {
                        topic,
                        handler: Arc::new(handler),
                        ack: Box::new(ack),
                    },
                );
            },
        )
    }

    /// Drop a subscription. `ack` receives the subscription id.
    pub fn unsubscribe<A>(&self, subscription_id: u64, ack: A) -> Result<RequestId, SessionError>
    where
        A: FnOnce(Result<u64, ErrorReply>) + Send + 'static,
    {
        self.request(
            |request_id| Message::Unsubscribe {
                request_id,
                subscription_id,
            },
            |pending, request_id| {
                let _ = pending.unsubscribes.insert(
                    request_id,
                    PendingRemoval {
                        id: subscription_id,
                        ack: Box::new(ack),
                    },
                );
            },
        )
    }

    // ── Outbound: caller / publisher ────────────────────────────────────

    /// Call `procedure`. `on_result` fires exactly once: with the RESULT,
    /// the ERROR, or `wamp.error.session_closed` if the session closes first.
    pub fn call<F>(
        &self,
        procedure: impl Into<String>,
        options: Dict,
        args: WampArgs,
        on_result: F,
    ) -> Result<RequestId, SessionError>
    where
        F: FnOnce(CallResult) + Send + 'static,
    {
        let procedure = procedure.into();
        let name = procedure.clone();
        self.request(
            |request_id| Message::Call {
                request_id,
                options,
                procedure: name,
                args,
            },
            |pending, request_id| {
                let _ = pending.calls.insert(
                    request_id,
                    PendingCall {
                        procedure,
                        callback: Box::new(on_result),
                    },
                );
            },
        )
    }

    /// Publish to `topic`. Nothing is tracked; with `acknowledge: true` in
    /// `options`, the router's PUBLISHED or ERROR is logged.
    pub fn publish(
        &self,
        topic: impl Into<String>,
        options: Dict,
        args: WampArgs,
    ) -> Result<RequestId, SessionError> {
        let topic = topic.into();
        self.request(
            |request_id| Message::Publish {
                request_id,
                options,
                topic,
                args,
            },
            |_, _| {},
        )
    }

    // ── Outbound: router side ───────────────────────────────────────────

    /// Forward a call to the callee on this session as INVOCATION.
    /// `on_reply` receives the YIELD payload or the callee's ERROR; it is
    /// dropped unanswered if the session closes first.
    pub fn invocation<F>(
        &self,
        registration_id: u64,
        details: Dict,
        args: WampArgs,
        on_reply: F,
    ) -> Result<RequestId, SessionError>
    where
        F: FnOnce(Result<WampArgs, ErrorReply>) + Send + 'static,
    {
        self.request(
            |request_id| Message::Invocation {
                request_id,
                registration_id,
                details,
                args,
            },
            |pending, request_id| {
                let _ = pending.invocations.insert(request_id, Box::new(on_reply));
            },
        )
    }

    /// Deliver a publication to a subscriber on this session.
    pub fn event(
        &self,
        subscription_id: u64,
        publication_id: u64,
        details: Dict,
        args: WampArgs,
    ) -> Result<(), SessionError> {
        let _span = self.span.enter();
        self.send_if_open(&Message::Event {
            subscription_id,
            publication_id,
            details,
            args,
        })
    }

    // ── Inbound ─────────────────────────────────────────────────────────

    /// Route a message received while open.
    pub(super) fn handle_open(&self, message: Message) -> Result<(), SessionError> {
        match message {
            Message::Goodbye { reason, .. } => {
                info!(%reason, "peer said goodbye");
                if self
                    .transition(SessionState::Open, SessionState::Closing)
                    .is_ok()
                {
                    self.send_quietly(&Message::goodbye(uri::GOODBYE_AND_OUT));
                }
                self.shutdown(Teardown::Local);
                Ok(())
            }
            Message::Heartbeat { outgoing_seq, .. } => {
                self.heartbeats_in.store(outgoing_seq, Ordering::Relaxed);
                trace!(seq = outgoing_seq, "heartbeat");
                Ok(())
            }
            Message::Error {
                request_type,
                request_id,
                details,
                error,
                args,
            } => self.on_error(request_type, request_id, details, error, args),

            // replies to our requests
            Message::Result {
                request_id,
                details,
                args,
            } => {
                self.on_result(request_id, details, args);
                Ok(())
            }
            Message::Registered {
                request_id,
                registration_id,
            } => {
                self.on_registered(request_id, registration_id);
                Ok(())
            }
            Message::Subscribed {
                request_id,
                subscription_id,
            } => {
                self.on_subscribed(request_id, subscription_id);
                Ok(())
            }
            Message::Unregistered { request_id } => {
                self.on_unregistered(request_id);
                Ok(())
            }
            Message::Unsubscribed { request_id } => {
                self.on_unsubscribed(request_id);
                Ok(())
            }
            Message::Published {
                request_id,
                publication_id,
            } => {
                debug!(request_id, publication_id, "publication acknowledged");
                Ok(())
            }
            Message::Yield {
                request_id, args, ..
            } => {
                self.on_yield(request_id, args);
                Ok(())
            }

            // deliveries to our registrations and subscriptions
            Message::Invocation {
                request_id,
                registration_id,
                details,
                args,
            } => self.on_invocation(request_id, registration_id, details, args),
            Message::Event {
                subscription_id,
                publication_id,
                details,
                args,
            } => {
                self.on_event(subscription_id, publication_id, details, args);
                Ok(())
            }

            // router side
            Message::Call {
                request_id,
                options,
                procedure,
                args,
            } => {
                self.on_call(request_id, &procedure, options, args);
                Ok(())
            }
            Message::Publish {
                request_id,
                options,
                topic,
                args,
            } => self.on_publish(request_id, &topic, &options, args),
            Message::Register {
                request_id,
                options,
                procedure,
            } => {
                let outcome = self.route(|s| s.inbound_register(self, &procedure, &options));
                self.answer(
                    outcome,
                    |registration_id| Message::Registered {
                        request_id,
                        registration_id,
                    },
                    MessageType::Register,
                    request_id,
                )
            }
            Message::Subscribe {
                request_id,
                options,
                topic,
            } => {
                let outcome = self.route(|s| s.inbound_subscribe(self, &topic, &options));
                self.answer(
                    outcome,
                    |subscription_id| Message::Subscribed {
                        request_id,
                        subscription_id,
                    },
                    MessageType::Subscribe,
                    request_id,
                )
            }
            Message::Unregister {
                request_id,
                registration_id,
            } => {
                let outcome = self.route(|s| s.inbound_unregister(self, registration_id));
                self.answer(
                    outcome,
                    |()| Message::Unregistered { request_id },
                    MessageType::Unregister,
                    request_id,
                )
            }
            Message::Unsubscribe {
                request_id,
                subscription_id,
            } => {
                let outcome = self.route(|s| s.inbound_unsubscribe(self, subscription_id));
                self.answer(
                    outcome,
                    |()| Message::Unsubscribed { request_id },
                    MessageType::Unsubscribe,
                    request_id,
                )
            }

            handshake => Err(SessionError::Protocol(format!(
                "{} after session opened",
                handshake.message_type()
            ))),
        }
    }

    // ── Replies to our requests ─────────────────────────────────────────
    //
    // Each reply takes the gate before looking up its pending entry and
    // holds it through delivery. Teardown drains `pending` before it
    // disables the gate, so an entry is either found here and delivered,
    // or drained and canceled there.

    /// Run a reply under the gate; nothing is looked up once it is closed.
    fn deliver(&self, kind: MessageType, request_id: RequestId, f: impl FnOnce()) {
        if self.gate.invoke(f).is_none() {
            debug!(%kind, request_id, "callbacks disabled, reply left pending");
        }
    }

    fn on_result(&self, request_id: RequestId, details: Dict, args: WampArgs) {
        self.deliver(MessageType::Result, request_id, || {
            let pending = self.pending.lock().calls.remove(&request_id);
            let Some(call) = pending else {
                warn!(request_id, "RESULT for unknown request");
                return;
            };
            (call.callback)(CallResult {
                request_id,
                procedure: call.procedure,
                details,
                args,
                error: None,
            });
        });
    }

    fn on_registered(&self, request_id: RequestId, registration_id: u64) {
        self.deliver(MessageType::Registered, request_id, || {
            let pending = self.pending.lock().registers.remove(&request_id);
            let Some(reg) = pending else {
                warn!(request_id, "REGISTERED for unknown request");
                return;
            };
            debug!(registration_id, procedure = %reg.procedure, "procedure registered");
            let replaced = {
                let mut registry = self.registry.lock();
                if self.is_open() {
                    registry.procedures.insert(
                        registration_id,
                        Procedure {
                            uri: reg.procedure,
                            handler: reg.handler,
                        },
                    )
                } else {
                    None
                }
            };
            drop(replaced);
            self.acknowledge(reg.ack, registration_id);
        });
    }

    fn on_subscribed(&self, request_id: RequestId, subscription_id: u64) {
        self.deliver(MessageType::Subscribed, request_id, || {
            let pending = self.pending.lock().subscribes.remove(&request_id);
            let Some(sub) = pending else {
                warn!(request_id, "SUBSCRIBED for unknown request");
                return;
            };
            debug!(subscription_id, topic = %sub.topic, "topic subscribed");
            let replaced = {
                let mut registry = self.registry.lock();
                if self.is_open() {
                    registry.subscriptions.insert(
                        subscription_id,
                        Subscription {
                            topic: sub.topic,
                            handler: sub.handler,
                        },
                    )
                } else {
                    None
                }
            };
            drop(replaced);
            self.acknowledge(sub.ack, subscription_id);
        });
    }

    fn on_unregistered(&self, request_id: RequestId) {
        self.deliver(MessageType::Unregistered, request_id, || {
            let pending = self.pending.lock().unregisters.remove(&request_id);
            let Some(removal) = pending else {
                warn!(request_id, "UNREGISTERED for unknown request");
                return;
            };
            let removed = self.registry.lock().procedures.remove(&removal.id);
            if let Some(procedure) = &removed {
                debug!(
                    registration_id = removal.id,
                    procedure = %procedure.uri,
                    "procedure unregistered"
                );
            }
            drop(removed);
            self.acknowledge(removal.ack, removal.id);
        });
    }

    fn on_unsubscribed(&self, request_id: RequestId) {
        self.deliver(MessageType::Unsubscribed, request_id, || {
            let pending = self.pending.lock().unsubscribes.remove(&request_id);
            let Some(removal) = pending else {
                warn!(request_id, "UNSUBSCRIBED for unknown request");
                return;
            };
            let removed = self.registry.lock().subscriptions.remove(&removal.id);
            if let Some(subscription) = &removed {
                debug!(
                    subscription_id = removal.id,
                    topic = %subscription.topic,
                    "topic unsubscribed"
                );
            }
            drop(removed);
            self.acknowledge(removal.ack, removal.id);
        });
    }

    /// Deliver a successful ack, or the closed error if the session stopped
    /// being open meanwhile. Called with the gate held.
    fn acknowledge(&self, ack: AckCallback, id: u64) {
        let outcome = if self.is_open() {
            Ok(id)
        } else {
            Err(ErrorReply::session_closed())
        };
        ack(outcome);
    }

    fn on_yield(&self, request_id: RequestId, args: WampArgs) {
        self.deliver(MessageType::Yield, request_id, || {
            let pending = self.pending.lock().invocations.remove(&request_id);
            let Some(on_reply) = pending else {
                warn!(request_id, "YIELD for unknown invocation");
                return;
            };
            on_reply(Ok(args));
        });
    }

    fn on_error(
        &self,
        request_type: u64,
        request_id: RequestId,
        details: Dict,
        error: String,
        args: WampArgs,
    ) -> Result<(), SessionError> {
        let kind = MessageType::from_code(request_type).ok_or_else(|| {
            SessionError::Protocol(format!("ERROR for unknown request type {request_type}"))
        })?;
        debug!(%kind, request_id, %error, "error reply");

        match kind {
            MessageType::Call => self.deliver(kind, request_id, || {
                let pending = self.pending.lock().calls.remove(&request_id);
                let Some(call) = pending else {
                    warn!(request_id, "ERROR for unknown call");
                    return;
                };
                (call.callback)(CallResult {
                    request_id,
                    procedure: call.procedure,
                    details,
                    args,
                    error: Some(error),
                });
            }),
            MessageType::Invocation => self.deliver(kind, request_id, || {
                let pending = self.pending.lock().invocations.remove(&request_id);
                let Some(on_reply) = pending else {
                    warn!(request_id, "ERROR for unknown invocation");
                    return;
                };
                on_reply(Err(ErrorReply::with_args(error, args)));
            }),
            MessageType::Publish => warn!(request_id, %error, "publication rejected"),
            MessageType::Register
            | MessageType::Subscribe
            | MessageType::Unregister
            | MessageType::Unsubscribe => self.deliver(kind, request_id, || {
                let ack = {
                    let mut pending = self.pending.lock();
                    match kind {
                        MessageType::Register => {
                            pending.registers.remove(&request_id).map(|p| p.ack)
                        }
                        MessageType::Subscribe => {
                            pending.subscribes.remove(&request_id).map(|p| p.ack)
                        }
                        MessageType::Unregister => {
                            pending.unregisters.remove(&request_id).map(|p| p.ack)
                        }
                        _ => pending.unsubscribes.remove(&request_id).map(|p| p.ack),
                    }
                };
                match ack {
                    Some(ack) => ack(Err(ErrorReply::with_args(error, args))),
                    None => warn!(%kind, request_id, "ERROR for unknown request"),
                }
            }),
            other => return Err(SessionError::Protocol(format!("ERROR for {other}"))),
        }
        Ok(())
    }

    // ── Deliveries ──────────────────────────────────────────────────────

    fn on_invocation(
        &self,
        request_id: RequestId,
        registration_id: u64,
        details: Dict,
        args: WampArgs,
    ) -> Result<(), SessionError> {
        let handler = self.registry.lock().procedure_handler(registration_id);
        let Some(handler) = handler else {
            warn!(registration_id, "INVOCATION for unknown registration");
            return self.send(&Message::error(
                MessageType::Invocation,
                request_id,
                uri::NO_SUCH_REGISTRATION,
                WampArgs::new(),
            ));
        };
        let invocation = Invocation {
            registration_id,
            request_id,
            details,
            args,
            reply: Reply::for_invocation(self.handle(), request_id),
        };
        self.gate.run(move || handler(invocation));
        Ok(())
    }

    fn on_event(&self, subscription_id: u64, publication_id: u64, details: Dict, args: WampArgs) {
        let handler = self.registry.lock().event_handler(subscription_id);
        let Some(handler) = handler else {
            warn!(subscription_id, "EVENT for unknown subscription");
            return;
        };
        let event = Event {
            subscription_id,
            publication_id,
            details,
            args,
        };
        self.gate.run(move || handler(event));
    }

    // ── Router side ─────────────────────────────────────────────────────

    /// Run a router hook through the gate. `None` when callbacks are off.
    fn route<T>(&self, f: impl FnOnce(&dyn ServerHandler) -> T) -> Option<T> {
        let server = Arc::clone(&self.server);
        self.gate.invoke(|| f(server.as_ref()))
    }

    /// Send the router's verdict on a request: `ok` builds the success
    /// reply, a rejection becomes ERROR.
    fn answer<T>(
        &self,
        outcome: Option<Result<T, ErrorReply>>,
        ok: impl FnOnce(T) -> Message,
        request_type: MessageType,
        request_id: RequestId,
    ) -> Result<(), SessionError> {
        let message = match outcome {
            None => {
                debug!(%request_type, request_id, "callbacks disabled, request unanswered");
                return Ok(());
            }
            Some(Ok(value)) => ok(value),
            Some(Err(e)) => Message::error(request_type, request_id, e.uri, e.args),
        };
        self.send_if_open(&message)
    }

    fn on_call(&self, request_id: RequestId, procedure: &str, options: Dict, args: WampArgs) {
        let reply = Reply::for_call(self.handle(), request_id);
        let server = Arc::clone(&self.server);
        self.gate
            .run(move || server.inbound_call(self, procedure, options, args, reply));
    }

    fn on_publish(
        &self,
        request_id: RequestId,
        topic: &str,
        options: &Dict,
        args: WampArgs,
    ) -> Result<(), SessionError> {
        let acknowledge = options
            .get("acknowledge")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let outcome = self.route(|s| s.inbound_publish(self, topic, options, args));
        if !acknowledge {
            if let Some(Err(e)) = outcome {
                debug!(request_id, %topic, error = %e, "publication rejected");
            }
            return Ok(());
        }
        self.answer(
            outcome,
            |publication_id| Message::Published {
                request_id,
                publication_id,
            },
            MessageType::Publish,
            request_id,
        )
    }
}
