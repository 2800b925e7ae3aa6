//! Router hooks for passive sessions.
//!
//! A passive session does not keep registrations or subscriptions of its
//! peer; it forwards REGISTER, SUBSCRIBE, CALL and PUBLISH to the router
//! through this trait and sends the router's answer back. Every hook has a
//! rejecting default, so a router only implements what it supports.

use wamp_core::{Dict, WampArgs, uri};

use crate::reply::Reply;
use crate::session::Session;
use crate::types::ErrorReply;

/// Router behavior behind a passive session.
pub trait ServerHandler: Send + Sync {
    /// Route an inbound CALL. The router answers through `reply`, typically
    /// after forwarding an INVOCATION to the callee with
    /// [`Session::invocation`].
    fn inbound_call(
        &self,
        _session: &Session,
        _procedure: &str,
        _options: Dict,
        _args: WampArgs,
        reply: Reply,
    ) {
        reply.error(uri::NO_SUCH_PROCEDURE, WampArgs::new());
    }

    /// Route an inbound PUBLISH. Returns the publication id.
    fn inbound_publish(
        &self,
        _session: &Session,
        _topic: &str,
        _options: &Dict,
        _args: WampArgs,
    ) -> Result<u64, ErrorReply> {
        Err(ErrorReply::new(uri::NOT_AUTHORIZED))
    }

    /// Accept a registration. Returns the registration id.
    fn inbound_register(
        &self,
        _session: &Session,
        _procedure: &str,
        _options: &Dict,
    ) -> Result<u64, ErrorReply> {
        Err(ErrorReply::new(uri::NOT_AUTHORIZED))
    }

    /// Accept a subscription. Returns the subscription id.
    fn inbound_subscribe(
        &self,
        _session: &Session,
        _topic: &str,
        _options: &Dict,
    ) -> Result<u64, ErrorReply> {
        Err(ErrorReply::new(uri::NOT_AUTHORIZED))
    }

    /// Drop a registration made through this session.
    fn inbound_unregister(
        &self,
        _session: &Session,
        _registration_id: u64,
    ) -> Result<(), ErrorReply> {
        Err(ErrorReply::new(uri::NO_SUCH_REGISTRATION))
    }

    /// Drop a subscription made through this session.
    fn inbound_unsubscribe(
        &self,
        _session: &Session,
        _subscription_id: u64,
    ) -> Result<(), ErrorReply> {
        Err(ErrorReply::new(uri::NO_SUCH_SUBSCRIPTION))
    }
}
