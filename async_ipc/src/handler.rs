//! Connection and notification handlers

use crate::connection::IncomingConnection;
use crate::executor::LocalBoxFuture;
use crate::registry::IncomingCall;
use crate::Runtime;
use ipc::ResultCode;
use std::future::Future;
use std::rc::Rc;
use tracing::warn;

/// Runs one connection; the opening call is `None` for connections the
/// runtime registered itself (see [`Runtime::connect_to_me`])
pub(crate) type ConnectionHandler =
    Rc<dyn Fn(IncomingConnection, Option<IncomingCall>) -> LocalBoxFuture>;

/// Handles one notification
pub(crate) type NotificationHandler = Rc<dyn Fn(Runtime, IncomingCall) -> LocalBoxFuture>;

pub(crate) fn connection_handler<F, Fut>(handler: F) -> ConnectionHandler
where
    F: Fn(IncomingConnection, Option<IncomingCall>) -> Fut + 'static,
    Fut: Future<Output = ()> + 'static,
{
    Rc::new(move |connection, opening| Box::pin(handler(connection, opening)))
}

pub(crate) fn notification_handler<F, Fut>(handler: F) -> NotificationHandler
where
    F: Fn(Runtime, IncomingCall) -> Fut + 'static,
    Fut: Future<Output = ()> + 'static,
{
    Rc::new(move |runtime, call| Box::pin(handler(runtime, call)))
}

/// Refuses every connection with `ENOENT`
pub(crate) fn refuse_connections() -> ConnectionHandler {
    connection_handler(|connection: IncomingConnection, opening: Option<IncomingCall>| async move {
        if let Some(opening) = opening {
            if let Err(err) = connection.answer(opening.call_id, ResultCode::NoEntry) {
                warn!(call_id = %opening.call_id, %err, "refusal not delivered");
            }
        }
    })
}

/// Ignores every notification
pub(crate) fn ignore_notifications() -> NotificationHandler {
    notification_handler(|_: Runtime, _: IncomingCall| async {})
}
