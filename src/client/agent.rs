//! Per-connection application handlers.

use std::sync::Arc;

use async_trait::async_trait;

use crate::client::session::Session;

/// Application handler bound to one [`Session`].
///
/// The client builds one agent per successful connection through the
/// factory passed to [`TcpClient::new`](crate::client::TcpClient::new) and
/// awaits [`run`](Agent::run). The session stays registered for exactly as
/// long as `run` is executing; when it returns the client closes the
/// session, removes it from the live set and then calls
/// [`on_close`](Agent::on_close).
///
/// `run` should return once [`Session::receive`] reports an error, which is
/// also how a client-wide close reaches the agent.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use relink::client::{Agent, Session};
///
/// struct Echo {
///     session: Session,
/// }
///
/// #[async_trait]
/// impl Agent for Echo {
///     async fn run(&mut self) {
///         while let Ok(frame) = self.session.receive().await {
///             if self.session.send(&frame).await.is_err() {
///                 break;
///             }
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Agent: Send + 'static {
    /// Serves the session until the agent decides it is done.
    async fn run(&mut self);

    /// Called once, after the session has been closed and deregistered.
    fn on_close(&mut self) {}
}

/// Builds an agent for each new session.
pub type AgentFactory = Arc<dyn Fn(Session) -> Box<dyn Agent> + Send + Sync>;

/// Boxes a typed factory closure into an [`AgentFactory`].
pub fn agent_factory<F, A>(factory: F) -> AgentFactory
where
    F: Fn(Session) -> A + Send + Sync + 'static,
    A: Agent,
{
    Arc::new(move |session| Box::new(factory(session)) as Box<dyn Agent>)
}
