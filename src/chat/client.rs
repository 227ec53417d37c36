//! # Chat Client Driver
//!
//! Runs one [`ChatSession`] on a dedicated tokio task. The task owns the
//! session, the open channel, the pending connect and the reconnect timer, and
//! handles exactly one input per loop turn, so the session needs no locks.
//!
//! ## Inputs multiplexed by the loop:
//! - commands from [`ChatHandle`] (send, snapshot, clear, shutdown)
//! - completion of a pending channel open
//! - events from the open channel
//! - the reconnect deadline
//!
//! Dropping every [`ChatHandle`] unmounts the session the same way an explicit
//! [`ChatHandle::shutdown`] does.

use crate::chat::protocol::ServerEvent;
use crate::chat::session::{
    ChatEvent, ChatSession, Effect, SendOutcome, SessionSnapshot, SummaryTurn, TransportEvent,
};
use crate::chat::socketio::{ChatChannel, ChatTransport, IncomingEvent};
use crate::config::ChatConfig;
use crate::error::{AppResult, ClientError, TransportError};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

enum Command {
    Send { text: String, reply: oneshot::Sender<SendOutcome> },
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Summary(oneshot::Sender<Vec<SummaryTurn>>),
    Clear,
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle to a running chat session.
#[derive(Clone)]
pub struct ChatHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl ChatHandle {
    /// Send one user message. Blank input is ignored; sending while not
    /// connected appends a local failure reply and reports `NotConnected`.
    pub async fn send(&self, text: impl Into<String>) -> AppResult<SendOutcome> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Send { text: text.into(), reply })?;
        rx.await.map_err(|_| ClientError::SessionClosed)
    }

    pub async fn snapshot(&self) -> AppResult<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Snapshot(reply))?;
        rx.await.map_err(|_| ClientError::SessionClosed)
    }

    /// Rows for `POST /generate-summary`.
    pub async fn summary_conversation(&self) -> AppResult<Vec<SummaryTurn>> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Summary(reply))?;
        rx.await.map_err(|_| ClientError::SessionClosed)
    }

    pub fn clear(&self) -> AppResult<()> {
        self.request(Command::Clear)
    }

    /// Unmount the session and wait until the channel is closed.
    pub async fn shutdown(&self) -> AppResult<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Shutdown(reply))?;
        rx.await.map_err(|_| ClientError::SessionClosed)
    }

    fn request(&self, command: Command) -> AppResult<()> {
        self.commands.send(command).map_err(|_| ClientError::SessionClosed)
    }
}

/// Entry point for starting chat sessions.
pub struct ChatClient;

impl ChatClient {
    /// Mount a new session on `transport` and start its driver task.
    ///
    /// Returns the handle, the stream of published [`ChatEvent`]s and the task
    /// handle, which resolves after unmount.
    pub fn spawn(
        config: ChatConfig,
        transport: Arc<dyn ChatTransport>,
    ) -> (ChatHandle, mpsc::UnboundedReceiver<ChatEvent>, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            api_url: config.api_url.clone(),
            session: ChatSession::new(config),
            transport,
            events: event_tx,
            channel: None,
            connecting: None,
            reconnect_at: None,
        };
        let task = tokio::spawn(driver.run(command_rx));

        (ChatHandle { commands: command_tx }, event_rx, task)
    }
}

type PendingConnect = BoxFuture<'static, Result<Box<dyn ChatChannel>, TransportError>>;

struct Driver {
    api_url: String,
    session: ChatSession,
    transport: Arc<dyn ChatTransport>,
    events: mpsc::UnboundedSender<ChatEvent>,
    channel: Option<Box<dyn ChatChannel>>,
    connecting: Option<PendingConnect>,
    reconnect_at: Option<Instant>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!(session_id = %self.session.session_id(), "Chat session task started");
        let effects = self.session.mount();
        self.apply(effects).await;

        loop {
            let channel = &mut self.channel;
            let connecting = &mut self.connecting;

            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(Command::Shutdown(done)) => {
                            let effects = self.session.unmount();
                            self.apply(effects).await;
                            let _ = done.send(());
                            break;
                        }
                        Some(command) => self.handle_command(command).await,
                        None => {
                            debug!("All chat handles dropped");
                            let effects = self.session.unmount();
                            self.apply(effects).await;
                            break;
                        }
                    }
                }
                result = async {
                    match connecting.as_mut() {
                        Some(pending) => pending.await,
                        None => std::future::pending().await,
                    }
                } => {
                    self.connecting = None;
                    let event = match result {
                        Ok(channel) => {
                            self.channel = Some(channel);
                            TransportEvent::Connected
                        }
                        Err(err) => TransportEvent::ConnectError(err),
                    };
                    let effects = self.session.handle_transport_event(event);
                    self.apply(effects).await;
                }
                incoming = async {
                    match channel.as_mut() {
                        Some(channel) => channel.next_event().await,
                        None => std::future::pending().await,
                    }
                } => {
                    self.on_incoming(incoming).await;
                }
                _ = sleep_until(self.reconnect_at.unwrap_or_else(Instant::now)), if self.reconnect_at.is_some() => {
                    self.reconnect_at = None;
                    let effects = self.session.reconnect_due();
                    self.apply(effects).await;
                }
            }
        }

        info!(session_id = %self.session.session_id(), "Chat session task stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send { text, reply } => {
                let (outcome, effects) = self.session.send(&text);
                self.apply(effects).await;
                let _ = reply.send(outcome);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.session.snapshot());
            }
            Command::Summary(reply) => {
                let _ = reply.send(self.session.summary_conversation());
            }
            Command::Clear => {
                let effects = self.session.clear();
                self.apply(effects).await;
            }
            Command::Shutdown(_) => {}
        }
    }

    async fn on_incoming(&mut self, incoming: Result<IncomingEvent, TransportError>) {
        let event = match incoming {
            Ok(IncomingEvent { name, payload }) => match ServerEvent::from_event(&name, payload) {
                Ok(message) => TransportEvent::Message(message),
                Err(error) => TransportEvent::Undecodable { event: name, error },
            },
            Err(err) => {
                self.channel = None;
                TransportEvent::Disconnected(err)
            }
        };
        let effects = self.session.handle_transport_event(event);
        self.apply(effects).await;
    }

    /// Execute effects in order. A failed emit feeds a disconnect back into the
    /// session, whose effects are executed in the same pass.
    async fn apply(&mut self, effects: Vec<Effect>) {
        let mut queue = std::collections::VecDeque::from(effects);
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::OpenChannel { attempt } => {
                    debug!(attempt, "Opening chat channel");
                    let transport = Arc::clone(&self.transport);
                    let url = self.api_url.clone();
                    self.connecting = Some(Box::pin(async move { transport.connect(&url).await }));
                }
                Effect::CloseChannel => {
                    self.connecting = None;
                    if let Some(mut channel) = self.channel.take() {
                        channel.close().await;
                    }
                }
                Effect::Emit(event) => {
                    let Some(channel) = self.channel.as_mut() else {
                        warn!(event = event.name(), "Emit requested without an open channel");
                        continue;
                    };
                    if let Err(err) = channel.emit(event.name(), event.payload()).await {
                        self.channel = None;
                        queue.extend(self.session.handle_transport_event(TransportEvent::Disconnected(err)));
                    }
                }
                Effect::ScheduleReconnect(delay) => {
                    self.reconnect_at = Some(Instant::now() + delay);
                }
                Effect::CancelReconnect => {
                    self.reconnect_at = None;
                }
                Effect::Publish(event) => {
                    // The host may have stopped listening; the session keeps running.
                    let _ = self.events.send(event);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::message::Sender;
    use crate::chat::session::{ConnectionState, ToastLevel};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted transport: each connect pops the next outcome and records the
    /// (paused) time of the call.
    #[derive(Default)]
    struct MockTransport {
        outcomes: Mutex<VecDeque<bool>>,
        connects: Mutex<Vec<Instant>>,
        emitted: Arc<Mutex<Vec<(String, Value)>>>,
        inbound: Mutex<Option<mpsc::UnboundedReceiver<IncomingEvent>>>,
    }

    impl MockTransport {
        fn new(outcomes: &[bool]) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.iter().copied().collect()),
                ..Default::default()
            }
        }

        fn with_inbound(self, rx: mpsc::UnboundedReceiver<IncomingEvent>) -> Self {
            *self.inbound.lock().unwrap() = Some(rx);
            self
        }

        fn connect_times(&self) -> Vec<Instant> {
            self.connects.lock().unwrap().clone()
        }
    }

    struct MockChannel {
        emitted: Arc<Mutex<Vec<(String, Value)>>>,
        inbound: Option<mpsc::UnboundedReceiver<IncomingEvent>>,
    }

    #[async_trait]
    impl ChatTransport for MockTransport {
        async fn connect(&self, _api_url: &str) -> Result<Box<dyn ChatChannel>, TransportError> {
            self.connects.lock().unwrap().push(Instant::now());
            let ok = self.outcomes.lock().unwrap().pop_front().unwrap_or(false);
            if !ok {
                return Err(TransportError::Connect("connection refused".into()));
            }
            Ok(Box::new(MockChannel {
                emitted: Arc::clone(&self.emitted),
                inbound: self.inbound.lock().unwrap().take(),
            }))
        }
    }

    #[async_trait]
    impl ChatChannel for MockChannel {
        async fn emit(&mut self, event: &str, payload: Value) -> Result<(), TransportError> {
            self.emitted.lock().unwrap().push((event.to_string(), payload));
            Ok(())
        }

        async fn next_event(&mut self) -> Result<IncomingEvent, TransportError> {
            match self.inbound.as_mut() {
                Some(rx) => rx.recv().await.ok_or_else(|| TransportError::Closed("mock closed".into())),
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) {}
    }

    async fn wait_for_status(events: &mut mpsc::UnboundedReceiver<ChatEvent>, status: ConnectionState) {
        while let Some(event) = events.recv().await {
            if event == ChatEvent::StatusChanged(status) {
                return;
            }
        }
        panic!("event stream ended before {status:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_errors_reconnect_every_five_seconds() {
        let transport = Arc::new(MockTransport::new(&[false, false, false, true]));
        let (handle, mut events, _task) = ChatClient::spawn(ChatConfig::default(), transport.clone());

        let mut toasts = Vec::new();
        while let Some(event) = events.recv().await {
            if let ChatEvent::Toast(toast) = event {
                let done = toast.level == ToastLevel::Success;
                toasts.push(toast);
                if done {
                    break;
                }
            }
        }

        let times = transport.connect_times();
        assert_eq!(times.len(), 4);
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(5));
        }
        let failures = toasts.iter().filter(|t| t.level == ToastLevel::Error).count();
        assert_eq!(failures, 3);
        assert_eq!(toasts.last().map(|t| t.text.as_str()), Some("Connected to server"));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_hello_end_to_end() {
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(MockTransport::new(&[true]).with_inbound(server_rx));
        let (handle, mut events, _task) = ChatClient::spawn(ChatConfig::default(), transport.clone());
        wait_for_status(&mut events, ConnectionState::Connected).await;

        assert_eq!(handle.send("hello").await.unwrap(), SendOutcome::Sent);
        {
            let emitted = transport.emitted.lock().unwrap();
            assert_eq!(emitted.len(), 1);
            assert_eq!(emitted[0].0, "send_message");
            assert_eq!(emitted[0].1["msg"], "hello");
        }

        server_tx
            .send(IncomingEvent {
                name: "response".into(),
                payload: json!({"res": {"msg": "Hi!"}, "info": {"name": "ABC College"}}),
            })
            .unwrap();

        loop {
            if let Some(ChatEvent::MessageAppended(msg)) = events.recv().await {
                if msg.sender == Sender::Bot {
                    assert_eq!(msg.content, "Hi!");
                    break;
                }
            }
        }

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.messages.len(), 3);
        assert_eq!(snapshot.college_info.name, "ABC College");
        assert!(snapshot.conversation_id.is_some());
        assert!(!snapshot.bot_typing);

        handle.shutdown().await.unwrap();
        assert!(handle.snapshot().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_while_connecting_transmits_nothing() {
        let transport = Arc::new(MockTransport::new(&[]));
        let (handle, mut events, _task) = ChatClient::spawn(ChatConfig::default(), transport.clone());
        wait_for_status(&mut events, ConnectionState::Disconnected).await;

        assert_eq!(handle.send("hello").await.unwrap(), SendOutcome::NotConnected);
        assert!(transport.emitted.lock().unwrap().is_empty());
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.messages[1].sender, Sender::Bot);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_close_triggers_reconnect() {
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(MockTransport::new(&[true, true]).with_inbound(server_rx));
        let (handle, mut events, _task) = ChatClient::spawn(ChatConfig::default(), transport.clone());
        wait_for_status(&mut events, ConnectionState::Connected).await;

        drop(server_tx);
        wait_for_status(&mut events, ConnectionState::Disconnected).await;
        wait_for_status(&mut events, ConnectionState::Connected).await;

        let times = transport.connect_times();
        assert_eq!(times.len(), 2);
        assert!(times[1] - times[0] >= Duration::from_secs(5));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_reconnect() {
        let transport = Arc::new(MockTransport::new(&[]));
        let (handle, mut events, task) = ChatClient::spawn(ChatConfig::default(), transport.clone());
        wait_for_status(&mut events, ConnectionState::Disconnected).await;

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.connect_times().len(), 1);
    }
}
