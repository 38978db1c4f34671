use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::session::{ActionProgress, BlockReassembly, DlmsSession, GetProgress, SetProgress};
use super::ClientState;
use crate::apdu::Apdu;
use crate::data::Data;
use crate::descriptor::{AttributeDescriptor, AttributeWithSelection, MethodDescriptor, SelectiveAccessDescriptor};
use crate::error::{Error, Result};
use crate::get::GetDataResult;
use crate::mapping::AttributeFields;
use crate::notification::Notification;
use crate::obis_code::ObisCode;
use crate::settings::Settings;
use crate::transport::Transport;

/// Everything a logical operation needs exclusive access to.
struct Inner<T> {
    transport: T,
    session: DlmsSession,
    manager: Option<JoinHandle<()>>,
    idle: Option<JoinHandle<()>>,
}

/// State shared with the reception task.
struct Shared {
    /// Slot for the reply to the request in flight, if any.
    response: Option<oneshot::Sender<Vec<u8>>>,
    notifications: Option<mpsc::UnboundedSender<Notification>>,
    state: ClientState,
    last_activity: Instant,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drains the transport's reception channel. Notifications go to the
/// subscriber, anything else to the request in flight. When the transport
/// closes the channel the session is torn down.
async fn receive<T: Transport>(
    engine: Weak<AsyncMutex<Inner<T>>>,
    mut reception: mpsc::UnboundedReceiver<Vec<u8>>,
    shared: Arc<Mutex<Shared>>,
) {
    while let Some(frame) = reception.recv().await {
        trace!("received {}", hex::encode(&frame));
        let mut slots = lock(&shared);
        match Notification::decode(&frame) {
            Ok(notification) => {
                slots.last_activity = Instant::now();
                match &slots.notifications {
                    Some(subscriber) => {
                        if subscriber.send(notification).is_err() {
                            debug!("notification subscriber gone");
                            slots.notifications = None;
                        }
                    }
                    None => debug!("notification without subscriber dropped"),
                }
            }
            Err(_) => match slots.response.take() {
                Some(slot) => {
                    if slot.send(frame).is_err() {
                        debug!("reply arrived after its request gave up");
                    }
                }
                None => warn!("dropping unsolicited frame of {} bytes", frame.len()),
            },
        }
    }
    debug!("reception channel closed");
    // Wakes a request in flight, which tears down on its own.
    lock(&shared).response = None;

    let Some(strong) = engine.upgrade() else { return };
    let mut inner = strong.lock().await;
    warn!("transport closed the reception channel, disconnecting");
    inner.manager.take();
    teardown(&mut inner, &shared).await;
}

async fn teardown<T: Transport>(inner: &mut Inner<T>, shared: &Mutex<Shared>) {
    if let Some(manager) = inner.manager.take() {
        manager.abort();
    }
    if let Some(idle) = inner.idle.take() {
        idle.abort();
    }
    {
        let mut shared = lock(shared);
        shared.response = None;
        shared.state = ClientState::Disconnected;
    }
    inner.session.disconnected();
    if inner.transport.is_connected() {
        if let Err(err) = inner.transport.disconnect().await {
            warn!("transport disconnect failed: {err}");
        }
    }
}

/// Disconnects once nothing was sent or received for `timeout`.
async fn watch_idle<T: Transport>(
    engine: Weak<AsyncMutex<Inner<T>>>,
    shared: Arc<Mutex<Shared>>,
    timeout: Duration,
) {
    loop {
        let deadline = lock(&shared).last_activity + timeout;
        tokio::time::sleep_until(deadline).await;

        let Some(strong) = engine.upgrade() else { return };
        let mut inner = strong.lock().await;
        if lock(&shared).last_activity + timeout > Instant::now() {
            continue;
        }
        warn!("no activity for {timeout:?}, disconnecting");
        // Aborting our own handle would cancel the teardown below.
        inner.idle.take();
        teardown(&mut inner, &shared).await;
        return;
    }
}

/// An asynchronous DLMS client over a [`Transport`].
///
/// Operations are serialized: at most one request, association or release
/// is in flight at a time, and concurrent callers queue on an internal lock.
/// Replies are delivered by a background task spawned on [`connect`](Self::connect),
/// so the engine must be used inside a tokio runtime.
///
/// Cloning yields another handle to the same session.
///
/// # Examples
///
/// ```rust,no_run
/// # use dlms_engine::client::ClientEngine;
/// # use dlms_engine::descriptor::AttributeDescriptor;
/// # use dlms_engine::obis_code::ObisCode;
/// # use dlms_engine::settings::Settings;
/// # use dlms_engine::transport::Transport;
/// # async fn example<T: Transport>(transport: T) -> dlms_engine::Result<()> {
/// let client = ClientEngine::new(transport, Settings::default());
/// client.connect().await?;
/// client.associate().await?;
///
/// // Active energy import, register value
/// let energy = AttributeDescriptor::new(3, ObisCode::new(1, 0, 1, 8, 0, 255), 2);
/// let value = client.get(energy, None).await?;
/// println!("{value}");
///
/// client.close_association().await?;
/// client.disconnect().await?;
/// # Ok(())
/// # }
/// ```
pub struct ClientEngine<T> {
    inner: Arc<AsyncMutex<Inner<T>>>,
    shared: Arc<Mutex<Shared>>,
}

impl<T> Clone for ClientEngine<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner), shared: Arc::clone(&self.shared) }
    }
}

impl<T: Transport> ClientEngine<T> {
    pub fn new(transport: T, settings: Settings) -> Self {
        let inner = Inner { transport, session: DlmsSession::new(settings), manager: None, idle: None };
        let shared = Shared {
            response: None,
            notifications: None,
            state: ClientState::Disconnected,
            last_activity: Instant::now(),
        };
        Self { inner: Arc::new(AsyncMutex::new(inner)), shared: Arc::new(Mutex::new(shared)) }
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        lock(&self.shared)
    }

    pub fn state(&self) -> ClientState {
        self.shared().state
    }

    /// Runs `f` against the session, e.g. to read back invocation counters
    /// for persisting them.
    pub async fn with_session<R>(&self, f: impl FnOnce(&DlmsSession) -> R) -> R {
        f(&self.inner.lock().await.session)
    }

    fn publish_state(&self, session: &DlmsSession) {
        self.shared().state = session.state();
    }

    fn touch(&self) {
        self.shared().last_activity = Instant::now();
    }

    /// Opens the transport, starts the reception task and arms the
    /// inactivity timer when one is configured.
    pub async fn connect(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        inner.session.require_state(ClientState::Disconnected)?;
        inner.transport.connect().await.map_err(|err| Error::CommunicationFailed(err.to_string()))?;

        let (sender, reception) = mpsc::unbounded_channel();
        inner.transport.set_reception(sender);
        let manager = receive(Arc::downgrade(&self.inner), reception, Arc::clone(&self.shared));
        inner.manager = Some(tokio::spawn(manager));
        inner.session.connected();
        self.publish_state(&inner.session);
        self.touch();

        if let Some(timeout) = inner.session.settings().inactivity_timeout {
            let watcher = watch_idle(Arc::downgrade(&self.inner), Arc::clone(&self.shared), timeout);
            inner.idle = Some(tokio::spawn(watcher));
        }
        Ok(())
    }

    /// Drops the association without a release exchange and closes the
    /// transport. Calling it while disconnected does nothing.
    pub async fn disconnect(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.session.state() != ClientState::Disconnected {
            teardown(&mut inner, &self.shared).await;
        }
        Ok(())
    }

    /// Sends one frame and waits for the frame answering it.
    async fn exchange(&self, inner: &mut Inner<T>, frame: Vec<u8>) -> Result<Vec<u8>> {
        let (slot, reply) = oneshot::channel();
        self.shared().response = Some(slot);

        trace!("sending {}", hex::encode(&frame));
        if let Err(err) = inner.transport.send(&frame).await {
            warn!("transport send failed: {err}");
            teardown(inner, &self.shared).await;
            return Err(Error::CommunicationFailed(err.to_string()));
        }

        let timeout = inner.session.settings().reply_timeout;
        let reply = tokio::time::timeout(timeout, reply).await;
        self.shared().response = None;
        match reply {
            Ok(Ok(frame)) => {
                self.touch();
                Ok(frame)
            }
            Ok(Err(_)) => {
                teardown(inner, &self.shared).await;
                Err(Error::CommunicationFailed("reception channel closed".into()))
            }
            Err(_) => Err(Error::CommunicationFailed(format!("no reply within {timeout:?}"))),
        }
    }

    async fn request(&self, inner: &mut Inner<T>, apdu: Vec<u8>) -> Result<Apdu> {
        let frame = inner.session.protect(apdu)?;
        let reply = self.exchange(inner, frame).await?;
        inner.session.decode_response(&reply)
    }

    /// Establishes the application association (AARQ/AARE).
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidPassword`] when the server rejects the password.
    /// * [`Error::ServiceError`] when the server answers with a
    ///   confirmed-service-error.
    /// * [`Error::AuthenticationFailed`] for any other refusal.
    pub async fn associate(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        inner.session.require_state(ClientState::Connected)?;
        let aarq = inner.session.build_aarq()?;
        let reply = self.exchange(inner, aarq).await?;
        let result = inner.session.handle_aare(&reply);
        self.publish_state(&inner.session);
        result
    }

    /// Releases the association (RLRQ/RLRE). The transport stays open.
    pub async fn close_association(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        inner.session.require_state(ClientState::Associated)?;
        let rlrq = inner.session.build_rlrq()?;
        let result = match self.exchange(inner, rlrq).await {
            Ok(reply) => inner.session.handle_rlre(&reply),
            Err(err) => {
                inner.session.release();
                Err(err)
            }
        };
        self.publish_state(&inner.session);
        result
    }

    /// Reads one attribute, following a block transfer if the server
    /// splits the value.
    pub async fn get(
        &self,
        attribute: AttributeDescriptor,
        access_selection: Option<SelectiveAccessDescriptor>,
    ) -> Result<Data> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        inner.session.require_state(ClientState::Associated)?;

        let mut request = inner.session.get_request(attribute, access_selection);
        let invoke_id = request.invoke_id();
        let mut reassembly = BlockReassembly::new();
        loop {
            let apdu = self.request(inner, request.encode()).await?;
            match inner.session.handle_get_response(apdu, invoke_id, &mut reassembly)? {
                GetProgress::Complete(data) => return Ok(data),
                GetProgress::Next(next) => request = next,
            }
        }
    }

    /// Reads several attributes in one request. Each attribute gets its own
    /// result, so one rejected attribute does not fail the others.
    pub async fn get_with_list(&self, attributes: Vec<AttributeWithSelection>) -> Result<Vec<GetDataResult>> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        inner.session.require_state(ClientState::Associated)?;

        let count = attributes.len();
        let mut request = inner.session.get_with_list_request(attributes)?;
        let invoke_id = request.invoke_id();
        let mut reassembly = BlockReassembly::new();
        loop {
            let apdu = self.request(inner, request.encode()).await?;
            match inner.session.handle_get_list_response(apdu, invoke_id, count, &mut reassembly)? {
                GetProgress::Complete(results) => return Ok(results),
                GetProgress::Next(next) => request = next,
            }
        }
    }

    /// Writes one attribute. Values too large for one APDU are sent as a
    /// sequence of data blocks.
    pub async fn set(
        &self,
        attribute: AttributeDescriptor,
        access_selection: Option<SelectiveAccessDescriptor>,
        value: Data,
    ) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        inner.session.require_state(ClientState::Associated)?;

        let requests = inner.session.set_requests(attribute, access_selection, value);
        for request in &requests {
            let apdu = self.request(inner, request.encode()).await?;
            match inner.session.handle_set_response(apdu, request)? {
                SetProgress::Acknowledged => {}
                SetProgress::Complete => return Ok(()),
            }
        }
        Err(Error::InvalidResponse("set transfer ended without a result".into()))
    }

    /// Writes each field of `fields` as its own attribute of one object.
    ///
    /// With `continue_on_set_rejected` unset the first failure aborts.
    /// Otherwise every field is attempted; if some were rejected the result
    /// is [`Error::SetPartial`] listing them, or [`Error::SetRejected`] when
    /// all of them were.
    pub async fn set_fields<F: AttributeFields>(&self, class_id: u16, instance: ObisCode, fields: &F) -> Result<()> {
        let continue_on_rejected = self.with_session(|s| s.settings().continue_on_set_rejected).await;
        let fields = fields.attribute_fields();
        let total = fields.len();
        let mut failed = Vec::new();
        let mut last_rejection = None;

        for (attribute_id, value) in fields {
            let attribute = AttributeDescriptor::new(class_id, instance, attribute_id);
            match self.set(attribute, None, value).await {
                Ok(()) => {}
                Err(Error::SetRejected(result)) if continue_on_rejected => {
                    warn!("attribute {attribute_id} of {instance} rejected: {result:?}");
                    failed.push(attribute_id);
                    last_rejection = Some(result);
                }
                Err(err) => return Err(err),
            }
        }

        match (failed.len(), last_rejection) {
            (0, _) | (_, None) => Ok(()),
            (n, Some(result)) if n == total => Err(Error::SetRejected(result)),
            _ => Err(Error::SetPartial { failed }),
        }
    }

    /// Invokes a method and returns its return parameters, if any.
    pub async fn action(&self, method: MethodDescriptor, parameters: Option<Data>) -> Result<Option<Data>> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        inner.session.require_state(ClientState::Associated)?;

        let mut queue: VecDeque<_> = inner.session.action_requests(method, parameters).into();
        let mut reassembly = BlockReassembly::new();
        while let Some(request) = queue.pop_front() {
            let apdu = self.request(inner, request.encode()).await?;
            match inner.session.handle_action_response(apdu, &request, &mut reassembly)? {
                ActionProgress::Acknowledged => {}
                ActionProgress::Next(next) => queue.push_front(next),
                ActionProgress::Complete(data) => return Ok(data),
            }
        }
        Err(Error::InvalidResponse("action transfer ended without a result".into()))
    }

    /// Returns a channel receiving every notification pushed by the server.
    /// A new subscription replaces the previous one.
    pub fn subscribe_notifications(&self) -> mpsc::UnboundedReceiver<Notification> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.shared().notifications = Some(sender);
        receiver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::{
        AareApdu, AarqApdu, ApplicationContextName, Conformance, InitiateResponse, RlreApdu,
    };
    use crate::get::{
        DataAccessResult, DataBlockG, DataBlockResult, GetRequest, GetRequestNext, GetResponse, GetResponseNormal,
        GetResponseWithDataBlock,
    };
    use crate::exception::{
        ConfirmedService, ConfirmedServiceError, ExceptionResponse, ExceptionServiceError, ServiceErrorKind,
        StateError,
    };
    use crate::notification::{DataNotification, EventNotificationRequest, LongInvokeIdAndPriority};
    use crate::set::SetResponse;

    #[derive(Default)]
    struct Link {
        sent: Vec<Vec<u8>>,
        replies: VecDeque<Vec<u8>>,
        reception: Option<mpsc::UnboundedSender<Vec<u8>>>,
        connected: bool,
        disconnects: usize,
        fail_send: bool,
        close_on_send: bool,
    }

    /// Answers each sent frame with the next scripted reply, or stays silent
    /// once the script runs out.
    #[derive(Clone, Default)]
    struct MockTransport(Arc<Mutex<Link>>);

    impl MockTransport {
        fn scripted(replies: impl IntoIterator<Item = Vec<u8>>) -> Self {
            let mock = Self::default();
            mock.link().replies.extend(replies);
            mock
        }

        fn link(&self) -> MutexGuard<'_, Link> {
            self.0.lock().unwrap()
        }
    }

    impl Transport for MockTransport {
        type Error = String;

        async fn connect(&mut self) -> core::result::Result<(), String> {
            self.link().connected = true;
            Ok(())
        }

        async fn disconnect(&mut self) -> core::result::Result<(), String> {
            let mut link = self.link();
            link.connected = false;
            link.disconnects += 1;
            link.reception = None;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.link().connected
        }

        fn set_reception(&mut self, reception: mpsc::UnboundedSender<Vec<u8>>) {
            self.link().reception = Some(reception);
        }

        async fn send(&mut self, apdu: &[u8]) -> core::result::Result<(), String> {
            let mut link = self.link();
            if link.fail_send {
                return Err("link down".into());
            }
            link.sent.push(apdu.to_vec());
            if link.close_on_send {
                link.reception = None;
            }
            if let Some(reply) = link.replies.pop_front() {
                if let Some(reception) = &link.reception {
                    reception.send(reply).unwrap();
                }
            }
            Ok(())
        }
    }

    fn register_value() -> AttributeDescriptor {
        AttributeDescriptor::new(3, ObisCode::new(1, 0, 1, 8, 0, 255), 2)
    }

    fn aare() -> Vec<u8> {
        let response = InitiateResponse::new(Conformance::DEFAULT_CLIENT, 0x0400);
        AareApdu::accepted(ApplicationContextName::LogicalNameReferencing, response.encode()).encode()
    }

    fn get_response(invoke_id: u8, data: Data) -> Vec<u8> {
        GetResponse::Normal(GetResponseNormal { invoke_id, result: GetDataResult::Data(data) }).encode()
    }

    fn get_block(invoke_id: u8, block_number: u32, last_block: bool, raw: &[u8]) -> Vec<u8> {
        GetResponse::WithDataBlock(GetResponseWithDataBlock {
            invoke_id,
            block: DataBlockG { last_block, block_number, result: DataBlockResult::RawData(raw.to_vec()) },
        })
        .encode()
    }

    async fn associated(mock: &MockTransport, settings: Settings) -> ClientEngine<MockTransport> {
        let client = ClientEngine::new(mock.clone(), settings);
        client.connect().await.unwrap();
        client.associate().await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_associate_get_close() {
        let mock = MockTransport::scripted([
            aare(),
            get_response(0xC0, Data::DoubleLongUnsigned(42)),
            RlreApdu::new().encode(),
        ]);
        let client = ClientEngine::new(mock.clone(), Settings::default());
        assert_eq!(client.state(), ClientState::Disconnected);

        client.connect().await.unwrap();
        assert_eq!(client.state(), ClientState::Connected);
        client.associate().await.unwrap();
        assert_eq!(client.state(), ClientState::Associated);

        assert_eq!(client.get(register_value(), None).await.unwrap(), Data::DoubleLongUnsigned(42));

        client.close_association().await.unwrap();
        assert_eq!(client.state(), ClientState::Connected);
        assert!(client.shared().response.is_none());

        let link = mock.link();
        assert_eq!(link.sent.len(), 3);
        assert!(AarqApdu::parse(&link.sent[0]).is_ok());
        assert_eq!(link.sent[1], [0xC0, 0x01, 0xC0, 0x00, 0x03, 0x01, 0x00, 0x01, 0x08, 0x00, 0xFF, 0x02, 0x00]);
        assert_eq!(link.sent[2][0], 0x62);
    }

    #[tokio::test]
    async fn test_get_follows_blocks() {
        let value = Data::Array((0..40).map(Data::LongUnsigned).collect());
        let raw = value.encode();
        let (first, rest) = raw.split_at(50);
        let (second, third) = rest.split_at(50);
        let mock = MockTransport::scripted([
            aare(),
            get_block(0xC0, 1, false, first),
            get_block(0xC0, 2, false, second),
            get_block(0xC0, 3, true, third),
        ]);
        let client = associated(&mock, Settings::default()).await;

        assert_eq!(client.get(register_value(), None).await.unwrap(), value);
        let link = mock.link();
        assert_eq!(link.sent.len(), 4);
        let next = GetRequest::Next(GetRequestNext { invoke_id: 0xC0, block_number: 2 });
        assert_eq!(link.sent[3], next.encode());
    }

    #[tokio::test]
    async fn test_get_block_out_of_order() {
        let mock = MockTransport::scripted([
            aare(),
            get_block(0xC0, 1, false, &[0x01, 0x02]),
            get_block(0xC0, 3, true, &[0x12, 0x00, 0x01]),
        ]);
        let client = associated(&mock, Settings::default()).await;
        assert!(matches!(client.get(register_value(), None).await, Err(Error::InvalidResponse(_))));
        assert_eq!(client.state(), ClientState::Associated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_timeout() {
        let settings = Settings::builder().reply_timeout(Duration::from_millis(200)).build().unwrap();
        let mock = MockTransport::scripted([aare()]);
        let client = associated(&mock, settings).await;

        let result = client.get(register_value(), None).await;
        assert!(matches!(result, Err(Error::CommunicationFailed(_))));
        assert!(client.shared().response.is_none());
        assert_eq!(client.state(), ClientState::Associated);
    }

    #[tokio::test]
    async fn test_send_failure_disconnects() {
        let mock = MockTransport::scripted([aare()]);
        let client = associated(&mock, Settings::default()).await;
        mock.link().fail_send = true;

        assert!(matches!(client.get(register_value(), None).await, Err(Error::CommunicationFailed(_))));
        assert_eq!(client.state(), ClientState::Disconnected);
        assert!(matches!(
            client.get(register_value(), None).await,
            Err(Error::InvalidState(ClientState::Disconnected))
        ));
        assert_eq!(mock.link().disconnects, 1);
    }

    #[tokio::test]
    async fn test_operations_require_state() {
        let client = ClientEngine::new(MockTransport::default(), Settings::default());
        assert!(matches!(client.associate().await, Err(Error::InvalidState(ClientState::Disconnected))));
        assert!(matches!(client.get(register_value(), None).await, Err(Error::InvalidState(_))));

        client.connect().await.unwrap();
        assert!(matches!(client.connect().await, Err(Error::InvalidState(ClientState::Connected))));
        assert!(matches!(client.close_association().await, Err(Error::InvalidState(ClientState::Connected))));

        client.disconnect().await.unwrap();
        client.disconnect().await.unwrap();
        assert_eq!(client.state(), ClientState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_disconnects() {
        let settings = Settings::builder().inactivity_timeout(Duration::from_secs(5)).build().unwrap();
        let mock = MockTransport::scripted([aare(), get_response(0xC0, Data::Null)]);
        let client = associated(&mock, settings).await;

        tokio::time::sleep(Duration::from_secs(3)).await;
        client.get(register_value(), None).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(client.state(), ClientState::Associated);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(client.state(), ClientState::Disconnected);
        assert_eq!(mock.link().disconnects, 1);
    }

    #[tokio::test]
    async fn test_notifications_are_routed() {
        let mock = MockTransport::default();
        let client = ClientEngine::new(mock.clone(), Settings::default());
        client.connect().await.unwrap();
        let mut notifications = client.subscribe_notifications();

        let notification = DataNotification {
            long_invoke_id_and_priority: LongInvokeIdAndPriority(1),
            date_time: None,
            body: Data::Unsigned(9),
        };
        let reception = mock.link().reception.clone().unwrap();
        // An unsolicited reply is dropped, the notification still arrives.
        reception.send(get_response(0xC5, Data::Null)).unwrap();
        reception.send(notification.encode()).unwrap();

        assert_eq!(notifications.recv().await, Some(Notification::Data(notification)));
    }

    #[tokio::test]
    async fn test_event_notifications_are_routed() {
        let mock = MockTransport::scripted([aare()]);
        let client = associated(&mock, Settings::default()).await;
        let mut notifications = client.subscribe_notifications();

        let event = EventNotificationRequest {
            time: None,
            attribute: AttributeDescriptor::new(7, ObisCode::new(0, 0, 99, 98, 0, 255), 2),
            value: Data::LongUnsigned(0x0104),
        };
        mock.link().reception.clone().unwrap().send(event.encode()).unwrap();

        assert_eq!(notifications.recv().await, Some(Notification::Event(event)));
        assert_eq!(client.state(), ClientState::Associated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reception_closed_while_idle_disconnects() {
        let mock = MockTransport::scripted([aare()]);
        let client = associated(&mock, Settings::default()).await;

        // The transport drops its sender, e.g. after the socket closed.
        mock.link().reception = None;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(client.state(), ClientState::Disconnected);
        assert!(matches!(
            client.get(register_value(), None).await,
            Err(Error::InvalidState(ClientState::Disconnected))
        ));
        assert_eq!(mock.link().disconnects, 1);
        assert_eq!(mock.link().sent.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reception_closed_during_request_fails_fast() {
        let settings = Settings::builder().reply_timeout(Duration::from_secs(30)).build().unwrap();
        let mock = MockTransport::scripted([aare()]);
        let client = associated(&mock, settings).await;
        mock.link().close_on_send = true;

        let started = Instant::now();
        assert!(matches!(client.get(register_value(), None).await, Err(Error::CommunicationFailed(_))));
        assert!(started.elapsed() < Duration::from_secs(30));
        assert_eq!(client.state(), ClientState::Disconnected);
        assert!(matches!(
            client.get(register_value(), None).await,
            Err(Error::InvalidState(ClientState::Disconnected))
        ));
    }

    fn exception() -> Vec<u8> {
        ExceptionResponse {
            state_error: StateError::ServiceNotAllowed,
            service_error: ExceptionServiceError::OperationNotPossible,
        }
        .encode()
    }

    fn service_error() -> Vec<u8> {
        ConfirmedServiceError { service: ConfirmedService::Read, error: ServiceErrorKind::Access, value: 2 }.encode()
    }

    #[tokio::test]
    async fn test_error_pdus_in_place_of_responses() {
        let mock = MockTransport::scripted([
            aare(),
            exception(),
            service_error(),
            exception(),
            service_error(),
            get_response(0xC4, Data::Unsigned(1)),
        ]);
        let client = associated(&mock, Settings::default()).await;
        let method = MethodDescriptor::new(70, ObisCode::new(0, 0, 96, 3, 10, 255), 1);

        let get = client.get(register_value(), None).await;
        assert!(matches!(get, Err(Error::InvalidResponse(ref text)) if text.starts_with("exception response")));
        let get = client.get(register_value(), None).await;
        assert!(matches!(get, Err(Error::InvalidResponse(ref text)) if text.starts_with("confirmed service error")));
        let set = client.set(register_value(), None, Data::Unsigned(0)).await;
        assert!(matches!(set, Err(Error::InvalidResponse(ref text)) if text.starts_with("exception response")));
        let action = client.action(method, Some(Data::Integer(0))).await;
        assert!(matches!(action, Err(Error::InvalidResponse(ref text)) if text.starts_with("confirmed service error")));

        // The association survives and the next request proceeds.
        assert_eq!(client.state(), ClientState::Associated);
        assert_eq!(client.get(register_value(), None).await.unwrap(), Data::Unsigned(1));
    }

    struct Limits {
        low: u16,
        high: u16,
    }

    impl AttributeFields for Limits {
        fn attribute_fields(&self) -> Vec<(i8, Data)> {
            vec![(2, Data::LongUnsigned(self.low)), (3, Data::LongUnsigned(self.high))]
        }
    }

    fn set_response(invoke_id: u8, result: DataAccessResult) -> Vec<u8> {
        SetResponse::Normal { invoke_id, result }.encode()
    }

    #[tokio::test]
    async fn test_set_fields_partial() {
        let settings = Settings::builder().continue_on_set_rejected(true).build().unwrap();
        let mock = MockTransport::scripted([
            aare(),
            set_response(0xC0, DataAccessResult::Success),
            set_response(0xC1, DataAccessResult::ReadWriteDenied),
        ]);
        let client = associated(&mock, settings).await;
        let limits = Limits { low: 10, high: 90 };

        let result = client.set_fields(21, ObisCode::new(0, 0, 17, 0, 0, 255), &limits).await;
        assert!(matches!(result, Err(Error::SetPartial { failed }) if failed == vec![3]));
    }

    #[tokio::test]
    async fn test_set_fields_stops_at_first_rejection() {
        let mock = MockTransport::scripted([aare(), set_response(0xC0, DataAccessResult::ReadWriteDenied)]);
        let client = associated(&mock, Settings::default()).await;
        let limits = Limits { low: 10, high: 90 };

        let result = client.set_fields(21, ObisCode::new(0, 0, 17, 0, 0, 255), &limits).await;
        assert!(matches!(result, Err(Error::SetRejected(DataAccessResult::ReadWriteDenied))));
        assert_eq!(mock.link().sent.len(), 2);
    }
}
