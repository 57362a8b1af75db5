use log::debug;
use mailin_embedded::{response, Handler, Response, Server, SslConfig};
use std::{net::IpAddr, time::Duration};
use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        Mutex,
    },
    time::timeout,
};

pub const SMTP_PORT: u16 = 4567;
pub const POISONED_SMTP_PORT: u16 = 4568;

const SERVER_NAME: &str = "contact-form.test";

/// One mail transaction as the server saw it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceivedMail {
    pub envelope_from: String,
    pub envelope_to: Vec<String>,
    /// Headers and body exactly as transmitted.
    pub content: String,
}

#[derive(Clone)]
struct RecordingHandler {
    current: ReceivedMail,
    data: Vec<u8>,
    delivered: UnboundedSender<ReceivedMail>,
}

impl Handler for RecordingHandler {
    fn data_start(
        &mut self,
        _domain: &str,
        from: &str,
        _is8bit: bool,
        to: &[String],
    ) -> Response {
        self.current = ReceivedMail {
            envelope_from: from.into(),
            envelope_to: to.to_vec(),
            content: String::new(),
        };
        self.data.clear();
        response::OK
    }

    fn data(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.data.extend_from_slice(buf);
        Ok(())
    }

    fn data_end(&mut self) -> Response {
        let mut mail = std::mem::take(&mut self.current);
        mail.content = String::from_utf8_lossy(&self.data).into_owned();
        debug!(
            "Received mail from {} to {:?}",
            mail.envelope_from, mail.envelope_to
        );
        match self.delivered.send(mail) {
            Ok(()) => response::OK,
            Err(_) => response::INTERNAL_ERROR,
        }
    }

    fn auth_plain(
        &mut self,
        _authorization_id: &str,
        authentication_id: &str,
        _password: &str,
    ) -> Response {
        debug!("Accepting credentials for {authentication_id}");
        response::AUTH_OK
    }
}

/// Fails every transaction at the first command after the greeting.
#[derive(Clone)]
struct RefusingHandler;

impl Handler for RefusingHandler {
    fn helo(&mut self, _ip: IpAddr, _domain: &str) -> Response {
        response::INTERNAL_ERROR
    }

    fn mail(&mut self, _ip: IpAddr, _domain: &str, _from: &str) -> Response {
        response::INTERNAL_ERROR
    }
}

fn listen<HandlerT: Handler + Clone + Send + 'static>(handler: HandlerT, port: u16) {
    let mut server = Server::new(handler);
    server
        .with_name(SERVER_NAME)
        .with_ssl(SslConfig::None)
        .unwrap()
        .with_addr(format!("127.0.0.1:{port}"))
        .unwrap();
    std::thread::spawn(move || {
        if let Err(error) = server.serve() {
            debug!("Fake SMTP server on port {port} stopped: {error:?}");
        }
    });
}

/// Accepts every mail on [SMTP_PORT] and queues it for the test to inspect.
///
/// The port is fixed, so tests share one instance through a static and run serially.
pub struct FakeSmtpServer {
    handler: std::sync::Mutex<Option<RecordingHandler>>,
    received: Mutex<UnboundedReceiver<ReceivedMail>>,
}

impl FakeSmtpServer {
    pub fn new() -> Self {
        let (delivered, received) = mpsc::unbounded_channel();
        Self {
            handler: std::sync::Mutex::new(Some(RecordingHandler {
                current: ReceivedMail::default(),
                data: Vec::new(),
                delivered,
            })),
            received: Mutex::new(received),
        }
    }

    /// Starts listening. Later calls do nothing.
    pub fn start(&self) {
        if let Some(handler) = self.handler.lock().unwrap().take() {
            listen(handler, SMTP_PORT);
        }
    }

    /// Waits up to `wait` for the next mail.
    pub async fn next_mail(&self, wait: Duration) -> Option<ReceivedMail> {
        let mut received = self.received.lock().await;
        timeout(wait, received.recv()).await.ok().flatten()
    }

    /// Drops mail left over from earlier tests.
    pub async fn flush(&self) {
        let mut received = self.received.lock().await;
        while received.try_recv().is_ok() {}
    }
}

impl Default for FakeSmtpServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Starts a server on [POISONED_SMTP_PORT] which refuses every transaction.
pub fn start_poisoned_smtp_server() {
    listen(RefusingHandler, POISONED_SMTP_PORT);
}
