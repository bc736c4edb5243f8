use super::protocol::{read_message, write_message, Reply, Request, StreamItem, PROTOCOL_VERSION};
use cairn_core::{
    observe, ApplyOutcome, CairnError, CollectionMetadata, ConnectionConfig, Document,
    DocumentStore, IndexSpec, InsertOutcome, LogicalTs, Namespace, OplogRecord, Result,
    ScanControl, StoreSession,
};
use serde_json::{Map, Value};
use std::io::{BufReader, BufWriter, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};

/// Which side of a run the server is on. Decides how an unreachable server
/// is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Source,
    Target,
}

impl Role {
    pub fn unavailable(self, message: String) -> CairnError {
        match self {
            Role::Source => CairnError::SourceUnavailable(message),
            Role::Target => CairnError::TargetUnavailable(message),
        }
    }
}

/// A live server reached over TCP.
#[derive(Debug, Clone)]
pub struct RemoteStore {
    config: ConnectionConfig,
    role: Role,
}

impl RemoteStore {
    /// Connect once to check reachability and credentials.
    pub fn connect(config: ConnectionConfig, role: Role) -> Result<Self> {
        let store = Self { config, role };
        let session = store.open_session()?;
        tracing::info!("Connected to {} ({:?})", session.peer(), role);
        Ok(store)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn open_session(&self) -> Result<RemoteSession> {
        RemoteSession::connect(&self.config, self.role)
    }
}

impl DocumentStore for RemoteStore {
    fn describe(&self) -> String {
        self.config.endpoint.address()
    }

    fn session(&self) -> Result<Box<dyn StoreSession>> {
        Ok(Box::new(self.open_session()?))
    }
}

/// Why a single connection attempt failed.
enum AttemptError {
    /// Worth another attempt after backing off
    Retry(String),
    /// Retrying cannot help (bad credentials, no usable address)
    Fatal(CairnError),
}

impl From<std::io::Error> for AttemptError {
    fn from(e: std::io::Error) -> Self {
        AttemptError::Retry(e.to_string())
    }
}

/// One authenticated connection.
pub struct RemoteSession {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    peer: SocketAddr,
    role: Role,
    /// Set once a stream was abandoned; the connection is shut down
    closed: bool,
}

impl RemoteSession {
    /// Connect with bounded retries.
    ///
    /// Only establishing the connection is retried. Authentication failures
    /// are reported at once.
    pub fn connect(config: &ConnectionConfig, role: Role) -> Result<Self> {
        let endpoint = config.endpoint.address();
        let attempts = config.retry.max_attempts.max(1);
        let mut last_error = String::from("no attempt made");

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = config.retry.backoff.calculate(attempt - 1);
                observe::record_connect_retry();
                tracing::debug!("Retrying {} in {:?}", endpoint, delay);
                std::thread::sleep(delay);
            }
            match Self::attempt(config, role) {
                Ok(session) => return Ok(session),
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Retry(reason)) => {
                    tracing::warn!(
                        "Connection attempt {}/{} to {} failed: {}",
                        attempt + 1,
                        attempts,
                        endpoint,
                        reason
                    );
                    last_error = reason;
                }
            }
        }

        Err(role.unavailable(format!(
            "could not connect to {} after {} attempts: {}",
            endpoint, attempts, last_error
        )))
    }

    fn attempt(
        config: &ConnectionConfig,
        role: Role,
    ) -> std::result::Result<Self, AttemptError> {
        let addrs = resolve(config)?;
        if addrs.is_empty() {
            return Err(AttemptError::Fatal(role.unavailable(format!(
                "{} has no IPv4 address; pass --ipv6 to allow IPv6",
                config.endpoint.host
            ))));
        }

        let mut last: Option<std::io::Error> = None;
        let mut connected = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, config.connect_timeout()) {
                Ok(stream) => {
                    connected = Some((stream, addr));
                    break;
                }
                Err(e) => last = Some(e),
            }
        }
        let Some((stream, peer)) = connected else {
            let reason = match last {
                Some(e) => e.to_string(),
                None => "no address reachable".into(),
            };
            return Err(AttemptError::Retry(reason));
        };

        let io_timeout = config.io_timeout();
        stream.set_read_timeout((!io_timeout.is_zero()).then_some(io_timeout))?;
        stream.set_nodelay(true)?;
        let writer = BufWriter::new(stream.try_clone()?);
        let mut session = Self {
            reader: BufReader::new(stream),
            writer,
            peer,
            role,
            closed: false,
        };

        session.handshake(config).map_err(|e| match e {
            CairnError::Io(io) => AttemptError::Retry(io.to_string()),
            other => AttemptError::Fatal(other),
        })?;
        Ok(session)
    }

    fn handshake(&mut self, config: &ConnectionConfig) -> Result<()> {
        let hello = self.call(&Request::Hello {
            client: format!("cairn/{}", env!("CARGO_PKG_VERSION")),
            protocol: PROTOCOL_VERSION,
        })?;
        if let Ok(server) = hello.field::<String>("server") {
            tracing::debug!("{} is {}", self.peer, server);
        }

        if let Some(credentials) = &config.credentials {
            self.call(&Request::Auth {
                username: credentials.username.clone(),
                password: credentials.password.clone(),
            })?;
            tracing::debug!("Authenticated as {}", credentials.username);
        }
        Ok(())
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn send(&mut self, request: &Request) -> Result<()> {
        if self.closed {
            return Err(self.role.unavailable(format!(
                "connection to {} was closed after an abandoned stream",
                self.peer
            )));
        }
        tracing::trace!("-> {} {}", self.peer, request.op());
        write_message(&mut self.writer, request)?;
        self.writer.flush()?;
        Ok(())
    }

    fn recv(&mut self) -> Result<Value> {
        match read_message(&mut self.reader)? {
            Some(value) => Ok(value),
            None => Err(self
                .role
                .unavailable(format!("{} closed the connection", self.peer))),
        }
    }

    fn check(&self, reply: Reply, op: &str) -> Result<Reply> {
        if reply.ok {
            return Ok(reply);
        }
        let message = reply.error.clone().unwrap_or_else(|| "unknown error".into());
        if reply.is_unauthorized() {
            return Err(self
                .role
                .unavailable(format!("{} rejected by {}: {}", op, self.peer, message)));
        }
        Err(CairnError::Storage(format!("{} failed: {}", op, message)))
    }

    fn call(&mut self, request: &Request) -> Result<Reply> {
        self.send(request)?;
        let reply: Reply = serde_json::from_value(self.recv()?)
            .map_err(|e| CairnError::Protocol(format!("bad reply to {}: {}", request.op(), e)))?;
        self.check(reply, request.op())
    }

    /// Read a streamed response, handing each item to `on_item`.
    ///
    /// Returns `None` when `on_item` stops early. The rest of the stream is
    /// never read: the connection is shut down instead and the session
    /// refuses further requests.
    fn stream(
        &mut self,
        op: &str,
        on_item: &mut dyn FnMut(StreamItem) -> Result<bool>,
    ) -> Result<Option<Reply>> {
        loop {
            match StreamItem::from_value(self.recv()?)? {
                StreamItem::End(reply) => return self.check(reply, op).map(Some),
                item => match on_item(item) {
                    Ok(true) => {}
                    Ok(false) => {
                        self.abandon(op);
                        return Ok(None);
                    }
                    Err(e) => {
                        self.abandon(op);
                        return Err(e);
                    }
                },
            }
        }
    }

    fn abandon(&mut self, op: &str) {
        tracing::debug!("Abandoning {} stream from {}", op, self.peer);
        self.closed = true;
        if let Err(e) = self.reader.get_ref().shutdown(Shutdown::Both) {
            tracing::trace!("Shutdown of {} failed: {}", self.peer, e);
        }
    }

    /// Whether the connection was shut down after an abandoned stream.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

fn resolve(config: &ConnectionConfig) -> std::io::Result<Vec<SocketAddr>> {
    let mut addrs: Vec<SocketAddr> = (config.endpoint.host.as_str(), config.endpoint.port)
        .to_socket_addrs()?
        .filter(|a| config.ipv6 || a.is_ipv4())
        .collect();
    // IPv6 first when enabled; the sort is stable
    addrs.sort_by_key(|a| a.is_ipv4());
    Ok(addrs)
}

impl StoreSession for RemoteSession {
    fn list_databases(&mut self) -> Result<Vec<String>> {
        self.call(&Request::ListDatabases)?.field("databases")
    }

    fn list_collections(&mut self, db: &str) -> Result<Vec<String>> {
        self.call(&Request::ListCollections { db: db.to_string() })?
            .field("collections")
    }

    fn collection_metadata(&mut self, ns: &Namespace) -> Result<CollectionMetadata> {
        self.call(&Request::CollectionMetadata { ns: ns.clone() })?
            .field("metadata")
    }

    fn scan(
        &mut self,
        ns: &Namespace,
        visit: &mut dyn FnMut(Document) -> Result<ScanControl>,
    ) -> Result<u64> {
        self.send(&Request::Scan { ns: ns.clone() })?;
        let mut visited = 0u64;
        self.stream("scan", &mut |item| match item {
            StreamItem::Doc(doc) => {
                visited += 1;
                Ok(visit(doc)? == ScanControl::Continue)
            }
            _ => Err(CairnError::Protocol("unexpected item in scan stream".into())),
        })?;
        Ok(visited)
    }

    fn create_collection(&mut self, ns: &Namespace, options: &Map<String, Value>) -> Result<()> {
        self.call(&Request::CreateCollection {
            ns: ns.clone(),
            options: options.clone(),
        })?;
        Ok(())
    }

    fn drop_collection(&mut self, ns: &Namespace) -> Result<bool> {
        self.call(&Request::DropCollection { ns: ns.clone() })?
            .field("dropped")
    }

    fn insert_many(&mut self, ns: &Namespace, docs: &[Document]) -> Result<Vec<InsertOutcome>> {
        let reply = self.call(&Request::InsertMany {
            ns: ns.clone(),
            docs: docs.to_vec(),
        })?;
        let results: Vec<Option<String>> = reply.field("results")?;
        if results.len() != docs.len() {
            return Err(CairnError::Protocol(format!(
                "insertMany sent {} documents but got {} results",
                docs.len(),
                results.len()
            )));
        }
        Ok(results
            .into_iter()
            .map(|r| match r {
                None => InsertOutcome::Inserted,
                Some(reason) => InsertOutcome::Failed(reason),
            })
            .collect())
    }

    fn create_index(&mut self, ns: &Namespace, index: &IndexSpec) -> Result<()> {
        self.call(&Request::CreateIndex {
            ns: ns.clone(),
            index: index.clone(),
        })?;
        Ok(())
    }

    fn apply_op(&mut self, record: &OplogRecord) -> Result<ApplyOutcome> {
        let skipped: Option<String> = self
            .call(&Request::ApplyOp {
                record: record.clone(),
            })?
            .field("skipped")?;
        Ok(match skipped {
            None => ApplyOutcome::Applied,
            Some(reason) => ApplyOutcome::Skipped(reason),
        })
    }

    fn oplog_head(&mut self) -> Result<Option<LogicalTs>> {
        self.call(&Request::OplogHead)?.field("head")
    }

    fn oplog_since(
        &mut self,
        after: LogicalTs,
        visit: &mut dyn FnMut(OplogRecord) -> Result<()>,
    ) -> Result<u64> {
        self.send(&Request::OplogSince { after })?;
        let mut seen = 0u64;
        self.stream("oplogSince", &mut |item| match item {
            StreamItem::Entry(record) => {
                seen += 1;
                visit(record)?;
                Ok(true)
            }
            _ => Err(CairnError::Protocol("unexpected item in oplog stream".into())),
        })?;
        Ok(seen)
    }
}
