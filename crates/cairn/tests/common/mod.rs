//! Shared fixtures: seeded data directories and an in-process server that
//! speaks the remote protocol over loopback.

#![allow(dead_code)]

use cairn::remote::protocol::{read_message, write_message, Reply, Request, CODE_UNAUTHORIZED};
use cairn::{
    ConnectionConfig, Credentials, DataDirConfig, DataDirStore, Document, Endpoint, IndexSpec,
    LogicalTs, Namespace, OplogRecord, Result, RetryConfig, ScanControl, StoreSession,
};
use cairn_core::types::OpKind;
use cairn_core::{ApplyOutcome, BackoffStrategy, IndexKey, InsertOutcome};
use cairn_datadir::DataDirSession;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::io::{BufReader, BufWriter, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub fn ns(db: &str, collection: &str) -> Namespace {
    Namespace::new(db, collection).unwrap()
}

pub fn doc(value: Value) -> Document {
    Document::from_value(value).unwrap()
}

pub const STATUSES: [&str; 3] = ["open", "shipped", "closed"];

/// Fill a store through one session.
///
/// - `shop.orders`: `orders` documents, `status` cycling through
///   [`STATUSES`], `total` = i, unique index on `ref` (v1) and a plain
///   index on `status`
/// - `shop.items`: 5 documents
/// - `crm.people`: 3 documents
pub fn seed(session: &mut dyn StoreSession, orders: u64) -> Result<()> {
    let orders_ns = ns("shop", "orders");
    let docs: Vec<Document> = (0..orders)
        .map(|i| {
            doc(json!({
                "_id": i,
                "ref": format!("R-{}", i),
                "status": STATUSES[(i % 3) as usize],
                "total": i,
                "lines": [{"sku": format!("S{}", i % 4), "qty": 1}]
            }))
        })
        .collect();
    session.create_collection(&orders_ns, &Map::new())?;
    session.insert_many(&orders_ns, &docs)?;
    session.create_index(
        &orders_ns,
        &IndexSpec::new("ref_1", vec![IndexKey::ascending("ref")])
            .with_unique(true)
            .with_version(1),
    )?;
    session.create_index(
        &orders_ns,
        &IndexSpec::new("status_1", vec![IndexKey::ascending("status")]),
    )?;

    let items_ns = ns("shop", "items");
    let mut options = Map::new();
    options.insert("capped".into(), json!(false));
    session.create_collection(&items_ns, &options)?;
    let items: Vec<Document> = (0..5)
        .map(|i| doc(json!({"_id": format!("item-{}", i), "price": i * 10})))
        .collect();
    session.insert_many(&items_ns, &items)?;

    let people_ns = ns("crm", "people");
    session.create_collection(&people_ns, &Map::new())?;
    let people: Vec<Document> = ["ada", "grace", "linus"]
        .iter()
        .map(|name| doc(json!({"_id": {"name": name}, "active": true})))
        .collect();
    session.insert_many(&people_ns, &people)?;
    Ok(())
}

/// Create and seed a data directory, releasing its lock afterwards.
pub fn seed_datadir(path: &Path, orders: u64) -> Result<()> {
    let store = DataDirStore::open(DataDirConfig::new(path))?;
    let mut session = store.open_session();
    seed(&mut session, orders)
}

/// Every document of `ns`, in storage order.
pub fn read_all(session: &mut dyn StoreSession, ns: &Namespace) -> Result<Vec<Document>> {
    let mut docs = Vec::new();
    session.scan(ns, &mut |doc| {
        docs.push(doc);
        Ok(ScanControl::Continue)
    })?;
    Ok(docs)
}

/// Connection settings for a loopback server with fast retries.
pub fn loopback(addr: SocketAddr) -> ConnectionConfig {
    ConnectionConfig::new(Endpoint::parse(Some(&addr.to_string()), None).unwrap())
        .with_retry(
            RetryConfig::default()
                .with_max_attempts(3)
                .with_backoff(BackoffStrategy::Fixed(Duration::from_millis(20))),
        )
        .with_connect_timeout(500)
}

/// A port nothing listens on.
pub fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

struct ServerState {
    store: DataDirStore,
    oplog: Mutex<Vec<OplogRecord>>,
    /// Writes applied when the first scan arrives, as if another client
    /// wrote while a dump was running
    concurrent: Mutex<Vec<OplogRecord>>,
    credentials: Option<Credentials>,
}

impl ServerState {
    fn head(&self) -> LogicalTs {
        self.oplog.lock().last().map_or(0, |r| r.ts)
    }

    /// Apply a write and log it. Updates are logged in resolved form so a
    /// replay of the log never counts an `$inc` twice.
    fn record(&self, session: &mut DataDirSession, record: OplogRecord) -> Result<ApplyOutcome> {
        let record = match (record.op, record.target_id().cloned()) {
            (OpKind::Update, Some(id)) => match session.find_by_id(&record.namespace()?, &id)? {
                Some(pre_image) => record.resolved(&pre_image)?,
                None => record,
            },
            _ => record,
        };
        let outcome = session.apply_op(&record)?;
        if outcome == ApplyOutcome::Applied {
            self.oplog.lock().push(record);
        }
        Ok(outcome)
    }
}

/// In-process server backed by a data directory.
pub struct FakeServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
}

impl FakeServer {
    pub fn start(dir: &Path, credentials: Option<Credentials>) -> Self {
        let store = DataDirStore::open(DataDirConfig::new(dir).with_journal(true)).unwrap();
        let state = Arc::new(ServerState {
            store,
            oplog: Mutex::new(Vec::new()),
            concurrent: Mutex::new(Vec::new()),
            credentials,
        });
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let accept_state = state.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let state = accept_state.clone();
                std::thread::spawn(move || {
                    let _ = serve(&state, stream);
                });
            }
        });

        Self { addr, state }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Direct session on the backing store.
    pub fn session(&self) -> DataDirSession {
        self.state.store.open_session()
    }

    /// Apply a write and log it.
    pub fn write(&self, record: OplogRecord) {
        let mut session = self.session();
        self.state.record(&mut session, record).unwrap();
    }

    pub fn head(&self) -> LogicalTs {
        self.state.head()
    }

    /// Queue writes that land once the first scan request arrives.
    pub fn write_during_dump(&self, records: Vec<OplogRecord>) {
        self.state.concurrent.lock().extend(records);
    }
}

fn serve(state: &ServerState, stream: TcpStream) -> Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);
    let mut session = state.store.open_session();
    let mut authenticated = state.credentials.is_none();

    while let Some(value) = read_message(&mut reader)? {
        let reply = match serde_json::from_value::<Request>(value) {
            Err(e) => Reply::error(format!("bad request: {}", e)),
            Ok(Request::Hello { .. }) => Reply::ok().with("server", "fake")?,
            Ok(Request::Auth { username, password }) => {
                let expected = state.credentials.as_ref();
                if expected.is_some_and(|c| c.username == username && c.password == password) {
                    authenticated = true;
                    Reply::ok()
                } else {
                    Reply::error("invalid credentials").with_code(CODE_UNAUTHORIZED)
                }
            }
            Ok(_) if !authenticated => {
                Reply::error("authentication required").with_code(CODE_UNAUTHORIZED)
            }
            Ok(request) => match dispatch(state, &mut session, request, &mut writer) {
                Ok(reply) => reply,
                Err(e) => Reply::error(e.to_string()),
            },
        };
        write_message(&mut writer, &reply)?;
        writer.flush()?;
    }
    Ok(())
}

fn dispatch<W: Write>(
    state: &ServerState,
    session: &mut DataDirSession,
    request: Request,
    out: &mut W,
) -> Result<Reply> {
    match request {
        Request::ListDatabases => Reply::ok().with("databases", session.list_databases()?),
        Request::ListCollections { db } => {
            Reply::ok().with("collections", session.list_collections(&db)?)
        }
        Request::CollectionMetadata { ns } => {
            Reply::ok().with("metadata", session.collection_metadata(&ns)?)
        }
        Request::Scan { ns } => {
            let pending: Vec<OplogRecord> = state.concurrent.lock().drain(..).collect();
            for record in pending {
                state.record(session, record)?;
            }
            let count = session.scan(&ns, &mut |doc| {
                write_message(out, &json!({ "doc": doc }))?;
                Ok(ScanControl::Continue)
            })?;
            Reply::ok().with("count", count)
        }
        Request::CreateCollection { ns, options } => {
            session.create_collection(&ns, &options)?;
            Ok(Reply::ok())
        }
        Request::DropCollection { ns } => {
            Reply::ok().with("dropped", session.drop_collection(&ns)?)
        }
        Request::InsertMany { ns, docs } => {
            let results: Vec<Option<String>> = session
                .insert_many(&ns, &docs)?
                .into_iter()
                .map(|outcome| match outcome {
                    InsertOutcome::Inserted => None,
                    InsertOutcome::Failed(reason) => Some(reason),
                })
                .collect();
            Reply::ok().with("results", results)
        }
        Request::CreateIndex { ns, index } => {
            session.create_index(&ns, &index)?;
            Ok(Reply::ok())
        }
        Request::ApplyOp { record } => {
            let skipped = match session.apply_op(&record)? {
                ApplyOutcome::Applied => None,
                ApplyOutcome::Skipped(reason) => Some(reason),
            };
            Reply::ok().with("skipped", skipped)
        }
        Request::OplogHead => Reply::ok().with("head", Some(state.head())),
        Request::OplogSince { after } => {
            let records: Vec<OplogRecord> = state
                .oplog
                .lock()
                .iter()
                .filter(|r| r.ts > after)
                .cloned()
                .collect();
            for record in &records {
                write_message(out, &json!({ "entry": record }))?;
            }
            Reply::ok().with("count", records.len())
        }
        Request::Hello { .. } | Request::Auth { .. } => Ok(Reply::error("unexpected handshake")),
    }
}
