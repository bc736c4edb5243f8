//! Line-delimited JSON protocol spoken with a live server.
//!
//! Every request is one JSON object tagged by `op`. Every reply is one
//! object `{ok, error?, code?, ...payload}`. `scan` and `oplogSince` first
//! stream `{"doc": ...}` / `{"entry": ...}` lines and then a final reply.

use cairn_core::{
    CairnError, Document, IndexSpec, LogicalTs, Namespace, OplogRecord, Result,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::{BufRead, Read, Write};

/// Reply code sent when a request needs authentication first, or when
/// credentials are rejected.
pub const CODE_UNAUTHORIZED: &str = "unauthorized";

/// Protocol revision announced in `hello`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Longest accepted line, to bound memory on a misbehaving peer.
pub const MAX_LINE_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Request {
    Hello {
        client: String,
        protocol: u32,
    },
    Auth {
        username: String,
        password: String,
    },
    ListDatabases,
    ListCollections {
        db: String,
    },
    CollectionMetadata {
        ns: Namespace,
    },
    Scan {
        ns: Namespace,
    },
    CreateCollection {
        ns: Namespace,
        #[serde(default)]
        options: Map<String, Value>,
    },
    DropCollection {
        ns: Namespace,
    },
    InsertMany {
        ns: Namespace,
        docs: Vec<Document>,
    },
    CreateIndex {
        ns: Namespace,
        index: IndexSpec,
    },
    ApplyOp {
        record: OplogRecord,
    },
    OplogHead,
    OplogSince {
        after: LogicalTs,
    },
}

impl Request {
    /// Wire name of the operation, for logs.
    pub fn op(&self) -> &'static str {
        match self {
            Request::Hello { .. } => "hello",
            Request::Auth { .. } => "auth",
            Request::ListDatabases => "listDatabases",
            Request::ListCollections { .. } => "listCollections",
            Request::CollectionMetadata { .. } => "collectionMetadata",
            Request::Scan { .. } => "scan",
            Request::CreateCollection { .. } => "createCollection",
            Request::DropCollection { .. } => "dropCollection",
            Request::InsertMany { .. } => "insertMany",
            Request::CreateIndex { .. } => "createIndex",
            Request::ApplyOp { .. } => "applyOp",
            Request::OplogHead => "oplogHead",
            Request::OplogSince { .. } => "oplogSince",
        }
    }
}

/// Final reply to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub ok: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Reply {
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
            code: None,
            body: Map::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
            code: None,
            body: Map::new(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Add a payload field.
    pub fn with(mut self, key: &str, value: impl Serialize) -> Result<Self> {
        self.body.insert(key.to_string(), serde_json::to_value(value)?);
        Ok(self)
    }

    /// Decode a payload field. A missing field decodes from `null`.
    pub fn field<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self.body.get(key).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| {
            CairnError::Protocol(format!("bad '{}' field in reply: {}", key, e))
        })
    }

    pub fn is_unauthorized(&self) -> bool {
        self.code.as_deref() == Some(CODE_UNAUTHORIZED)
    }
}

/// One line of a streaming response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Doc(Document),
    Entry(OplogRecord),
    End(Reply),
}

impl StreamItem {
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut map) = value else {
            return Err(CairnError::Protocol("stream line is not an object".into()));
        };
        if let Some(doc) = map.remove("doc") {
            return Ok(StreamItem::Doc(Document::from_value(doc)?));
        }
        if let Some(entry) = map.remove("entry") {
            return Ok(StreamItem::Entry(serde_json::from_value(entry)?));
        }
        let reply = serde_json::from_value(Value::Object(map))
            .map_err(|e| CairnError::Protocol(format!("bad reply: {}", e)))?;
        Ok(StreamItem::End(reply))
    }
}

/// Write one message as a JSON line. Does not flush.
pub fn write_message<W: Write, T: Serialize>(w: &mut W, message: &T) -> Result<()> {
    serde_json::to_writer(&mut *w, message)?;
    w.write_all(b"\n")?;
    Ok(())
}

/// Read one JSON line, or `None` at end of stream.
pub fn read_message<R: BufRead>(r: &mut R) -> Result<Option<Value>> {
    let mut line = String::new();
    let n = Read::take(&mut *r, MAX_LINE_BYTES as u64 + 1).read_line(&mut line)?;
    if n == 0 {
        return Ok(None);
    }
    if n > MAX_LINE_BYTES {
        return Err(CairnError::Protocol(format!(
            "message exceeds {} bytes",
            MAX_LINE_BYTES
        )));
    }
    let value = serde_json::from_str(line.trim_end())
        .map_err(|e| CairnError::Protocol(format!("invalid message: {}", e)))?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    #[test]
    fn test_request_wire_shape() {
        let ns = Namespace::new("shop", "orders").unwrap();
        let value = serde_json::to_value(Request::Scan { ns }).unwrap();
        assert_eq!(
            value,
            json!({"op": "scan", "ns": {"db": "shop", "collection": "orders"}})
        );
        let value = serde_json::to_value(Request::OplogSince { after: 7 }).unwrap();
        assert_eq!(value, json!({"op": "oplogSince", "after": 7}));
        assert_eq!(
            serde_json::to_value(Request::ListDatabases).unwrap(),
            json!({"op": "listDatabases"})
        );
    }

    #[test]
    fn test_reply_payload() {
        let reply = Reply::ok().with("databases", vec!["a", "b"]).unwrap();
        let line = serde_json::to_string(&reply).unwrap();
        assert_eq!(line, r#"{"ok":true,"databases":["a","b"]}"#);

        let back: Reply = serde_json::from_str(&line).unwrap();
        assert_eq!(back.field::<Vec<String>>("databases").unwrap(), vec!["a", "b"]);
        assert_eq!(back.field::<Option<u64>>("head").unwrap(), None);
        assert!(back.field::<u64>("missing").is_err());
    }

    #[test]
    fn test_stream_items() {
        let doc = StreamItem::from_value(json!({"doc": {"_id": 1}})).unwrap();
        assert!(matches!(doc, StreamItem::Doc(d) if d.id() == &json!(1)));

        let end = StreamItem::from_value(json!({"ok": true, "count": 3})).unwrap();
        match end {
            StreamItem::End(reply) => assert_eq!(reply.field::<u64>("count").unwrap(), 3),
            other => panic!("unexpected {:?}", other),
        }

        assert!(StreamItem::from_value(json!([1])).is_err());
    }

    #[test]
    fn test_line_framing() {
        let mut buf = Vec::new();
        write_message(&mut buf, &Request::OplogHead).unwrap();
        write_message(&mut buf, &Reply::error("nope").with_code(CODE_UNAUTHORIZED)).unwrap();

        let mut reader = Cursor::new(buf);
        let first = read_message(&mut reader).unwrap().unwrap();
        assert_eq!(first, json!({"op": "oplogHead"}));
        let second: Reply = serde_json::from_value(read_message(&mut reader).unwrap().unwrap())
            .unwrap();
        assert!(second.is_unauthorized());
        assert!(read_message(&mut reader).unwrap().is_none());
    }

    #[test]
    fn test_read_message_leaves_reader_usable() {
        let input: &[u8] = b"not json\n{\"ok\":true}\n";
        let mut reader = std::io::BufReader::new(input);
        let err = read_message(&mut reader).unwrap_err();
        assert!(matches!(err, CairnError::Protocol(_)));
        let next = read_message(&mut reader).unwrap().unwrap();
        assert_eq!(next, json!({"ok": true}));
        assert!(read_message(&mut reader).unwrap().is_none());
    }
}
