//! JSON-RPC v1.0 engine: a nested namespace map keyed by dotted method
//! names, with the fixed numeric error taxonomy (the 2.0 codes, kept
//! for client compatibility).

use serde_json::{json, Value};

use hashbrown::HashMap;

type Method = Box<dyn Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync>;

enum Node {
    Method(Method),
    Scope(HashMap<String, Node>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RpcError {
    Parse,
    InvalidRequest,
    MethodNotFound,
    Internal,
}

impl RpcError {
    fn code(self) -> i64 {
        match self {
            Self::Parse => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::Internal => -32603,
        }
    }

    fn message(self) -> &'static str {
        match self {
            Self::Parse => "Parse error",
            Self::InvalidRequest => "Invalid request",
            Self::MethodNotFound => "Method not found",
            Self::Internal => "Internal error",
        }
    }
}

/// Routes requests to callables registered under dotted names.
#[derive(Default)]
pub struct Dispatcher {
    methods: HashMap<String, Node>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a callable under a dotted path. All but the last segment
    /// name scopes, created (or replaced) on the way down; binding an
    /// already-bound name replaces it in place.
    pub fn add_method<F>(&mut self, path: &str, method: F)
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let mut segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        let name = segments.pop().expect("method path must be non-empty");

        let mut scope = &mut self.methods;
        for segment in segments {
            let node = scope
                .entry(segment.to_string())
                .and_modify(|node| {
                    if !matches!(node, Node::Scope(_)) {
                        *node = Node::Scope(HashMap::new());
                    }
                })
                .or_insert_with(|| Node::Scope(HashMap::new()));

            scope = match node {
                Node::Scope(inner) => inner,
                Node::Method(_) => unreachable!("method nodes were just replaced by scopes"),
            };
        }

        scope.insert(name.to_string(), Node::Method(Box::new(method)));
    }

    fn find(&self, dotted: &str) -> Result<&Method, RpcError> {
        let mut scope = &self.methods;
        let mut segments = dotted.split('.').peekable();

        while let Some(segment) = segments.next() {
            match scope.get(segment) {
                Some(Node::Scope(inner)) => scope = inner,
                Some(Node::Method(method)) if segments.peek().is_none() => return Ok(method),
                _ => return Err(RpcError::MethodNotFound),
            }
        }

        // the walk ended on a scope, not a callable
        Err(RpcError::MethodNotFound)
    }

    /// Handles one request body, returning the reply as JSON text.
    /// Exactly one of `result`/`error` is non-null; errors echo the
    /// original payload in `data`.
    pub fn process(&self, raw: &str) -> String {
        let mut id = Value::Null;

        let outcome = (|| {
            let parsed: Value = serde_json::from_str(raw).map_err(|_| RpcError::Parse)?;
            let request = parsed.as_object().ok_or(RpcError::InvalidRequest)?;

            id = request.get("id").cloned().ok_or(RpcError::InvalidRequest)?;
            let method = request
                .get("method")
                .and_then(Value::as_str)
                .ok_or(RpcError::InvalidRequest)?;
            let params = request
                .get("params")
                .and_then(Value::as_array)
                .ok_or(RpcError::InvalidRequest)?;

            self.find(method)?(params).map_err(|_| RpcError::Internal)
        })();

        let reply = match outcome {
            Ok(result) => json!({ "id": id, "result": result, "error": null }),
            Err(error) => json!({
                "id": id,
                "result": null,
                "error": {
                    "code": error.code(),
                    "message": error.message(),
                    "data": raw,
                },
            }),
        };

        reply.to_string()
    }
}

/// Builds the dispatcher hosting the browsing methods, bound under both
/// the dotted and the flat name.
pub fn assemble(served_root: std::path::PathBuf) -> Dispatcher {
    let mut dispatcher = Dispatcher::new();

    for name in ["browser.path_summary", "browser_path_summary"] {
        let root = served_root.clone();
        dispatcher.add_method(name, move |params| {
            let path = params
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow::anyhow!("path_summary takes a single string argument"))?;

            let summary = crate::content::summary(&root, path)?;
            Ok(serde_json::to_value(summary)?)
        });
    }

    dispatcher
}

#[cfg(test)]
mod test {
    use anyhow::anyhow;
    use serde_json::{json, Value};

    use super::Dispatcher;

    fn dispatcher() -> Dispatcher {
        let mut dispatcher = Dispatcher::new();
        dispatcher.add_method("good_method", |params| {
            Ok(params.first().cloned().unwrap_or(Value::Null))
        });
        dispatcher.add_method("browser.path_summary", |_| Ok(json!({"type": "folder"})));
        dispatcher.add_method("always.fails", |_| Err(anyhow!("boom")));
        dispatcher
    }

    fn process(body: &str) -> Value {
        serde_json::from_str(&dispatcher().process(body)).unwrap()
    }

    #[test]
    fn identity_round_trip() {
        let reply = process(r#"{"id":"1","method":"good_method","params":["sample text"]}"#);
        assert_eq!(
            reply,
            json!({"id": "1", "result": "sample text", "error": null})
        );
    }

    #[test]
    fn dotted_lookup() {
        let reply = process(r#"{"id":7,"method":"browser.path_summary","params":[""]}"#);
        assert_eq!(reply["id"], json!(7));
        assert_eq!(reply["result"]["type"], json!("folder"));
        assert_eq!(reply["error"], Value::Null);
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let reply = process("this is not JSON");
        assert_eq!(
            reply,
            json!({
                "id": null,
                "result": null,
                "error": {
                    "code": -32700,
                    "message": "Parse error",
                    "data": "this is not JSON",
                },
            })
        );
    }

    #[test]
    fn missing_fields_are_invalid_requests() {
        let reply = process(r#"{"id":"4","method":"good_method"}"#);
        assert_eq!(reply["error"]["code"], json!(-32600));
        assert_eq!(reply["error"]["message"], json!("Invalid request"));
        // the id still echoes when it was present
        assert_eq!(reply["id"], json!("4"));
    }

    #[test]
    fn params_must_be_a_sequence() {
        let reply = process(r#"{"id":"5","method":"good_method","params":{"a":1}}"#);
        assert_eq!(reply["error"]["code"], json!(-32600));
    }

    #[test]
    fn unknown_methods_are_not_found() {
        let reply = process(r#"{"id":"6","method":"no.such.method","params":[]}"#);
        assert_eq!(reply["error"]["code"], json!(-32601));
        assert_eq!(reply["error"]["message"], json!("Method not found"));
    }

    #[test]
    fn scopes_are_not_callable() {
        let reply = process(r#"{"id":"6","method":"browser","params":[]}"#);
        assert_eq!(reply["error"]["code"], json!(-32601));
    }

    #[test]
    fn raising_methods_are_internal_errors() {
        let body = r#"{"id":"9","method":"always.fails","params":[]}"#;
        let reply = process(body);
        assert_eq!(reply["error"]["code"], json!(-32603));
        assert_eq!(reply["error"]["message"], json!("Internal error"));
        assert_eq!(reply["error"]["data"], json!(body));
        assert_eq!(reply["result"], Value::Null);
    }

    #[test]
    fn rebinding_replaces_in_place() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.add_method("ns.method", |_| Ok(json!(1)));
        dispatcher.add_method("ns.method", |_| Ok(json!(2)));

        let reply: Value = serde_json::from_str(
            &dispatcher.process(r#"{"id":"1","method":"ns.method","params":[]}"#),
        )
        .unwrap();
        assert_eq!(reply["result"], json!(2));
    }

    #[test]
    fn registering_through_a_method_creates_a_scope() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.add_method("a", |_| Ok(json!("leaf")));
        dispatcher.add_method("a.b", |_| Ok(json!("nested")));

        let reply: Value =
            serde_json::from_str(&dispatcher.process(r#"{"id":"1","method":"a.b","params":[]}"#))
                .unwrap();
        assert_eq!(reply["result"], json!("nested"));
    }
}
