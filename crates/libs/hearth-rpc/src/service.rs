//! Method registry and the invoke loop.
//!
//! A [`Service`] is a named, read-mostly map from method name to an async
//! handler plus a parameter schema. Registration happens at startup;
//! afterwards the service is shared immutably (`Arc<Service>`) across all
//! transport sessions, so concurrent lookups need no locking.
//!
//! [`Service::invoke`] is total: every outcome, including a handler
//! panic, comes back as a well-formed [`Response`]. Internal causes are
//! logged for the operator and never leak to the caller.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use log::{debug, error};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::envelope::{ErrorCode, ErrorInfo, Request, Response};

/// Named parameter mapping handed to handlers after schema binding.
pub type Params = JsonMap<String, JsonValue>;

/// What a handler produced, before the dispatcher normalizes it.
#[derive(Debug)]
pub enum Reply {
    /// Wrapped into a success response; `Null` for handlers with nothing
    /// to return.
    Value(JsonValue),
    /// A pre-built response, passed through unmodified. This is how a
    /// handler reports a deliberate domain failure.
    Response(Response),
}

impl Reply {
    pub fn ok(value: JsonValue) -> Self {
        Reply::Value(value)
    }

    pub fn none() -> Self {
        Reply::Value(JsonValue::Null)
    }

    pub fn domain_error(code: ErrorCode, message: impl Into<String>) -> Self {
        Reply::Response(Response::failure(code, message))
    }
}

impl From<JsonValue> for Reply {
    fn from(value: JsonValue) -> Self {
        Reply::Value(value)
    }
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Reply::Response(response)
    }
}

/// Expected JSON shape of one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Str,
    Bool,
    Int,
    Number,
    Object,
    Array,
    Any,
}

impl ParamKind {
    fn admits(self, value: &JsonValue) -> bool {
        match self {
            ParamKind::Str => value.is_string(),
            ParamKind::Bool => value.is_boolean(),
            ParamKind::Int => value.is_i64() || value.is_u64(),
            ParamKind::Number => value.is_number(),
            ParamKind::Object => value.is_object(),
            ParamKind::Array => value.is_array(),
            ParamKind::Any => true,
        }
    }

    const fn describe(self) -> &'static str {
        match self {
            ParamKind::Str => "a string",
            ParamKind::Bool => "a boolean",
            ParamKind::Int => "an integer",
            ParamKind::Number => "a number",
            ParamKind::Object => "an object",
            ParamKind::Array => "an array",
            ParamKind::Any => "any value",
        }
    }
}

/// One entry of a method's closed parameter schema.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    name: &'static str,
    kind: ParamKind,
    required: bool,
    default: Option<JsonValue>,
}

impl ParamSpec {
    pub fn required(name: &'static str, kind: ParamKind) -> Self {
        Self { name, kind, required: true, default: None }
    }

    pub fn optional(name: &'static str, kind: ParamKind) -> Self {
        Self { name, kind, required: false, default: None }
    }

    pub fn optional_with_default(name: &'static str, kind: ParamKind, default: JsonValue) -> Self {
        Self { name, kind, required: false, default: Some(default) }
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<Reply>> + Send>>;
type HandlerFn = Arc<dyn Fn(Params) -> HandlerFuture + Send + Sync>;

struct MethodEntry {
    schema: Vec<ParamSpec>,
    handler: HandlerFn,
    guarded: bool,
}

/// Extension point for request authorization on guarded methods.
///
/// The identity model is deliberately unsettled: implementations receive
/// only the method name and return an [`ErrorInfo`] of their choosing to
/// deny. The stock policy is [`PermitAll`].
pub trait AuthPolicy: Send + Sync {
    fn authorize(&self, method: &str) -> Result<(), ErrorInfo>;
}

/// Admits every call. The only policy in service today.
pub struct PermitAll;

impl AuthPolicy for PermitAll {
    fn authorize(&self, _method: &str) -> Result<(), ErrorInfo> {
        Ok(())
    }
}

/// A named registry of RPC methods.
pub struct Service {
    name: String,
    methods: HashMap<String, MethodEntry>,
    auth: Arc<dyn AuthPolicy>,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_auth(name, Arc::new(PermitAll))
    }

    pub fn with_auth(name: impl Into<String>, auth: Arc<dyn AuthPolicy>) -> Self {
        Self { name: name.into(), methods: HashMap::new(), auth }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store `handler` under `name`. Registering the same name twice
    /// silently replaces the earlier entry; last registration wins.
    pub fn register<F, Fut>(&mut self, name: &str, schema: Vec<ParamSpec>, handler: F)
    where
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Reply>> + Send + 'static,
    {
        self.insert(name, schema, handler, false);
    }

    /// Like [`Service::register`], but the auth policy runs before every
    /// invocation of this method.
    pub fn register_guarded<F, Fut>(&mut self, name: &str, schema: Vec<ParamSpec>, handler: F)
    where
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Reply>> + Send + 'static,
    {
        self.insert(name, schema, handler, true);
    }

    fn insert<F, Fut>(&mut self, name: &str, schema: Vec<ParamSpec>, handler: F, guarded: bool)
    where
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Reply>> + Send + 'static,
    {
        let handler: HandlerFn = Arc::new(move |params| Box::pin(handler(params)));
        self.methods.insert(name.to_string(), MethodEntry { schema, handler, guarded });
    }

    /// Registered method names, for status surfaces.
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve and run one request. Never fails: every internal fault is
    /// converted into an error response, so either transport can deliver
    /// the outcome uniformly.
    pub async fn invoke(&self, request: Request) -> Response {
        let Some(entry) = self.methods.get(&request.method) else {
            return Response::failure(
                ErrorCode::NoSuchMethod,
                format!("no method \"{}\" on service \"{}\"", request.method, self.name),
            );
        };

        if entry.guarded {
            if let Err(denied) = self.auth.authorize(&request.method) {
                debug!("{}.{} denied by auth policy", self.name, request.method);
                return Response::from_error(denied);
            }
        }

        let bound = match bind_params(&entry.schema, request.params) {
            Ok(bound) => bound,
            Err(problem) => {
                error!("invoke {}.{}: {problem}", self.name, request.method);
                return Response::failure(
                    ErrorCode::InvokeFailed,
                    format!("invoking \"{}\" failed", request.method),
                );
            }
        };

        // The handler future runs as its own task so that a panic inside
        // it surfaces as a join error here instead of tearing down the
        // transport session.
        match tokio::spawn((entry.handler)(bound)).await {
            Ok(Ok(Reply::Value(value))) => Response::success(value),
            Ok(Ok(Reply::Response(response))) => response,
            Ok(Err(fault)) => {
                error!("invoke {}.{} failed: {fault:#}", self.name, request.method);
                Response::failure(
                    ErrorCode::InvokeFailed,
                    format!("invoking \"{}\" failed", request.method),
                )
            }
            Err(join_error) => {
                error!("invoke {}.{} panicked: {join_error}", self.name, request.method);
                Response::failure(
                    ErrorCode::InvokeFailed,
                    format!("invoking \"{}\" failed", request.method),
                )
            }
        }
    }
}

/// Check `params` against the schema and inject declared defaults.
fn bind_params(schema: &[ParamSpec], params: Params) -> Result<Params, String> {
    for name in params.keys() {
        if !schema.iter().any(|spec| spec.name == name) {
            return Err(format!("unknown parameter \"{name}\""));
        }
    }

    let mut bound = params;
    for spec in schema {
        match bound.get(spec.name) {
            Some(value) => {
                if !spec.kind.admits(value) {
                    return Err(format!(
                        "parameter \"{}\" must be {}",
                        spec.name,
                        spec.kind.describe()
                    ));
                }
            }
            None if spec.required => {
                return Err(format!("missing required parameter \"{}\"", spec.name));
            }
            None => {
                if let Some(default) = &spec.default {
                    bound.insert(spec.name.to_string(), default.clone());
                }
            }
        }
    }
    Ok(bound)
}

/// Accessors for bound parameters. Binding has already checked the kind,
/// so these only fail on schema/handler drift; propagate with `?` and
/// the dispatcher reports the fault.
pub fn str_param(params: &Params, name: &str) -> anyhow::Result<String> {
    params
        .get(name)
        .and_then(JsonValue::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| anyhow::anyhow!("parameter \"{name}\" is missing or not a string"))
}

pub fn bool_param(params: &Params, name: &str) -> anyhow::Result<bool> {
    params
        .get(name)
        .and_then(JsonValue::as_bool)
        .ok_or_else(|| anyhow::anyhow!("parameter \"{name}\" is missing or not a boolean"))
}

pub fn int_param(params: &Params, name: &str) -> anyhow::Result<i64> {
    params
        .get(name)
        .and_then(JsonValue::as_i64)
        .ok_or_else(|| anyhow::anyhow!("parameter \"{name}\" is missing or not an integer"))
}

pub fn object_param(params: &Params, name: &str) -> anyhow::Result<JsonMap<String, JsonValue>> {
    params
        .get(name)
        .and_then(JsonValue::as_object)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("parameter \"{name}\" is missing or not an object"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: JsonValue) -> Params {
        match value {
            JsonValue::Object(map) => map,
            _ => panic!("test params must be an object"),
        }
    }

    fn echo_service() -> Service {
        let mut service = Service::new("test");
        service.register(
            "echo",
            vec![ParamSpec::required("text", ParamKind::Str)],
            |params| async move {
                let text = str_param(&params, "text")?;
                Ok(Reply::ok(json!({ "echo": text })))
            },
        );
        service
    }

    #[tokio::test]
    async fn registered_method_returns_success() {
        let service = echo_service();
        let response = service
            .invoke(Request::new("echo", params(json!({ "text": "hi" }))))
            .await;
        assert!(response.is_success());
        assert_eq!(response.result, Some(json!({ "echo": "hi" })));
    }

    #[tokio::test]
    async fn unknown_method_reports_no_such_method() {
        let service = echo_service();
        let response = service
            .invoke(Request::new("nope", params(json!({ "anything": 1 }))))
            .await;
        let error = response.error.expect("must fail");
        assert_eq!(error.code, ErrorCode::NoSuchMethod.as_i64());
        assert!(error.message.contains("nope"));
        assert!(response.result.is_none());
    }

    #[tokio::test]
    async fn handler_with_no_value_yields_null_result() {
        let mut service = Service::new("test");
        service.register("noop", Vec::new(), |_params| async move { Ok(Reply::none()) });
        let response = service.invoke(Request::new("noop", Params::new())).await;
        assert!(response.is_success());
        assert_eq!(response.result, Some(JsonValue::Null));
    }

    #[tokio::test]
    async fn prebuilt_response_passes_through_unmodified() {
        let mut service = Service::new("test");
        service.register("conflict", Vec::new(), |_params| async move {
            Ok(Reply::domain_error(ErrorCode::DatabaseFailed, "record conflict"))
        });
        let response = service.invoke(Request::new("conflict", Params::new())).await;
        let error = response.error.expect("domain error");
        assert_eq!(error.code, ErrorCode::DatabaseFailed.as_i64());
        assert_eq!(error.message, "record conflict");
    }

    #[tokio::test]
    async fn handler_fault_is_sanitized() {
        let mut service = Service::new("test");
        service.register("broken", Vec::new(), |_params| async move {
            Err(anyhow::anyhow!("secret connection string leaked"))
        });
        let response = service.invoke(Request::new("broken", Params::new())).await;
        let error = response.error.expect("must fail");
        assert_eq!(error.code, ErrorCode::InvokeFailed.as_i64());
        assert!(error.message.contains("broken"));
        assert!(!error.message.contains("secret"));
    }

    #[tokio::test]
    async fn handler_panic_is_contained() {
        let mut service = Service::new("test");
        service.register("explode", Vec::new(), |_params| async move {
            if true {
                panic!("handler bug with internal detail");
            }
            Ok(Reply::none())
        });
        let response = service.invoke(Request::new("explode", Params::new())).await;
        let error = response.error.expect("must fail");
        assert_eq!(error.code, ErrorCode::InvokeFailed.as_i64());
        assert!(!error.message.contains("internal detail"));
    }

    #[tokio::test]
    async fn schema_rejects_missing_extra_and_mistyped_params() {
        let service = echo_service();

        let missing = service.invoke(Request::new("echo", Params::new())).await;
        assert_eq!(
            missing.error.expect("missing param").code,
            ErrorCode::InvokeFailed.as_i64()
        );

        let extra = service
            .invoke(Request::new("echo", params(json!({ "text": "x", "bogus": 1 }))))
            .await;
        assert_eq!(extra.error.expect("extra param").code, ErrorCode::InvokeFailed.as_i64());

        let mistyped = service
            .invoke(Request::new("echo", params(json!({ "text": 5 }))))
            .await;
        assert_eq!(
            mistyped.error.expect("mistyped param").code,
            ErrorCode::InvokeFailed.as_i64()
        );
    }

    #[tokio::test]
    async fn schema_injects_declared_default() {
        let mut service = Service::new("test");
        service.register(
            "page",
            vec![ParamSpec::optional_with_default("count", ParamKind::Int, json!(20))],
            |params| async move {
                let count = int_param(&params, "count")?;
                Ok(Reply::ok(json!(count)))
            },
        );
        let response = service.invoke(Request::new("page", Params::new())).await;
        assert_eq!(response.result, Some(json!(20)));

        let response = service
            .invoke(Request::new("page", params(json!({ "count": 3 }))))
            .await;
        assert_eq!(response.result, Some(json!(3)));
    }

    #[tokio::test]
    async fn duplicate_registration_last_wins() {
        let mut service = Service::new("test");
        service.register("which", Vec::new(), |_params| async move {
            Ok(Reply::ok(json!("first")))
        });
        service.register("which", Vec::new(), |_params| async move {
            Ok(Reply::ok(json!("second")))
        });
        let response = service.invoke(Request::new("which", Params::new())).await;
        assert_eq!(response.result, Some(json!("second")));
    }

    struct DenyEverything;

    impl AuthPolicy for DenyEverything {
        fn authorize(&self, method: &str) -> Result<(), ErrorInfo> {
            Err(ErrorInfo { code: 900, message: format!("\"{method}\" is not permitted") })
        }
    }

    #[tokio::test]
    async fn guarded_method_consults_the_auth_policy() {
        let mut service = Service::with_auth("test", Arc::new(DenyEverything));
        service.register_guarded("secret", Vec::new(), |_params| async move {
            Ok(Reply::ok(json!("should not run")))
        });
        service.register("open", Vec::new(), |_params| async move {
            Ok(Reply::ok(json!("ran")))
        });

        let denied = service.invoke(Request::new("secret", Params::new())).await;
        let error = denied.error.expect("denied");
        assert_eq!(error.code, 900);
        assert!(error.message.contains("secret"));

        // Unguarded methods never consult the policy.
        let open = service.invoke(Request::new("open", Params::new())).await;
        assert_eq!(open.result, Some(json!("ran")));
    }

    #[tokio::test]
    async fn permit_all_admits_guarded_methods() {
        let mut service = Service::new("test");
        service.register_guarded("guarded", Vec::new(), |_params| async move {
            Ok(Reply::ok(json!("ok")))
        });
        let response = service.invoke(Request::new("guarded", Params::new())).await;
        assert_eq!(response.result, Some(json!("ok")));
    }

    #[test]
    fn method_names_are_sorted() {
        let mut service = Service::new("test");
        service.register("b", Vec::new(), |_p| async move { Ok(Reply::none()) });
        service.register("a", Vec::new(), |_p| async move { Ok(Reply::none()) });
        assert_eq!(service.method_names(), vec!["a", "b"]);
    }
}
