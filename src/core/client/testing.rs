//! Scripted in-memory transport shared by unit tests across the crate.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use super::{
    ApiClient, AuthConfig, HttpRequest, HttpResponse, HttpTransport, TransportError,
};
use crate::core::config::Settings;
use crate::core::credential::{Credential, CredentialStore};

pub(crate) const AUTH_URL: &str = "http://backend.test/api/oauth/token";
pub(crate) const DAG_URL: &str = "http://backend.test/api/oge-dag-22";
pub(crate) const CATALOG_URL: &str = "http://backend.test/api/asset/batch-result/catalog";

#[derive(Clone)]
enum Reply {
    Status(u16, String),
    Fail(TransportError),
}

struct Route {
    fragment: String,
    queued: VecDeque<Reply>,
    fallback: Option<Reply>,
}

#[derive(Default)]
pub(crate) struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with_route<F: FnOnce(&mut Route)>(&self, fragment: &str, f: F) {
        let mut routes = self.routes.lock().unwrap();
        if let Some(route) = routes.iter_mut().find(|r| r.fragment == fragment) {
            f(route);
            return;
        }
        let mut route = Route {
            fragment: fragment.to_string(),
            queued: VecDeque::new(),
            fallback: None,
        };
        f(&mut route);
        routes.push(route);
    }

    /// Queue a single response for requests whose URL contains `fragment`.
    pub(crate) fn once(&self, fragment: &str, status: u16, body: impl Into<String>) -> &Self {
        let reply = Reply::Status(status, body.into());
        self.with_route(fragment, |r| r.queued.push_back(reply));
        self
    }

    pub(crate) fn once_json(&self, fragment: &str, body: Value) -> &Self {
        self.once(fragment, 200, body.to_string())
    }

    /// Response served whenever the queue for `fragment` is empty.
    pub(crate) fn always(&self, fragment: &str, status: u16, body: impl Into<String>) -> &Self {
        let reply = Reply::Status(status, body.into());
        self.with_route(fragment, |r| r.fallback = Some(reply));
        self
    }

    pub(crate) fn always_json(&self, fragment: &str, body: Value) -> &Self {
        self.always(fragment, 200, body.to_string())
    }

    pub(crate) fn fail_once(&self, fragment: &str, err: TransportError) -> &Self {
        self.with_route(fragment, |r| r.queued.push_back(Reply::Fail(err)));
        self
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, fragment: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.contains(fragment))
            .count()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = request.url.clone();
        self.requests.lock().unwrap().push(request);

        let reply = {
            let mut routes = self.routes.lock().unwrap();
            routes
                .iter_mut()
                .find(|r| url.contains(&r.fragment))
                .and_then(|r| r.queued.pop_front().or_else(|| r.fallback.clone()))
        };

        match reply {
            Some(Reply::Status(status, body)) => Ok(HttpResponse { status, body }),
            Some(Reply::Fail(err)) => Err(err),
            None => Ok(HttpResponse {
                status: 404,
                body: format!("no scripted response for {}", url),
            }),
        }
    }
}

pub(crate) fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.backend.auth_url = AUTH_URL.to_string();
    settings.backend.dag_base_url = DAG_URL.to_string();
    settings.backend.catalog_url = CATALOG_URL.to_string();
    settings.auth.username = "edu_admin".to_string();
    settings.auth.password = "pw".to_string();
    settings.auth.client_secret = "cs".to_string();
    settings.defaults.user_id = "user-1".to_string();
    settings
}

pub(crate) fn client_for(transport: Arc<ScriptedTransport>, initial: Option<&str>) -> Arc<ApiClient> {
    let settings = test_settings();
    Arc::new(ApiClient::new(
        transport,
        CredentialStore::new(initial.map(Credential::new)),
        AuthConfig::from_settings(&settings),
    ))
}

pub(crate) fn token_response(token: &str) -> Value {
    serde_json::json!({ "code": 200, "data": { "token": token, "tokenHead": "Bearer " } })
}
